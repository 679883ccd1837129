//! Property-based tests for cache key resolution.
//!
//! - Determinism: equal descriptors always resolve to the same path
//! - Sensitivity: a different hash or commit resolves elsewhere
//! - Containment: every path stays under its layout directory

use depot_cache::{Artifact, CacheKeyResolver, GitCommit, RemoteFile, Sha256Hash, Url};
use proptest::prelude::*;
use std::path::Path;

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn hash_strategy() -> impl Strategy<Value = Sha256Hash> {
    any::<[u8; 32]>().prop_map(Sha256Hash::from_bytes)
}

/// URLs including traversal segments and odd filenames.
fn url_strategy() -> impl Strategy<Value = Url> {
    (
        prop_oneof![Just("https"), Just("http")],
        "[a-z]{1,10}\\.(com|org|io)",
        prop::collection::vec(
            prop_oneof![
                "[A-Za-z0-9_.-]{1,12}".prop_map(String::from),
                Just("..".to_string()),
                Just("%2e%2e".to_string()),
            ],
            0..5,
        ),
    )
        .prop_map(|(scheme, host, segments)| {
            Url::parse(&format!("{scheme}://{host}/{}", segments.join("/"))).unwrap()
        })
}

fn commit_strategy() -> impl Strategy<Value = GitCommit> {
    (
        prop_oneof![
            "https://[a-z]{1,10}\\.com/[a-z]{1,8}/[a-z-]{1,12}\\.git".prop_map(String::from),
            "git@github\\.com:[a-z]{1,8}/[a-z-]{1,12}\\.git".prop_map(String::from),
            "/[a-z]{1,8}/\\.\\./[a-z]{1,8}".prop_map(String::from),
        ],
        "[0-9a-f]{40}".prop_map(String::from),
    )
        .prop_map(|(repository, commit)| GitCommit::new(repository, commit))
}

proptest! {
    #[test]
    fn file_path_is_deterministic(url in url_strategy(), hash in hash_strategy()) {
        let resolver = CacheKeyResolver::new("/cache");
        let a = Artifact::from(RemoteFile::new(url.clone(), hash));
        let b = Artifact::from(RemoteFile::new(url, hash));
        prop_assert_eq!(resolver.resolve(&a), resolver.resolve(&b));
    }

    #[test]
    fn file_path_ignores_url(a in url_strategy(), b in url_strategy(), hash in hash_strategy()) {
        let resolver = CacheKeyResolver::new("/cache");
        let path = resolver.resolve_file(&RemoteFile::new(a, hash));
        prop_assert_eq!(&path, &resolver.resolve_file(&RemoteFile::new(b, hash)));
        prop_assert_eq!(path.parent(), Some(Path::new("/cache/files")));
        let hex = hash.to_hex();
        prop_assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(hex.as_str()));
    }

    #[test]
    fn different_hash_different_path(url in url_strategy(), a in hash_strategy(), b in hash_strategy()) {
        prop_assume!(a != b);
        let resolver = CacheKeyResolver::new("/cache");
        prop_assert_ne!(
            resolver.resolve_file(&RemoteFile::new(url.clone(), a)),
            resolver.resolve_file(&RemoteFile::new(url, b))
        );
    }

    #[test]
    fn git_path_is_deterministic_and_contained(commit in commit_strategy()) {
        let resolver = CacheKeyResolver::new("/cache");
        let path = resolver.resolve_git(&commit);
        prop_assert_eq!(&path, &resolver.resolve_git(&commit.clone()));
        prop_assert_eq!(path.parent(), Some(Path::new("/cache/git")));
    }

    #[test]
    fn different_commit_different_path(a in commit_strategy(), b in commit_strategy()) {
        prop_assume!(a != b);
        let resolver = CacheKeyResolver::new("/cache");
        prop_assert_ne!(resolver.resolve_git(&a), resolver.resolve_git(&b));
    }
}
