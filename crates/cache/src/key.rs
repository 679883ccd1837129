//! Deterministic mapping from artifact descriptors to cache paths.
//!
//! ```text
//! <root>/
//!   files/
//!     <sha256 of content>          # verified HTTP downloads
//!   git/
//!     <sha256 of repo \0 commit>   # working trees pinned at a commit
//! ```
//!
//! HTTP entries are keyed by the digest the descriptor promises, never by the
//! URL or a server-supplied filename, so upstream naming cannot steer where
//! content lands.

use crate::artifact::{Artifact, GitCommit, RemoteFile};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Subdirectory holding verified HTTP downloads.
pub const FILES_DIR: &str = "files";

/// Subdirectory holding git working trees.
pub const GIT_DIR: &str = "git";

/// Resolves descriptors to their location under a cache root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyResolver {
    root: PathBuf,
}

impl CacheKeyResolver {
    /// Create a resolver for the given cache root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The bare key for an artifact.
    #[must_use]
    pub fn key(artifact: &Artifact) -> String {
        match artifact {
            Artifact::Http(file) => Self::file_key(file),
            Artifact::Git(commit) => Self::git_key(commit),
        }
    }

    /// Key of an HTTP file: its expected digest.
    #[must_use]
    pub fn file_key(file: &RemoteFile) -> String {
        file.sha256.to_hex()
    }

    /// Key of a git commit: digest of repository and commit.
    #[must_use]
    pub fn git_key(commit: &GitCommit) -> String {
        let mut hasher = Sha256::new();
        hasher.update(commit.repository.as_bytes());
        // Separator keeps ("ab", "c") and ("a", "bc") apart.
        hasher.update([0u8]);
        hasher.update(commit.commit.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Cache path for any artifact.
    #[must_use]
    pub fn resolve(&self, artifact: &Artifact) -> PathBuf {
        match artifact {
            Artifact::Http(file) => self.resolve_file(file),
            Artifact::Git(commit) => self.resolve_git(commit),
        }
    }

    /// Cache path for an HTTP file.
    #[must_use]
    pub fn resolve_file(&self, file: &RemoteFile) -> PathBuf {
        self.root.join(FILES_DIR).join(Self::file_key(file))
    }

    /// Cache path for a git working tree.
    #[must_use]
    pub fn resolve_git(&self, commit: &GitCommit) -> PathBuf {
        self.root.join(GIT_DIR).join(Self::git_key(commit))
    }
}
