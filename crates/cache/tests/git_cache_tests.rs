//! Integration tests for cached git checkouts.
//!
//! A throwaway repository is built with the `git` executable; those tests
//! are skipped when `git` is not installed. Concurrency is exercised with a
//! fake client that needs no git at all.

use async_trait::async_trait;
use depot_cache::{
    Artifact, CacheConfig, CacheTasks, Error, Event, GitCli, GitClient, GitCommit,
    MemoryHttpClient, OsFilesystem, Result,
};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::Notify;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
        .args(args)
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// A repository with two commits; returns (path, first commit, second commit).
fn repository(temp: &TempDir) -> (PathBuf, String, String) {
    let repo = temp.path().join("upstream");
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "--quiet"]);

    std::fs::write(repo.join("BUCK"), "cxx_library(name = 'test-lib-d')\n").unwrap();
    git(&repo, &["add", "BUCK"]);
    git(&repo, &["commit", "--quiet", "-m", "first"]);
    let first = git(&repo, &["rev-parse", "HEAD"]);

    std::fs::write(repo.join("BUCK"), "cxx_library(name = 'changed')\n").unwrap();
    std::fs::write(repo.join("extra.txt"), "added later\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "--quiet", "-m", "second"]);
    let second = git(&repo, &["rev-parse", "HEAD"]);

    (repo, first, second)
}

fn tasks(root: &Path) -> CacheTasks {
    tasks_with(root, Arc::new(GitCli::new()))
}

fn tasks_with(root: &Path, git: Arc<dyn GitClient>) -> CacheTasks {
    CacheTasks::new(
        CacheConfig::new(root),
        Arc::new(OsFilesystem),
        Arc::new(MemoryHttpClient::new()),
        git,
    )
}

/// Fake git that stamps each clone with the number of the writer that made
/// it. When gated, the first clone blocks until released.
#[derive(Debug, Default)]
struct StampingGit {
    clones: AtomicUsize,
    gated: bool,
    entered: Notify,
    release: Notify,
}

impl StampingGit {
    fn gated() -> Self {
        Self {
            gated: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl GitClient for StampingGit {
    async fn clone_repository(&self, _repository: &str, destination: &Path) -> Result<()> {
        let writer = self.clones.fetch_add(1, Ordering::SeqCst) + 1;
        std::fs::create_dir_all(destination.join(".git"))
            .map_err(|e| Error::io(e, destination, "mkdir"))?;
        std::fs::write(destination.join("writer"), writer.to_string())
            .map_err(|e| Error::io(e, destination, "write"))?;
        if self.gated && writer == 1 {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(())
    }

    async fn checkout(&self, worktree: &Path, _repository: &str, commit: &str) -> Result<()> {
        std::fs::write(worktree.join(".git/HEAD"), commit)
            .map_err(|e| Error::io(e, worktree, "write"))
    }

    async fn head(&self, worktree: &Path) -> Result<String> {
        std::fs::read_to_string(worktree.join(".git/HEAD"))
            .map_err(|e| Error::io(e, worktree, "read"))
    }
}

const PINNED: &str = "c86550e93ca45ed48fd226184c3b996923251e07";

#[tokio::test]
async fn test_cache_works_for_git() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let (repo, first, _) = repository(&temp);
    let tasks = tasks(&temp.path().join("cache"));
    let commit = GitCommit::new(repo.to_string_lossy(), first.clone());

    let target1 = temp.path().join("target1");
    let events = tasks
        .clone_and_checkout_using_cache(commit.clone(), &target1)
        .collect_events()
        .await
        .unwrap();
    assert!(target1.join("BUCK").exists());
    assert!(events.iter().any(|e| matches!(e, Event::CloneStarted { .. })));

    // The target may already exist.
    let target2 = temp.path().join("target2");
    std::fs::create_dir_all(&target2).unwrap();
    let events = tasks
        .clone_and_checkout_using_cache(commit.clone(), &target2)
        .collect_events()
        .await
        .unwrap();

    assert!(events.iter().all(|e| !e.is_transfer()));
    assert!(matches!(events.first(), Some(Event::CacheHit { .. })));
    for target in [&target1, &target2] {
        assert_eq!(
            std::fs::read_to_string(target.join("BUCK")).unwrap(),
            "cxx_library(name = 'test-lib-d')\n"
        );
        assert!(!target.join("extra.txt").exists());
        assert_eq!(git(target, &["rev-parse", "HEAD"]), first);
    }
}

#[tokio::test]
async fn test_commits_get_separate_entries() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let (repo, first, second) = repository(&temp);
    let tasks = tasks(&temp.path().join("cache"));
    let old = GitCommit::new(repo.to_string_lossy(), first);
    let new = GitCommit::new(repo.to_string_lossy(), second);

    tasks.store().ensure(old.clone()).wait().await.unwrap();
    tasks.store().ensure(new.clone()).wait().await.unwrap();

    let old_path = tasks.cache_path(&Artifact::from(old));
    let new_path = tasks.cache_path(&Artifact::from(new));
    assert_ne!(old_path, new_path);
    assert!(!old_path.join("extra.txt").exists());
    assert!(new_path.join("extra.txt").exists());
}

#[tokio::test]
async fn test_stale_checkout_is_replaced() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let (repo, first, second) = repository(&temp);
    let tasks = tasks(&temp.path().join("cache"));
    let commit = GitCommit::new(repo.to_string_lossy(), first.clone());
    let path = tasks.cache_path(&Artifact::from(commit.clone()));

    tasks.store().ensure(commit.clone()).wait().await.unwrap();
    // Move the cached checkout off its pinned commit.
    git(&path, &["checkout", "--quiet", "--detach", &second]);
    assert!(!tasks.is_cached(&commit.clone().into()).await);

    let events = tasks.store().ensure(commit.clone()).collect_events().await.unwrap();

    assert_eq!(events[0], Event::CacheBusted { path: path.clone() });
    assert_eq!(git(&path, &["rev-parse", "HEAD"]), first);
}

#[tokio::test]
async fn test_unknown_commit_is_checkout_error() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let (repo, _, _) = repository(&temp);
    let root = temp.path().join("cache");
    let commit = GitCommit::new(repo.to_string_lossy(), "0123456789abcdef0123456789abcdef01234567");

    let err = tasks(&root).store().ensure(commit).wait().await.unwrap_err();

    assert!(matches!(err, Error::Checkout { .. }), "{err:?}");
    assert_eq!(std::fs::read_dir(root.join("git")).unwrap().count(), 0);
}

#[tokio::test]
async fn test_unreachable_repository_is_transfer_error() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let commit = GitCommit::new(
        temp.path().join("does-not-exist").to_string_lossy(),
        "0123456789abcdef0123456789abcdef01234567",
    );

    let err = tasks(&temp.path().join("cache"))
        .clone_and_checkout_using_cache(commit, temp.path().join("target"))
        .wait()
        .await
        .unwrap_err();

    assert!(err.is_transfer(), "{err:?}");
    assert!(!temp.path().join("target").exists());
}

#[tokio::test]
async fn test_late_writer_keeps_published_checkout() {
    let temp = TempDir::new().unwrap();
    let git = Arc::new(StampingGit::gated());
    let tasks = tasks_with(&temp.path().join("cache"), Arc::clone(&git) as Arc<dyn GitClient>);
    let commit = GitCommit::new("https://example.com/repo.git", PINNED);
    let path = tasks.cache_path(&Artifact::from(commit.clone()));

    // The first writer stalls inside its clone.
    let late = tokio::spawn(tasks.store().ensure(commit.clone()).wait());
    git.entered.notified().await;

    // A second writer publishes in the meantime.
    tasks.store().ensure(commit.clone()).wait().await.unwrap();
    assert_eq!(std::fs::read_to_string(path.join("writer")).unwrap(), "2");

    git.release.notify_one();
    late.await.unwrap().unwrap();

    assert_eq!(std::fs::read_to_string(path.join("writer")).unwrap(), "2");
    let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries, vec![path]);
}

#[tokio::test]
async fn test_concurrent_checkouts_of_same_key_all_succeed() {
    let temp = TempDir::new().unwrap();
    let tasks = tasks_with(&temp.path().join("cache"), Arc::new(StampingGit::default()));
    let commit = GitCommit::new("https://example.com/repo.git", PINNED);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let stream = tasks
                .clone_and_checkout_using_cache(commit.clone(), temp.path().join(format!("t{i}")));
            tokio::spawn(stream.wait())
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let path = tasks.cache_path(&Artifact::from(commit.clone()));
    assert!(tasks.is_cached(&commit.into()).await);
    for i in 0..8 {
        let target = temp.path().join(format!("t{i}"));
        assert!(target.join(".git/HEAD").is_file());
        assert!(target.join("writer").is_file());
    }
    // Every staging directory was either published or removed.
    assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_entry_without_git_dir_ignores_enclosing_repository() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let (repo, _, second) = repository(&temp);
    // The cache lives inside a checkout whose HEAD is the pinned commit.
    let tasks = tasks(&repo.join("cache"));
    let commit = GitCommit::new(repo.to_string_lossy(), second);
    let path = tasks.cache_path(&Artifact::from(commit.clone()));

    tasks.store().ensure(commit.clone()).wait().await.unwrap();
    std::fs::remove_dir_all(path.join(".git")).unwrap();

    assert!(!tasks.is_cached(&commit.clone().into()).await);
    let events = tasks.store().ensure(commit).collect_events().await.unwrap();
    assert_eq!(events[0], Event::CacheBusted { path: path.clone() });
    assert!(path.join(".git").is_dir());
}
