//! Git clone and checkout.
//!
//! Working trees are written by the `git` executable, so everything here
//! operates on the host filesystem.

use crate::error::{Error, Result};
use crate::fs::{Filesystem, OsFilesystem, Staged};
use async_trait::async_trait;
use depot_events::{Event, EventSink, emit_fetch_completed, emit_fetch_failed, emit_fetch_started};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Minimal git capability needed to pin a working tree at a commit.
#[async_trait]
pub trait GitClient: Send + Sync + fmt::Debug {
    /// Clone `repository` into `destination` without checking anything out.
    ///
    /// Failures are [`Error::Transfer`].
    async fn clone_repository(&self, repository: &str, destination: &Path) -> Result<()>;

    /// Check out `commit` in `worktree` as a detached `HEAD`.
    ///
    /// Failures are [`Error::Checkout`].
    async fn checkout(&self, worktree: &Path, repository: &str, commit: &str) -> Result<()>;

    /// The full hash `HEAD` points at in `worktree`.
    async fn head(&self, worktree: &Path) -> Result<String>;
}

/// [`GitClient`] driving the `git` executable.
///
/// Credential prompts are disabled so an unreachable private repository
/// fails instead of blocking, and child processes are killed when the
/// operation is dropped.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    /// Use `git` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific git executable.
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        debug!(?command, "Running git");
        command
            .output()
            .await
            .map_err(|e| Error::io(e, &self.program, "spawn"))
    }
}

fn stderr_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("git exited with {}", output.status)
    } else {
        stderr.to_string()
    }
}

#[async_trait]
impl GitClient for GitCli {
    async fn clone_repository(&self, repository: &str, destination: &Path) -> Result<()> {
        let output = self
            .run([
                OsStr::new("clone"),
                OsStr::new("--quiet"),
                OsStr::new("--no-checkout"),
                OsStr::new("--"),
                OsStr::new(repository),
                destination.as_os_str(),
            ])
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::transfer(repository, stderr_message(&output)))
        }
    }

    async fn checkout(&self, worktree: &Path, repository: &str, commit: &str) -> Result<()> {
        if commit.is_empty() || commit.starts_with('-') {
            return Err(Error::checkout(repository, commit, "not a commit hash"));
        }
        let output = self
            .run([
                OsStr::new("-C"),
                worktree.as_os_str(),
                OsStr::new("checkout"),
                OsStr::new("--quiet"),
                OsStr::new("--detach"),
                OsStr::new(commit),
            ])
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::checkout(repository, commit, stderr_message(&output)))
        }
    }

    async fn head(&self, worktree: &Path) -> Result<String> {
        // An explicit git dir stops git from walking up into an enclosing
        // repository when the worktree has lost its own.
        let mut git_dir = OsString::from("--git-dir=");
        git_dir.push(worktree.join(".git"));
        let output = self
            .run([git_dir.as_os_str(), OsStr::new("rev-parse"), OsStr::new("HEAD")])
            .await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(Error::io_no_path(
                std::io::Error::other(stderr_message(&output)),
                "rev-parse",
            ))
        }
    }
}

/// Whether `head` is the commit named by `commit`.
///
/// Abbreviated hashes of at least seven characters match by prefix.
fn head_matches(head: &str, commit: &str) -> bool {
    let head = head.to_ascii_lowercase();
    let commit = commit.to_ascii_lowercase();
    head == commit || (commit.len() >= 7 && head.starts_with(&commit))
}

/// Produces working trees checked out at a commit.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    client: Arc<dyn GitClient>,
    host: Arc<dyn Filesystem>,
}

impl GitFetcher {
    /// Create a fetcher.
    #[must_use]
    pub fn new(client: Arc<dyn GitClient>) -> Self {
        Self {
            client,
            host: Arc::new(OsFilesystem),
        }
    }

    /// Whether `worktree` is a checkout whose `HEAD` is `commit`.
    pub async fn is_checked_out(&self, worktree: &Path, commit: &str) -> bool {
        if !self.host.is_dir(&worktree.join(".git")) {
            return false;
        }
        match self.client.head(worktree).await {
            Ok(head) => head_matches(&head, commit),
            Err(e) => {
                debug!(worktree = %worktree.display(), error = %e, "Cannot resolve HEAD");
                false
            }
        }
    }

    /// Clone `repository` and check out `commit` at `destination`.
    ///
    /// `destination` is expected to be a staging directory owned by the
    /// caller that does not exist yet. It is removed if the clone or checkout
    /// fails, or the future is dropped.
    #[instrument(name = "git_fetch", skip_all, fields(repository = %repository, commit = %commit))]
    pub async fn fetch(
        &self,
        repository: &str,
        commit: &str,
        destination: &Path,
        sink: &EventSink,
    ) -> Result<()> {
        emit_fetch_started!("git", repository);
        let started = Instant::now();
        match self.clone_and_checkout(repository, commit, destination, sink).await {
            Ok(()) => {
                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                emit_fetch_completed!("git", repository, duration_ms);
                Ok(())
            }
            Err(e) => {
                emit_fetch_failed!("git", repository, e);
                Err(e)
            }
        }
    }

    async fn clone_and_checkout(
        &self,
        repository: &str,
        commit: &str,
        destination: &Path,
        sink: &EventSink,
    ) -> Result<()> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }

        let staged = Staged::dir(Arc::clone(&self.host), destination.to_path_buf());

        sink.emit(Event::CloneStarted {
            repository: repository.to_string(),
        });
        self.client.clone_repository(repository, destination).await?;
        self.client.checkout(destination, repository, commit).await?;
        sink.emit(Event::CheckoutCompleted {
            repository: repository.to_string(),
            commit: commit.to_string(),
        });

        staged.disarm();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Writes a marker file instead of running git.
    #[derive(Debug)]
    struct FakeGit {
        head: String,
        fail_checkout: bool,
    }

    #[async_trait]
    impl GitClient for FakeGit {
        async fn clone_repository(&self, _repository: &str, destination: &Path) -> Result<()> {
            std::fs::create_dir_all(destination.join(".git"))
                .map_err(|e| Error::io(e, destination, "mkdir"))?;
            std::fs::write(destination.join("BUCK"), b"cxx_library()")
                .map_err(|e| Error::io(e, destination, "write"))
        }

        async fn checkout(&self, _worktree: &Path, repository: &str, commit: &str) -> Result<()> {
            if self.fail_checkout {
                return Err(Error::checkout(repository, commit, "reference is not a tree"));
            }
            Ok(())
        }

        async fn head(&self, _worktree: &Path) -> Result<String> {
            Ok(self.head.clone())
        }
    }

    const HEAD: &str = "c86550e93ca45ed48fd226184c3b996923251e07";

    fn fetcher(fail_checkout: bool) -> GitFetcher {
        GitFetcher::new(Arc::new(FakeGit {
            head: HEAD.to_string(),
            fail_checkout,
        }))
    }

    #[test]
    fn test_head_matches() {
        assert!(head_matches(HEAD, HEAD));
        assert!(head_matches(HEAD, &HEAD.to_uppercase()));
        assert!(head_matches(HEAD, "c86550e"));
        assert!(!head_matches(HEAD, "c8655"));
        assert!(!head_matches(HEAD, "0000000"));
    }

    #[tokio::test]
    async fn test_fetch_checks_out_into_destination() {
        let temp = TempDir::new().unwrap();
        let destination = temp.path().join("git").join("key");
        let (sink, mut receiver) = EventSink::channel();

        fetcher(false)
            .fetch("repo", HEAD, &destination, &sink)
            .await
            .unwrap();

        assert!(destination.join("BUCK").is_file());
        assert!(fetcher(false).is_checked_out(&destination, HEAD).await);
        assert!(!fetcher(false).is_checked_out(&temp.path().join("nope"), HEAD).await);

        drop(sink);
        let mut kinds = Vec::new();
        while let Some(event) = receiver.recv().await {
            kinds.push(event.kind());
        }
        assert_eq!(kinds, vec!["clone_started", "checkout_completed"]);
    }

    #[tokio::test]
    async fn test_directory_without_git_dir_is_not_checked_out() {
        let temp = TempDir::new().unwrap();
        let worktree = temp.path().join("key");
        std::fs::create_dir_all(&worktree).unwrap();
        std::fs::write(worktree.join("BUCK"), b"cxx_library()").unwrap();

        // The client would report a matching HEAD for any directory.
        assert!(!fetcher(false).is_checked_out(&worktree, HEAD).await);
    }

    #[tokio::test]
    async fn test_failed_checkout_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let destination = temp.path().join("key");

        let err = fetcher(true)
            .fetch("repo", HEAD, &destination, &EventSink::discard())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Checkout { .. }));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
