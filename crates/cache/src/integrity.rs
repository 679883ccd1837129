//! Integrity checks for cached files.

use crate::fs::{Filesystem, blocking};
use crate::hash::{Sha256Hash, hash_reader};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Compares the content of a file against an expected digest.
#[derive(Debug, Clone)]
pub struct IntegrityChecker {
    fs: Arc<dyn Filesystem>,
}

impl IntegrityChecker {
    /// Create a checker reading through `fs`.
    #[must_use]
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self { fs }
    }

    /// Hash the file at `path`.
    pub fn compute(&self, path: &Path) -> io::Result<Sha256Hash> {
        hash_reader(self.fs.open(path)?)
    }

    /// Whether `path` is a regular file whose content hashes to `expected`.
    ///
    /// Absent, unreadable, or directory entries are simply invalid.
    #[must_use]
    pub fn is_valid(&self, path: &Path, expected: &Sha256Hash) -> bool {
        if !self.fs.is_file(path) {
            return false;
        }
        match self.compute(path) {
            Ok(actual) if actual == *expected => true,
            Ok(actual) => {
                debug!(path = %path.display(), %expected, %actual, "Cached file hash mismatch");
                false
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Cached file unreadable");
                false
            }
        }
    }

    /// [`IntegrityChecker::is_valid`] on the blocking pool.
    pub async fn check(&self, path: &Path, expected: &Sha256Hash) -> bool {
        let checker = self.clone();
        let (path, expected) = (path.to_path_buf(), *expected);
        blocking("verify cached file", move || Ok(checker.is_valid(&path, &expected)))
            .await
            .unwrap_or(false)
    }
}
