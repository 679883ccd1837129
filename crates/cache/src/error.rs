//! Error types for the download cache

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use crate::hash::Sha256Hash;
use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Fetched content did not hash to the expected value.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
#[error("hash mismatch: expected {expected}, got {actual}")]
#[diagnostic(code(depot::cache::hash_mismatch))]
pub struct HashMismatch {
    /// The hash the descriptor promised
    pub expected: Sha256Hash,
    /// The hash of the bytes actually received
    pub actual: Sha256Hash,
}

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Network or transport failure while fetching a remote artifact
    #[error("Failed to fetch {url}: {message}")]
    #[diagnostic(
        code(depot::fetch::transfer),
        help("Check network connectivity and that the source is reachable")
    )]
    Transfer {
        /// URL or repository that could not be fetched
        url: String,
        /// Description of the failure
        message: String,
    },

    /// Content was fetched but is not what the descriptor promised
    #[error("Downloaded file from {url} failed verification")]
    #[diagnostic(
        code(depot::fetch::download_file),
        help("The remote content changed or the expected hash is wrong; the cache was not modified")
    )]
    DownloadFile {
        /// URL the content came from
        url: String,
        /// The integrity failure
        #[source]
        source: HashMismatch,
    },

    /// The repository was cloned but the requested commit could not be checked out
    #[error("Failed to check out {commit} from {repository}: {message}")]
    #[diagnostic(
        code(depot::fetch::checkout),
        help("Verify that the commit exists and is reachable from the repository's refs")
    )]
    Checkout {
        /// Repository that was cloned
        repository: String,
        /// Commit that was requested
        commit: String,
        /// Description of the failure
        message: String,
    },

    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(depot::cache::io),
        help("Check file permissions and available disk space")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// Configuration error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(depot::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create a transfer error
    #[must_use]
    pub fn transfer(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transfer {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a download-file error wrapping a hash mismatch
    #[must_use]
    pub fn download_file(url: impl Into<String>, expected: Sha256Hash, actual: Sha256Hash) -> Self {
        Self::DownloadFile {
            url: url.into(),
            source: HashMismatch { expected, actual },
        }
    }

    /// Create a checkout error
    #[must_use]
    pub fn checkout(
        repository: impl Into<String>,
        commit: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Checkout {
            repository: repository.into(),
            commit: commit.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// The hash mismatch behind this error, if it is an integrity failure.
    #[must_use]
    pub fn hash_mismatch(&self) -> Option<&HashMismatch> {
        match self {
            Self::DownloadFile { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Returns `true` if the remote could not be reached or refused the request.
    #[must_use]
    pub const fn is_transfer(&self) -> bool {
        matches!(self, Self::Transfer { .. })
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
