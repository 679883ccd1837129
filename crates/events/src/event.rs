//! Event type definitions for cache and fetch operations.
//!
//! Every operation on the download cache reports what it is doing as an
//! ordered sequence of [`Event`]s. Lifecycle events (hit, miss, publish) are
//! always cheap; transfer events only appear when the network is touched.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single step reported by a cache operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// A valid entry was already present; nothing will be fetched.
    CacheHit {
        /// Path of the cache entry.
        path: PathBuf,
    },
    /// No entry exists yet; it will be fetched.
    CacheMiss {
        /// Path the entry will be published at.
        path: PathBuf,
    },
    /// An entry exists but failed validation and will be replaced.
    CacheBusted {
        /// Path of the invalid entry.
        path: PathBuf,
    },
    /// An HTTP transfer started.
    DownloadStarted {
        /// Source URL.
        url: String,
        /// Content length announced by the server, if any.
        total_bytes: Option<u64>,
    },
    /// Bytes received so far for an HTTP transfer.
    DownloadProgress {
        /// Source URL.
        url: String,
        /// Bytes written to the staging file so far.
        downloaded: u64,
        /// Content length announced by the server, if any.
        total: Option<u64>,
    },
    /// An HTTP transfer finished writing its body.
    DownloadCompleted {
        /// Source URL.
        url: String,
        /// Total bytes received.
        bytes: u64,
    },
    /// A git clone started.
    CloneStarted {
        /// Repository being cloned.
        repository: String,
    },
    /// The requested commit was checked out.
    CheckoutCompleted {
        /// Repository that was cloned.
        repository: String,
        /// Commit now checked out.
        commit: String,
    },
    /// Downloaded content matched its expected hash.
    Verified {
        /// Path of the verified staging file.
        path: PathBuf,
        /// Hex digest that was verified.
        sha256: String,
    },
    /// An entry became visible at its cache path.
    Published {
        /// Cache path of the new entry.
        path: PathBuf,
    },
    /// A cache entry was copied or linked to a caller-supplied location.
    Materialized {
        /// Cache entry that was used.
        source: PathBuf,
        /// Location that now holds the content.
        target: PathBuf,
    },
}

impl Event {
    /// Returns `true` for events that only occur while talking to a remote.
    ///
    /// A pure cache hit never produces one of these.
    #[must_use]
    pub const fn is_transfer(&self) -> bool {
        matches!(
            self,
            Self::DownloadStarted { .. }
                | Self::DownloadProgress { .. }
                | Self::DownloadCompleted { .. }
                | Self::CloneStarted { .. }
                | Self::CheckoutCompleted { .. }
        )
    }

    /// Returns `true` for byte-count progress updates.
    #[must_use]
    pub const fn is_progress(&self) -> bool {
        matches!(self, Self::DownloadProgress { .. })
    }

    /// Short machine-readable name, matching the serialized tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CacheHit { .. } => "cache_hit",
            Self::CacheMiss { .. } => "cache_miss",
            Self::CacheBusted { .. } => "cache_busted",
            Self::DownloadStarted { .. } => "download_started",
            Self::DownloadProgress { .. } => "download_progress",
            Self::DownloadCompleted { .. } => "download_completed",
            Self::CloneStarted { .. } => "clone_started",
            Self::CheckoutCompleted { .. } => "checkout_completed",
            Self::Verified { .. } => "verified",
            Self::Published { .. } => "published",
            Self::Materialized { .. } => "materialized",
        }
    }

    /// Render the event as a single JSON line for machine consumption.
    #[must_use]
    pub fn to_json_line(&self) -> String {
        // Every field is a string, path, or integer, so serialization is infallible.
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"event\":\"{}\"}}", self.kind()))
    }
}
