//! Content-addressed download cache for depot
//!
//! This crate fetches remote artifacts exactly once per content identity and
//! serves repeat requests from disk:
//! - HTTP files pinned by SHA-256, stored under `<root>/files/<sha256>`
//! - Git repositories pinned at a commit, stored under `<root>/git/<key>`
//!
//! # Overview
//!
//! Every operation on [`CacheTasks`] returns a lazy
//! [`EventStream`](depot_events::EventStream) of progress
//! [`Event`](depot_events::Event)s. An entry is reused only after it passes
//! validation (hash match for files, `HEAD` match for checkouts); anything
//! else is re-fetched, verified, and published with a single atomic rename.
//! Content that does not match its expected hash never reaches the cache.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use depot_cache::{CacheTasks, RemoteFile, Url};
//!
//! let tasks = CacheTasks::from_env()?;
//! let file = RemoteFile::new(
//!     Url::parse("https://example.com/BUCK")?,
//!     "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9".parse()?,
//! );
//! tasks.download_using_cache(file, "vendor/BUCK").wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod config;
mod error;
pub mod fetch;
pub mod fs;
pub mod hash;
pub mod integrity;
pub mod key;
pub mod store;
pub mod tasks;

// Re-export error types at crate root
pub use error::{Error, HashMismatch, Result};

// Re-export main types
pub use artifact::{Artifact, GitCommit, RemoteFile};
pub use config::CacheConfig;
pub use fetch::{GitCli, GitClient, GitFetcher, HttpClient, HttpFetcher, HttpResponse, MemoryHttpClient};
#[cfg(feature = "reqwest")]
pub use fetch::ReqwestClient;
pub use fs::{Filesystem, MemoryFilesystem, OsFilesystem};
pub use hash::Sha256Hash;
pub use integrity::IntegrityChecker;
pub use key::CacheKeyResolver;
pub use store::CacheStore;
pub use tasks::CacheTasks;

pub use depot_events::{Event, EventSink, EventStream};
pub use url::Url;
