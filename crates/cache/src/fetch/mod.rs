//! Remote fetchers.
//!
//! Fetchers only move bytes from a remote onto the local disk and report the
//! transfer as events. They never decide whether a fetch is needed and never
//! publish into the cache; that is the store's job.

pub mod git;
pub mod http;

pub use git::{GitCli, GitClient, GitFetcher};
pub use http::{HttpClient, HttpFetcher, HttpResponse, MemoryHttpClient};

#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
