//! Descriptors for the remote artifacts the cache can hold.
//!
//! Descriptors arrive already validated by the resolution layer; this module
//! only gives them a shape.

use crate::hash::Sha256Hash;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// A single file served over HTTP, pinned by its SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Where the file is downloaded from.
    pub url: Url,
    /// Digest the downloaded bytes must have.
    pub sha256: Sha256Hash,
}

impl RemoteFile {
    /// Create a descriptor.
    #[must_use]
    pub const fn new(url: Url, sha256: Sha256Hash) -> Self {
        Self { url, sha256 }
    }
}

impl fmt::Display for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#sha256={}", self.url, self.sha256)
    }
}

/// A git repository pinned at a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitCommit {
    /// Anything `git clone` accepts: URL, scp-style address, or local path.
    pub repository: String,
    /// Commit hash to check out.
    pub commit: String,
}

impl GitCommit {
    /// Create a descriptor.
    #[must_use]
    pub fn new(repository: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            commit: commit.into(),
        }
    }
}

impl fmt::Display for GitCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repository, self.commit)
    }
}

/// Any artifact the cache can hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Artifact {
    /// An HTTP file.
    Http(RemoteFile),
    /// A git checkout.
    Git(GitCommit),
}

impl From<RemoteFile> for Artifact {
    fn from(file: RemoteFile) -> Self {
        Self::Http(file)
    }
}

impl From<GitCommit> for Artifact {
    fn from(commit: GitCommit) -> Self {
        Self::Git(commit)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(file) => file.fmt(f),
            Self::Git(commit) => commit.fmt(f),
        }
    }
}
