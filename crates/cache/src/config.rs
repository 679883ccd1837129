//! Cache configuration and root directory discovery.

use crate::error::{Error, Result};
use dirs::{cache_dir, home_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Overrides the cache root.
pub const CACHE_DIR_ENV: &str = "DEPOT_CACHE_DIR";

/// Set to `1` or `true` to hard link materialized files instead of copying.
pub const LINK_FILES_ENV: &str = "DEPOT_LINK_FILES";

/// Default `User-Agent` for HTTP requests.
pub const DEFAULT_USER_AGENT: &str = concat!("depot/", env!("CARGO_PKG_VERSION"));

/// How the cache behaves and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding `files/` and `git/`.
    pub root: PathBuf,
    /// `User-Agent` sent with HTTP requests.
    pub user_agent: String,
    /// Hard link cached files into targets when the filesystem allows it.
    ///
    /// Linked targets share storage with the cache: editing one in place
    /// invalidates the entry, which is then re-fetched on next use.
    pub link_files: bool,
}

impl CacheConfig {
    /// Configuration with defaults for everything but the root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            link_files: false,
        }
    }

    /// Set the `User-Agent`.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Enable or disable hard linking.
    #[must_use]
    pub const fn with_link_files(mut self, link_files: bool) -> Self {
        self.link_files = link_files;
        self
    }

    /// Configuration from the environment.
    ///
    /// The root is the first writable candidate of `DEPOT_CACHE_DIR`,
    /// `$XDG_CACHE_HOME/depot`, the OS cache directory, `~/.depot/cache`, and
    /// `$TMPDIR/depot/cache`.
    pub fn from_env() -> Result<Self> {
        let inputs = RootInputs {
            override_dir: non_empty_var(CACHE_DIR_ENV).map(PathBuf::from),
            xdg_cache_home: non_empty_var("XDG_CACHE_HOME").map(PathBuf::from),
            os_cache_dir: cache_dir(),
            home_dir: home_dir(),
            temp_dir: std::env::temp_dir(),
        };
        let root = root_from_inputs(inputs)?;
        let link_files = non_empty_var(LINK_FILES_ENV)
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"));
        debug!(root = %root.display(), link_files, "Resolved cache configuration");
        Ok(Self::new(root).with_link_files(link_files))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Clone)]
struct RootInputs {
    override_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn root_from_inputs(inputs: RootInputs) -> Result<PathBuf> {
    let mut candidates = Vec::new();
    candidates.extend(inputs.override_dir);
    candidates.extend(inputs.xdg_cache_home.map(|p| p.join("depot")));
    candidates.extend(inputs.os_cache_dir.map(|p| p.join("depot")));
    candidates.extend(inputs.home_dir.map(|p| p.join(".depot/cache")));
    candidates.push(inputs.temp_dir.join("depot/cache"));

    candidates
        .into_iter()
        // Nix build sandboxes point HOME here and it is never writable.
        .filter(|path| !path.starts_with("/homeless-shelter"))
        .find(|path| is_writable_dir(path))
        .ok_or_else(|| Error::configuration("no writable cache directory found"))
}

fn is_writable_dir(path: &Path) -> bool {
    if std::fs::create_dir_all(path).is_err() {
        return false;
    }
    let probe = path.join(format!(".write_probe.{}", uuid::Uuid::new_v4().simple()));
    match std::fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&probe)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Cache candidate not writable");
            false
        }
    }
}
