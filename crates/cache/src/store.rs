//! The content-addressed store.
//!
//! [`CacheStore::ensure`] makes a valid entry exist for an artifact: it reuses
//! what is already on disk when it passes validation, and otherwise fetches,
//! verifies, and publishes a fresh copy.
//!
//! Publication is always a single rename from a hidden, uniquely named
//! sibling, so readers see either the old entry or the complete new one.
//! Concurrent writers for the same key are allowed. For files the last
//! verified rename wins and every candidate has identical content. For
//! checkouts the first valid entry published is kept and later writers
//! discard their copy.

use crate::artifact::{Artifact, GitCommit, RemoteFile};
use crate::error::{Error, Result};
use crate::fetch::{GitClient, GitFetcher, HttpClient, HttpFetcher};
use crate::fs::{Filesystem, OsFilesystem, Staged, blocking, staging_path};
use crate::integrity::IntegrityChecker;
use crate::key::CacheKeyResolver;
use depot_events::{
    Event, EventSink, EventStream, emit_cache_busted, emit_cache_hit, emit_cache_miss,
    emit_cache_published,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Validates, fetches, and publishes cache entries.
///
/// Cloning is cheap; clones share clients and filesystem.
#[derive(Debug, Clone)]
pub struct CacheStore {
    resolver: CacheKeyResolver,
    fs: Arc<dyn Filesystem>,
    host: Arc<dyn Filesystem>,
    integrity: IntegrityChecker,
    http: HttpFetcher,
    git: GitFetcher,
}

impl CacheStore {
    /// Create a store rooted at `root`.
    ///
    /// HTTP entries are read and written through `fs`. Git entries always
    /// live on the host filesystem.
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        fs: Arc<dyn Filesystem>,
        http_client: Arc<dyn HttpClient>,
        git_client: Arc<dyn GitClient>,
    ) -> Self {
        Self {
            resolver: CacheKeyResolver::new(root),
            integrity: IntegrityChecker::new(Arc::clone(&fs)),
            http: HttpFetcher::new(http_client, Arc::clone(&fs)),
            git: GitFetcher::new(git_client),
            host: Arc::new(OsFilesystem),
            fs,
        }
    }

    /// The key resolver for this store's root.
    #[must_use]
    pub const fn resolver(&self) -> &CacheKeyResolver {
        &self.resolver
    }

    /// The filesystem HTTP entries live on.
    #[must_use]
    pub fn filesystem(&self) -> &Arc<dyn Filesystem> {
        &self.fs
    }

    /// Whether a valid entry for `artifact` is present, without fetching.
    pub async fn is_cached(&self, artifact: &Artifact) -> bool {
        match artifact {
            Artifact::Http(file) => {
                self.integrity
                    .check(&self.resolver.resolve_file(file), &file.sha256)
                    .await
            }
            Artifact::Git(commit) => {
                self.git
                    .is_checked_out(&self.resolver.resolve_git(commit), &commit.commit)
                    .await
            }
        }
    }

    /// Make sure a valid entry exists for `artifact`.
    ///
    /// Nothing happens until the returned stream is polled. Dropping it
    /// cancels any transfer in flight, and partial content is never published.
    pub fn ensure(&self, artifact: impl Into<Artifact>) -> EventStream<Error> {
        let store = self.clone();
        let artifact = artifact.into();
        EventStream::new(move |sink| async move {
            store.ensure_with(&artifact, &sink).await.map(|_| ())
        })
    }

    /// Make sure a valid entry exists for `artifact`, reporting into `sink`.
    ///
    /// Returns the path of the entry.
    #[instrument(name = "cache_ensure", skip_all, fields(artifact = %artifact))]
    pub async fn ensure_with(&self, artifact: &Artifact, sink: &EventSink) -> Result<PathBuf> {
        match artifact {
            Artifact::Http(file) => self.ensure_file(file, sink).await,
            Artifact::Git(commit) => self.ensure_git(commit, sink).await,
        }
    }

    async fn ensure_file(&self, file: &RemoteFile, sink: &EventSink) -> Result<PathBuf> {
        let key = CacheKeyResolver::file_key(file);
        let path = self.resolver.resolve_file(file);

        if self.integrity.check(&path, &file.sha256).await {
            emit_cache_hit!(key, path.display());
            sink.emit(Event::CacheHit { path: path.clone() });
            return Ok(path);
        }
        report_stale_or_missing(&key, &path, self.fs.exists(&path), sink);

        let directory = self.resolver.root().join(crate::key::FILES_DIR);
        self.fs
            .create_dir_all(&directory)
            .map_err(|e| Error::io(e, &directory, "create_dir_all"))?;

        let staged = Staged::file(Arc::clone(&self.fs), staging_path(&path));
        let actual = self.http.fetch(&file.url, staged.path(), sink).await?;
        if actual != file.sha256 {
            return Err(Error::download_file(file.url.as_str(), file.sha256, actual));
        }
        sink.emit(Event::Verified {
            path: staged.path().to_path_buf(),
            sha256: actual.to_hex(),
        });

        // A directory squatting on the key cannot be replaced by rename.
        if self.fs.is_dir(&path) {
            remove_stale(self.fs.as_ref(), &path)?;
        }
        self.fs
            .rename(staged.path(), &path)
            .map_err(|e| Error::io(e, &path, "rename"))?;
        staged.disarm();

        emit_cache_published!(key, path.display());
        sink.emit(Event::Published { path: path.clone() });
        Ok(path)
    }

    async fn ensure_git(&self, commit: &GitCommit, sink: &EventSink) -> Result<PathBuf> {
        let key = CacheKeyResolver::git_key(commit);
        let path = self.resolver.resolve_git(commit);

        if self.git.is_checked_out(&path, &commit.commit).await {
            emit_cache_hit!(key, path.display());
            sink.emit(Event::CacheHit { path: path.clone() });
            return Ok(path);
        }
        report_stale_or_missing(&key, &path, self.host.exists(&path), sink);

        let staged = Staged::dir(Arc::clone(&self.host), staging_path(&path));
        self.git
            .fetch(&commit.repository, &commit.commit, staged.path(), sink)
            .await?;

        // Another writer may have published while we were fetching. Its entry
        // can already be in use, so it is kept and our copy is dropped.
        if self.git.is_checked_out(&path, &commit.commit).await {
            debug!(path = %path.display(), "Entry published concurrently, discarding own checkout");
            return Ok(path);
        }

        // A stale entry is moved aside first so the key is never empty
        // between removal and publication.
        let displaced = if self.host.exists(&path) {
            let aside = staging_path(&path);
            let guard = if self.host.is_file(&path) {
                Staged::file(Arc::clone(&self.host), aside.clone())
            } else {
                Staged::dir(Arc::clone(&self.host), aside.clone())
            };
            tokio::fs::rename(&path, &aside)
                .await
                .map_err(|e| Error::io(e, &path, "rename"))?;
            Some(guard)
        } else {
            None
        };

        if let Err(e) = tokio::fs::rename(staged.path(), &path).await {
            if self.git.is_checked_out(&path, &commit.commit).await {
                debug!(path = %path.display(), "Entry published concurrently, discarding own checkout");
                return Ok(path);
            }
            return Err(Error::io(e, &path, "rename"));
        }
        staged.disarm();

        if let Some(guard) = displaced {
            let (host, aside) = (Arc::clone(&self.host), guard.path().to_path_buf());
            blocking("remove stale checkout", move || remove_stale(host.as_ref(), &aside)).await?;
            guard.disarm();
        }

        emit_cache_published!(key, path.display());
        sink.emit(Event::Published { path: path.clone() });
        Ok(path)
    }
}

fn report_stale_or_missing(key: &str, path: &Path, exists: bool, sink: &EventSink) {
    let path = path.to_path_buf();
    if exists {
        emit_cache_busted!(key, path.display());
        sink.emit(Event::CacheBusted { path });
    } else {
        emit_cache_miss!(key, path.display());
        sink.emit(Event::CacheMiss { path });
    }
}

fn remove_stale(fs: &dyn Filesystem, path: &Path) -> Result<()> {
    let result = if fs.is_file(path) {
        fs.remove_file(path)
    } else {
        fs.remove_dir_all(path)
    };
    match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(Error::io(e, path, "remove")),
        _ => Ok(()),
    }
}
