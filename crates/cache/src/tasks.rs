//! Public entry points for cached downloads and checkouts.
//!
//! Each operation returns a lazy [`EventStream`]: it does nothing until
//! polled, reports progress as it goes, and ends with success or a single
//! error. When it completes successfully the documented files exist on disk.

use crate::artifact::{Artifact, GitCommit, RemoteFile};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::fetch::{GitClient, HttpClient};
use crate::fs::{Filesystem, Staged, blocking, staging_path};
use crate::hash::{Sha256Hash, copy_and_hash};
use crate::store::CacheStore;
use depot_events::{Event, EventStream};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Downloads and checkouts backed by the content-addressed cache.
#[derive(Debug, Clone)]
pub struct CacheTasks {
    store: CacheStore,
    config: CacheConfig,
}

impl CacheTasks {
    /// Create tasks with explicit collaborators.
    #[must_use]
    pub fn new(
        config: CacheConfig,
        fs: Arc<dyn Filesystem>,
        http_client: Arc<dyn HttpClient>,
        git_client: Arc<dyn GitClient>,
    ) -> Self {
        let store = CacheStore::new(config.root.clone(), fs, http_client, git_client);
        Self { store, config }
    }

    /// Host filesystem, `reqwest`, and the `git` executable.
    #[cfg(feature = "reqwest")]
    pub fn from_config(config: CacheConfig) -> Result<Self> {
        let http = crate::fetch::ReqwestClient::new(&config.user_agent)?;
        Ok(Self::new(
            config,
            Arc::new(crate::fs::OsFilesystem),
            Arc::new(http),
            Arc::new(crate::fetch::GitCli::new()),
        ))
    }

    /// Like [`CacheTasks::from_config`] with [`CacheConfig::from_env`].
    #[cfg(feature = "reqwest")]
    pub fn from_env() -> Result<Self> {
        Self::from_config(CacheConfig::from_env()?)
    }

    /// The cache root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Where the entry for `artifact` lives. Touches nothing on disk.
    #[must_use]
    pub fn cache_path(&self, artifact: &Artifact) -> PathBuf {
        self.store.resolver().resolve(artifact)
    }

    /// Whether a valid entry for `artifact` is already present.
    pub async fn is_cached(&self, artifact: &Artifact) -> bool {
        self.store.is_cached(artifact).await
    }

    /// Make sure `file` is in the cache.
    pub fn download_to_cache(&self, file: RemoteFile) -> EventStream<Error> {
        self.store.ensure(file)
    }

    /// Make sure `file` is in the cache, then place a copy at `target`.
    ///
    /// Missing parent directories of `target` are created and an existing
    /// file at `target` is replaced.
    pub fn download_using_cache(
        &self,
        file: RemoteFile,
        target: impl Into<PathBuf>,
    ) -> EventStream<Error> {
        let tasks = self.clone();
        let target = target.into();
        EventStream::new(move |sink| async move {
            let source = tasks
                .store
                .ensure_with(&Artifact::from(file.clone()), &sink)
                .await?;
            let fs = Arc::clone(tasks.store.filesystem());
            let (from, to, link) = (source.clone(), target.clone(), tasks.config.link_files);
            blocking("materialize file", move || materialize_file(&fs, &from, &to, &file, link))
                .await?;
            sink.emit(Event::Materialized { source, target });
            Ok(())
        })
    }

    /// Make sure `commit` is checked out in the cache, then copy the working
    /// tree into `target`.
    ///
    /// `target` may already exist; files in it are overwritten.
    pub fn clone_and_checkout_using_cache(
        &self,
        commit: GitCommit,
        target: impl Into<PathBuf>,
    ) -> EventStream<Error> {
        let store = self.store.clone();
        let target = target.into();
        EventStream::new(move |sink| async move {
            let source = store.ensure_with(&commit.into(), &sink).await?;
            let (from, to) = (source.clone(), target.clone());
            let copied = blocking("copy working tree", move || copy_tree(&from, &to)).await?;
            debug!(files = copied, target = %target.display(), "Working tree materialized");
            sink.emit(Event::Materialized { source, target });
            Ok(())
        })
    }
}

/// Place the verified cache entry `source` at `target`.
///
/// Hard links are attempted first when enabled; otherwise, or if linking
/// fails, the content is copied and re-verified. Either way `target` is
/// replaced with a single rename.
fn materialize_file(
    fs: &Arc<dyn Filesystem>,
    source: &Path,
    target: &Path,
    file: &RemoteFile,
    link: bool,
) -> Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs.create_dir_all(parent)
            .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
    }

    let staged = Staged::file(Arc::clone(fs), staging_path(target));

    if link {
        match fs.hard_link(source, staged.path()) {
            Ok(()) => {
                fs.rename(staged.path(), target)
                    .map_err(|e| Error::io(e, target, "rename"))?;
                // Renaming onto another link to the same file is a no-op that
                // leaves the staging link behind; the guard removes it.
                drop(staged);
                return Ok(());
            }
            Err(e) => debug!(error = %e, "Hard link failed, copying instead"),
        }
    }

    copy_verified(fs.as_ref(), source, staged.path(), &file.url, &file.sha256)?;
    fs.rename(staged.path(), target)
        .map_err(|e| Error::io(e, target, "rename"))?;
    staged.disarm();
    Ok(())
}

fn copy_verified(
    fs: &dyn Filesystem,
    source: &Path,
    destination: &Path,
    url: &Url,
    expected: &Sha256Hash,
) -> Result<()> {
    let reader = fs.open(source).map_err(|e| Error::io(e, source, "open"))?;
    let writer = fs
        .create(destination)
        .map_err(|e| Error::io(e, destination, "create"))?;
    let (actual, _) = copy_and_hash(reader, writer).map_err(|e| Error::io(e, destination, "copy"))?;
    if actual != *expected {
        return Err(Error::download_file(url.as_str(), *expected, actual));
    }
    Ok(())
}

/// Recursively copy `source` into `target`, returning the number of files.
///
/// Symlinks are recreated rather than followed.
fn copy_tree(source: &Path, target: &Path) -> Result<usize> {
    let mut count = 0usize;
    for entry in walkdir::WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| Error::io(e.into(), source, "walk"))?;
        let rel = entry.path().strip_prefix(source).map_err(|_| {
            Error::configuration(format!(
                "path {} is not under {}",
                entry.path().display(),
                source.display()
            ))
        })?;
        let dst = target.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&dst).map_err(|e| Error::io(e, &dst, "create_dir_all"))?;
            continue;
        }

        // Git object files are read-only, so replace rather than overwrite.
        if dst.symlink_metadata().is_ok_and(|m| !m.is_dir()) {
            std::fs::remove_file(&dst).map_err(|e| Error::io(e, &dst, "remove_file"))?;
        }
        if file_type.is_symlink() {
            copy_symlink(entry.path(), &dst).map_err(|e| Error::io(e, &dst, "symlink"))?;
        } else {
            std::fs::copy(entry.path(), &dst).map_err(|e| Error::io(e, &dst, "copy"))?;
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(unix)]
fn copy_symlink(source: &Path, destination: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(source)?, destination)
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, destination: &Path) -> io::Result<()> {
    std::fs::copy(source, destination).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{MemoryFilesystem, OsFilesystem};
    use tempfile::TempDir;

    fn remote(body: &[u8]) -> RemoteFile {
        RemoteFile::new(
            Url::parse("https://example.com/BUCK").unwrap(),
            Sha256Hash::digest(body),
        )
    }

    #[test]
    fn test_materialize_copies_into_new_parent() {
        let memory = MemoryFilesystem::new();
        let fs: Arc<dyn Filesystem> = Arc::new(memory.clone());
        fs.write(Path::new("entry"), b"body").unwrap();

        let target = Path::new("/out/nested/BUCK");
        materialize_file(&fs, Path::new("entry"), target, &remote(b"body"), false).unwrap();

        assert_eq!(memory.read(target).unwrap(), b"body");
        assert_eq!(memory.files().len(), 2);

        // A copy is independent of the entry.
        fs.write(target, b"edited").unwrap();
        assert_eq!(memory.read(Path::new("entry")).unwrap(), b"body");
    }

    #[test]
    fn test_materialize_detects_corrupted_entry() {
        let memory = MemoryFilesystem::new();
        let fs: Arc<dyn Filesystem> = Arc::new(memory.clone());
        fs.write(Path::new("entry"), b"corrupt").unwrap();

        let err = materialize_file(
            &fs,
            Path::new("entry"),
            Path::new("target"),
            &remote(b"body"),
            false,
        )
        .unwrap_err();

        assert!(err.hash_mismatch().is_some());
        assert!(!memory.exists(Path::new("target")));
        assert_eq!(memory.files().len(), 1);
    }

    #[test]
    fn test_materialize_link_shares_storage() {
        let memory = MemoryFilesystem::new();
        let fs: Arc<dyn Filesystem> = Arc::new(memory.clone());
        fs.write(Path::new("entry"), b"body").unwrap();
        fs.write(Path::new("target"), b"old").unwrap();

        materialize_file(&fs, Path::new("entry"), Path::new("target"), &remote(b"body"), true)
            .unwrap();

        assert_eq!(memory.read(Path::new("target")).unwrap(), b"body");
        fs.write(Path::new("target"), b"edited").unwrap();
        assert_eq!(memory.read(Path::new("entry")).unwrap(), b"edited");
    }

    #[test]
    fn test_materialize_links_twice_without_leftovers() {
        let temp = TempDir::new().unwrap();
        let fs: Arc<dyn Filesystem> = Arc::new(OsFilesystem);
        let entry = temp.path().join("entry");
        let target = temp.path().join("target");
        std::fs::write(&entry, b"body").unwrap();

        materialize_file(&fs, &entry, &target, &remote(b"body"), true).unwrap();
        materialize_file(&fs, &entry, &target, &remote(b"body"), true).unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"body");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_copy_tree_overwrites_existing_files() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let target = temp.path().join("target");
        std::fs::create_dir_all(source.join("sub")).unwrap();
        std::fs::write(source.join("BUCK"), b"new").unwrap();
        std::fs::write(source.join("sub/file"), b"nested").unwrap();
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("BUCK"), b"old").unwrap();

        assert_eq!(copy_tree(&source, &target).unwrap(), 2);
        assert_eq!(std::fs::read(target.join("BUCK")).unwrap(), b"new");
        assert_eq!(std::fs::read(target.join("sub/file")).unwrap(), b"nested");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_recreates_symlinks() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let target = temp.path().join("target");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("real"), b"x").unwrap();
        std::os::unix::fs::symlink("real", source.join("link")).unwrap();

        copy_tree(&source, &target).unwrap();
        assert_eq!(
            std::fs::read_link(target.join("link")).unwrap(),
            PathBuf::from("real")
        );
    }
}
