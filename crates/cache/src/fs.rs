//! Filesystem capability used by the cache.
//!
//! Every file the cache reads or writes goes through a [`Filesystem`] handed
//! to it explicitly, so the same code runs against the host filesystem
//! ([`OsFilesystem`]) or a sandboxed in-memory one ([`MemoryFilesystem`]).
//!
//! Git working trees are the exception: the `git` executable writes them, so
//! they always live on the host filesystem.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Operations the cache needs from a filesystem.
pub trait Filesystem: Send + Sync + fmt::Debug {
    /// Whether anything exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Whether a regular file exists at `path`.
    fn is_file(&self, path: &Path) -> bool;

    /// Whether a directory exists at `path`.
    fn is_dir(&self, path: &Path) -> bool;

    /// Create a directory and all of its missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Open a file for reading.
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Create or truncate a file for writing.
    ///
    /// Flushing the returned writer makes the content durable.
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Atomically move `from` to `to`, replacing an existing file at `to`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove a file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove a directory and everything below it.
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Create a hard link at `link` pointing to `original`.
    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        let _ = (original, link);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "hard links are not supported by this filesystem",
        ))
    }

    /// Read a whole file into memory.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open(path)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Replace a file's content.
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = self.create(path)?;
        file.write_all(data)?;
        file.flush()
    }
}

/// Build a unique, hidden sibling path for staging content destined for `target`.
#[must_use]
pub fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map_or_else(|| "entry".into(), |n| n.to_string_lossy().into_owned());
    target.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// Run synchronous filesystem work on tokio's blocking pool.
pub(crate) async fn blocking<T, F>(operation: &'static str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::io_no_path(io::Error::other(e), operation))?
}

// ============================================================================
// Host filesystem
// ============================================================================

/// The host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

/// A host file whose `flush` persists data to disk before publication.
struct DurableFile(fs::File);

impl Write for DurableFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()?;
        self.0.sync_all()
    }
}

impl Filesystem for OsFilesystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(DurableFile(fs::File::create(path)?)))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        fs::hard_link(original, link)
    }
}

// ============================================================================
// In-memory filesystem
// ============================================================================

type FileData = Arc<Mutex<Vec<u8>>>;

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, FileData>,
    dirs: BTreeSet<PathBuf>,
}

impl MemoryState {
    fn is_dir(&self, path: &Path) -> bool {
        is_root(path) || self.dirs.contains(path)
    }

    fn parent_is_dir(&self, path: &Path) -> bool {
        path.parent().is_none_or(|parent| self.is_dir(parent))
    }
}

fn is_root(path: &Path) -> bool {
    path.as_os_str().is_empty() || path.parent().is_none()
}

fn lock_data(data: &FileData) -> io::Result<MutexGuard<'_, Vec<u8>>> {
    data.lock()
        .map_err(|_| io::Error::other("in-memory file lock poisoned"))
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

/// An in-memory filesystem for sandboxed tests.
///
/// Clones share the same tree. Parent directories must exist before files
/// are created in them, matching host semantics, and hard links share data.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilesystem {
    state: Arc<Mutex<MemoryState>>,
}

struct MemoryWriter {
    data: FileData,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock_data(&self.data)?.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl MemoryFilesystem {
    /// Create an empty filesystem containing only the root directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> io::Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| io::Error::other("in-memory filesystem lock poisoned"))
    }

    /// Paths of every file currently stored, in sorted order.
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        self.state()
            .map(|state| state.files.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Filesystem for MemoryFilesystem {
    fn exists(&self, path: &Path) -> bool {
        self.state()
            .is_ok_and(|state| state.files.contains_key(path) || state.is_dir(path))
    }

    fn is_file(&self, path: &Path) -> bool {
        self.state()
            .is_ok_and(|state| state.files.contains_key(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.state().is_ok_and(|state| state.is_dir(path))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state()?;
        for ancestor in path.ancestors() {
            if state.files.contains_key(ancestor) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is a file", ancestor.display()),
                ));
            }
        }
        for ancestor in path.ancestors().filter(|p| !is_root(p)) {
            state.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        let state = self.state()?;
        let data = state.files.get(path).ok_or_else(|| not_found(path))?;
        let snapshot = lock_data(data)?.clone();
        Ok(Box::new(Cursor::new(snapshot)))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let mut state = self.state()?;
        if state.is_dir(path) {
            return Err(io::Error::other(format!("{} is a directory", path.display())));
        }
        if !state.parent_is_dir(path) {
            return Err(not_found(path.parent().unwrap_or(path)));
        }
        let data = if let Some(existing) = state.files.get(path) {
            // Truncate in place so hard links observe the change.
            lock_data(existing)?.clear();
            Arc::clone(existing)
        } else {
            let data = FileData::default();
            state.files.insert(path.to_path_buf(), Arc::clone(&data));
            data
        };
        Ok(Box::new(MemoryWriter { data }))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.state()?;
        if !state.parent_is_dir(to) {
            return Err(not_found(to.parent().unwrap_or(to)));
        }
        if let Some(data) = state.files.remove(from) {
            if state.is_dir(to) {
                state.files.insert(from.to_path_buf(), data);
                return Err(io::Error::other(format!("{} is a directory", to.display())));
            }
            state.files.insert(to.to_path_buf(), data);
            return Ok(());
        }
        if !state.dirs.contains(from) {
            return Err(not_found(from));
        }
        if state.files.contains_key(to)
            || state.files.keys().any(|p| p.starts_with(to))
            || state.dirs.iter().any(|p| p.starts_with(to) && p != to)
        {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is not empty", to.display()),
            ));
        }
        let moved_dirs: Vec<PathBuf> = state
            .dirs
            .iter()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        for dir in moved_dirs {
            state.dirs.remove(&dir);
            if let Ok(rest) = dir.strip_prefix(from) {
                state.dirs.insert(to.join(rest));
            }
        }
        let moved_files: Vec<PathBuf> = state
            .files
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        for file in moved_files {
            if let (Some(data), Ok(rest)) = (state.files.remove(&file), file.strip_prefix(from)) {
                state.files.insert(to.join(rest), data);
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.state()?
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state()?;
        if !state.dirs.contains(path) {
            return Err(not_found(path));
        }
        state.dirs.retain(|p| !p.starts_with(path));
        state.files.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        let mut state = self.state()?;
        if state.files.contains_key(link) || state.is_dir(link) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", link.display()),
            ));
        }
        if !state.parent_is_dir(link) {
            return Err(not_found(link.parent().unwrap_or(link)));
        }
        let data = state
            .files
            .get(original)
            .cloned()
            .ok_or_else(|| not_found(original))?;
        state.files.insert(link.to_path_buf(), data);
        Ok(())
    }
}

// ============================================================================
// Staging guard
// ============================================================================

/// Removes a staging file or directory on drop unless it was published.
///
/// Dropping happens on error and on cancellation alike, so partially written
/// content never outlives the operation that produced it.
pub(crate) struct Staged {
    fs: Arc<dyn Filesystem>,
    path: PathBuf,
    is_dir: bool,
    armed: bool,
}

impl Staged {
    pub(crate) fn file(fs: Arc<dyn Filesystem>, path: PathBuf) -> Self {
        Self {
            fs,
            path,
            is_dir: false,
            armed: true,
        }
    }

    pub(crate) fn dir(fs: Arc<dyn Filesystem>, path: PathBuf) -> Self {
        Self {
            fs,
            path,
            is_dir: true,
            armed: true,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// The content has been moved away; nothing is left to clean up.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if !self.armed || !self.fs.exists(&self.path) {
            return;
        }
        let result = if self.is_dir {
            self.fs.remove_dir_all(&self.path)
        } else {
            self.fs.remove_file(&self.path)
        };
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove staging path");
        }
    }
}
