//! Core backing-store traits and types.

use async_trait::async_trait;
use std::fmt;
use std::io;

use syncvfs_types::VfsPath;

/// Kind of a stored entry. The store knows nothing about symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEntryKind {
    Directory,
    File { size: u64, modified_ms: u64 },
}

/// A child of a stored directory, or the result of [`BackingStore::entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    /// Name of the entry (not full path).
    pub name: String,
    pub kind: StoreEntryKind,
}

impl StoreEntry {
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StoreEntryKind::Directory,
        }
    }

    pub fn file(name: impl Into<String>, size: u64, modified_ms: u64) -> Self {
        Self {
            name: name.into(),
            kind: StoreEntryKind::File { size, modified_ms },
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == StoreEntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, StoreEntryKind::File { .. })
    }
}

/// Proof that a directory existed when it was looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRef {
    path: VfsPath,
}

impl DirectoryRef {
    pub fn new(path: VfsPath) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &VfsPath {
        &self.path
    }
}

/// Proof that a file existed when it was looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    path: VfsPath,
}

impl FileRef {
    pub fn new(path: VfsPath) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &VfsPath {
        &self.path
    }
}

/// An open, synchronous reference to one file's bytes.
///
/// Opening is asynchronous; every method here runs in-thread. Handles are
/// `Send` so one opened on the helper context can be handed to the caller.
pub trait SyncHandle: Send + fmt::Debug {
    /// Read into `buf` starting at byte `at`. Returns bytes read; 0 at EOF.
    fn read(&mut self, buf: &mut [u8], at: u64) -> io::Result<usize>;

    /// Write `buf` at byte `at`, extending the file if needed.
    fn write(&mut self, buf: &[u8], at: u64) -> io::Result<usize>;

    /// Set the file length, zero-filling when growing.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Persist buffered data.
    fn flush(&mut self) -> io::Result<()>;

    /// Current file length.
    fn size(&mut self) -> io::Result<u64>;

    /// Flush and release the handle.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// The asynchronous, handle-based persistent store under the VFS.
///
/// All paths are normalized [`VfsPath`]s relative to the store root. The
/// store is the sole source of truth for existence and directory contents.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Look up a directory segment by segment.
    ///
    /// With `create`, missing segments are created. Without it a missing
    /// segment is `NotFound`; a file in the way is `NotADirectory`.
    async fn directory(&self, path: &VfsPath, create: bool) -> io::Result<DirectoryRef>;

    /// Look up a file. With `create`, the file and its parents are created.
    async fn file(&self, path: &VfsPath, create: bool) -> io::Result<FileRef>;

    /// Open a synchronous handle on a file.
    async fn open_sync_handle(&self, file: &FileRef) -> io::Result<Box<dyn SyncHandle>>;

    /// Remove a file or directory.
    ///
    /// Non-recursive removal of a non-empty directory is `DirectoryNotEmpty`.
    async fn remove(&self, path: &VfsPath, recursive: bool) -> io::Result<()>;

    /// Move a file or directory.
    ///
    /// Returns `Unsupported` when the store has no native move between the
    /// two locations; callers fall back to copy then delete.
    async fn move_entry(&self, from: &VfsPath, to: &VfsPath) -> io::Result<()>;

    /// List the immediate children of a directory.
    async fn list(&self, dir: &DirectoryRef) -> io::Result<Vec<StoreEntry>>;

    /// Describe the entry at `path`, or `None` if nothing is there.
    async fn entry(&self, path: &VfsPath) -> io::Result<Option<StoreEntry>>;

    /// Write at an offset without a long-lived handle (the async writable path).
    ///
    /// The file must exist. Returns the new file size.
    async fn write_at(&self, file: &FileRef, offset: u64, data: &[u8]) -> io::Result<u64>;
}
