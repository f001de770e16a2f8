//! In-memory backing store.
//!
//! Used for transient instances and testing. All data is lost when the last
//! clone is dropped.
//!
//! Behaves like an origin-private browser store rather than a POSIX disk:
//! a file accepts at most one synchronous handle at a time, and a file with
//! an open handle can be neither removed, moved, nor written through the
//! async path. The VFS handle cache has to evict before it mutates.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use syncvfs_types::VfsPath;

use super::now_millis;
use super::traits::{BackingStore, DirectoryRef, FileRef, StoreEntry, SyncHandle};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_found(path: &VfsPath) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("not found: {}", path))
}

fn busy(path: &VfsPath) -> io::Error {
    io::Error::new(
        io::ErrorKind::ResourceBusy,
        format!("entry has an open handle: {}", path),
    )
}

/// File contents and lock state.
#[derive(Debug, Default)]
struct FileState {
    data: Vec<u8>,
    modified_ms: u64,
    locked: bool,
}

#[derive(Debug, Default)]
struct FileCell {
    state: Mutex<FileState>,
}

impl FileCell {
    fn is_locked(&self) -> bool {
        lock(&self.state).locked
    }
}

/// A stored file or directory.
#[derive(Debug, Clone)]
enum Node {
    Directory,
    File(Arc<FileCell>),
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<VfsPath, Node>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        // Root directory always exists
        nodes.insert(VfsPath::root(), Node::Directory);
        Self { nodes }
    }

    /// Walk (and optionally create) a directory segment by segment.
    fn ensure_dir(&mut self, path: &VfsPath, create: bool) -> io::Result<()> {
        let mut current = VfsPath::root();
        for segment in path.segments() {
            current = current.child(segment)?;
            match self.nodes.get(&current) {
                Some(Node::Directory) => {}
                Some(Node::File(_)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotADirectory,
                        format!("not a directory: {}", current),
                    ));
                }
                None if create => {
                    self.nodes.insert(current.clone(), Node::Directory);
                }
                None => return Err(not_found(&current)),
            }
        }
        Ok(())
    }

    fn file_cell(&self, path: &VfsPath) -> io::Result<Arc<FileCell>> {
        match self.nodes.get(path) {
            Some(Node::File(cell)) => Ok(cell.clone()),
            Some(Node::Directory) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {}", path),
            )),
            None => Err(not_found(path)),
        }
    }

    /// Keys of `path` and everything beneath it.
    fn subtree(&self, path: &VfsPath) -> Vec<VfsPath> {
        self.nodes
            .keys()
            .filter(|k| k.starts_with(path))
            .cloned()
            .collect()
    }

    fn any_locked(&self, keys: &[VfsPath]) -> Option<VfsPath> {
        keys.iter()
            .find(|k| matches!(self.nodes.get(*k), Some(Node::File(cell)) if cell.is_locked()))
            .cloned()
    }

    fn describe(&self, path: &VfsPath, node: &Node) -> StoreEntry {
        let name = path.file_name().unwrap_or("").to_string();
        match node {
            Node::Directory => StoreEntry::directory(name),
            Node::File(cell) => {
                let state = lock(&cell.state);
                StoreEntry::file(name, state.data.len() as u64, state.modified_ms)
            }
        }
    }
}

/// In-memory backing store.
///
/// Clones share the same tree.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tree: Arc<Mutex<Tree>>,
    cross_directory_moves: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
            cross_directory_moves: false,
        }
    }

    /// Allow native moves between different directories.
    ///
    /// Off by default: only same-directory moves are native, everything else
    /// reports `Unsupported` and the VFS falls back to copy + delete.
    pub fn with_cross_directory_moves(mut self, enabled: bool) -> Self {
        self.cross_directory_moves = enabled;
        self
    }

    /// Whether a synchronous handle is currently open on `path`.
    pub fn has_open_handle(&self, path: &VfsPath) -> bool {
        let tree = lock(&self.tree);
        matches!(tree.nodes.get(path), Some(Node::File(cell)) if cell.is_locked())
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn directory(&self, path: &VfsPath, create: bool) -> io::Result<DirectoryRef> {
        let mut tree = lock(&self.tree);
        tree.ensure_dir(path, create)?;
        Ok(DirectoryRef::new(path.clone()))
    }

    async fn file(&self, path: &VfsPath, create: bool) -> io::Result<FileRef> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::IsADirectory, "the root is a directory")
        })?;

        let mut tree = lock(&self.tree);
        tree.ensure_dir(&parent, create)?;

        match tree.nodes.get(path) {
            Some(Node::File(_)) => {}
            Some(Node::Directory) => {
                return Err(io::Error::new(
                    io::ErrorKind::IsADirectory,
                    format!("is a directory: {}", path),
                ));
            }
            None if create => {
                let cell = FileCell::default();
                lock(&cell.state).modified_ms = now_millis();
                tree.nodes.insert(path.clone(), Node::File(Arc::new(cell)));
            }
            None => return Err(not_found(path)),
        }
        Ok(FileRef::new(path.clone()))
    }

    async fn open_sync_handle(&self, file: &FileRef) -> io::Result<Box<dyn SyncHandle>> {
        let cell = lock(&self.tree).file_cell(file.path())?;
        {
            let mut state = lock(&cell.state);
            if state.locked {
                return Err(busy(file.path()));
            }
            state.locked = true;
        }
        Ok(Box::new(MemoryHandle {
            path: file.path().clone(),
            cell,
        }))
    }

    async fn remove(&self, path: &VfsPath, recursive: bool) -> io::Result<()> {
        if path.is_root() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot remove the root directory",
            ));
        }

        let mut tree = lock(&self.tree);
        let is_dir = match tree.nodes.get(path) {
            None => return Err(not_found(path)),
            Some(Node::File(cell)) if cell.is_locked() => return Err(busy(path)),
            Some(Node::File(_)) => false,
            Some(Node::Directory) => true,
        };
        if !is_dir {
            tree.nodes.remove(path);
            return Ok(());
        }

        let keys = tree.subtree(path);
        if keys.len() > 1 && !recursive {
            return Err(io::Error::new(
                io::ErrorKind::DirectoryNotEmpty,
                format!("directory not empty: {}", path),
            ));
        }
        if let Some(locked) = tree.any_locked(&keys) {
            return Err(busy(&locked));
        }
        for key in keys {
            tree.nodes.remove(&key);
        }
        Ok(())
    }

    async fn move_entry(&self, from: &VfsPath, to: &VfsPath) -> io::Result<()> {
        if from.is_root() || to.is_root() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot move the root directory",
            ));
        }
        if to.starts_with(from) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot move {} into itself", from),
            ));
        }
        if from.parent() != to.parent() && !self.cross_directory_moves {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "no native move across directories",
            ));
        }

        let mut tree = lock(&self.tree);
        if !tree.nodes.contains_key(from) {
            return Err(not_found(from));
        }
        if tree.nodes.contains_key(to) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already exists: {}", to),
            ));
        }
        if let Some(parent) = to.parent() {
            tree.ensure_dir(&parent, false)?;
        }

        let keys = tree.subtree(from);
        if let Some(locked) = tree.any_locked(&keys) {
            return Err(busy(&locked));
        }
        for key in keys {
            if let (Some(node), Some(rest)) = (tree.nodes.remove(&key), key.strip_prefix(from)) {
                tree.nodes.insert(to.join(&rest), node);
            }
        }
        Ok(())
    }

    async fn list(&self, dir: &DirectoryRef) -> io::Result<Vec<StoreEntry>> {
        let tree = lock(&self.tree);
        match tree.nodes.get(dir.path()) {
            Some(Node::Directory) => {}
            Some(Node::File(_)) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("not a directory: {}", dir.path()),
                ));
            }
            None => return Err(not_found(dir.path())),
        }

        let entries = tree
            .nodes
            .iter()
            .filter(|(path, _)| path.parent().as_ref() == Some(dir.path()))
            .map(|(path, node)| tree.describe(path, node))
            .collect();
        Ok(entries)
    }

    async fn entry(&self, path: &VfsPath) -> io::Result<Option<StoreEntry>> {
        let tree = lock(&self.tree);
        Ok(tree.nodes.get(path).map(|node| tree.describe(path, node)))
    }

    async fn write_at(&self, file: &FileRef, offset: u64, data: &[u8]) -> io::Result<u64> {
        let cell = lock(&self.tree).file_cell(file.path())?;
        let mut state = lock(&cell.state);
        if state.locked {
            return Err(busy(file.path()));
        }
        write_into(&mut state, file.path(), data, offset)?;
        Ok(state.data.len() as u64)
    }
}

/// Largest file a [`MemoryStore`] holds.
const MAX_FILE_SIZE: u64 = 1 << 32;

/// `len` as an in-memory length, or `InvalidInput` past [`MAX_FILE_SIZE`].
fn memory_len(len: u64, path: &VfsPath) -> io::Result<usize> {
    usize::try_from(len)
        .ok()
        .filter(|_| len <= MAX_FILE_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("file too large: {} would reach {} bytes", path, len),
            )
        })
}

fn write_into(state: &mut FileState, path: &VfsPath, buf: &[u8], at: u64) -> io::Result<()> {
    let end = memory_len(super::end_offset(at, buf.len())?, path)?;
    let start = end - buf.len();
    if state.data.len() < end {
        state.data.resize(end, 0);
    }
    state.data[start..end].copy_from_slice(buf);
    state.modified_ms = now_millis();
    Ok(())
}

/// Synchronous handle on a [`MemoryStore`] file. Holds the file's lock.
#[derive(Debug)]
struct MemoryHandle {
    path: VfsPath,
    cell: Arc<FileCell>,
}

impl SyncHandle for MemoryHandle {
    fn read(&mut self, buf: &mut [u8], at: u64) -> io::Result<usize> {
        let state = lock(&self.cell.state);
        let len = state.data.len() as u64;
        if at >= len {
            return Ok(0);
        }
        let start = at as usize;
        let n = buf.len().min(state.data.len() - start);
        buf[..n].copy_from_slice(&state.data[start..start + n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], at: u64) -> io::Result<usize> {
        let mut state = lock(&self.cell.state);
        write_into(&mut state, &self.path, buf, at)?;
        Ok(buf.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len = memory_len(len, &self.path)?;
        let mut state = lock(&self.cell.state);
        state.data.resize(len, 0);
        state.modified_ms = now_millis();
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(lock(&self.cell.state).data.len() as u64)
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        tracing::trace!(path = %self.path, "memory handle closed");
        Ok(())
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        lock(&self.cell.state).locked = false;
    }
}
