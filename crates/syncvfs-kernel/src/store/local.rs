//! Local directory backing store.
//!
//! Maps VFS paths one-to-one onto a host directory. This is the durable store
//! for native builds; it has a native move for every pair of paths.

use async_trait::async_trait;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use syncvfs_types::VfsPath;

use super::traits::{BackingStore, DirectoryRef, FileRef, StoreEntry, SyncHandle};

/// Local directory store.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/var/lib/syncvfs/root`, then the VFS path `src/main.rs` lives at
/// `/var/lib/syncvfs/root/src/main.rs`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at the given path.
    ///
    /// The path must exist and be a directory; see [`LocalStore::open`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if needed, then open the store.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a VFS path. Normalized paths cannot climb out of `root`.
    fn host_path(&self, path: &VfsPath) -> PathBuf {
        let mut full = self.root.clone();
        for segment in path.segments() {
            full.push(segment);
        }
        full
    }

    async fn exists(&self, full: &Path) -> io::Result<bool> {
        match fs::symlink_metadata(full).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn modified_ms(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default()
        })
}

fn describe(name: String, meta: &std::fs::Metadata) -> Option<StoreEntry> {
    let file_type = meta.file_type();
    if file_type.is_dir() {
        Some(StoreEntry::directory(name))
    } else if file_type.is_file() {
        Some(StoreEntry::file(name, meta.len(), modified_ms(meta)))
    } else {
        // Host symlinks and special files have no VFS counterpart.
        None
    }
}

#[async_trait]
impl BackingStore for LocalStore {
    async fn directory(&self, path: &VfsPath, create: bool) -> io::Result<DirectoryRef> {
        let mut current = self.root.clone();
        for segment in path.segments() {
            current.push(segment);
            match fs::symlink_metadata(&current).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotADirectory,
                        format!("not a directory: {}", current.display()),
                    ));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound && create => {
                    match fs::create_dir(&current).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(DirectoryRef::new(path.clone()))
    }

    async fn file(&self, path: &VfsPath, create: bool) -> io::Result<FileRef> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::IsADirectory, "the root is a directory")
        })?;
        self.directory(&parent, create).await?;

        let full = self.host_path(path);
        match fs::symlink_metadata(&full).await {
            Ok(meta) if meta.is_dir() => {
                return Err(io::Error::new(
                    io::ErrorKind::IsADirectory,
                    format!("is a directory: {}", path),
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound && create => {
                fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&full)
                    .await?;
            }
            Err(e) => return Err(e),
        }
        Ok(FileRef::new(path.clone()))
    }

    async fn open_sync_handle(&self, file: &FileRef) -> io::Result<Box<dyn SyncHandle>> {
        let handle = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.host_path(file.path()))
            .await?;
        Ok(Box::new(LocalHandle {
            path: file.path().clone(),
            file: handle.into_std().await,
        }))
    }

    async fn remove(&self, path: &VfsPath, recursive: bool) -> io::Result<()> {
        if path.is_root() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot remove the root directory",
            ));
        }
        let full = self.host_path(path);
        let meta = fs::symlink_metadata(&full).await?;

        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&full).await
            } else {
                fs::remove_dir(&full).await
            }
        } else {
            fs::remove_file(&full).await
        }
    }

    async fn move_entry(&self, from: &VfsPath, to: &VfsPath) -> io::Result<()> {
        if to.starts_with(from) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot move {} into itself", from),
            ));
        }
        let from_path = self.host_path(from);
        let to_path = self.host_path(to);

        if !self.exists(&from_path).await? {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not found: {}", from),
            ));
        }
        // fs::rename silently replaces files; the VFS never overwrites.
        if self.exists(&to_path).await? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already exists: {}", to),
            ));
        }
        if let Some(parent) = to.parent() {
            self.directory(&parent, false).await?;
        }

        fs::rename(&from_path, &to_path).await
    }

    async fn list(&self, dir: &DirectoryRef) -> io::Result<Vec<StoreEntry>> {
        let full_path = self.host_path(dir.path());
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&full_path).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            // Use symlink_metadata so host symlinks are never followed
            let meta = fs::symlink_metadata(entry.path()).await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match describe(name, &meta) {
                Some(e) => entries.push(e),
                None => {
                    tracing::debug!(path = %entry.path().display(), "skipping non-regular host entry");
                }
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn entry(&self, path: &VfsPath) -> io::Result<Option<StoreEntry>> {
        let full = self.host_path(path);
        match fs::symlink_metadata(&full).await {
            Ok(meta) => Ok(describe(path.file_name().unwrap_or("").to_string(), &meta)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_at(&self, file: &FileRef, offset: u64, data: &[u8]) -> io::Result<u64> {
        super::end_offset(offset, data.len())?;
        let mut handle = fs::OpenOptions::new()
            .write(true)
            .open(self.host_path(file.path()))
            .await?;
        handle.seek(SeekFrom::Start(offset)).await?;
        handle.write_all(data).await?;
        handle.flush().await?;
        Ok(handle.metadata().await?.len())
    }
}

/// Synchronous handle backed by a host file.
#[derive(Debug)]
struct LocalHandle {
    path: VfsPath,
    file: std::fs::File,
}

impl SyncHandle for LocalHandle {
    fn read(&mut self, buf: &mut [u8], at: u64) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(at))?;
        self.file.read(buf)
    }

    fn write(&mut self, buf: &[u8], at: u64) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(at))?;
        self.file.write(buf)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        tracing::trace!(path = %self.path, "local handle closed");
        self.file.sync_all()
    }
}
