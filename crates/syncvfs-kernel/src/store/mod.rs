//! Backing store adapter.
//!
//! The VFS sits on an asynchronous, handle-based store:
//!
//! - **MemoryStore**: in-memory tree with origin-private-store semantics (tests, transient use)
//! - **LocalStore**: a host directory, one-to-one with VFS paths
//!
//! Directory traversal is segment by segment. Opening a synchronous handle is
//! asynchronous; once open, the handle's I/O runs in-thread.

mod local;
mod memory;
mod traits;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use traits::{
    BackingStore, DirectoryRef, FileRef, StoreEntry, StoreEntryKind, SyncHandle,
};

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use syncvfs_types::VfsPath;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Read a whole file through a synchronous handle.
pub fn read_all(handle: &mut dyn SyncHandle) -> io::Result<Vec<u8>> {
    let size = handle.size()? as usize;
    let mut data = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = handle.read(&mut data[filled..], filled as u64)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    data.truncate(filled);
    Ok(data)
}

/// Read up to `len` bytes at `offset`, looping over short reads.
///
/// `len` is clamped to the bytes the file holds past `offset`, so the buffer
/// never outgrows the file.
pub fn read_exact_at(handle: &mut dyn SyncHandle, len: usize, offset: u64) -> io::Result<Vec<u8>> {
    let available = handle.size()?.saturating_sub(offset);
    let len = usize::try_from(available).map_or(len, |available| len.min(available));
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = handle.read(&mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Write all of `data` at `offset`, looping over short writes.
pub fn write_all_at(handle: &mut dyn SyncHandle, data: &[u8], offset: u64) -> io::Result<usize> {
    end_offset(offset, data.len())?;
    let mut written = 0;
    while written < data.len() {
        let n = handle.write(&data[written..], offset + written as u64)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "backing store accepted no bytes",
            ));
        }
        written += n;
    }
    Ok(written)
}

/// The offset one past a write of `len` bytes at `offset`.
pub fn end_offset(offset: u64, len: usize) -> io::Result<u64> {
    u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write of {} bytes at offset {} overflows", len, offset),
            )
        })
}

/// Copy a file or a whole directory tree using store primitives.
///
/// This is the fallback for moves the store cannot do natively. It is not
/// atomic: a failure part way leaves a partial copy at `to`.
pub fn copy_entry<'a>(
    store: &'a dyn BackingStore,
    from: &'a VfsPath,
    to: &'a VfsPath,
) -> BoxFuture<'a, io::Result<()>> {
    Box::pin(async move {
        let entry = store.entry(from).await?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("not found: {}", from))
        })?;

        if entry.is_dir() {
            let source = store.directory(from, false).await?;
            store.directory(to, true).await?;
            for child in store.list(&source).await? {
                let child_from = from.child(&child.name)?;
                let child_to = to.child(&child.name)?;
                copy_entry(store, &child_from, &child_to).await?;
            }
            return Ok(());
        }

        let source = store.file(from, false).await?;
        let mut handle = store.open_sync_handle(&source).await?;
        let data = read_all(handle.as_mut());
        handle.close()?;
        let data = data?;

        let target = store.file(to, true).await?;
        store.write_at(&target, 0, &data).await?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> VfsPath {
        VfsPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn copy_entry_copies_trees() {
        let store = MemoryStore::new();
        let f = store.file(&p("src/a/one.txt"), true).await.unwrap();
        store.write_at(&f, 0, b"one").await.unwrap();
        let f = store.file(&p("src/two.txt"), true).await.unwrap();
        store.write_at(&f, 0, b"two").await.unwrap();

        copy_entry(&store, &p("src"), &p("dst")).await.unwrap();

        let dst = store.directory(&p("dst"), false).await.unwrap();
        let names: Vec<_> = store
            .list(&dst)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a".to_string(), "two.txt".to_string()]);

        let copied = store.file(&p("dst/a/one.txt"), false).await.unwrap();
        let mut handle = store.open_sync_handle(&copied).await.unwrap();
        assert_eq!(read_all(handle.as_mut()).unwrap(), b"one");
        handle.close().unwrap();

        // Source untouched
        assert!(store.entry(&p("src/a/one.txt")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn read_exact_at_clamps_to_file() {
        let store = MemoryStore::new();
        let f = store.file(&p("f"), true).await.unwrap();
        store.write_at(&f, 0, b"abc").await.unwrap();
        let mut handle = store.open_sync_handle(&f).await.unwrap();

        assert_eq!(read_exact_at(handle.as_mut(), usize::MAX, 0).unwrap(), b"abc");
        assert_eq!(read_exact_at(handle.as_mut(), usize::MAX, 2).unwrap(), b"c");
        assert!(read_exact_at(handle.as_mut(), usize::MAX, u64::MAX).unwrap().is_empty());
        handle.close().unwrap();
    }

    #[tokio::test]
    async fn write_all_at_rejects_overflowing_offset() {
        let store = MemoryStore::new();
        let f = store.file(&p("f"), true).await.unwrap();
        let mut handle = store.open_sync_handle(&f).await.unwrap();

        let err = write_all_at(handle.as_mut(), b"x", u64::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(handle.size().unwrap(), 0);
        handle.close().unwrap();
    }

    #[tokio::test]
    async fn copy_entry_missing_source() {
        let store = MemoryStore::new();
        let err = copy_entry(&store, &p("nope"), &p("dst")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
