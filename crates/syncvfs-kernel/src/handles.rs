//! Handle cache: normalized path to open synchronous handle.
//!
//! The cache owns every handle it holds and only lends `&mut` borrows, so a
//! handle can never be used after eviction. It is mutated only by the calling
//! thread; the helper context never sees it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use syncvfs_types::{VfsPath, VfsResult};

use crate::bridge::{BridgeClient, BridgeOp};
use crate::store::SyncHandle;

#[derive(Debug, Default)]
pub struct HandleCache {
    handles: HashMap<VfsPath, Box<dyn SyncHandle>>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached handle for `path`, if warm.
    pub fn get(&mut self, path: &VfsPath) -> Option<&mut (dyn SyncHandle + 'static)> {
        self.handles.get_mut(path).map(|h| h.as_mut())
    }

    /// The cached handle for `path`, opening one through the bridge if cold.
    pub fn acquire(
        &mut self,
        path: &VfsPath,
        client: &mut BridgeClient,
    ) -> VfsResult<&mut (dyn SyncHandle + 'static)> {
        match self.handles.entry(path.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut().as_mut()),
            Entry::Vacant(entry) => {
                let handle = client
                    .call(BridgeOp::OpenHandle { path: path.clone() })?
                    .into_handle()?;
                tracing::debug!(path = %path, "handle cached");
                Ok(entry.insert(handle).as_mut())
            }
        }
    }

    /// Close and evict the handle for `path`. Returns whether one was cached.
    pub fn release(&mut self, path: &VfsPath) -> bool {
        match self.handles.remove(path) {
            Some(handle) => {
                close_quietly(path, handle);
                true
            }
            None => false,
        }
    }

    /// Close and evict every handle at or below `prefix`.
    pub fn release_under(&mut self, prefix: &VfsPath) -> usize {
        let doomed: Vec<VfsPath> = self
            .handles
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        for path in &doomed {
            self.release(path);
        }
        doomed.len()
    }

    /// Close and evict everything.
    pub fn release_all(&mut self) {
        for (path, handle) in self.handles.drain() {
            close_quietly(&path, handle);
        }
    }

    pub fn contains(&self, path: &VfsPath) -> bool {
        self.handles.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

fn close_quietly(path: &VfsPath, handle: Box<dyn SyncHandle>) {
    match handle.close() {
        Ok(()) => tracing::debug!(path = %path, "handle evicted"),
        Err(e) => tracing::warn!(path = %path, error = %e, "failed to close handle"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::store::MemoryStore;
    use std::sync::Arc;
    use syncvfs_types::ErrorCode;

    fn p(s: &str) -> VfsPath {
        VfsPath::parse(s).unwrap()
    }

    fn setup(files: &[&str]) -> (Bridge, BridgeClient, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let bridge = Bridge::start(store.clone(), 4).unwrap();
        let mut client = bridge.client().unwrap();
        for file in files {
            client.call(BridgeOp::CreateFile { path: p(file) }).unwrap();
        }
        (bridge, client, store)
    }

    #[test]
    fn test_acquire_once_per_path() {
        let (_bridge, mut client, store) = setup(&["a.txt"]);
        let mut cache = HandleCache::new();
        assert!(cache.get(&p("a.txt")).is_none());

        cache
            .acquire(&p("a.txt"), &mut client)
            .unwrap()
            .write(b"hi", 0)
            .unwrap();
        // Second acquire reuses the cached handle; the store allows only one.
        let handle = cache.acquire(&p("a.txt"), &mut client).unwrap();
        assert_eq!(handle.size().unwrap(), 2);
        assert_eq!(cache.len(), 1);
        assert!(store.has_open_handle(&p("a.txt")));
    }

    #[test]
    fn test_acquire_missing_file() {
        let (_bridge, mut client, _store) = setup(&[]);
        let mut cache = HandleCache::new();
        let err = cache.acquire(&p("nope"), &mut client).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_release_closes_handle() {
        let (_bridge, mut client, store) = setup(&["a.txt"]);
        let mut cache = HandleCache::new();
        cache.acquire(&p("a.txt"), &mut client).unwrap();

        assert!(cache.release(&p("a.txt")));
        assert!(!cache.release(&p("a.txt")));
        assert!(!store.has_open_handle(&p("a.txt")));
    }

    #[test]
    fn test_release_under_prefix() {
        let (_bridge, mut client, store) = setup(&["d/one", "d/sub/two", "dx"]);
        let mut cache = HandleCache::new();
        for path in ["d/one", "d/sub/two", "dx"] {
            cache.acquire(&p(path), &mut client).unwrap();
        }

        assert_eq!(cache.release_under(&p("d")), 2);
        assert!(cache.contains(&p("dx")));
        assert!(!store.has_open_handle(&p("d/sub/two")));

        cache.release_all();
        assert!(cache.is_empty());
        assert!(!store.has_open_handle(&p("dx")));
    }
}
