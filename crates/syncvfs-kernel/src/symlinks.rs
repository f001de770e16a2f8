//! Symlink store.
//!
//! The backing store has no symbolic links, so they live in a separate
//! durable key-value map keyed by normalized path. The whole map is loaded
//! into memory at startup; mutations apply to the in-memory mirror at once
//! and are persisted by background tasks. A crash between the two loses the
//! mutation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use syncvfs_types::VfsPath;

use crate::background::Background;

/// Durable storage for symlink records.
#[async_trait]
pub trait SymlinkMap: Send + Sync {
    /// Every record, keyed by normalized path.
    async fn load(&self) -> io::Result<BTreeMap<String, String>>;

    async fn put(&self, path: &str, target: &str) -> io::Result<()>;

    async fn delete(&self, path: &str) -> io::Result<()>;
}

/// Symlink map held in memory. Clones share the records.
#[derive(Debug, Clone, Default)]
pub struct MemorySymlinkMap {
    records: Arc<Mutex<BTreeMap<String, String>>>,
    failing: Arc<AtomicBool>,
}

impl MemorySymlinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing records.
    pub fn with_records<I, K, V>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = Self::new();
        map.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(records.into_iter().map(|(k, v)| (k.into(), v.into())));
        map
    }

    /// Make every later write fail, to exercise swallowed persistence errors.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Current persisted records.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check(&self) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::other("symlink map unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SymlinkMap for MemorySymlinkMap {
    async fn load(&self) -> io::Result<BTreeMap<String, String>> {
        Ok(self.snapshot())
    }

    async fn put(&self, path: &str, target: &str) -> io::Result<()> {
        self.check()?;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), target.to_string());
        Ok(())
    }

    async fn delete(&self, path: &str) -> io::Result<()> {
        self.check()?;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SymlinkDocument {
    version: u32,
    links: BTreeMap<String, String>,
}

/// Symlink map stored as a JSON document on the host.
///
/// Every write rewrites the document to a temporary file and renames it over
/// the old one.
#[derive(Debug)]
pub struct JsonSymlinkMap {
    path: PathBuf,
    links: tokio::sync::Mutex<Option<BTreeMap<String, String>>>,
}

impl JsonSymlinkMap {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            links: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> io::Result<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let doc: SymlinkDocument = serde_json::from_slice(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(doc.links)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e),
        }
    }

    async fn write_document(&self, links: &BTreeMap<String, String>) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let doc = SymlinkDocument {
            version: 1,
            links: links.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&doc).map_err(io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }

    async fn update<F>(&self, apply: F) -> io::Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) + Send,
    {
        let mut guard = self.links.lock().await;
        let mut links = match guard.take() {
            Some(links) => links,
            None => self.read_document().await?,
        };
        apply(&mut links);
        let written = self.write_document(&links).await;
        *guard = Some(links);
        written
    }
}

#[async_trait]
impl SymlinkMap for JsonSymlinkMap {
    async fn load(&self) -> io::Result<BTreeMap<String, String>> {
        let mut guard = self.links.lock().await;
        let links = self.read_document().await?;
        *guard = Some(links.clone());
        Ok(links)
    }

    async fn put(&self, path: &str, target: &str) -> io::Result<()> {
        let (path, target) = (path.to_string(), target.to_string());
        self.update(move |links| {
            links.insert(path, target);
        })
        .await
    }

    async fn delete(&self, path: &str) -> io::Result<()> {
        let path = path.to_string();
        self.update(move |links| {
            links.remove(&path);
        })
        .await
    }
}

/// In-memory mirror of the symlink map.
pub struct SymlinkStore {
    records: BTreeMap<VfsPath, String>,
    map: Arc<dyn SymlinkMap>,
}

impl SymlinkStore {
    /// Load every record from `map`. Keys that are not valid paths are
    /// skipped with a warning.
    pub async fn load(map: Arc<dyn SymlinkMap>) -> io::Result<Self> {
        let mut records = BTreeMap::new();
        for (key, target) in map.load().await? {
            match VfsPath::parse(&key) {
                Ok(path) if !path.is_root() => {
                    records.insert(path, target);
                }
                _ => tracing::warn!(key = %key, "skipping malformed symlink record"),
            }
        }
        tracing::debug!(count = records.len(), "symlink records loaded");
        Ok(Self { records, map })
    }

    pub fn get(&self, path: &VfsPath) -> Option<&str> {
        self.records.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Symlinks directly inside `dir`, as `(name, target)`.
    pub fn children_of<'a>(&'a self, dir: &'a VfsPath) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.records.iter().filter_map(move |(path, target)| {
            if path.parent().as_ref() == Some(dir) {
                path.file_name().map(|name| (name, target.as_str()))
            } else {
                None
            }
        })
    }

    pub fn insert(&mut self, path: VfsPath, target: String, background: &Background) {
        self.persist_put(&path, &target, background);
        self.records.insert(path, target);
    }

    pub fn remove(&mut self, path: &VfsPath, background: &Background) -> Option<String> {
        let removed = self.records.remove(path)?;
        self.persist_delete(path, background);
        Some(removed)
    }

    /// Remove every record at or below `prefix`.
    pub fn remove_under(&mut self, prefix: &VfsPath, background: &Background) -> usize {
        let doomed = self.paths_under(prefix);
        for path in &doomed {
            self.remove(path, background);
        }
        doomed.len()
    }

    /// Re-key one record.
    pub fn rename(&mut self, from: &VfsPath, to: &VfsPath, background: &Background) -> bool {
        match self.remove(from, background) {
            Some(target) => {
                self.insert(to.clone(), target, background);
                true
            }
            None => false,
        }
    }

    /// Re-key every record below a renamed directory.
    pub fn rename_prefix(&mut self, from: &VfsPath, to: &VfsPath, background: &Background) -> usize {
        let moved = self.paths_under(from);
        for path in &moved {
            let Some(rest) = path.strip_prefix(from) else {
                continue;
            };
            let new_path = to.join(&rest);
            self.rename(path, &new_path, background);
        }
        moved.len()
    }

    fn paths_under(&self, prefix: &VfsPath) -> Vec<VfsPath> {
        self.records
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn persist_put(&self, path: &VfsPath, target: &str, background: &Background) {
        let map = Arc::clone(&self.map);
        let key = path.as_str().to_string();
        let target = target.to_string();
        background.submit(format!("persist symlink {}", path), async move {
            map.put(&key, &target).await
        });
    }

    fn persist_delete(&self, path: &VfsPath, background: &Background) {
        let map = Arc::clone(&self.map);
        let key = path.as_str().to_string();
        background.submit(format!("delete symlink {}", path), async move {
            map.delete(&key).await
        });
    }
}

impl std::fmt::Debug for SymlinkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymlinkStore")
            .field("records", &self.records)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::store::MemoryStore;

    fn p(s: &str) -> VfsPath {
        VfsPath::parse(s).unwrap()
    }

    fn setup(map: MemorySymlinkMap) -> (Bridge, Background, SymlinkStore) {
        let bridge = Bridge::start(Arc::new(MemoryStore::new()), 4).unwrap();
        let background = Background::new(bridge.runtime().clone(), bridge.tracker().clone());
        let store = bridge
            .run_on_helper(SymlinkStore::load(Arc::new(map)))
            .unwrap()
            .unwrap();
        (bridge, background, store)
    }

    #[test]
    fn test_load_skips_malformed_keys() {
        let map = MemorySymlinkMap::with_records([("a/link", "target"), ("../escape", "x"), ("", "root")]);
        let (_bridge, _bg, store) = setup(map);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&p("a/link")), Some("target"));
    }

    #[test]
    fn test_mutations_visible_immediately_and_persisted_later() {
        let map = MemorySymlinkMap::new();
        let (_bridge, background, mut store) = setup(map.clone());

        store.insert(p("l"), "/t".to_string(), &background);
        assert_eq!(store.get(&p("l")), Some("/t"));

        background.wait_idle();
        assert_eq!(map.snapshot().get("l").map(String::as_str), Some("/t"));

        assert_eq!(store.remove(&p("l"), &background).as_deref(), Some("/t"));
        background.wait_idle();
        assert!(map.snapshot().is_empty());
    }

    #[test]
    fn test_persistence_failure_keeps_memory_state() {
        let map = MemorySymlinkMap::new();
        let (_bridge, background, mut store) = setup(map.clone());
        map.set_failing(true);

        store.insert(p("l"), "t".to_string(), &background);
        background.wait_idle();
        assert_eq!(store.get(&p("l")), Some("t"));
        assert!(map.snapshot().is_empty());
    }

    #[test]
    fn test_children_and_prefix_operations() {
        let map = MemorySymlinkMap::with_records([("d/a", "1"), ("d/sub/b", "2"), ("dx", "3")]);
        let (_bridge, background, mut store) = setup(map.clone());

        let dir = p("d");
        let children: Vec<_> = store.children_of(&dir).collect();
        assert_eq!(children, vec![("a", "1")]);

        assert_eq!(store.rename_prefix(&p("d"), &p("e"), &background), 2);
        assert_eq!(store.get(&p("e/sub/b")), Some("2"));
        assert!(store.get(&p("d/a")).is_none());

        assert_eq!(store.remove_under(&p("e"), &background), 2);
        assert_eq!(store.len(), 1);

        background.wait_idle();
        let persisted = map.snapshot();
        assert_eq!(persisted.keys().collect::<Vec<_>>(), vec!["dx"]);
    }

    #[tokio::test]
    async fn test_json_map_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links").join("default.json");

        let map = JsonSymlinkMap::new(&path);
        assert!(map.load().await.unwrap().is_empty());
        map.put("a/b", "../c").await.unwrap();
        map.put("x", "/y").await.unwrap();
        map.delete("x").await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = JsonSymlinkMap::new(&path);
        let links = reopened.load().await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links.get("a/b").map(String::as_str), Some("../c"));
    }

    #[tokio::test]
    async fn test_json_map_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let err = JsonSymlinkMap::new(&path).load().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
