//! Optional cache of directory listings.
//!
//! The backing store stays the source of truth: the facade clears the whole
//! cache on every mutation, so a cached listing is never older than the last
//! change made through this VFS.

use std::collections::HashMap;

use syncvfs_types::{DirectoryEntry, VfsPath};

#[derive(Debug, Default)]
pub struct ListingCache {
    enabled: bool,
    listings: HashMap<VfsPath, Vec<DirectoryEntry>>,
}

impl ListingCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            listings: HashMap::new(),
        }
    }

    pub fn get(&self, dir: &VfsPath) -> Option<&[DirectoryEntry]> {
        self.listings.get(dir).map(Vec::as_slice)
    }

    pub fn insert(&mut self, dir: VfsPath, entries: Vec<DirectoryEntry>) {
        if self.enabled {
            self.listings.insert(dir, entries);
        }
    }

    pub fn clear(&mut self) {
        if !self.listings.is_empty() {
            tracing::trace!(count = self.listings.len(), "listing cache cleared");
            self.listings.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncvfs_types::EntryKind;

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let mut cache = ListingCache::new(false);
        cache.insert(VfsPath::root(), vec![DirectoryEntry::new("a", EntryKind::RegularFile)]);
        assert!(cache.get(&VfsPath::root()).is_none());
    }

    #[test]
    fn test_insert_and_clear() {
        let mut cache = ListingCache::new(true);
        cache.insert(VfsPath::root(), vec![DirectoryEntry::new("a", EntryKind::Directory)]);
        assert_eq!(cache.get(&VfsPath::root()).map(<[_]>::len), Some(1));
        cache.clear();
        assert!(cache.get(&VfsPath::root()).is_none());
    }
}
