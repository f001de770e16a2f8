//! VFS configuration.
//!
//! Loaded from TOML; every field has a default, so an empty file is valid.
//!
//! ```toml
//! name = "work"
//! cwd = "/home"
//! cold_path = "direct"
//! cache_listings = true
//!
//! [store]
//! kind = "local"
//! root = "/var/lib/syncvfs/work"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::paths;
use crate::resolver::DEFAULT_MAX_SYMLINK_DEPTH;

/// Default capacity of the bridge request queue.
pub const DEFAULT_BRIDGE_QUEUE_DEPTH: usize = 64;

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which backing store sits under the VFS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store; nothing survives the process.
    Memory,
    /// Host directory. Defaults to the per-instance XDG data directory.
    Local {
        #[serde(default)]
        root: Option<PathBuf>,
    },
}

/// What a cold read or write does when no handle is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColdPath {
    /// Open a synchronous handle through the bridge and keep it cached.
    #[default]
    Acquire,
    /// One-shot read or write through the bridge; nothing is cached.
    Direct,
}

/// Configuration for a [`crate::Vfs`] instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Instance name, used to derive default on-disk locations.
    pub name: String,
    pub store: StoreConfig,
    /// JSON symlink map. Defaults per instance for local stores; memory
    /// stores keep symlinks in memory unless this is set.
    pub symlink_db: Option<PathBuf>,
    /// Initial working directory, created if missing.
    pub cwd: String,
    pub cold_path: ColdPath,
    pub cache_listings: bool,
    pub max_symlink_depth: usize,
    pub bridge_queue_depth: usize,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self::persistent("default")
    }
}

impl VfsConfig {
    /// A memory-backed instance that leaves nothing behind.
    pub fn transient() -> Self {
        Self {
            name: "transient".to_string(),
            store: StoreConfig::Memory,
            ..Self::persistent("transient")
        }
    }

    /// A durable instance under the XDG data directory.
    pub fn persistent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            store: StoreConfig::Local { root: None },
            symlink_db: None,
            cwd: "/".to_string(),
            cold_path: ColdPath::Acquire,
            cache_listings: false,
            max_symlink_depth: DEFAULT_MAX_SYMLINK_DEPTH,
            bridge_queue_depth: DEFAULT_BRIDGE_QUEUE_DEPTH,
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Host directory of a local store, or `None` for memory stores.
    pub fn store_root(&self) -> Option<PathBuf> {
        match &self.store {
            StoreConfig::Memory => None,
            StoreConfig::Local { root } => {
                Some(root.clone().unwrap_or_else(|| paths::store_root(&self.name)))
            }
        }
    }

    /// Where symlink records persist, or `None` to keep them in memory.
    pub fn symlink_db_path(&self) -> Option<PathBuf> {
        match (&self.symlink_db, &self.store) {
            (Some(path), _) => Some(path.clone()),
            (None, StoreConfig::Memory) => None,
            (None, StoreConfig::Local { .. }) => Some(paths::symlink_db(&self.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = VfsConfig::from_toml_str("").unwrap();
        assert_eq!(config, VfsConfig::default());
        assert_eq!(config.max_symlink_depth, 40);
    }

    #[test]
    fn test_transient_keeps_everything_in_memory() {
        let config = VfsConfig::transient();
        assert!(config.store_root().is_none());
        assert!(config.symlink_db_path().is_none());
    }

    #[test]
    fn test_persistent_paths_follow_name() {
        let config = VfsConfig::persistent("work");
        assert!(config.store_root().unwrap().ends_with("stores/work"));
        assert!(config.symlink_db_path().unwrap().ends_with("symlinks/work.json"));
    }

    #[test]
    fn test_parse_full() {
        let config = VfsConfig::from_toml_str(
            r#"
            name = "w"
            cwd = "/home"
            cold_path = "direct"
            cache_listings = true
            max_symlink_depth = 8
            symlink_db = "/tmp/links.json"

            [store]
            kind = "local"
            root = "/srv/w"
            "#,
        )
        .unwrap();
        assert_eq!(config.cold_path, ColdPath::Direct);
        assert!(config.cache_listings);
        assert_eq!(config.max_symlink_depth, 8);
        assert_eq!(config.bridge_queue_depth, DEFAULT_BRIDGE_QUEUE_DEPTH);
        assert_eq!(config.store_root(), Some(PathBuf::from("/srv/w")));
        assert_eq!(config.symlink_db_path(), Some(PathBuf::from("/tmp/links.json")));
    }

    #[test]
    fn test_memory_store_table() {
        let config = VfsConfig::from_toml_str("[store]\nkind = \"memory\"\n").unwrap();
        assert_eq!(config.store, StoreConfig::Memory);
    }

    #[test]
    fn test_bad_value_is_parse_error() {
        let err = VfsConfig::from_toml_str("cold_path = \"sometimes\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = VfsConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
