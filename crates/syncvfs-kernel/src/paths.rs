//! XDG Base Directory paths for persistent VFS instances.
//!
//! | Purpose | XDG Variable | Default | syncvfs Path |
//! |---------|--------------|---------|--------------|
//! | File content | `$XDG_DATA_HOME` | `~/.local/share` | `$XDG_DATA_HOME/syncvfs/stores/{name}/` |
//! | Symlink map | `$XDG_DATA_HOME` | `~/.local/share` | `$XDG_DATA_HOME/syncvfs/symlinks/{name}.json` |
//! | Config | `$XDG_CONFIG_HOME` | `~/.config` | `$XDG_CONFIG_HOME/syncvfs/config.toml` |

use std::path::PathBuf;

use directories::BaseDirs;

/// Get the data directory for persistent state.
///
/// Uses `$XDG_DATA_HOME/syncvfs` or falls back to `~/.local/share/syncvfs`.
pub fn data_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback().join(".local").join("share"))
        .join("syncvfs")
}

/// Get the config directory.
pub fn config_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback().join(".config"))
        .join("syncvfs")
}

/// Default config file location.
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Host directory holding the file content of the named instance.
pub fn store_root(name: &str) -> PathBuf {
    data_dir().join("stores").join(name)
}

/// JSON symlink map of the named instance.
pub fn symlink_db(name: &str) -> PathBuf {
    data_dir().join("symlinks").join(format!("{}.json", name))
}

fn home_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_under_syncvfs() {
        assert!(data_dir().ends_with("syncvfs"));
        assert!(config_dir().ends_with("syncvfs"));
        assert!(config_file().ends_with("syncvfs/config.toml"));
    }

    #[test]
    fn instance_paths_are_under_data() {
        let data = data_dir();
        let root = store_root("work");
        assert!(root.starts_with(&data));
        assert!(root.ends_with("stores/work"));

        let db = symlink_db("work");
        assert!(db.starts_with(&data));
        assert!(db.ends_with("symlinks/work.json"));
    }
}
