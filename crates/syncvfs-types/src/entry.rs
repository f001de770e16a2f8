//! Namespace entries and directory listings.

use serde::{Deserialize, Serialize};

/// What occupies a path.
///
/// Directories, files and symlinks share one namespace: at most one of them
/// exists at a path at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NamespaceEntry {
    Directory,
    File { size: u64, mtime_millis: u64 },
    Symlink { target: String },
}

impl NamespaceEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            NamespaceEntry::Directory => EntryKind::Directory,
            NamespaceEntry::File { .. } => EntryKind::RegularFile,
            NamespaceEntry::Symlink { .. } => EntryKind::SymbolicLink,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, NamespaceEntry::Directory)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, NamespaceEntry::File { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, NamespaceEntry::Symlink { .. })
    }

    /// Size in bytes. Directories are 0; symlinks report the target length.
    pub fn size(&self) -> u64 {
        match self {
            NamespaceEntry::Directory => 0,
            NamespaceEntry::File { size, .. } => *size,
            NamespaceEntry::Symlink { target } => target.len() as u64,
        }
    }
}

/// Kind tag carried by directory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Directory,
    RegularFile,
    SymbolicLink,
}

/// One child of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Name of the entry (not full path).
    pub name: String,
    pub kind: EntryKind,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(NamespaceEntry::Directory.kind(), EntryKind::Directory);
        let file = NamespaceEntry::File {
            size: 3,
            mtime_millis: 1,
        };
        assert_eq!(file.kind(), EntryKind::RegularFile);
        assert_eq!(file.size(), 3);
        let link = NamespaceEntry::Symlink {
            target: "real.txt".into(),
        };
        assert!(link.is_symlink());
        assert_eq!(link.size(), 8);
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_string(&NamespaceEntry::Symlink {
            target: "x".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"symlink","target":"x"}"#);
    }
}
