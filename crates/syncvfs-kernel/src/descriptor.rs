//! Descriptors and directory streams.

use syncvfs_types::{DirectoryEntry, NamespaceEntry, VfsPath};

/// Flags for [`crate::Vfs::open_at`].
///
/// The default opens an existing entry for reading, following a final
/// symlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Create the entry (and its parents) if absent.
    pub create: bool,
    /// The entry must be a directory; with `create`, create one.
    pub directory: bool,
    /// With `create`, fail if the entry already exists.
    pub exclusive: bool,
    /// Truncate an existing file to zero length.
    pub truncate: bool,
    pub read: bool,
    pub write: bool,
    /// Stream writes always land at end of file.
    pub append: bool,
    /// Follow a symlink in the final segment.
    pub follow: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            create: false,
            directory: false,
            exclusive: false,
            truncate: false,
            read: true,
            write: false,
            append: false,
            follow: true,
        }
    }
}

impl OpenFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and write an existing file.
    pub fn read_write() -> Self {
        Self::default().write(true)
    }

    /// Read and write, creating the file if absent.
    pub fn create_file() -> Self {
        Self::read_write().create(true)
    }

    /// Open (or with `create`, make) a directory.
    pub fn directory_only() -> Self {
        Self::default().directory(true)
    }

    pub fn create(mut self, yes: bool) -> Self {
        self.create = yes;
        self
    }

    pub fn directory(mut self, yes: bool) -> Self {
        self.directory = yes;
        self
    }

    pub fn exclusive(mut self, yes: bool) -> Self {
        self.exclusive = yes;
        self
    }

    pub fn truncate(mut self, yes: bool) -> Self {
        self.truncate = yes;
        self
    }

    pub fn read(mut self, yes: bool) -> Self {
        self.read = yes;
        self
    }

    pub fn write(mut self, yes: bool) -> Self {
        self.write = yes;
        self
    }

    pub fn append(mut self, yes: bool) -> Self {
        self.append = yes;
        self
    }

    pub fn follow(mut self, yes: bool) -> Self {
        self.follow = yes;
        self
    }

    /// Whether the flags permit modifying file content.
    pub fn writable(&self) -> bool {
        self.write || self.append
    }
}

/// A resolved path, the entry seen at open time, the open flags and a cursor.
///
/// Descriptors are plain values; many may refer to one path and each keeps
/// its own cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    path: VfsPath,
    entry: NamespaceEntry,
    flags: OpenFlags,
    cursor: u64,
}

impl Descriptor {
    pub(crate) fn new(path: VfsPath, entry: NamespaceEntry, flags: OpenFlags) -> Self {
        Self {
            path,
            entry,
            flags,
            cursor: 0,
        }
    }

    pub fn path(&self) -> &VfsPath {
        &self.path
    }

    /// Entry snapshot taken at open time. Use `Vfs::stat` for the live entry.
    pub fn entry(&self) -> &NamespaceEntry {
        &self.entry
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn is_dir(&self) -> bool {
        self.entry.is_dir()
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub(crate) fn set_cursor(&mut self, cursor: u64) {
        self.cursor = cursor;
    }
}

/// One pass over a directory's children. Not restartable.
#[derive(Debug)]
pub struct DirectoryStream {
    entries: std::vec::IntoIter<DirectoryEntry>,
}

impl DirectoryStream {
    pub(crate) fn new(entries: Vec<DirectoryEntry>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }

    /// The next child, or `None` once exhausted.
    pub fn next_entry(&mut self) -> Option<DirectoryEntry> {
        self.entries.next()
    }

    pub fn remaining(&self) -> usize {
        self.entries.len()
    }
}

impl Iterator for DirectoryStream {
    type Item = DirectoryEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncvfs_types::EntryKind;

    #[test]
    fn test_flag_builders() {
        let flags = OpenFlags::create_file().exclusive(true);
        assert!(flags.create && flags.write && flags.read && flags.exclusive && flags.follow);
        assert!(flags.writable());
        assert!(!OpenFlags::default().writable());
        assert!(OpenFlags::new().append(true).writable());
    }

    #[test]
    fn test_stream_exhausts() {
        let mut stream = DirectoryStream::new(vec![
            DirectoryEntry::new("a", EntryKind::RegularFile),
            DirectoryEntry::new("b", EntryKind::Directory),
        ]);
        assert_eq!(stream.remaining(), 2);
        assert_eq!(stream.next_entry().map(|e| e.name), Some("a".to_string()));
        assert_eq!(stream.next().map(|e| e.kind), Some(EntryKind::Directory));
        assert!(stream.next_entry().is_none());
        assert!(stream.next().is_none());
    }
}
