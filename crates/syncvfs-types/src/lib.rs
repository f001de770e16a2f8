//! syncvfs-types: pure data types shared by the syncvfs crates.
//!
//! Nothing in here performs I/O. The kernel crate builds the filesystem on
//! top of these; collaborators (ABI adapters, the REPL) consume them.

mod entry;
mod error;
mod path;

pub use entry::{DirectoryEntry, EntryKind, NamespaceEntry};
pub use error::{ErrorCode, VfsError, VfsResult};
pub use path::VfsPath;
