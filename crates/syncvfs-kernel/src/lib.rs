//! syncvfs-kernel: a synchronous filesystem over an asynchronous store.
//!
//! This crate provides:
//!
//! - **Store**: the async, handle-based backing store trait, with memory and
//!   local-directory implementations
//! - **Bridge**: blocking calls into a helper thread that awaits the store
//! - **Handles**: cache of open synchronous handles (the warm path)
//! - **Symlinks**: symlink records kept beside the store, mirrored in memory
//! - **Resolver**: path normalization and symlink resolution
//! - **Vfs**: the facade a synchronous guest calls into
//!
//! ```no_run
//! use syncvfs_kernel::{OpenFlags, Vfs};
//!
//! let mut vfs = Vfs::in_memory()?;
//! let fd = vfs.open("a/b/c.txt", OpenFlags::create_file())?;
//! vfs.write(&fd, b"ABC", 0)?;
//! let (bytes, eof) = vfs.read(&fd, 10, 0)?;
//! assert_eq!((bytes.as_slice(), eof), (&b"ABC"[..], true));
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod background;
pub mod bridge;
pub mod config;
pub mod descriptor;
pub mod handles;
pub mod listing;
pub mod paths;
pub mod resolver;
pub mod store;
pub mod symlinks;
pub mod vfs;

pub use background::{CompletionHook, TaskReport};
pub use config::{ColdPath, ConfigError, StoreConfig, VfsConfig};
pub use descriptor::{Descriptor, DirectoryStream, OpenFlags};
pub use store::{BackingStore, LocalStore, MemoryStore, SyncHandle};
pub use symlinks::{JsonSymlinkMap, MemorySymlinkMap, SymlinkMap};
pub use vfs::{FileMeta, Vfs, VfsOptions};

pub use syncvfs_types::{
    DirectoryEntry, EntryKind, ErrorCode, NamespaceEntry, VfsError, VfsPath, VfsResult,
};
