//! The synchronous VFS facade.
//!
//! Every operation takes `&mut self` and returns a [`VfsResult`]. Reads and
//! writes on a path with a cached handle stay in-thread (the warm path);
//! everything else is one blocking round trip through the bridge.
//!
//! Namespace mutations follow one order: resolve, validate against the live
//! store, evict affected handles, mutate the store, update the symlink
//! mirror, clear the listing cache.

use std::collections::HashMap;
use std::fmt;
use std::io::SeekFrom;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use syncvfs_types::{
    DirectoryEntry, EntryKind, ErrorCode, NamespaceEntry, VfsError, VfsPath, VfsResult,
};

use crate::background::{Background, CompletionHook};
use crate::bridge::{Bridge, BridgeClient, BridgeOp, BridgeValue};
use crate::config::{ColdPath, VfsConfig, DEFAULT_BRIDGE_QUEUE_DEPTH};
use crate::descriptor::{Descriptor, DirectoryStream, OpenFlags};
use crate::handles::HandleCache;
use crate::listing::ListingCache;
use crate::resolver::{Resolver, DEFAULT_MAX_SYMLINK_DEPTH};
use crate::store::{
    self, BackingStore, LocalStore, MemoryStore, StoreEntryKind, SyncHandle,
};
use crate::symlinks::{JsonSymlinkMap, MemorySymlinkMap, SymlinkMap, SymlinkStore};

/// Runtime options for a [`Vfs`].
#[derive(Clone)]
pub struct VfsOptions {
    /// Initial working directory, created if missing.
    pub cwd: String,
    pub cold_path: ColdPath,
    pub cache_listings: bool,
    pub max_symlink_depth: usize,
    pub bridge_queue_depth: usize,
    /// Sees the outcome of every background task.
    pub completion_hook: Option<CompletionHook>,
}

impl Default for VfsOptions {
    fn default() -> Self {
        Self {
            cwd: "/".to_string(),
            cold_path: ColdPath::Acquire,
            cache_listings: false,
            max_symlink_depth: DEFAULT_MAX_SYMLINK_DEPTH,
            bridge_queue_depth: DEFAULT_BRIDGE_QUEUE_DEPTH,
            completion_hook: None,
        }
    }
}

impl VfsOptions {
    pub fn with_cold_path(mut self, cold_path: ColdPath) -> Self {
        self.cold_path = cold_path;
        self
    }

    pub fn with_listing_cache(mut self, enabled: bool) -> Self {
        self.cache_listings = enabled;
        self
    }

    pub fn with_completion_hook(mut self, hook: CompletionHook) -> Self {
        self.completion_hook = Some(hook);
        self
    }
}

impl From<&VfsConfig> for VfsOptions {
    fn from(config: &VfsConfig) -> Self {
        Self {
            cwd: config.cwd.clone(),
            cold_path: config.cold_path,
            cache_listings: config.cache_listings,
            max_symlink_depth: config.max_symlink_depth,
            bridge_queue_depth: config.bridge_queue_depth,
            completion_hook: None,
        }
    }
}

impl fmt::Debug for VfsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VfsOptions")
            .field("cwd", &self.cwd)
            .field("cold_path", &self.cold_path)
            .field("cache_listings", &self.cache_listings)
            .field("max_symlink_depth", &self.max_symlink_depth)
            .field("bridge_queue_depth", &self.bridge_queue_depth)
            .field("completion_hook", &self.completion_hook.is_some())
            .finish()
    }
}

/// Size and modification time last observed through this VFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub mtime_millis: u64,
}

#[derive(Debug, Default)]
struct PathWrites {
    generation: u64,
    pending: usize,
}

/// Generation counters that make queued detached writes stale.
#[derive(Debug, Clone, Default)]
struct DetachedWrites(Arc<Mutex<HashMap<VfsPath, PathWrites>>>);

impl DetachedWrites {
    fn lock(&self) -> MutexGuard<'_, HashMap<VfsPath, PathWrites>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, path: &VfsPath) -> u64 {
        let mut writes = self.lock();
        let entry = writes.entry(path.clone()).or_default();
        entry.pending += 1;
        entry.generation
    }

    fn finish(&self, path: &VfsPath) {
        let mut writes = self.lock();
        if let Some(entry) = writes.get_mut(path) {
            entry.pending = entry.pending.saturating_sub(1);
            if entry.pending == 0 {
                writes.remove(path);
            }
        }
    }

    fn is_current(&self, path: &VfsPath, generation: u64) -> bool {
        self.lock()
            .get(path)
            .is_some_and(|entry| entry.generation == generation)
    }

    fn has_pending(&self, path: &VfsPath) -> bool {
        self.lock().contains_key(path)
    }

    /// Make every queued write at or below `prefix` stale.
    fn invalidate_under(&self, prefix: &VfsPath) {
        for (path, entry) in self.lock().iter_mut() {
            if path.starts_with(prefix) {
                entry.generation += 1;
            }
        }
    }
}

/// Releases a detached write's pending slot however its task ends.
struct DetachedGuard {
    writes: DetachedWrites,
    path: VfsPath,
}

impl Drop for DetachedGuard {
    fn drop(&mut self) {
        self.writes.finish(&self.path);
    }
}

/// The synchronous VFS.
pub struct Vfs {
    client: BridgeClient,
    handles: HandleCache,
    symlinks: SymlinkStore,
    resolver: Resolver,
    listings: ListingCache,
    meta: HashMap<VfsPath, FileMeta>,
    detached: DetachedWrites,
    cold_path: ColdPath,
    background: Background,
    store: Arc<dyn BackingStore>,
    // Dropped last: joins the helper after everything above is gone.
    bridge: Bridge,
}

impl Vfs {
    /// Start a VFS over `store`, loading symlink records from `symlink_map`.
    pub fn new(
        store: Arc<dyn BackingStore>,
        symlink_map: Arc<dyn SymlinkMap>,
        options: VfsOptions,
    ) -> anyhow::Result<Self> {
        let bridge = Bridge::start(Arc::clone(&store), options.bridge_queue_depth)
            .context("failed to start helper context")?;
        let client = bridge.client()?;
        let symlinks = bridge
            .run_on_helper(SymlinkStore::load(symlink_map))?
            .context("failed to load symlink records")?;
        let mut background = Background::new(bridge.runtime().clone(), bridge.tracker().clone());
        background.set_hook(options.completion_hook.clone());

        let mut vfs = Self {
            client,
            handles: HandleCache::new(),
            symlinks,
            resolver: Resolver::new(options.max_symlink_depth),
            listings: ListingCache::new(options.cache_listings),
            meta: HashMap::new(),
            detached: DetachedWrites::default(),
            cold_path: options.cold_path,
            background,
            store,
            bridge,
        };

        let cwd = VfsPath::parse(&options.cwd)?;
        if !cwd.is_root() {
            vfs.call(BridgeOp::CreateDirectory {
                path: cwd.clone(),
                parents: true,
            })
            .with_context(|| format!("failed to create working directory {}", cwd))?;
            vfs.resolver.set_cwd(cwd);
        }

        tracing::info!(
            symlinks = vfs.symlinks.len(),
            cold_path = ?vfs.cold_path,
            cwd = %vfs.resolver.cwd(),
            "vfs ready"
        );
        Ok(vfs)
    }

    /// A VFS over a fresh in-memory store.
    pub fn in_memory() -> anyhow::Result<Self> {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySymlinkMap::new()),
            VfsOptions::default(),
        )
    }

    /// Build the store and symlink map a configuration describes.
    pub fn from_config(config: &VfsConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn BackingStore> = match config.store_root() {
            Some(root) => {
                std::fs::create_dir_all(&root)
                    .with_context(|| format!("failed to create store root {}", root.display()))?;
                Arc::new(LocalStore::new(root))
            }
            None => Arc::new(MemoryStore::new()),
        };
        let symlink_map: Arc<dyn SymlinkMap> = match config.symlink_db_path() {
            Some(path) => Arc::new(JsonSymlinkMap::new(path)),
            None => Arc::new(MemorySymlinkMap::new()),
        };
        Self::new(store, symlink_map, VfsOptions::from(config))
    }

    // --- Opening ---

    /// Open `path` relative to the working directory.
    pub fn open(&mut self, path: &str, flags: OpenFlags) -> VfsResult<Descriptor> {
        self.open_at(None, path, flags)
    }

    /// Open `path` relative to `base` (a directory descriptor), or to the
    /// working directory when `base` is `None`.
    pub fn open_at(
        &mut self,
        base: Option<&Descriptor>,
        path: &str,
        flags: OpenFlags,
    ) -> VfsResult<Descriptor> {
        let path = self.resolve(base, path, flags.follow)?;

        let entry = match self.lookup(&path)? {
            Some(NamespaceEntry::Symlink { .. }) => {
                return Err(VfsError::new(
                    ErrorCode::Loop,
                    format!("{}: is a symbolic link", path),
                ));
            }
            Some(entry) => {
                if flags.create && (flags.exclusive || flags.directory) {
                    return Err(VfsError::already_exists(&path));
                }
                if flags.directory && !entry.is_dir() {
                    return Err(VfsError::not_a_directory(&path));
                }
                if entry.is_dir() && (flags.writable() || flags.truncate) {
                    return Err(VfsError::is_a_directory(&path));
                }
                if flags.truncate && entry.is_file() {
                    self.truncate_path(&path, 0)?;
                    NamespaceEntry::File {
                        size: 0,
                        mtime_millis: store::now_millis(),
                    }
                } else {
                    entry
                }
            }
            None if !flags.create => return Err(VfsError::not_found(&path)),
            None if flags.directory => {
                self.call(BridgeOp::CreateDirectory {
                    path: path.clone(),
                    parents: true,
                })?;
                self.listings.clear();
                NamespaceEntry::Directory
            }
            None => {
                self.call(BridgeOp::CreateFile { path: path.clone() })?;
                self.listings.clear();
                let mtime_millis = store::now_millis();
                self.meta.insert(
                    path.clone(),
                    FileMeta {
                        size: 0,
                        mtime_millis,
                    },
                );
                NamespaceEntry::File {
                    size: 0,
                    mtime_millis,
                }
            }
        };

        tracing::debug!(path = %path, kind = ?entry.kind(), "opened");
        Ok(Descriptor::new(path, entry, flags))
    }

    /// The preopened root directory, mounted at `/`.
    pub fn preopens(&self) -> Vec<(String, Descriptor)> {
        vec![(
            "/".to_string(),
            Descriptor::new(
                VfsPath::root(),
                NamespaceEntry::Directory,
                OpenFlags::directory_only(),
            ),
        )]
    }

    // --- File I/O ---

    /// Read up to `len` bytes at `offset`. The flag is true when the read
    /// reached end of file.
    pub fn read(&mut self, fd: &Descriptor, len: usize, offset: u64) -> VfsResult<(Vec<u8>, bool)> {
        require_file(fd)?;
        if !fd.flags().read {
            return Err(VfsError::invalid(format!("{}: not open for reading", fd.path())));
        }
        let path = fd.path();

        let (data, size) = match self.handle_for(path)? {
            Some(handle) => {
                let data = store::read_exact_at(handle, len, offset)?;
                (data, handle.size()?)
            }
            None => self
                .call(BridgeOp::ReadAt {
                    path: path.clone(),
                    offset,
                    len,
                })?
                .into_bytes()?,
        };

        let end_of_file = offset.saturating_add(data.len() as u64) >= size;
        tracing::trace!(path = %path, offset, read = data.len(), end_of_file, "read");
        Ok((data, end_of_file))
    }

    /// Write `data` at `offset`. Returns the number of bytes written.
    pub fn write(&mut self, fd: &Descriptor, data: &[u8], offset: u64) -> VfsResult<usize> {
        require_writable(fd)?;
        let path = fd.path();

        let size = match self.handle_for(path)? {
            Some(handle) => {
                store::write_all_at(handle, data, offset)?;
                handle.size()?
            }
            None => self
                .call(BridgeOp::WriteAt {
                    path: path.clone(),
                    offset,
                    data: data.to_vec(),
                })?
                .into_size()?,
        };

        self.meta.insert(
            path.clone(),
            FileMeta {
                size,
                mtime_millis: store::now_millis(),
            },
        );
        tracing::trace!(path = %path, offset, written = data.len(), size, "write");
        Ok(data.len())
    }

    /// Read at the descriptor's cursor and advance it.
    pub fn read_stream(&mut self, fd: &mut Descriptor, len: usize) -> VfsResult<(Vec<u8>, bool)> {
        let offset = fd.cursor();
        let (data, end_of_file) = self.read(fd, len, offset)?;
        fd.set_cursor(offset + data.len() as u64);
        Ok((data, end_of_file))
    }

    /// Write at the descriptor's cursor (or at end of file with `append`)
    /// and advance it.
    pub fn write_stream(&mut self, fd: &mut Descriptor, data: &[u8]) -> VfsResult<usize> {
        let offset = if fd.flags().append {
            self.file_size(fd.path())?
        } else {
            fd.cursor()
        };
        let written = self.write(fd, data, offset)?;
        fd.set_cursor(offset + written as u64);
        Ok(written)
    }

    /// Move the descriptor's cursor.
    pub fn seek(&mut self, fd: &mut Descriptor, pos: SeekFrom) -> VfsResult<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(fd.cursor()) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.file_size(fd.path())?) + i128::from(delta),
        };
        let cursor = u64::try_from(target)
            .map_err(|_| VfsError::invalid(format!("{}: seek to {}", fd.path(), target)))?;
        fd.set_cursor(cursor);
        Ok(cursor)
    }

    /// Fire-and-forget write.
    ///
    /// With a cached handle the write happens now. Otherwise it is queued on
    /// the helper and any failure is only logged (and reported to the
    /// completion hook). A queued write is dropped if the file is unlinked,
    /// renamed or truncated before it runs.
    pub fn write_detached(&mut self, fd: &Descriptor, data: Vec<u8>, offset: u64) -> VfsResult<()> {
        require_writable(fd)?;
        let path = fd.path().clone();

        if let Some(handle) = self.handles.get(&path) {
            store::write_all_at(handle, &data, offset)?;
            let size = handle.size()?;
            self.meta.insert(
                path,
                FileMeta {
                    size,
                    mtime_millis: store::now_millis(),
                },
            );
            return Ok(());
        }

        let generation = self.detached.begin(&path);
        let guard = DetachedGuard {
            writes: self.detached.clone(),
            path: path.clone(),
        };
        let writes = self.detached.clone();
        let store = Arc::clone(&self.store);
        self.background
            .submit(format!("detached write {}", path), async move {
                let _guard = guard;
                if !writes.is_current(&path, generation) {
                    tracing::debug!(path = %path, "dropping stale detached write");
                    return Ok(());
                }
                let file = store.file(&path, false).await?;
                store.write_at(&file, offset, &data).await?;
                Ok(())
            });
        Ok(())
    }

    /// Set the file length, zero-filling when growing.
    pub fn set_size(&mut self, fd: &Descriptor, len: u64) -> VfsResult<()> {
        require_writable(fd)?;
        self.truncate_path(fd.path(), len)
    }

    /// Flush the cached handle, if any.
    pub fn sync(&mut self, fd: &Descriptor) -> VfsResult<()> {
        if let Some(handle) = self.handles.get(fd.path()) {
            handle.flush()?;
        }
        Ok(())
    }

    /// Same as [`Vfs::sync`]; the store has no separate metadata flush.
    pub fn sync_data(&mut self, fd: &Descriptor) -> VfsResult<()> {
        self.sync(fd)
    }

    /// Close and evict the descriptor's cached handle. Returns whether one
    /// was cached.
    pub fn release(&mut self, fd: &Descriptor) -> bool {
        self.handles.release(fd.path())
    }

    // --- Metadata and listings ---

    /// The live entry behind a descriptor.
    pub fn stat(&mut self, fd: &Descriptor) -> VfsResult<NamespaceEntry> {
        self.lookup(fd.path())?
            .ok_or_else(|| VfsError::not_found(fd.path()))
    }

    /// The live entry at `path`. With `follow` false a final symlink is
    /// reported as itself.
    pub fn stat_at(
        &mut self,
        base: Option<&Descriptor>,
        path: &str,
        follow: bool,
    ) -> VfsResult<NamespaceEntry> {
        let path = self.resolve(base, path, follow)?;
        self.lookup(&path)?.ok_or_else(|| VfsError::not_found(&path))
    }

    /// Children of an open directory.
    pub fn read_directory(&mut self, fd: &Descriptor) -> VfsResult<DirectoryStream> {
        if !fd.is_dir() {
            return Err(VfsError::not_a_directory(fd.path()));
        }
        self.list(fd.path())
    }

    pub fn read_directory_at(
        &mut self,
        base: Option<&Descriptor>,
        path: &str,
    ) -> VfsResult<DirectoryStream> {
        let path = self.resolve(base, path, true)?;
        self.list(&path)
    }

    // --- Namespace mutation ---

    pub fn create_directory_at(&mut self, base: Option<&Descriptor>, path: &str) -> VfsResult<()> {
        let path = self.resolve(base, path, false)?;
        if path.is_root() || self.lookup(&path)?.is_some() {
            return Err(VfsError::already_exists(&path));
        }
        self.require_parent_directory(&path)?;
        self.call(BridgeOp::CreateDirectory {
            path: path.clone(),
            parents: false,
        })?;
        self.listings.clear();
        tracing::debug!(path = %path, "directory created");
        Ok(())
    }

    /// Remove a directory and everything below it.
    pub fn remove_directory_at(&mut self, base: Option<&Descriptor>, path: &str) -> VfsResult<()> {
        let path = self.resolve(base, path, false)?;
        if path.is_root() {
            return Err(VfsError::new(ErrorCode::Busy, "cannot remove the root directory"));
        }
        match self.lookup(&path)? {
            None => return Err(VfsError::not_found(&path)),
            Some(NamespaceEntry::Directory) => {}
            Some(_) => return Err(VfsError::not_a_directory(&path)),
        }

        self.forget(&path);
        self.listings.clear();
        self.call(BridgeOp::Remove {
            path: path.clone(),
            recursive: true,
        })?;
        let purged = self.symlinks.remove_under(&path, &self.background);
        tracing::debug!(path = %path, symlinks = purged, "directory removed");
        Ok(())
    }

    /// Remove a file, or a symlink record (never its target).
    pub fn unlink_file_at(&mut self, base: Option<&Descriptor>, path: &str) -> VfsResult<()> {
        let path = self.resolve(base, path, false)?;
        match self.lookup(&path)? {
            None => return Err(VfsError::not_found(&path)),
            Some(NamespaceEntry::Directory) => return Err(VfsError::is_a_directory(&path)),
            Some(NamespaceEntry::Symlink { .. }) => {
                self.symlinks.remove(&path, &self.background);
            }
            Some(NamespaceEntry::File { .. }) => {
                self.forget(&path);
                self.listings.clear();
                self.call(BridgeOp::Remove {
                    path: path.clone(),
                    recursive: false,
                })?;
            }
        }
        self.listings.clear();
        tracing::debug!(path = %path, "unlinked");
        Ok(())
    }

    /// Rename a file, directory or symlink. Never overwrites.
    ///
    /// Without a native move in the store this is a copy followed by a
    /// delete and is not atomic: if the delete fails both copies remain and
    /// the error is returned.
    pub fn rename_at(
        &mut self,
        old_base: Option<&Descriptor>,
        old_path: &str,
        new_base: Option<&Descriptor>,
        new_path: &str,
    ) -> VfsResult<()> {
        let from = self.resolve(old_base, old_path, false)?;
        let to = self.resolve(new_base, new_path, false)?;
        if from.is_root() || to.is_root() {
            return Err(VfsError::new(ErrorCode::Busy, "cannot rename the root directory"));
        }

        let entry = self
            .lookup(&from)?
            .ok_or_else(|| VfsError::not_found(&from))?;
        if from == to {
            return Ok(());
        }
        if self.lookup(&to)?.is_some() {
            return Err(VfsError::already_exists(&to));
        }
        if entry.is_dir() && to.starts_with(&from) {
            return Err(VfsError::invalid(format!(
                "cannot move {} into itself ({})",
                from, to
            )));
        }
        self.require_parent_directory(&to)?;
        self.listings.clear();

        if entry.is_symlink() {
            self.symlinks.rename(&from, &to, &self.background);
            tracing::debug!(from = %from, to = %to, "symlink renamed");
            return Ok(());
        }

        let moved_meta: Vec<(VfsPath, FileMeta)> = self
            .meta
            .iter()
            .filter_map(|(path, meta)| {
                let rest = path.strip_prefix(&from)?;
                Some((to.join(&rest), *meta))
            })
            .collect();
        self.forget(&from);
        match self.call(BridgeOp::Move {
            from: from.clone(),
            to: to.clone(),
        }) {
            Ok(_) => {}
            Err(e) if e.code == ErrorCode::Unsupported => self.copy_then_delete(&from, &to)?,
            Err(e) => return Err(e),
        }
        self.meta.extend(moved_meta);
        if entry.is_dir() {
            self.symlinks.rename_prefix(&from, &to, &self.background);
        }
        tracing::debug!(from = %from, to = %to, "renamed");
        Ok(())
    }

    /// Create a symlink at `link` pointing at `target`, stored verbatim.
    pub fn symlink_at(
        &mut self,
        base: Option<&Descriptor>,
        target: &str,
        link: &str,
    ) -> VfsResult<()> {
        if target.is_empty() || target.contains('\0') {
            return Err(VfsError::invalid(format!("bad symlink target {:?}", target)));
        }
        let path = self.resolve(base, link, false)?;
        if path.is_root() || self.lookup(&path)?.is_some() {
            return Err(VfsError::already_exists(&path));
        }
        self.require_parent_directory(&path)?;

        self.symlinks
            .insert(path.clone(), target.to_string(), &self.background);
        self.listings.clear();
        tracing::debug!(link = %path, target = %target, "symlink created");
        Ok(())
    }

    /// The target of the symlink at `path`, exactly as stored.
    pub fn readlink_at(&mut self, base: Option<&Descriptor>, path: &str) -> VfsResult<String> {
        let path = self.resolve(base, path, false)?;
        if let Some(target) = self.symlinks.get(&path) {
            return Ok(target.to_string());
        }
        match self.lookup(&path)? {
            None => Err(VfsError::not_found(&path)),
            Some(_) => Err(VfsError::invalid(format!("{}: not a symbolic link", path))),
        }
    }

    /// Hard links are not supported.
    pub fn link_at(
        &mut self,
        _old_base: Option<&Descriptor>,
        old_path: &str,
        _new_base: Option<&Descriptor>,
        new_path: &str,
    ) -> VfsResult<()> {
        Err(VfsError::unsupported(format!(
            "hard links are not supported ({} -> {})",
            old_path, new_path
        )))
    }

    // --- Working directory and background work ---

    pub fn working_directory(&self) -> &VfsPath {
        self.resolver.cwd()
    }

    pub fn set_working_directory(&mut self, path: &str) -> VfsResult<()> {
        let path = self.resolve(None, path, true)?;
        match self.lookup(&path)? {
            Some(NamespaceEntry::Directory) => {
                self.resolver.set_cwd(path);
                Ok(())
            }
            Some(_) => Err(VfsError::not_a_directory(&path)),
            None => Err(VfsError::not_found(&path)),
        }
    }

    /// Block until queued symlink persistence and detached writes finish.
    pub fn wait_for_background(&self) {
        self.background.wait_idle();
    }

    /// Background tasks not yet finished.
    pub fn background_pending(&self) -> usize {
        self.background.pending()
    }

    pub fn set_completion_hook(&mut self, hook: Option<CompletionHook>) {
        self.background.set_hook(hook);
    }

    // --- Introspection ---

    /// Whether a handle for `path` is cached.
    pub fn is_warm(&self, path: &VfsPath) -> bool {
        self.handles.contains(path)
    }

    pub fn cached_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn cached_meta(&self, path: &VfsPath) -> Option<FileMeta> {
        self.meta.get(path).copied()
    }

    pub fn symlink_count(&self) -> usize {
        self.symlinks.len()
    }

    pub fn cold_path(&self) -> ColdPath {
        self.cold_path
    }

    // --- Internals ---

    fn call(&mut self, op: BridgeOp) -> VfsResult<BridgeValue> {
        Ok(self.client.call(op)?)
    }

    fn resolve(&self, base: Option<&Descriptor>, raw: &str, follow: bool) -> VfsResult<VfsPath> {
        if let Some(base) = base {
            if !base.is_dir() {
                return Err(VfsError::not_a_directory(base.path()));
            }
        }
        let path = self
            .resolver
            .resolve_relative(base.map(Descriptor::path), raw)?;
        self.resolver.resolve_symlinks(&path, follow, &self.symlinks)
    }

    /// The live entry at a resolved path.
    fn lookup(&mut self, path: &VfsPath) -> VfsResult<Option<NamespaceEntry>> {
        if let Some(target) = self.symlinks.get(path) {
            return Ok(Some(NamespaceEntry::Symlink {
                target: target.to_string(),
            }));
        }
        if path.is_root() {
            return Ok(Some(NamespaceEntry::Directory));
        }

        let entry = self
            .call(BridgeOp::Entry { path: path.clone() })?
            .into_entry()?;
        let Some(entry) = entry else {
            return Ok(None);
        };
        match entry.kind {
            StoreEntryKind::Directory => Ok(Some(NamespaceEntry::Directory)),
            StoreEntryKind::File {
                mut size,
                modified_ms,
            } => {
                // A warm handle may hold writes the store listing does not show yet.
                if let Some(handle) = self.handles.get(path) {
                    size = handle.size()?;
                }
                Ok(Some(NamespaceEntry::File {
                    size,
                    mtime_millis: modified_ms,
                }))
            }
        }
    }

    fn require_parent_directory(&mut self, path: &VfsPath) -> VfsResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        match self.lookup(&parent)? {
            Some(NamespaceEntry::Directory) => Ok(()),
            Some(_) => Err(VfsError::not_a_directory(&parent)),
            None => Err(VfsError::not_found(&parent)),
        }
    }

    /// The handle to use for I/O on `path`, or `None` for a one-shot bridge
    /// operation.
    fn handle_for(&mut self, path: &VfsPath) -> VfsResult<Option<&mut (dyn SyncHandle + 'static)>> {
        if !self.handles.contains(path) {
            if self.detached.has_pending(path) {
                // Queued writes must land before a handle locks the file.
                self.background.wait_idle();
            }
            if self.cold_path == ColdPath::Direct {
                return Ok(None);
            }
        }
        self.handles.acquire(path, &mut self.client).map(Some)
    }

    fn file_size(&mut self, path: &VfsPath) -> VfsResult<u64> {
        if let Some(handle) = self.handles.get(path) {
            return Ok(handle.size()?);
        }
        match self.lookup(path)? {
            Some(entry) => Ok(entry.size()),
            None => Err(VfsError::not_found(path)),
        }
    }

    fn truncate_path(&mut self, path: &VfsPath, len: u64) -> VfsResult<()> {
        self.detached.invalidate_under(path);
        match self.handle_for(path)? {
            Some(handle) => handle.truncate(len)?,
            None => {
                self.call(BridgeOp::Truncate {
                    path: path.clone(),
                    len,
                })?;
            }
        }
        self.meta.insert(
            path.clone(),
            FileMeta {
                size: len,
                mtime_millis: store::now_millis(),
            },
        );
        Ok(())
    }

    /// Evict everything cached at or below `prefix`.
    fn forget(&mut self, prefix: &VfsPath) {
        let evicted = self.handles.release_under(prefix);
        self.meta.retain(|path, _| !path.starts_with(prefix));
        self.detached.invalidate_under(prefix);
        if evicted > 0 {
            tracing::debug!(path = %prefix, evicted, "handles evicted");
        }
    }

    fn list(&mut self, dir: &VfsPath) -> VfsResult<DirectoryStream> {
        if let Some(cached) = self.listings.get(dir) {
            return Ok(DirectoryStream::new(cached.to_vec()));
        }

        let children = self
            .call(BridgeOp::List { path: dir.clone() })?
            .into_entries()?;
        let mut entries: Vec<DirectoryEntry> = children
            .into_iter()
            .map(|child| {
                let kind = if child.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::RegularFile
                };
                DirectoryEntry::new(child.name, kind)
            })
            .collect();

        for (name, _) in self.symlinks.children_of(dir) {
            match entries.iter_mut().find(|e| e.name == name) {
                Some(existing) => existing.kind = EntryKind::SymbolicLink,
                None => entries.push(DirectoryEntry::new(name, EntryKind::SymbolicLink)),
            }
        }
        entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        self.listings.insert(dir.clone(), entries.clone());
        Ok(DirectoryStream::new(entries))
    }

    fn copy_then_delete(&mut self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        tracing::debug!(from = %from, to = %to, "no native move, copying");
        if let Err(e) = self.call(BridgeOp::Copy {
            from: from.clone(),
            to: to.clone(),
        }) {
            tracing::warn!(from = %from, to = %to, error = %e, "copy failed, destination may be partial");
            return Err(e);
        }
        if let Err(e) = self.call(BridgeOp::Remove {
            path: from.clone(),
            recursive: true,
        }) {
            tracing::warn!(from = %from, to = %to, error = %e, "source not removed after copy, both copies kept");
            return Err(e);
        }
        Ok(())
    }
}

fn require_file(fd: &Descriptor) -> VfsResult<()> {
    if fd.is_dir() {
        return Err(VfsError::is_a_directory(fd.path()));
    }
    Ok(())
}

fn require_writable(fd: &Descriptor) -> VfsResult<()> {
    require_file(fd)?;
    if !fd.flags().writable() {
        return Err(VfsError::invalid(format!("{}: not open for writing", fd.path())));
    }
    Ok(())
}

impl fmt::Debug for Vfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vfs")
            .field("cwd", self.resolver.cwd())
            .field("cold_path", &self.cold_path)
            .field("handles", &self.handles.len())
            .field("symlinks", &self.symlinks.len())
            .field("bridge", &self.bridge)
            .finish()
    }
}

impl Drop for Vfs {
    fn drop(&mut self) {
        self.handles.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vfs() -> Vfs {
        Vfs::in_memory().unwrap()
    }

    #[test]
    fn test_open_missing_without_create() {
        let mut vfs = vfs();
        let err = vfs.open("nope.txt", OpenFlags::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn test_warm_after_first_access() {
        let mut vfs = vfs();
        let fd = vfs.open("f", OpenFlags::create_file()).unwrap();
        assert!(!vfs.is_warm(fd.path()));
        vfs.write(&fd, b"abc", 0).unwrap();
        assert!(vfs.is_warm(fd.path()));
        assert_eq!(vfs.cached_meta(fd.path()).map(|m| m.size), Some(3));

        assert!(vfs.release(&fd));
        assert!(!vfs.is_warm(fd.path()));
        assert_eq!(vfs.read(&fd, 10, 0).unwrap(), (b"abc".to_vec(), true));
    }

    #[test]
    fn test_direct_cold_path_caches_nothing() {
        let mut vfs = Vfs::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySymlinkMap::new()),
            VfsOptions::default().with_cold_path(ColdPath::Direct),
        )
        .unwrap();
        let fd = vfs.open("f", OpenFlags::create_file()).unwrap();
        vfs.write(&fd, b"direct", 0).unwrap();
        assert_eq!(vfs.read(&fd, 3, 0).unwrap(), (b"dir".to_vec(), false));
        assert_eq!(vfs.cached_handles(), 0);
    }

    #[test]
    fn test_stream_io_and_append() {
        let mut vfs = vfs();
        let mut fd = vfs.open("log", OpenFlags::create_file()).unwrap();
        vfs.write_stream(&mut fd, b"one ").unwrap();
        vfs.write_stream(&mut fd, b"two").unwrap();
        assert_eq!(fd.cursor(), 7);

        let mut appender = vfs.open("log", OpenFlags::new().append(true)).unwrap();
        vfs.write_stream(&mut appender, b"!").unwrap();

        let mut reader = vfs.open("log", OpenFlags::new()).unwrap();
        assert_eq!(vfs.read_stream(&mut reader, 4).unwrap(), (b"one ".to_vec(), false));
        assert_eq!(vfs.read_stream(&mut reader, 10).unwrap(), (b"two!".to_vec(), true));
        assert_eq!(vfs.seek(&mut reader, SeekFrom::End(-1)).unwrap(), 7);
        assert_eq!(vfs.read_stream(&mut reader, 10).unwrap().0, b"!");
        assert!(vfs.seek(&mut reader, SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn test_write_needs_writable_descriptor() {
        let mut vfs = vfs();
        vfs.open("f", OpenFlags::create_file()).unwrap();
        let fd = vfs.open("f", OpenFlags::new()).unwrap();
        let err = vfs.write(&fd, b"x", 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_truncate_on_open() {
        let mut vfs = vfs();
        let fd = vfs.open("f", OpenFlags::create_file()).unwrap();
        vfs.write(&fd, b"long content", 0).unwrap();

        let fd = vfs.open("f", OpenFlags::read_write().truncate(true)).unwrap();
        assert_eq!(fd.entry().size(), 0);
        assert_eq!(vfs.stat(&fd).unwrap().size(), 0);
    }

    #[test]
    fn test_set_size_grows_with_zeroes() {
        let mut vfs = vfs();
        let fd = vfs.open("f", OpenFlags::create_file()).unwrap();
        vfs.write(&fd, b"ab", 0).unwrap();
        vfs.set_size(&fd, 4).unwrap();
        assert_eq!(vfs.read(&fd, 10, 0).unwrap().0, b"ab\0\0");
        vfs.sync(&fd).unwrap();
        vfs.sync_data(&fd).unwrap();
    }

    #[test]
    fn test_working_directory() {
        let mut vfs = vfs();
        vfs.create_directory_at(None, "home").unwrap();
        vfs.set_working_directory("/home").unwrap();
        vfs.open("notes", OpenFlags::create_file()).unwrap();
        assert!(vfs.stat_at(None, "/home/notes", true).unwrap().is_file());
        assert_eq!(vfs.working_directory().as_str(), "home");

        let err = vfs.set_working_directory("/home/notes").unwrap_err();
        assert_eq!(err.code, ErrorCode::NotADirectory);
    }

    #[test]
    fn test_preopen_is_root() {
        let mut vfs = vfs();
        let (mount, root) = vfs.preopens().remove(0);
        assert_eq!(mount, "/");
        vfs.open_at(Some(&root), "x/y", OpenFlags::create_file()).unwrap();
        let names: Vec<_> = vfs.read_directory(&root).unwrap().map(|e| e.name).collect();
        assert_eq!(names, vec!["x"]);
    }

    #[test]
    fn test_base_must_be_directory() {
        let mut vfs = vfs();
        let file = vfs.open("f", OpenFlags::create_file()).unwrap();
        let err = vfs.open_at(Some(&file), "g", OpenFlags::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotADirectory);
    }

    #[test]
    fn test_listing_cache_cleared_on_mutation() {
        let mut vfs = Vfs::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySymlinkMap::new()),
            VfsOptions::default().with_listing_cache(true),
        )
        .unwrap();
        vfs.open("a", OpenFlags::create_file()).unwrap();
        assert_eq!(vfs.read_directory_at(None, "/").unwrap().count(), 1);
        vfs.open("b", OpenFlags::create_file()).unwrap();
        assert_eq!(vfs.read_directory_at(None, "/").unwrap().count(), 2);
        vfs.unlink_file_at(None, "a").unwrap();
        assert_eq!(vfs.read_directory_at(None, "/").unwrap().count(), 1);
    }

    #[test]
    fn test_detached_write_lands_cold() {
        let mut vfs = vfs();
        let fd = vfs.open("f", OpenFlags::create_file()).unwrap();
        vfs.write_detached(&fd, b"later".to_vec(), 0).unwrap();
        vfs.wait_for_background();
        assert_eq!(vfs.read(&fd, 10, 0).unwrap(), (b"later".to_vec(), true));
    }

    #[test]
    fn test_detached_write_dropped_after_truncate() {
        let mut vfs = vfs();
        let fd = vfs.open("f", OpenFlags::create_file()).unwrap();
        let generation = vfs.detached.begin(fd.path());
        vfs.detached.invalidate_under(fd.path());
        assert!(!vfs.detached.is_current(fd.path(), generation));
        vfs.detached.finish(fd.path());
        assert!(!vfs.detached.has_pending(fd.path()));
    }
}
