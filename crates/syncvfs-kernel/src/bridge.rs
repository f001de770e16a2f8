//! Synchronous bridge to the helper context.
//!
//! The caller cannot await, and the backing store only speaks futures. The
//! bridge owns a dedicated OS thread (`syncvfs-helper`) running a tokio
//! current-thread runtime. Callers enqueue a [`PendingRequest`] on a bounded
//! queue and park on their reply slot until the helper writes the outcome.
//!
//! ```text
//! caller thread                      helper thread
//! ─────────────                      ─────────────
//! slot.awaiting = id
//! queue.blocking_send(req) ───────►  req = queue.recv().await
//! condvar.wait()                     outcome = op.execute(store).await
//!                          ◄───────  slot.response = (id, outcome); notify
//! take response, clear slot
//! ```
//!
//! The helper serves requests strictly in arrival order, one at a time.
//! Detached background tasks share its runtime and interleave only at await
//! points. There is no timeout: a request is either answered or, if the helper
//! drops it, the caller is woken with `BrokenPipe`.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;

use syncvfs_types::VfsPath;

use crate::store::{copy_entry, read_exact_at, BackingStore, StoreEntry, SyncHandle};

/// A store operation executed on the helper context.
#[derive(Debug)]
pub enum BridgeOp {
    /// Describe the entry at a path.
    Entry { path: VfsPath },
    /// List a directory.
    List { path: VfsPath },
    /// Create a directory. Without `parents` the parent must exist and the
    /// path must be free.
    CreateDirectory { path: VfsPath, parents: bool },
    /// Create a file (and any missing parents).
    CreateFile { path: VfsPath },
    /// Open a synchronous handle.
    OpenHandle { path: VfsPath },
    /// One-shot read through a short-lived handle.
    ReadAt { path: VfsPath, offset: u64, len: usize },
    /// One-shot write through the async writable path.
    WriteAt { path: VfsPath, offset: u64, data: Vec<u8> },
    Truncate { path: VfsPath, len: u64 },
    Remove { path: VfsPath, recursive: bool },
    /// Native move; `Unsupported` when the store cannot.
    Move { from: VfsPath, to: VfsPath },
    /// Recursive copy through store primitives.
    Copy { from: VfsPath, to: VfsPath },
}

impl BridgeOp {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BridgeOp::Entry { .. } => "entry",
            BridgeOp::List { .. } => "list",
            BridgeOp::CreateDirectory { .. } => "create_directory",
            BridgeOp::CreateFile { .. } => "create_file",
            BridgeOp::OpenHandle { .. } => "open_handle",
            BridgeOp::ReadAt { .. } => "read_at",
            BridgeOp::WriteAt { .. } => "write_at",
            BridgeOp::Truncate { .. } => "truncate",
            BridgeOp::Remove { .. } => "remove",
            BridgeOp::Move { .. } => "move",
            BridgeOp::Copy { .. } => "copy",
        }
    }

    /// The path the operation acts on (the source, for moves and copies).
    pub fn path(&self) -> &VfsPath {
        match self {
            BridgeOp::Entry { path }
            | BridgeOp::List { path }
            | BridgeOp::CreateDirectory { path, .. }
            | BridgeOp::CreateFile { path }
            | BridgeOp::OpenHandle { path }
            | BridgeOp::ReadAt { path, .. }
            | BridgeOp::WriteAt { path, .. }
            | BridgeOp::Truncate { path, .. }
            | BridgeOp::Remove { path, .. } => path,
            BridgeOp::Move { from, .. } | BridgeOp::Copy { from, .. } => from,
        }
    }

    /// Run the operation against the store.
    pub async fn execute(self, store: &dyn BackingStore) -> io::Result<BridgeValue> {
        match self {
            BridgeOp::Entry { path } => Ok(BridgeValue::Entry(store.entry(&path).await?)),
            BridgeOp::List { path } => {
                let dir = store.directory(&path, false).await?;
                Ok(BridgeValue::Entries(store.list(&dir).await?))
            }
            BridgeOp::CreateDirectory { path, parents } => {
                if !parents {
                    if let Some(parent) = path.parent() {
                        store.directory(&parent, false).await?;
                    }
                    if store.entry(&path).await?.is_some() {
                        return Err(io::Error::new(
                            io::ErrorKind::AlreadyExists,
                            format!("already exists: {}", path),
                        ));
                    }
                }
                store.directory(&path, true).await?;
                Ok(BridgeValue::Unit)
            }
            BridgeOp::CreateFile { path } => {
                store.file(&path, true).await?;
                Ok(BridgeValue::Unit)
            }
            BridgeOp::OpenHandle { path } => {
                let file = store.file(&path, false).await?;
                Ok(BridgeValue::Handle(store.open_sync_handle(&file).await?))
            }
            BridgeOp::ReadAt { path, offset, len } => {
                let file = store.file(&path, false).await?;
                let mut handle = store.open_sync_handle(&file).await?;
                let result = read_exact_at(handle.as_mut(), len, offset)
                    .and_then(|data| Ok((data, handle.size()?)));
                handle.close()?;
                let (data, size) = result?;
                Ok(BridgeValue::Bytes { data, size })
            }
            BridgeOp::WriteAt { path, offset, data } => {
                let file = store.file(&path, false).await?;
                Ok(BridgeValue::Size(store.write_at(&file, offset, &data).await?))
            }
            BridgeOp::Truncate { path, len } => {
                let file = store.file(&path, false).await?;
                let mut handle = store.open_sync_handle(&file).await?;
                let result = handle.truncate(len);
                handle.close()?;
                result?;
                Ok(BridgeValue::Unit)
            }
            BridgeOp::Remove { path, recursive } => {
                store.remove(&path, recursive).await?;
                Ok(BridgeValue::Unit)
            }
            BridgeOp::Move { from, to } => {
                store.move_entry(&from, &to).await?;
                Ok(BridgeValue::Unit)
            }
            BridgeOp::Copy { from, to } => {
                copy_entry(store, &from, &to).await?;
                Ok(BridgeValue::Unit)
            }
        }
    }
}

/// Outcome payload of a bridge operation.
#[derive(Debug)]
pub enum BridgeValue {
    Unit,
    Entry(Option<StoreEntry>),
    Entries(Vec<StoreEntry>),
    Handle(Box<dyn SyncHandle>),
    Bytes { data: Vec<u8>, size: u64 },
    Size(u64),
}

fn mismatch(expected: &str, got: &BridgeValue) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("bridge returned {:?} where {} was expected", got, expected),
    )
}

impl BridgeValue {
    pub fn into_entry(self) -> io::Result<Option<StoreEntry>> {
        match self {
            BridgeValue::Entry(entry) => Ok(entry),
            other => Err(mismatch("an entry", &other)),
        }
    }

    pub fn into_entries(self) -> io::Result<Vec<StoreEntry>> {
        match self {
            BridgeValue::Entries(entries) => Ok(entries),
            other => Err(mismatch("a listing", &other)),
        }
    }

    pub fn into_handle(self) -> io::Result<Box<dyn SyncHandle>> {
        match self {
            BridgeValue::Handle(handle) => Ok(handle),
            other => Err(mismatch("a handle", &other)),
        }
    }

    pub fn into_bytes(self) -> io::Result<(Vec<u8>, u64)> {
        match self {
            BridgeValue::Bytes { data, size } => Ok((data, size)),
            other => Err(mismatch("bytes", &other)),
        }
    }

    pub fn into_size(self) -> io::Result<u64> {
        match self {
            BridgeValue::Size(size) => Ok(size),
            other => Err(mismatch("a size", &other)),
        }
    }
}

#[derive(Debug, Default)]
struct SlotState {
    /// Id of the request the owner is parked on.
    awaiting: Option<u64>,
    response: Option<(u64, io::Result<BridgeValue>)>,
}

/// One caller's reply slot: the helper writes, the caller waits.
#[derive(Debug, Default)]
struct ReplySlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl ReplySlot {
    fn deliver(&self, id: u64, outcome: io::Result<BridgeValue>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.awaiting != Some(id) {
            tracing::warn!(request = id, awaiting = ?state.awaiting, "dropping stale bridge response");
            return;
        }
        state.response = Some((id, outcome));
        self.ready.notify_all();
    }
}

/// A request in flight between a caller and the helper.
///
/// Dropping an unanswered request wakes its caller with `BrokenPipe`, so a
/// caller never parks on a request the helper has lost.
pub struct PendingRequest {
    id: u64,
    op: Option<BridgeOp>,
    reply: Option<Arc<ReplySlot>>,
}

impl PendingRequest {
    fn respond(mut self, outcome: io::Result<BridgeValue>) {
        if let Some(reply) = self.reply.take() {
            reply.deliver(self.id, outcome);
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("op", &self.op.as_ref().map(BridgeOp::name))
            .finish()
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if let Some(reply) = self.reply.take() {
            reply.deliver(
                self.id,
                Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "helper dropped the request without answering",
                )),
            );
        }
    }
}

async fn serve(store: &dyn BackingStore, mut request: PendingRequest) {
    let Some(op) = request.op.take() else {
        return;
    };
    let name = op.name();
    let path = op.path().clone();
    let outcome = op.execute(store).await;
    match &outcome {
        Ok(_) => tracing::debug!(request = request.id, op = name, path = %path, "bridge op done"),
        Err(e) => tracing::debug!(request = request.id, op = name, path = %path, error = %e, "bridge op failed"),
    }
    request.respond(outcome);
}

/// The helper context and its request queue.
pub struct Bridge {
    sender: Option<mpsc::Sender<PendingRequest>>,
    shutdown: Option<oneshot::Sender<()>>,
    runtime: Handle,
    tracker: TaskTracker,
    helper: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Spawn the helper thread serving `store`.
    pub fn start(store: Arc<dyn BackingStore>, queue_depth: usize) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let (sender, mut queue) = mpsc::channel::<PendingRequest>(queue_depth.max(1));
        let (shutdown, mut stop) = oneshot::channel::<()>();
        let tracker = TaskTracker::new();
        let helper_tracker = tracker.clone();

        let helper = std::thread::Builder::new()
            .name("syncvfs-helper".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        tokio::select! {
                            request = queue.recv() => match request {
                                Some(request) => serve(store.as_ref(), request).await,
                                None => break,
                            },
                            _ = &mut stop => break,
                        }
                    }
                    // Serve what was already queued, refuse the rest.
                    queue.close();
                    while let Some(request) = queue.recv().await {
                        serve(store.as_ref(), request).await;
                    }
                    helper_tracker.close();
                    helper_tracker.wait().await;
                    tracing::debug!("helper context stopped");
                });
            })?;

        tracing::debug!(queue_depth, "helper context started");
        Ok(Self {
            sender: Some(sender),
            shutdown: Some(shutdown),
            runtime: handle,
            tracker,
            helper: Some(helper),
        })
    }

    /// A new caller endpoint with its own reply slot.
    pub fn client(&self) -> io::Result<BridgeClient> {
        let sender = self.sender.clone().ok_or_else(closed)?;
        Ok(BridgeClient {
            sender,
            slot: Arc::new(ReplySlot::default()),
            next_id: 0,
        })
    }

    /// Spawn a tracked task on the helper runtime without waiting for it.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn_on(future, &self.runtime);
    }

    /// Run a future on the helper and block until it completes.
    ///
    /// Must not be called from the helper itself.
    pub fn run_on_helper<F>(&self, future: F) -> io::Result<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        self.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.recv().map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                "helper stopped before the task finished",
            )
        })
    }

    /// Runtime handle of the helper context.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Tracker draining background tasks at shutdown.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("running", &self.helper.is_some())
            .field("tasks", &self.tracker.len())
            .finish()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(helper) = self.helper.take() {
            if helper.join().is_err() {
                tracing::warn!("helper context panicked");
            }
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "helper context has shut down")
}

/// A caller's endpoint: one reply slot, at most one request in flight.
#[derive(Debug)]
pub struct BridgeClient {
    sender: mpsc::Sender<PendingRequest>,
    slot: Arc<ReplySlot>,
    next_id: u64,
}

impl BridgeClient {
    /// Issue `op` and block until the helper answers.
    ///
    /// Must not be called from inside an async runtime.
    pub fn call(&mut self, op: BridgeOp) -> io::Result<BridgeValue> {
        self.next_id += 1;
        let id = self.next_id;
        {
            let mut state = self.slot.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(outstanding) = state.awaiting {
                return Err(io::Error::new(
                    io::ErrorKind::ResourceBusy,
                    format!("bridge request {} still outstanding", outstanding),
                ));
            }
            state.awaiting = Some(id);
            state.response = None;
        }

        let name = op.name();
        tracing::debug!(request = id, op = name, path = %op.path(), "bridge call");
        let request = PendingRequest {
            id,
            op: Some(op),
            reply: Some(Arc::clone(&self.slot)),
        };
        if let Err(mpsc::error::SendError(mut request)) = self.sender.blocking_send(request) {
            request.reply.take();
            self.clear();
            return Err(closed());
        }

        let mut state = self.slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = loop {
            match state.response.take() {
                Some((answered, outcome)) if answered == id => break outcome,
                Some((answered, _)) => {
                    tracing::warn!(request = id, answered, "ignoring stale wake-up");
                }
                None => {}
            }
            state = self
                .slot
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        };
        state.awaiting = None;
        outcome
    }

    fn clear(&self) {
        let mut state = self.slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.awaiting = None;
        state.response = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn p(s: &str) -> VfsPath {
        VfsPath::parse(s).unwrap()
    }

    fn start() -> Bridge {
        Bridge::start(Arc::new(MemoryStore::new()), 4).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let bridge = start();
        let mut client = bridge.client().unwrap();

        client
            .call(BridgeOp::CreateFile { path: p("a/b.txt") })
            .unwrap();
        let size = client
            .call(BridgeOp::WriteAt {
                path: p("a/b.txt"),
                offset: 0,
                data: b"hello".to_vec(),
            })
            .unwrap()
            .into_size()
            .unwrap();
        assert_eq!(size, 5);

        let (data, size) = client
            .call(BridgeOp::ReadAt {
                path: p("a/b.txt"),
                offset: 1,
                len: 10,
            })
            .unwrap()
            .into_bytes()
            .unwrap();
        assert_eq!(data, b"ello");
        assert_eq!(size, 5);
    }

    #[test]
    fn test_errors_cross_the_bridge() {
        let bridge = start();
        let mut client = bridge.client().unwrap();
        let err = client
            .call(BridgeOp::List { path: p("missing") })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        // The slot is reusable after a failure
        let entry = client
            .call(BridgeOp::Entry { path: p("missing") })
            .unwrap()
            .into_entry()
            .unwrap();
        assert!(entry.is_none());
    }

    #[test]
    fn test_handle_crosses_contexts() {
        let bridge = start();
        let mut client = bridge.client().unwrap();
        client.call(BridgeOp::CreateFile { path: p("f") }).unwrap();
        let mut handle = client
            .call(BridgeOp::OpenHandle { path: p("f") })
            .unwrap()
            .into_handle()
            .unwrap();
        handle.write(b"warm", 0).unwrap();
        assert_eq!(handle.size().unwrap(), 4);
        handle.close().unwrap();
    }

    #[test]
    fn test_create_directory_without_parents() {
        let bridge = start();
        let mut client = bridge.client().unwrap();
        let err = client
            .call(BridgeOp::CreateDirectory {
                path: p("x/y"),
                parents: false,
            })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        client
            .call(BridgeOp::CreateDirectory {
                path: p("x/y"),
                parents: true,
            })
            .unwrap();
        let err = client
            .call(BridgeOp::CreateDirectory {
                path: p("x/y"),
                parents: false,
            })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_requests_served_in_order() {
        let bridge = start();
        let mut client = bridge.client().unwrap();
        client.call(BridgeOp::CreateFile { path: p("log") }).unwrap();
        for i in 0..20u8 {
            client
                .call(BridgeOp::WriteAt {
                    path: p("log"),
                    offset: i as u64,
                    data: vec![i],
                })
                .unwrap();
        }
        let (data, _) = client
            .call(BridgeOp::ReadAt {
                path: p("log"),
                offset: 0,
                len: 64,
            })
            .unwrap()
            .into_bytes()
            .unwrap();
        assert_eq!(data, (0..20u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_stale_response_is_dropped() {
        let slot = ReplySlot::default();
        slot.state.lock().unwrap().awaiting = Some(7);

        slot.deliver(6, Ok(BridgeValue::Unit));
        assert!(slot.state.lock().unwrap().response.is_none());

        slot.deliver(7, Ok(BridgeValue::Size(3)));
        let (id, outcome) = slot.state.lock().unwrap().response.take().unwrap();
        assert_eq!(id, 7);
        assert_eq!(outcome.unwrap().into_size().unwrap(), 3);
    }

    #[test]
    fn test_dropped_request_wakes_caller() {
        let slot = Arc::new(ReplySlot::default());
        slot.state.lock().unwrap().awaiting = Some(1);
        let request = PendingRequest {
            id: 1,
            op: Some(BridgeOp::Entry { path: p("x") }),
            reply: Some(Arc::clone(&slot)),
        };
        drop(request);

        let (_, outcome) = slot.state.lock().unwrap().response.take().unwrap();
        assert_eq!(outcome.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_run_on_helper() {
        let bridge = start();
        let value = bridge.run_on_helper(async { 40 + 2 }).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_client_after_shutdown_fails() {
        let bridge = start();
        let mut client = bridge.client().unwrap();
        drop(bridge);
        let err = client
            .call(BridgeOp::Entry { path: p("x") })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_shutdown_drains_tracked_tasks() {
        let bridge = start();
        let (tx, rx) = std::sync::mpsc::channel();
        bridge.spawn(async move {
            tokio::task::yield_now().await;
            tx.send(()).unwrap();
        });
        drop(bridge);
        rx.try_recv().unwrap();
    }
}
