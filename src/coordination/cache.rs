//! Persistent path children cache
//!
//! Mirrors the immediate children of one subtree into a typed in-memory
//! map, persists that map to a local snapshot after every change, and keeps
//! serving the last synchronized map while the service is unreachable.
//!
//! All synchronization runs on one background task fed by the child watch,
//! per-child data watches, session transitions and identity confirmations,
//! so refresh cycles never overlap. Readers get an immutable `Arc` view that
//! is swapped whole after each cycle.

use crate::common::{crc32, jittered, paths, Error, OpKind, Result};
use crate::coordination::client::CoordinationClient;
use crate::coordination::codec::{Codec, JsonCodec};
use crate::coordination::identity::IdentityState;
use crate::coordination::snapshot::SnapshotFile;
use crate::service::{SessionState, WatchedEvent, Watcher};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const CACHE_EVENTS_CAPACITY: usize = 64;

/// One cached child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub name: String,
    pub value: T,
    pub version: i64,
    /// CRC32 of the raw node data the value was decoded from
    #[serde(default)]
    pub checksum: u32,
}

impl<T> CacheEntry<T> {
    pub fn new(name: impl Into<String>, value: T, version: i64) -> Self {
        Self {
            name: name.into(),
            value,
            version,
            checksum: 0,
        }
    }
}

/// Immutable view of the cache contents, keyed by child name
pub type Nodes<T> = Arc<HashMap<String, CacheEntry<T>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// The mapping was replaced after a refresh cycle
    NodesChanged,
    ConnectionStateChanged(SessionState),
}

struct CacheShared<T, C> {
    client: CoordinationClient,
    path: String,
    snapshot: SnapshotFile,
    codec: C,
    nodes: RwLock<Nodes<T>>,
    events: broadcast::Sender<CacheEvent>,
    watcher: Watcher,
    retry: Duration,
    /// The last save failed; the snapshot lags the mapping
    dirty: AtomicBool,
    /// Held across every save so none can land after close
    closed: Mutex<bool>,
}

impl<T, C> CacheShared<T, C> {
    fn mark_closed(&self) {
        *self
            .closed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

impl<T, C> CacheShared<T, C>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    C: Codec<T>,
{
    fn current(&self) -> Nodes<T> {
        self.nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace(&self, next: Nodes<T>) {
        *self
            .nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }

    fn load_snapshot(&self) {
        match self.snapshot.load::<HashMap<String, CacheEntry<T>>>() {
            Ok(Some(nodes)) => {
                tracing::info!(
                    "loaded {} cached children of {} from {}",
                    nodes.len(),
                    self.path,
                    self.snapshot.path().display()
                );
                self.replace(Arc::new(nodes));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(
                "ignoring unreadable snapshot {}: {}",
                self.snapshot.path().display(),
                e
            ),
        }
    }

    /// Write the mapping to the snapshot, remembering a failure for retry
    fn persist(&self, nodes: &HashMap<String, CacheEntry<T>>) {
        let closed = self
            .closed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *closed {
            return;
        }
        match self.snapshot.save(nodes) {
            Ok(()) => self.dirty.store(false, Ordering::Release),
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                tracing::warn!(
                    "failed to persist snapshot {}: {}",
                    self.snapshot.path().display(),
                    e
                );
            }
        }
    }

    /// Re-list children, diff against the current map and swap in the result
    ///
    /// Returns whether the mapping changed. Any failure leaves the previous
    /// mapping in place. A snapshot left stale by a failed save is rewritten
    /// even when nothing changed.
    fn refresh(&self) -> Result<bool> {
        let children = match self.client.get_children_watched(&self.path, &self.watcher) {
            Ok(children) => children,
            Err(e) if e.is_not_found() => {
                // Watch for the parent to appear; until then there are no children.
                self.client.exists_watched(&self.path, &self.watcher)?;
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let current = self.current();
        let mut next = HashMap::with_capacity(children.len());
        for name in children {
            let child = paths::join(&self.path, &name);
            let node = match self.client.get_node_watched(&child, &self.watcher) {
                Ok(node) => node,
                // Deleted since the listing; the child watch reports it.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let checksum = crc32(node.data());

            if let Some(prev) = current.get(&name) {
                if prev.version == node.version() && prev.checksum == checksum {
                    next.insert(name, prev.clone());
                    continue;
                }
            }
            match self.codec.decode(node.data()) {
                Ok(value) => {
                    next.insert(
                        name.clone(),
                        CacheEntry {
                            name,
                            value,
                            version: node.version(),
                            checksum,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!("skipping undecodable child {}: {}", child, e);
                }
            }
        }

        let changed = next.len() != current.len()
            || next.iter().any(|(name, entry)| {
                current
                    .get(name)
                    .map(|prev| prev.version != entry.version || prev.checksum != entry.checksum)
                    .unwrap_or(true)
            });
        if !changed {
            if self.is_dirty() {
                self.persist(current.as_ref());
            }
            return Ok(false);
        }

        let next = Arc::new(next);
        self.replace(next.clone());
        self.persist(next.as_ref());
        tracing::debug!("{} now has {} cached children", self.path, next.len());
        Ok(true)
    }
}

/// Typed, disk-backed mirror of a subtree's immediate children
pub struct PersistentPathChildrenCache<T, C = JsonCodec> {
    shared: Arc<CacheShared<T, C>>,
    events: Option<mpsc::UnboundedReceiver<WatchedEvent>>,
    task: Option<JoinHandle<()>>,
}

impl<T> PersistentPathChildrenCache<T, JsonCodec>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        client: CoordinationClient,
        path: &str,
        snapshot_file: impl Into<PathBuf>,
    ) -> Result<Self> {
        Self::with_codec(client, path, snapshot_file, JsonCodec)
    }
}

impl<T, C> PersistentPathChildrenCache<T, C>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    C: Codec<T>,
{
    pub fn with_codec(
        client: CoordinationClient,
        path: &str,
        snapshot_file: impl Into<PathBuf>,
        codec: C,
    ) -> Result<Self> {
        paths::validate(path)?;
        let (watcher, events) = Watcher::channel();
        let (event_tx, _) = broadcast::channel(CACHE_EVENTS_CAPACITY);
        let retry = client.config().cache_retry();
        Ok(Self {
            shared: Arc::new(CacheShared {
                client,
                path: path.to_string(),
                snapshot: SnapshotFile::new(snapshot_file),
                codec,
                nodes: RwLock::new(Arc::new(HashMap::new())),
                events: event_tx,
                watcher,
                retry,
                dirty: AtomicBool::new(false),
                closed: Mutex::new(false),
            }),
            events: Some(events),
            task: None,
        })
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }

    pub fn snapshot_path(&self) -> &Path {
        self.shared.snapshot.path()
    }

    /// Load the snapshot and begin background synchronization
    ///
    /// Must run inside a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        let Some(events) = self.events.take() else {
            return Err(Error::AlreadyStarted);
        };
        if tokio::runtime::Handle::try_current().is_err() {
            self.events = Some(events);
            return Err(Error::InvalidConfig(
                "children cache requires a tokio runtime".into(),
            ));
        }
        self.shared.load_snapshot();
        self.task = Some(tokio::spawn(run_refresh_loop(self.shared.clone(), events)));
        Ok(())
    }

    /// Current mapping
    pub fn nodes(&self) -> Nodes<T> {
        self.shared.current()
    }

    pub fn get(&self, name: &str) -> Option<T> {
        self.shared.current().get(name).map(|e| e.value.clone())
    }

    pub fn len(&self) -> usize {
        self.shared.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.current().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.shared.events.subscribe()
    }

    /// Stop background synchronization; the last mapping stays readable
    ///
    /// Waits for a snapshot write already in progress, and no write
    /// happens after this returns.
    pub fn close(&mut self) {
        self.shared.mark_closed();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T, C> Drop for PersistentPathChildrenCache<T, C> {
    fn drop(&mut self) {
        self.shared.mark_closed();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn refresh_blocking<T, C>(shared: &Arc<CacheShared<T, C>>) -> Result<bool>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    C: Codec<T>,
{
    let shared = shared.clone();
    tokio::task::spawn_blocking(move || shared.refresh())
        .await
        .map_err(|e| Error::Unexpected {
            op: OpKind::GetChildren,
            path: String::new(),
            reason: e.to_string(),
        })?
}

async fn run_refresh_loop<T, C>(
    shared: Arc<CacheShared<T, C>>,
    mut events: mpsc::UnboundedReceiver<WatchedEvent>,
) where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    C: Codec<T>,
{
    let mut sessions = shared.client.subscribe_session();
    let mut identity = shared.client.guard().subscribe();
    let mut sessions_open = true;
    let mut identity_open = true;
    let mut pending = true;
    let mut retry_at: Option<Instant> = None;

    loop {
        if pending {
            pending = false;
            match refresh_blocking(&shared).await {
                Ok(changed) => {
                    retry_at = shared
                        .is_dirty()
                        .then(|| Instant::now() + jittered(shared.retry));
                    if changed {
                        let _ = shared.events.send(CacheEvent::NodesChanged);
                    }
                }
                Err(e) => {
                    tracing::warn!("refresh of {} failed, keeping last mapping: {}", shared.path, e);
                    retry_at = Some(Instant::now() + jittered(shared.retry));
                }
            }
        }

        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                tracing::debug!("cache {} event {:?} on {}", shared.path, event.kind, event.path);
                // Coalesce a burst of notifications into one cycle.
                while events.try_recv().is_ok() {}
                pending = true;
            }
            state = sessions.recv(), if sessions_open => match state {
                Ok(state) => {
                    let _ = shared.events.send(CacheEvent::ConnectionStateChanged(state));
                    if state == SessionState::Reconnected {
                        pending = true;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => pending = true,
                Err(broadcast::error::RecvError::Closed) => sessions_open = false,
            },
            changed = identity.changed(), if identity_open => {
                if changed.is_err() {
                    identity_open = false;
                } else if identity.borrow_and_update().state == IdentityState::Confirmed
                    && retry_at.is_some()
                {
                    pending = true;
                }
            }
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                retry_at = None;
                pending = true;
            }
        }
    }
}
