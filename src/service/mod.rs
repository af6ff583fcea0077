//! Remote coordination service boundary
//!
//! The client drives a hierarchical, watch-capable, session-based tree
//! through [`CoordinationService`]. Implementations report failures as raw
//! [`ServiceError`] codes; the client owns the normalization into
//! [`crate::Error`].
//!
//! Watches are one-shot: a registered [`Watcher`] receives at most one
//! [`WatchedEvent`] per registration and must re-register to keep
//! observing. Registering the same watcher twice on the same path before it
//! fires yields a single notification.

pub mod memory;

use crate::coordination::operation::{OpResult, Operation};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

pub use memory::{CallKind, MemEnsemble, MemSession};

pub type SessionId = i64;

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Node metadata, similar to a UNIX `stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Transaction that created the node
    pub czxid: i64,
    /// Last transaction that modified the node's data
    pub mzxid: i64,
    /// Milliseconds since epoch at creation
    pub ctime: i64,
    /// Milliseconds since epoch at last data change
    pub mtime: i64,
    /// Number of data changes
    pub version: i64,
    /// Number of child membership changes
    pub cversion: i64,
    /// Owning session for ephemeral nodes
    pub ephemeral_owner: Option<SessionId>,
    pub data_length: u32,
    pub num_children: u32,
}

impl Stat {
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.ctime)
            .single()
            .unwrap_or_default()
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.mtime)
            .single()
            .unwrap_or_default()
    }
}

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Session connection states reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connected,
    Disconnected,
    Reconnected,
    Expired,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Reconnected)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connected => write!(f, "connected"),
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Reconnected => write!(f, "reconnected"),
            SessionState::Expired => write!(f, "expired"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: EventType,
    pub path: String,
}

/// One-shot watch registration target
///
/// Clones share an id, so the service treats them as the same watcher.
#[derive(Debug, Clone)]
pub struct Watcher {
    id: u64,
    tx: mpsc::UnboundedSender<WatchedEvent>,
}

impl Watcher {
    /// Create a watcher and the receiving end of its notifications
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WatchedEvent>) {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        };
        (watcher, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deliver an event; false once the receiver is gone
    pub fn notify(&self, event: WatchedEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Raw failure codes reported by the service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("no node")]
    NoNode,

    #[error("node exists")]
    NodeExists,

    #[error("bad version")]
    BadVersion,

    #[error("node has children")]
    NotEmpty,

    #[error("ephemeral nodes may not have children")]
    NoChildrenForEphemerals,

    #[error("bad arguments: {0}")]
    BadArguments(String),

    #[error("connection loss")]
    ConnectionLoss,

    #[error("session expired")]
    SessionExpired,

    #[error("session closed")]
    SessionClosed,

    #[error("multi operation {index} failed: {code}")]
    MultiFailed {
        index: usize,
        code: Box<ServiceError>,
    },

    #[error("system error: {0}")]
    System(String),
}

/// A session against a hierarchical coordination tree
pub trait CoordinationService: Send + Sync + 'static {
    /// Establish the session
    fn start(&self) -> ServiceResult<()>;

    /// Release the session; ephemeral nodes it owns are removed
    fn close(&self);

    fn state(&self) -> SessionState;

    fn session_id(&self) -> SessionId;

    /// Connection-state transitions, delivered asynchronously
    fn subscribe_session(&self) -> broadcast::Receiver<SessionState>;

    /// Create a node, returning its actual path (differs for sequential modes)
    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> ServiceResult<String>;

    /// Delete a node; `None` matches any version
    fn delete(&self, path: &str, version: Option<i64>) -> ServiceResult<()>;

    fn get_data(&self, path: &str, watcher: Option<&Watcher>) -> ServiceResult<(Vec<u8>, Stat)>;

    /// Overwrite node data; `None` matches any version
    fn set_data(&self, path: &str, data: &[u8], version: Option<i64>) -> ServiceResult<Stat>;

    /// Stat a node; a watch fires on creation, deletion or data change
    fn exists(&self, path: &str, watcher: Option<&Watcher>) -> ServiceResult<Option<Stat>>;

    fn get_children(&self, path: &str, watcher: Option<&Watcher>) -> ServiceResult<Vec<String>>;

    /// Apply every operation atomically, in order
    ///
    /// On failure returns [`ServiceError::MultiFailed`] naming the first
    /// operation whose precondition did not hold, and nothing is applied.
    fn multi(&self, ops: &[Operation]) -> ServiceResult<Vec<OpResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mode_flags() {
        assert!(CreateMode::Ephemeral.is_ephemeral());
        assert!(!CreateMode::Ephemeral.is_sequential());
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::PersistentSequential.is_sequential());
        assert!(!CreateMode::Persistent.is_ephemeral());
    }

    #[test]
    fn test_watcher_clones_share_id() {
        let (watcher, mut rx) = Watcher::channel();
        let clone = watcher.clone();
        assert_eq!(watcher.id(), clone.id());

        let (other, _rx) = Watcher::channel();
        assert_ne!(watcher.id(), other.id());

        assert!(clone.notify(WatchedEvent {
            kind: EventType::NodeCreated,
            path: "/a".into(),
        }));
        assert_eq!(rx.try_recv().unwrap().path, "/a");
    }

    #[test]
    fn test_stat_timestamps() {
        let stat = Stat {
            czxid: 1,
            mzxid: 1,
            ctime: 1_000,
            mtime: 2_000,
            version: 0,
            cversion: 0,
            ephemeral_owner: None,
            data_length: 0,
            num_children: 0,
        };
        assert_eq!(stat.created_at().timestamp_millis(), 1_000);
        assert_eq!(stat.modified_at().timestamp_millis(), 2_000);
        assert!(!stat.is_ephemeral());
    }
}
