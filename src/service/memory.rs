//! In-process coordination ensemble
//!
//! [`MemEnsemble`] holds one shared tree; every [`MemSession`] is an
//! independent client session against it with its own id, connection state
//! and ephemeral nodes. Tests drive session failures through
//! [`MemSession::disconnect`], [`MemSession::reconnect`] and
//! [`MemSession::expire`].

use super::{
    CoordinationService, CreateMode, EventType, ServiceError, ServiceResult, SessionId,
    SessionState, Stat, WatchedEvent, Watcher,
};
use crate::common::{paths, timestamp_now_millis};
use crate::coordination::operation::{OpResult, Operation};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

const SESSION_EVENTS_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct ZNode {
    data: Vec<u8>,
    stat: Stat,
    children: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Created(String),
    Deleted(String),
    DataChanged(String),
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: HashMap<String, ZNode>,
    zxid: i64,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            ZNode {
                data: Vec::new(),
                stat: Stat {
                    czxid: 0,
                    mzxid: 0,
                    ctime: 0,
                    mtime: 0,
                    version: 0,
                    cversion: 0,
                    ephemeral_owner: None,
                    data_length: 0,
                    num_children: 0,
                },
                children: BTreeSet::new(),
            },
        );
        Self { nodes, zxid: 0 }
    }

    fn check_path(path: &str) -> ServiceResult<()> {
        paths::validate(path).map_err(|e| ServiceError::BadArguments(e.to_string()))
    }

    fn version_matches(stat: &Stat, expected: Option<i64>) -> bool {
        expected.map(|v| v == stat.version).unwrap_or(true)
    }

    fn create(
        &mut self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        owner: SessionId,
    ) -> ServiceResult<(String, Change)> {
        Self::check_path(path)?;
        if path == "/" {
            return Err(ServiceError::NodeExists);
        }
        let parent_path = paths::parent(path)
            .ok_or_else(|| ServiceError::BadArguments(path.to_string()))?
            .to_string();

        let parent = self.nodes.get(&parent_path).ok_or(ServiceError::NoNode)?;
        if parent.stat.is_ephemeral() {
            return Err(ServiceError::NoChildrenForEphemerals);
        }
        let actual = if mode.is_sequential() {
            format!("{}{:010}", path, parent.stat.cversion)
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&actual) {
            return Err(ServiceError::NodeExists);
        }

        self.zxid += 1;
        let now = timestamp_now_millis();
        let node = ZNode {
            data: data.to_vec(),
            stat: Stat {
                czxid: self.zxid,
                mzxid: self.zxid,
                ctime: now,
                mtime: now,
                version: 0,
                cversion: 0,
                ephemeral_owner: mode.is_ephemeral().then_some(owner),
                data_length: data.len() as u32,
                num_children: 0,
            },
            children: BTreeSet::new(),
        };
        self.nodes.insert(actual.clone(), node);

        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.insert(paths::name(&actual).to_string());
            parent.stat.cversion += 1;
            parent.stat.num_children = parent.children.len() as u32;
        }

        Ok((actual.clone(), Change::Created(actual)))
    }

    fn delete(&mut self, path: &str, version: Option<i64>) -> ServiceResult<Change> {
        Self::check_path(path)?;
        if path == "/" {
            return Err(ServiceError::BadArguments("cannot delete the root".into()));
        }
        let node = self.nodes.get(path).ok_or(ServiceError::NoNode)?;
        if !Self::version_matches(&node.stat, version) {
            return Err(ServiceError::BadVersion);
        }
        if !node.children.is_empty() {
            return Err(ServiceError::NotEmpty);
        }

        self.zxid += 1;
        self.nodes.remove(path);
        if let Some(parent_path) = paths::parent(path) {
            if let Some(parent) = self.nodes.get_mut(parent_path) {
                parent.children.remove(paths::name(path));
                parent.stat.cversion += 1;
                parent.stat.num_children = parent.children.len() as u32;
            }
        }
        Ok(Change::Deleted(path.to_string()))
    }

    fn set_data(
        &mut self,
        path: &str,
        data: &[u8],
        version: Option<i64>,
    ) -> ServiceResult<(Stat, Change)> {
        Self::check_path(path)?;
        let node = self.nodes.get_mut(path).ok_or(ServiceError::NoNode)?;
        if !Self::version_matches(&node.stat, version) {
            return Err(ServiceError::BadVersion);
        }
        self.zxid += 1;
        node.data = data.to_vec();
        node.stat.version += 1;
        node.stat.mzxid = self.zxid;
        node.stat.mtime = timestamp_now_millis();
        node.stat.data_length = data.len() as u32;
        Ok((node.stat, Change::DataChanged(path.to_string())))
    }

    fn check(&self, path: &str, version: Option<i64>) -> ServiceResult<()> {
        Self::check_path(path)?;
        let node = self.nodes.get(path).ok_or(ServiceError::NoNode)?;
        if !Self::version_matches(&node.stat, version) {
            return Err(ServiceError::BadVersion);
        }
        Ok(())
    }

    fn apply(&mut self, op: &Operation, owner: SessionId) -> ServiceResult<(OpResult, Option<Change>)> {
        match op {
            Operation::Create { path, data, mode } => {
                let (actual, change) = self.create(path, data, *mode, owner)?;
                Ok((OpResult::Created { path: actual }, Some(change)))
            }
            Operation::Delete { path, version } => {
                let change = self.delete(path, *version)?;
                Ok((OpResult::Deleted { path: path.clone() }, Some(change)))
            }
            Operation::SetData {
                path,
                data,
                version,
            } => {
                let (stat, change) = self.set_data(path, data, *version)?;
                Ok((
                    OpResult::DataSet {
                        path: path.clone(),
                        stat,
                    },
                    Some(change),
                ))
            }
            Operation::Check { path, version } => {
                self.check(path, *version)?;
                Ok((OpResult::Checked { path: path.clone() }, None))
            }
        }
    }

    fn ephemerals_of(&self, owner: SessionId) -> Vec<String> {
        let mut owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.stat.ephemeral_owner == Some(owner))
            .map(|(p, _)| p.clone())
            .collect();
        owned.sort();
        owned
    }
}

/// Registered one-shot watches, keyed by path
#[derive(Debug, Default)]
struct Watches {
    data: HashMap<String, Vec<(SessionId, Watcher)>>,
    child: HashMap<String, Vec<(SessionId, Watcher)>>,
}

impl Watches {
    fn add(map: &mut HashMap<String, Vec<(SessionId, Watcher)>>, path: &str, session: SessionId, watcher: &Watcher) {
        let entry = map.entry(path.to_string()).or_default();
        if !entry.iter().any(|(_, w)| w.id() == watcher.id()) {
            entry.push((session, watcher.clone()));
        }
    }

    fn fire(map: &mut HashMap<String, Vec<(SessionId, Watcher)>>, path: &str, kind: EventType) {
        if let Some(watchers) = map.remove(path) {
            for (_, watcher) in watchers {
                watcher.notify(WatchedEvent {
                    kind,
                    path: path.to_string(),
                });
            }
        }
    }

    fn trigger(&mut self, change: &Change) {
        match change {
            Change::Created(path) => {
                Self::fire(&mut self.data, path, EventType::NodeCreated);
                if let Some(parent) = paths::parent(path) {
                    Self::fire(&mut self.child, parent, EventType::NodeChildrenChanged);
                }
            }
            Change::Deleted(path) => {
                Self::fire(&mut self.data, path, EventType::NodeDeleted);
                Self::fire(&mut self.child, path, EventType::NodeDeleted);
                if let Some(parent) = paths::parent(path) {
                    Self::fire(&mut self.child, parent, EventType::NodeChildrenChanged);
                }
            }
            Change::DataChanged(path) => {
                Self::fire(&mut self.data, path, EventType::NodeDataChanged);
            }
        }
    }

    fn drop_session(&mut self, session: SessionId) {
        for map in [&mut self.data, &mut self.child] {
            for watchers in map.values_mut() {
                watchers.retain(|(owner, _)| *owner != session);
            }
            map.retain(|_, watchers| !watchers.is_empty());
        }
    }
}

#[derive(Debug)]
struct EnsembleState {
    tree: Tree,
    watches: Watches,
    next_session: SessionId,
}

impl EnsembleState {
    fn commit(&mut self, changes: &[Change]) {
        for change in changes {
            self.watches.trigger(change);
        }
    }

    fn release_session(&mut self, session: SessionId) {
        self.watches.drop_session(session);
        let mut changes = Vec::new();
        for path in self.tree.ephemerals_of(session) {
            if let Ok(change) = self.tree.delete(&path, None) {
                changes.push(change);
            }
        }
        self.commit(&changes);
    }
}

/// Shared in-memory tree
#[derive(Debug, Clone)]
pub struct MemEnsemble {
    state: Arc<Mutex<EnsembleState>>,
}

impl Default for MemEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemEnsemble {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EnsembleState {
                tree: Tree::new(),
                watches: Watches::default(),
                next_session: 1,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EnsembleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a new, not yet started, session
    pub fn session(&self) -> MemSession {
        let (events, _) = broadcast::channel(SESSION_EVENTS_CAPACITY);
        MemSession {
            ensemble: self.clone(),
            link: Mutex::new(Link {
                id: 0,
                state: LinkState::Idle,
            }),
            events,
            calls: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
        }
    }

    fn allocate_session(&self) -> SessionId {
        let mut state = self.lock();
        let id = state.next_session;
        state.next_session += 1;
        id
    }

    /// Every path currently in the tree, sorted
    pub fn paths(&self) -> Vec<String> {
        let state = self.lock();
        let mut all: Vec<String> = state.tree.nodes.keys().cloned().collect();
        all.sort();
        all
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().tree.nodes.contains_key(path)
    }
}

/// Kinds of remote call, for call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Create,
    Delete,
    GetData,
    SetData,
    Exists,
    GetChildren,
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Idle,
    Connected,
    Disconnected,
    Expired,
    Closed,
}

#[derive(Debug)]
struct Link {
    id: SessionId,
    state: LinkState,
}

/// One client session against a [`MemEnsemble`]
#[derive(Debug)]
pub struct MemSession {
    ensemble: MemEnsemble,
    link: Mutex<Link>,
    events: broadcast::Sender<SessionState>,
    calls: Mutex<HashMap<CallKind, u64>>,
    faults: Mutex<HashMap<CallKind, VecDeque<ServiceError>>>,
}

impl MemSession {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, state: SessionState) {
        tracing::debug!("session {} -> {}", self.session_id(), state);
        // No subscribers is fine.
        let _ = self.events.send(state);
    }

    /// Record the call and return the live session id
    fn enter(&self, kind: CallKind) -> ServiceResult<SessionId> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(kind)
            .or_insert(0) += 1;

        let fault = self
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_mut(&kind)
            .and_then(|queue| queue.pop_front());
        if let Some(fault) = fault {
            return Err(fault);
        }

        let link = self.link();
        match link.state {
            LinkState::Connected => Ok(link.id),
            LinkState::Disconnected => Err(ServiceError::ConnectionLoss),
            LinkState::Expired => Err(ServiceError::SessionExpired),
            LinkState::Idle | LinkState::Closed => Err(ServiceError::SessionClosed),
        }
    }

    /// Number of remote calls of `kind` issued on this session
    pub fn calls(&self, kind: CallKind) -> u64 {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .sum()
    }

    /// Fail the next call of `kind` with `error`, leaving the connection up
    ///
    /// Queued faults are consumed in order, one per call.
    pub fn fail_next(&self, kind: CallKind, error: ServiceError) {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    /// Drop the connection; the session and its ephemerals survive
    pub fn disconnect(&self) {
        {
            let mut link = self.link();
            if link.state != LinkState::Connected {
                return;
            }
            link.state = LinkState::Disconnected;
        }
        self.emit(SessionState::Disconnected);
    }

    /// Restore the connection, establishing a fresh session after expiry
    pub fn reconnect(&self) {
        let expired = {
            let link = self.link();
            match link.state {
                LinkState::Disconnected => false,
                LinkState::Expired => true,
                _ => return,
            }
        };
        let new_id = expired.then(|| self.ensemble.allocate_session());
        {
            let mut link = self.link();
            if let Some(id) = new_id {
                link.id = id;
            }
            link.state = LinkState::Connected;
        }
        self.emit(SessionState::Reconnected);
    }

    /// Expire the session: its ephemeral nodes and watches are discarded
    pub fn expire(&self) {
        let id = {
            let mut link = self.link();
            if !matches!(link.state, LinkState::Connected | LinkState::Disconnected) {
                return;
            }
            link.state = LinkState::Expired;
            link.id
        };
        self.ensemble.lock().release_session(id);
        self.emit(SessionState::Expired);
    }
}

impl CoordinationService for MemSession {
    fn start(&self) -> ServiceResult<()> {
        if self.link().state != LinkState::Idle {
            return Err(ServiceError::System("session already started".into()));
        }
        let id = self.ensemble.allocate_session();
        {
            let mut link = self.link();
            link.id = id;
            link.state = LinkState::Connected;
        }
        self.emit(SessionState::Connected);
        Ok(())
    }

    fn close(&self) {
        let id = {
            let mut link = self.link();
            let live = matches!(link.state, LinkState::Connected | LinkState::Disconnected);
            link.state = LinkState::Closed;
            live.then_some(link.id)
        };
        if let Some(id) = id {
            self.ensemble.lock().release_session(id);
        }
    }

    fn state(&self) -> SessionState {
        match self.link().state {
            LinkState::Connected => SessionState::Connected,
            LinkState::Expired => SessionState::Expired,
            LinkState::Idle | LinkState::Disconnected | LinkState::Closed => {
                SessionState::Disconnected
            }
        }
    }

    fn session_id(&self) -> SessionId {
        self.link().id
    }

    fn subscribe_session(&self) -> broadcast::Receiver<SessionState> {
        self.events.subscribe()
    }

    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> ServiceResult<String> {
        let owner = self.enter(CallKind::Create)?;
        let mut state = self.ensemble.lock();
        let (actual, change) = state.tree.create(path, data, mode, owner)?;
        state.commit(&[change]);
        Ok(actual)
    }

    fn delete(&self, path: &str, version: Option<i64>) -> ServiceResult<()> {
        self.enter(CallKind::Delete)?;
        let mut state = self.ensemble.lock();
        let change = state.tree.delete(path, version)?;
        state.commit(&[change]);
        Ok(())
    }

    fn get_data(&self, path: &str, watcher: Option<&Watcher>) -> ServiceResult<(Vec<u8>, Stat)> {
        let session = self.enter(CallKind::GetData)?;
        Tree::check_path(path)?;
        let mut state = self.ensemble.lock();
        let node = state.tree.nodes.get(path).ok_or(ServiceError::NoNode)?;
        let result = (node.data.clone(), node.stat);
        if let Some(watcher) = watcher {
            Watches::add(&mut state.watches.data, path, session, watcher);
        }
        Ok(result)
    }

    fn set_data(&self, path: &str, data: &[u8], version: Option<i64>) -> ServiceResult<Stat> {
        self.enter(CallKind::SetData)?;
        let mut state = self.ensemble.lock();
        let (stat, change) = state.tree.set_data(path, data, version)?;
        state.commit(&[change]);
        Ok(stat)
    }

    fn exists(&self, path: &str, watcher: Option<&Watcher>) -> ServiceResult<Option<Stat>> {
        let session = self.enter(CallKind::Exists)?;
        Tree::check_path(path)?;
        let mut state = self.ensemble.lock();
        let stat = state.tree.nodes.get(path).map(|n| n.stat);
        if let Some(watcher) = watcher {
            Watches::add(&mut state.watches.data, path, session, watcher);
        }
        Ok(stat)
    }

    fn get_children(&self, path: &str, watcher: Option<&Watcher>) -> ServiceResult<Vec<String>> {
        let session = self.enter(CallKind::GetChildren)?;
        Tree::check_path(path)?;
        let mut state = self.ensemble.lock();
        let node = state.tree.nodes.get(path).ok_or(ServiceError::NoNode)?;
        let children: Vec<String> = node.children.iter().cloned().collect();
        if let Some(watcher) = watcher {
            Watches::add(&mut state.watches.child, path, session, watcher);
        }
        Ok(children)
    }

    fn multi(&self, ops: &[Operation]) -> ServiceResult<Vec<OpResult>> {
        let owner = self.enter(CallKind::Multi)?;
        let mut state = self.ensemble.lock();

        // Stage against a copy so a failure leaves nothing behind.
        let mut staged = state.tree.clone();
        let mut results = Vec::with_capacity(ops.len());
        let mut changes = Vec::new();
        for (index, op) in ops.iter().enumerate() {
            match staged.apply(op, owner) {
                Ok((result, change)) => {
                    results.push(result);
                    changes.extend(change);
                }
                Err(code) => {
                    return Err(ServiceError::MultiFailed {
                        index,
                        code: Box::new(code),
                    })
                }
            }
        }

        state.tree = staged;
        state.commit(&changes);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(ensemble: &MemEnsemble) -> MemSession {
        let session = ensemble.session();
        session.start().unwrap();
        session
    }

    #[test]
    fn test_create_and_versions() {
        let ensemble = MemEnsemble::new();
        let session = started(&ensemble);

        session.create("/a", b"one", CreateMode::Persistent).unwrap();
        let (data, stat) = session.get_data("/a", None).unwrap();
        assert_eq!(data, b"one");
        assert_eq!(stat.version, 0);

        let stat = session.set_data("/a", b"two", Some(0)).unwrap();
        assert_eq!(stat.version, 1);
        assert_eq!(
            session.set_data("/a", b"three", Some(0)),
            Err(ServiceError::BadVersion)
        );
        assert_eq!(
            session.create("/a", b"", CreateMode::Persistent),
            Err(ServiceError::NodeExists)
        );
        assert_eq!(
            session.create("/x/y", b"", CreateMode::Persistent),
            Err(ServiceError::NoNode)
        );
    }

    #[test]
    fn test_sequential_names() {
        let ensemble = MemEnsemble::new();
        let session = started(&ensemble);
        session.create("/q", b"", CreateMode::Persistent).unwrap();

        let first = session
            .create("/q/item-", b"", CreateMode::PersistentSequential)
            .unwrap();
        let second = session
            .create("/q/item-", b"", CreateMode::PersistentSequential)
            .unwrap();
        assert_eq!(first, "/q/item-0000000000");
        assert_eq!(second, "/q/item-0000000001");
    }

    #[test]
    fn test_delete_rules() {
        let ensemble = MemEnsemble::new();
        let session = started(&ensemble);
        session.create("/a", b"", CreateMode::Persistent).unwrap();
        session.create("/a/b", b"", CreateMode::Persistent).unwrap();

        assert_eq!(session.delete("/a", None), Err(ServiceError::NotEmpty));
        assert_eq!(session.delete("/a/b", Some(3)), Err(ServiceError::BadVersion));
        session.delete("/a/b", Some(0)).unwrap();
        session.delete("/a", None).unwrap();
        assert_eq!(session.delete("/a", None), Err(ServiceError::NoNode));
    }

    #[test]
    fn test_watches_fire_once() {
        let ensemble = MemEnsemble::new();
        let session = started(&ensemble);
        let (watcher, mut rx) = Watcher::channel();

        assert!(session.exists("/w", Some(&watcher)).unwrap().is_none());
        assert!(session.exists("/w", Some(&watcher)).unwrap().is_none());
        session.create("/w", b"", CreateMode::Persistent).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventType::NodeCreated);
        assert!(rx.try_recv().is_err());

        session.set_data("/w", b"x", None).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_child_watch() {
        let ensemble = MemEnsemble::new();
        let session = started(&ensemble);
        session.create("/p", b"", CreateMode::Persistent).unwrap();
        let (watcher, mut rx) = Watcher::channel();

        assert!(session.get_children("/p", Some(&watcher)).unwrap().is_empty());
        session.create("/p/c", b"", CreateMode::Persistent).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventType::NodeChildrenChanged);
        assert_eq!(event.path, "/p");
    }

    #[test]
    fn test_multi_is_atomic() {
        let ensemble = MemEnsemble::new();
        let session = started(&ensemble);
        session.create("/b", b"", CreateMode::Persistent).unwrap();

        let err = session
            .multi(&[
                Operation::create("/a", b"".to_vec()),
                Operation::set_data_versioned("/b", b"v".to_vec(), 0),
                Operation::delete("/c"),
            ])
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::MultiFailed {
                index: 2,
                code: Box::new(ServiceError::NoNode)
            }
        );
        assert!(!ensemble.contains("/a"));
        assert_eq!(session.get_data("/b", None).unwrap().1.version, 0);
    }

    #[test]
    fn test_expire_removes_ephemerals() {
        let ensemble = MemEnsemble::new();
        let owner = started(&ensemble);
        let observer = started(&ensemble);
        owner.create("/alive", b"", CreateMode::Ephemeral).unwrap();
        assert!(observer.exists("/alive", None).unwrap().unwrap().is_ephemeral());

        let mut events = owner.subscribe_session();
        owner.expire();
        assert_eq!(events.try_recv().unwrap(), SessionState::Expired);
        assert!(observer.exists("/alive", None).unwrap().is_none());
        assert_eq!(owner.exists("/alive", None), Err(ServiceError::SessionExpired));

        let old_id = owner.session_id();
        owner.reconnect();
        assert_eq!(events.try_recv().unwrap(), SessionState::Reconnected);
        assert_ne!(owner.session_id(), old_id);
        assert!(owner.exists("/alive", None).unwrap().is_none());
    }

    #[test]
    fn test_disconnect_keeps_session() {
        let ensemble = MemEnsemble::new();
        let session = started(&ensemble);
        session.create("/e", b"", CreateMode::Ephemeral).unwrap();

        session.disconnect();
        assert_eq!(session.get_children("/", None), Err(ServiceError::ConnectionLoss));
        session.reconnect();
        assert!(session.exists("/e", None).unwrap().is_some());
    }

    #[test]
    fn test_call_accounting() {
        let ensemble = MemEnsemble::new();
        let session = started(&ensemble);
        let _ = session.exists("/nope", None);
        let _ = session.exists("/nope", None);
        assert_eq!(session.calls(CallKind::Exists), 2);
        assert_eq!(session.calls(CallKind::Create), 0);
        assert_eq!(session.total_calls(), 2);
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let ensemble = MemEnsemble::new();
        let session = started(&ensemble);
        session.fail_next(CallKind::Exists, ServiceError::ConnectionLoss);

        assert_eq!(session.exists("/", None), Err(ServiceError::ConnectionLoss));
        assert!(session.exists("/", None).unwrap().is_some());
        assert!(session.get_children("/", None).is_ok());
        assert_eq!(session.calls(CallKind::Exists), 2);
        assert_eq!(session.state(), SessionState::Connected);
    }
}
