//! Coordination client
//!
//! Single point of access to the remote tree. Every operation blocks until
//! the service acknowledges it, is gated behind cluster identity
//! confirmation, and reports failures through the [`ErrorKind`] taxonomy.
//! The client never retries; callers own retry policy.
//!
//! [`ErrorKind`]: crate::common::ErrorKind

use crate::common::{paths, ClientConfig, Error, OpKind, Result};
use crate::coordination::cache::PersistentPathChildrenCache;
use crate::coordination::codec::JsonCodec;
use crate::coordination::ephemeral::PersistentEphemeralNode;
use crate::coordination::identity::{spawn_guard, IdentityGuard, IdentityState};
use crate::coordination::node::Node;
use crate::coordination::operation::{OpResult, Operation};
use crate::service::{
    CoordinationService, CreateMode, ServiceError, ServiceResult, SessionId, SessionState, Stat,
    Watcher,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const CREATED: u8 = 0;
const STARTED: u8 = 1;
const CLOSED: u8 = 2;

struct ClientInner {
    service: Arc<dyn CoordinationService>,
    guard: Arc<IdentityGuard>,
    lifecycle: AtomicU8,
    config: ClientConfig,
}

/// Cheaply cloneable handle to one coordination session
#[derive(Clone)]
pub struct CoordinationClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for CoordinationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationClient")
            .field("guard", &self.inner.guard)
            .field("lifecycle", &self.inner.lifecycle.load(Ordering::Acquire))
            .finish()
    }
}

impl CoordinationClient {
    /// Client gated on `config.cluster_id` when one is set
    ///
    /// Rejects malformed cluster ids and zero retry intervals.
    pub fn new(service: Arc<dyn CoordinationService>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(service, config))
    }

    /// Client without an identity requirement
    pub fn unguarded(service: Arc<dyn CoordinationService>) -> Self {
        Self::build(service, ClientConfig::default())
    }

    fn build(service: Arc<dyn CoordinationService>, config: ClientConfig) -> Self {
        let guard = Arc::new(IdentityGuard::new(
            config.cluster_id.clone(),
            config.identity_retry(),
        ));
        Self {
            inner: Arc::new(ClientInner {
                service,
                guard,
                lifecycle: AtomicU8::new(CREATED),
                config,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn guard(&self) -> &IdentityGuard {
        &self.inner.guard
    }

    pub fn identity_state(&self) -> IdentityState {
        self.inner.guard.state()
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.service.session_id()
    }

    /// Connection-state transitions of the underlying session
    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionState> {
        self.inner.service.subscribe_session()
    }

    /// Open the session and begin identity verification
    ///
    /// With identity gating enabled this spawns the re-verification task and
    /// must run inside a tokio runtime. Dropping or closing the returned
    /// handle unregisters the listener and releases the session.
    pub fn start(&self) -> Result<ClientHandle> {
        if self.inner.guard.is_enabled() && tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::InvalidConfig(
                "identity gating requires a tokio runtime".into(),
            ));
        }
        match self.inner.lifecycle.compare_exchange(
            CREATED,
            STARTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STARTED) => return Err(Error::AlreadyStarted),
            Err(_) => return Err(Error::Closed),
        }

        // Subscribe before the first check so no transition is missed.
        let sessions = self.inner.service.subscribe_session();
        if let Err(e) = self.inner.service.start() {
            self.inner.lifecycle.store(CLOSED, Ordering::Release);
            return Err(Error::remote(OpKind::Start, "/", e));
        }
        tracing::info!("coordination session {} started", self.session_id());

        self.inner.guard.verify(self.inner.service.as_ref());
        let listener = spawn_guard(
            self.inner.guard.clone(),
            self.inner.service.clone(),
            sessions,
        );

        Ok(ClientHandle {
            client: self.clone(),
            listener,
        })
    }

    fn shutdown(&self) {
        if self.inner.lifecycle.swap(CLOSED, Ordering::AcqRel) == STARTED {
            self.inner.service.close();
            tracing::info!("coordination session {} closed", self.session_id());
        }
    }

    fn gate(&self) -> Result<()> {
        match self.inner.lifecycle.load(Ordering::Acquire) {
            CREATED => Err(Error::NotStarted),
            STARTED => self.inner.guard.ensure_confirmed(),
            _ => Err(Error::Closed),
        }
    }

    /// Gate, issue one remote call, normalize its failure
    fn remote<T>(
        &self,
        op: OpKind,
        path: &str,
        call: impl FnOnce(&dyn CoordinationService) -> ServiceResult<T>,
    ) -> Result<T> {
        self.gate()?;
        call(self.inner.service.as_ref()).map_err(|e| Error::remote(op, path, e))
    }

    /// Current session state
    pub fn state(&self) -> Result<SessionState> {
        self.gate()?;
        Ok(self.inner.service.state())
    }

    /// Create `path` and every missing ancestor
    pub fn ensure_path(&self, path: &str) -> Result<()> {
        self.ensure_path_excluding(path, false)
    }

    /// Create every missing ancestor of `path`, and `path` itself unless
    /// `excluding_last`; nodes that already exist are left alone
    pub fn ensure_path_excluding(&self, path: &str, excluding_last: bool) -> Result<()> {
        self.gate()?;
        paths::validate(path)?;
        let mut targets = paths::ancestors(path);
        if !excluding_last && path != "/" {
            targets.push(path.to_string());
        }

        let service = self.inner.service.as_ref();
        for target in targets {
            let present = service
                .exists(&target, None)
                .map_err(|e| Error::remote(OpKind::EnsurePath, &target, e))?;
            if present.is_some() {
                continue;
            }
            match service.create(&target, &[], CreateMode::Persistent) {
                Ok(_) | Err(ServiceError::NodeExists) => {}
                Err(e) => return Err(Error::remote(OpKind::EnsurePath, &target, e)),
            }
        }
        Ok(())
    }

    pub fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        self.remote(OpKind::GetData, path, |s| s.get_data(path, None))
            .map(|(data, _)| data)
    }

    pub fn get_node(&self, path: &str) -> Result<Node> {
        let (data, stat) = self.remote(OpKind::GetNode, path, |s| s.get_data(path, None))?;
        Ok(Node::new(path, data, stat))
    }

    /// Metadata for `path`, or `None` when absent
    pub fn exists(&self, path: &str) -> Result<Option<Stat>> {
        self.remote(OpKind::Exists, path, |s| s.exists(path, None))
    }

    pub fn stat(&self, path: &str) -> Result<Option<Stat>> {
        self.remote(OpKind::Stat, path, |s| s.exists(path, None))
    }

    /// Immediate child names
    pub fn get_children(&self, path: &str) -> Result<Vec<String>> {
        self.remote(OpKind::GetChildren, path, |s| s.get_children(path, None))
    }

    pub(crate) fn exists_watched(&self, path: &str, watcher: &Watcher) -> Result<Option<Stat>> {
        self.remote(OpKind::Exists, path, |s| s.exists(path, Some(watcher)))
    }

    pub(crate) fn get_children_watched(&self, path: &str, watcher: &Watcher) -> Result<Vec<String>> {
        self.remote(OpKind::GetChildren, path, |s| s.get_children(path, Some(watcher)))
    }

    pub(crate) fn get_node_watched(&self, path: &str, watcher: &Watcher) -> Result<Node> {
        let (data, stat) =
            self.remote(OpKind::GetNode, path, |s| s.get_data(path, Some(watcher)))?;
        Ok(Node::new(path, data, stat))
    }

    /// Create an empty persistent node
    pub fn create(&self, path: &str) -> Result<()> {
        self.remote(OpKind::Create, path, |s| s.create(path, &[], CreateMode::Persistent))
            .map(|_| ())
    }

    pub fn create_and_set_data(&self, path: &str, data: &[u8]) -> Result<()> {
        self.remote(OpKind::Create, path, |s| s.create(path, data, CreateMode::Persistent))
            .map(|_| ())
    }

    /// Create an empty node in `mode`, returning its actual path
    pub fn create_with_mode(&self, path: &str, mode: CreateMode) -> Result<String> {
        self.create_with_mode_and_data(path, mode, &[])
    }

    pub fn create_with_mode_and_data(
        &self,
        path: &str,
        mode: CreateMode,
        data: &[u8],
    ) -> Result<String> {
        self.remote(OpKind::Create, path, |s| s.create(path, data, mode))
    }

    /// Unconditional overwrite
    pub fn set_data(&self, path: &str, data: &[u8]) -> Result<Stat> {
        self.remote(OpKind::SetData, path, |s| s.set_data(path, data, None))
    }

    pub fn set_data_versioned(&self, path: &str, data: &[u8], version: i64) -> Result<Stat> {
        self.remote(OpKind::SetData, path, |s| s.set_data(path, data, Some(version)))
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.remote(OpKind::Delete, path, |s| s.delete(path, None))
    }

    /// Delete only if the node is still at `version`
    pub fn delete_versioned(&self, path: &str, version: i64) -> Result<()> {
        self.remote(OpKind::Delete, path, |s| s.delete(path, Some(version)))
    }

    /// Every path in the subtree rooted at `path`, breadth-first, root first
    pub fn list_recursive(&self, path: &str) -> Result<Vec<String>> {
        self.gate()?;
        self.list_subtree(OpKind::ListRecursive, path)
    }

    fn list_subtree(&self, op: OpKind, root: &str) -> Result<Vec<String>> {
        let service = self.inner.service.as_ref();
        let mut queue = VecDeque::from([root.to_string()]);
        let mut tree = Vec::new();

        while let Some(node) = queue.pop_front() {
            let children = match service.get_children(&node, None) {
                Ok(children) => children,
                // Removed concurrently below the root.
                Err(ServiceError::NoNode) if node != root => continue,
                Err(e) => return Err(Error::remote(op, root, e)),
            };
            for child in children {
                queue.push_back(paths::join(&node, &child));
            }
            tree.push(node);
        }
        Ok(tree)
    }

    /// Remove the subtree rooted at `path` in one atomic transaction
    ///
    /// A missing `path` is a no-op.
    pub fn delete_recursive(&self, path: &str) -> Result<()> {
        self.gate()?;
        let nodes = match self.list_subtree(OpKind::DeleteRecursive, path) {
            Ok(nodes) => nodes,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if nodes.is_empty() {
            return Ok(());
        }

        let mut ops = Vec::with_capacity(nodes.len() + 1);
        ops.push(Operation::check(path));
        ops.extend(nodes.iter().rev().map(Operation::delete));

        tracing::debug!("delete_recursive {}: {} nodes", path, nodes.len());
        self.inner
            .service
            .multi(&ops)
            .map(|_| ())
            .map_err(|e| match e {
                ServiceError::MultiFailed { code, .. } => {
                    Error::remote(OpKind::DeleteRecursive, path, *code)
                }
                other => Error::remote(OpKind::DeleteRecursive, path, other),
            })
    }

    /// Apply `operations` atomically in registration order
    ///
    /// An empty batch returns an empty result without contacting the service.
    pub fn transaction(
        &self,
        operations: impl IntoIterator<Item = Operation>,
    ) -> Result<Vec<OpResult>> {
        self.gate()?;
        let ops: Vec<Operation> = operations.into_iter().collect();
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(
            "transaction: [{}]",
            ops.iter().map(|op| op.to_string()).collect::<Vec<_>>().join(", ")
        );

        self.inner.service.multi(&ops).map_err(|e| match e {
            ServiceError::MultiFailed { index, code } => {
                let failed = &ops[index.min(ops.len() - 1)];
                Error::Transaction {
                    index,
                    op: failed.kind(),
                    path: failed.path().to_string(),
                    source: Box::new(Error::remote(failed.kind(), failed.path(), *code)),
                }
            }
            other => Error::remote(OpKind::Transaction, ops[0].path(), other),
        })
    }

    /// Ephemeral node kept present for as long as this client's session lives
    pub fn persistent_ephemeral_node(
        &self,
        path: &str,
        mode: CreateMode,
        data: Vec<u8>,
    ) -> Result<PersistentEphemeralNode> {
        self.gate()?;
        PersistentEphemeralNode::new(self.clone(), path, mode, data)
    }

    /// Locally mirrored, disk-persisted cache of `path`'s children
    pub fn path_children_cache<T>(
        &self,
        path: &str,
        snapshot_file: impl Into<PathBuf>,
    ) -> Result<PersistentPathChildrenCache<T, JsonCodec>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        PersistentPathChildrenCache::new(self.clone(), path, snapshot_file)
    }
}

/// Ownership of a started client's session and listeners
///
/// Closing or dropping the handle unregisters the session listener and
/// releases the session exactly once.
#[derive(Debug)]
pub struct ClientHandle {
    client: CoordinationClient,
    listener: Option<JoinHandle<()>>,
}

impl ClientHandle {
    pub fn client(&self) -> &CoordinationClient {
        &self.client
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.client.shutdown();
    }
}

impl std::ops::Deref for ClientHandle {
    type Target = CoordinationClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.release();
    }
}
