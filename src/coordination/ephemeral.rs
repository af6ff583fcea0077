//! Ephemeral node that survives deletion and session loss
//!
//! The node is created on start and re-created whenever it disappears:
//! deleted by someone else, or removed by the service when the session
//! expired and a new one was established.

use crate::common::{jittered, paths, Error, ErrorKind, OpKind, Result};
use crate::coordination::client::CoordinationClient;
use crate::service::{CreateMode, EventType, SessionState, Watcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug)]
pub struct PersistentEphemeralNode {
    client: CoordinationClient,
    path: String,
    mode: CreateMode,
    data: Arc<Vec<u8>>,
    actual: watch::Sender<Option<String>>,
    task: Option<JoinHandle<()>>,
}

impl PersistentEphemeralNode {
    pub(crate) fn new(
        client: CoordinationClient,
        path: &str,
        mode: CreateMode,
        data: Vec<u8>,
    ) -> Result<Self> {
        paths::validate(path)?;
        if !mode.is_ephemeral() {
            return Err(Error::InvalidConfig(format!(
                "{:?} is not an ephemeral mode",
                mode
            )));
        }
        let (actual, _) = watch::channel(None);
        Ok(Self {
            client,
            path: path.to_string(),
            mode,
            data: Arc::new(data),
            actual,
            task: None,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of the node as created; differs from `path` for sequential modes
    pub fn actual_path(&self) -> Option<String> {
        self.actual.borrow().clone()
    }

    /// Begin creating and guarding the node; must run inside a tokio runtime
    pub fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Err(Error::AlreadyStarted);
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::InvalidConfig(
                "ephemeral node requires a tokio runtime".into(),
            ));
        }
        let keeper = Keeper {
            client: self.client.clone(),
            path: self.path.clone(),
            mode: self.mode,
            data: self.data.clone(),
            actual: self.actual.clone(),
        };
        self.task = Some(tokio::spawn(keeper.run()));
        Ok(())
    }

    /// Wait until the node has been created once
    pub async fn wait_for_initial_create(&self, timeout: Duration) -> bool {
        let mut rx = self.actual.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|actual| actual.is_some()))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Stop guarding the node and delete it
    pub fn close(mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let Some(actual) = self.actual.send_replace(None) else {
            return Ok(());
        };
        match self.client.delete(&actual) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for PersistentEphemeralNode {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Keeper {
    client: CoordinationClient,
    path: String,
    mode: CreateMode,
    data: Arc<Vec<u8>>,
    actual: watch::Sender<Option<String>>,
}

impl Keeper {
    /// Make sure the node exists and arm a watch on it
    fn ensure(&self, watcher: &Watcher) -> Result<()> {
        if let Some(actual) = self.actual.borrow().clone() {
            if let Some(stat) = self.client.exists_watched(&actual, watcher)? {
                if stat.ephemeral_owner == Some(self.client.session_id()) {
                    return Ok(());
                }
                // Left over from a previous session that has not expired yet.
                match self.client.delete_versioned(&actual, stat.version) {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }

        self.client.ensure_path_excluding(&self.path, true)?;
        let created = match self
            .client
            .create_with_mode_and_data(&self.path, self.mode, &self.data)
        {
            Ok(created) => created,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let stat = self.client.exists(&self.path)?.ok_or(Error::NotFound {
                    op: OpKind::EphemeralNode,
                    path: self.path.clone(),
                })?;
                if stat.ephemeral_owner != Some(self.client.session_id()) {
                    self.client.delete_versioned(&self.path, stat.version)?;
                    self.client
                        .create_with_mode_and_data(&self.path, self.mode, &self.data)?
                } else {
                    self.path.clone()
                }
            }
            Err(e) => return Err(e),
        };
        tracing::info!("ephemeral node {} created", created);
        self.client.exists_watched(&created, watcher)?;
        self.actual.send_replace(Some(created));
        Ok(())
    }

    async fn run(self) {
        let keeper = Arc::new(self);
        let (watcher, mut events) = Watcher::channel();
        let mut sessions = keeper.client.subscribe_session();
        let mut sessions_open = true;
        let retry = keeper.client.config().node_retry();
        let mut pending = true;
        let mut retry_at: Option<Instant> = None;

        loop {
            if pending {
                pending = false;
                let worker = keeper.clone();
                let w = watcher.clone();
                match tokio::task::spawn_blocking(move || worker.ensure(&w)).await {
                    Ok(Ok(())) => retry_at = None,
                    Ok(Err(e)) => {
                        tracing::warn!("could not ensure ephemeral node {}: {}", keeper.path, e);
                        retry_at = Some(Instant::now() + jittered(retry));
                    }
                    Err(e) => {
                        tracing::error!("ephemeral node task for {} panicked: {}", keeper.path, e);
                        retry_at = Some(Instant::now() + jittered(retry));
                    }
                }
            }

            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if event.kind == EventType::NodeDeleted {
                        tracing::info!("ephemeral node {} deleted, recreating", event.path);
                    }
                    // Any event consumes the watch, so re-check and re-arm.
                    pending = true;
                }
                state = sessions.recv(), if sessions_open => match state {
                    Ok(SessionState::Reconnected) => pending = true,
                    Ok(SessionState::Expired) => {
                        keeper.actual.send_replace(None);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => pending = true,
                    Err(broadcast::error::RecvError::Closed) => sessions_open = false,
                },
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    retry_at = None;
                    pending = true;
                }
            }
        }
    }
}
