//! Cluster identity gating
//!
//! A client built with a cluster id refuses every operation until the
//! marker node `/config/id/<cluster-id>` has been observed. The marker is
//! re-checked on start, whenever its watch fires, and on every
//! `RECONNECTED` transition. A failed check lands in
//! [`IdentityState::Unknown`], which gates like `Unconfirmed` but is
//! retried on a short timer instead of waiting for the next reconnect.

use crate::common::{jittered, paths, Error, Result};
use crate::service::{CoordinationService, SessionState, WatchedEvent, Watcher};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IdentityState {
    /// No cluster id configured; every call is permitted
    Disabled = 0,
    /// The last check failed; the marker may or may not exist
    Unknown = 1,
    /// The marker is known to be absent
    Unconfirmed = 2,
    Confirmed = 3,
}

impl IdentityState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => IdentityState::Disabled,
            2 => IdentityState::Unconfirmed,
            3 => IdentityState::Confirmed,
            _ => IdentityState::Unknown,
        }
    }

    /// May gated operations proceed?
    pub fn permits(&self) -> bool {
        matches!(self, IdentityState::Disabled | IdentityState::Confirmed)
    }
}

impl std::fmt::Display for IdentityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityState::Disabled => write!(f, "disabled"),
            IdentityState::Unknown => write!(f, "unknown"),
            IdentityState::Unconfirmed => write!(f, "unconfirmed"),
            IdentityState::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// Published after every verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityStatus {
    pub state: IdentityState,
    /// Existence checks issued so far
    pub checks: u64,
}

pub struct IdentityGuard {
    cluster_id: Option<String>,
    marker: Option<String>,
    state: AtomicU8,
    checks: AtomicU64,
    /// Consecutive failed checks
    failures: AtomicU64,
    status: watch::Sender<IdentityStatus>,
    watcher: Watcher,
    events: Mutex<Option<mpsc::UnboundedReceiver<WatchedEvent>>>,
    retry: Duration,
}

impl IdentityGuard {
    pub fn new(cluster_id: Option<String>, retry: Duration) -> Self {
        let initial = if cluster_id.is_some() {
            IdentityState::Unconfirmed
        } else {
            IdentityState::Disabled
        };
        let marker = cluster_id.as_deref().map(paths::config_id);
        let (watcher, events) = Watcher::channel();
        let (status, _) = watch::channel(IdentityStatus {
            state: initial,
            checks: 0,
        });
        Self {
            cluster_id,
            marker,
            state: AtomicU8::new(initial as u8),
            checks: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            status,
            watcher,
            events: Mutex::new(Some(events)),
            retry,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cluster_id.is_some()
    }

    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id.as_deref()
    }

    pub fn marker_path(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    pub fn state(&self) -> IdentityState {
        IdentityState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> watch::Receiver<IdentityStatus> {
        self.status.subscribe()
    }

    /// Fail unless gated operations are currently permitted
    pub fn ensure_confirmed(&self) -> Result<()> {
        if self.state().permits() {
            return Ok(());
        }
        Err(Error::IdentityUnconfirmed {
            cluster_id: self.cluster_id.clone().unwrap_or_default(),
        })
    }

    fn set_state(&self, state: IdentityState) {
        let previous = IdentityState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            tracing::info!(
                "cluster identity {}: {} -> {}",
                self.cluster_id.as_deref().unwrap_or("-"),
                previous,
                state
            );
        }
        self.status.send_replace(IdentityStatus {
            state,
            checks: self.checks(),
        });
    }

    /// Issue a watched existence check on the marker and record the outcome
    pub fn verify(&self, service: &dyn CoordinationService) -> IdentityState {
        let Some(marker) = self.marker.as_deref() else {
            return IdentityState::Disabled;
        };
        self.checks.fetch_add(1, Ordering::AcqRel);
        let state = match service.exists(marker, Some(&self.watcher)) {
            Ok(found) => {
                self.failures.store(0, Ordering::Release);
                if found.is_some() {
                    IdentityState::Confirmed
                } else {
                    IdentityState::Unconfirmed
                }
            }
            Err(e) => {
                if self.failures.fetch_add(1, Ordering::AcqRel) == 0 {
                    tracing::error!("error checking cluster identity marker {}: {}", marker, e);
                } else {
                    tracing::debug!("cluster identity marker {} still unreadable: {}", marker, e);
                }
                IdentityState::Unknown
            }
        };
        self.set_state(state);
        state
    }

    /// Forget the outcome of the last check
    pub fn invalidate(&self) {
        if self.is_enabled() {
            self.set_state(IdentityState::Unknown);
        }
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<WatchedEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl std::fmt::Debug for IdentityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityGuard")
            .field("cluster_id", &self.cluster_id)
            .field("state", &self.state())
            .field("checks", &self.checks())
            .finish()
    }
}

async fn verify_blocking(guard: &Arc<IdentityGuard>, service: &Arc<dyn CoordinationService>) {
    let guard = guard.clone();
    let service = service.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || guard.verify(service.as_ref())).await {
        tracing::error!("cluster identity check panicked: {}", e);
    }
}

/// Drive re-verification from marker watches and session transitions
///
/// Returns `None` when the guard is disabled or already running.
pub(crate) fn spawn_guard(
    guard: Arc<IdentityGuard>,
    service: Arc<dyn CoordinationService>,
    mut sessions: broadcast::Receiver<SessionState>,
) -> Option<JoinHandle<()>> {
    if !guard.is_enabled() {
        return None;
    }
    let mut events = guard.take_events()?;

    Some(tokio::spawn(async move {
        let mut sessions_open = true;
        loop {
            // An expired session cannot answer; Reconnected re-verifies.
            let retry = guard.state() == IdentityState::Unknown
                && service.state() != SessionState::Expired;
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    tracing::debug!("identity marker event {:?} on {}", event.kind, event.path);
                    verify_blocking(&guard, &service).await;
                }
                state = sessions.recv(), if sessions_open => match state {
                    Ok(SessionState::Reconnected) => verify_blocking(&guard, &service).await,
                    Ok(SessionState::Expired) => guard.invalidate(),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("missed {} session transitions, re-checking identity", missed);
                        verify_blocking(&guard, &service).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => sessions_open = false,
                },
                _ = tokio::time::sleep(jittered(guard.retry)), if retry => {
                    verify_blocking(&guard, &service).await;
                }
            }
        }
    }))
}
