//! Shared fixtures for the integration tests
#![allow(dead_code)]

use minicoord::{ClientConfig, ClientHandle, CoordinationClient, MemEnsemble, MemSession};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Fast timers so retry paths run within a test
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        identity_retry_ms: 20,
        cache_retry_ms: 20,
        node_retry_ms: 20,
        ..ClientConfig::default()
    }
}

/// Started, ungated client on its own session, used to stage remote state
pub fn admin(ensemble: &MemEnsemble) -> (CoordinationClient, ClientHandle) {
    let client = CoordinationClient::unguarded(Arc::new(ensemble.session()));
    let handle = client.start().unwrap();
    (client, handle)
}

/// Client on a fresh session together with the session for fault injection
pub fn client_with(
    ensemble: &MemEnsemble,
    config: ClientConfig,
) -> (Arc<MemSession>, CoordinationClient) {
    let session = Arc::new(ensemble.session());
    let client = CoordinationClient::new(session.clone(), config).unwrap();
    (session, client)
}

/// Poll `condition` until it holds or `WAIT` elapses
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting")
}
