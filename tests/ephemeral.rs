//! Integration tests for the self-healing ephemeral node

mod common;

use common::{admin, client_with, eventually, fast_config, init_tracing, WAIT};
use minicoord::service::ServiceError;
use minicoord::{CallKind, ClientConfig, CreateMode, Error, MemEnsemble};
use std::time::Duration;

#[tokio::test]
async fn test_recreated_after_delete() {
    init_tracing();
    let ensemble = MemEnsemble::new();
    let (observer, _observer_handle) = admin(&ensemble);
    let (_session, client) = client_with(&ensemble, fast_config());
    let _handle = client.start().unwrap();

    let mut node = client
        .persistent_ephemeral_node("/status/hosts/h1/up", CreateMode::Ephemeral, b"up".to_vec())
        .unwrap();
    node.start().unwrap();
    assert!(node.wait_for_initial_create(WAIT).await);
    assert_eq!(node.actual_path().as_deref(), Some("/status/hosts/h1/up"));
    assert_eq!(observer.get_data("/status/hosts/h1/up").unwrap(), b"up");

    observer.delete("/status/hosts/h1/up").unwrap();
    assert!(eventually(|| ensemble.contains("/status/hosts/h1/up")).await);
    let stat = observer.exists("/status/hosts/h1/up").unwrap().unwrap();
    assert_eq!(stat.ephemeral_owner, Some(client.session_id()));

    node.close().unwrap();
    assert!(!ensemble.contains("/status/hosts/h1/up"));
}

#[tokio::test]
async fn test_failed_create_retries_on_node_timer() {
    init_tracing();
    let ensemble = MemEnsemble::new();
    let config = ClientConfig {
        identity_retry_ms: 60_000,
        node_retry_ms: 20,
        ..ClientConfig::default()
    };
    let (session, client) = client_with(&ensemble, config);
    let _handle = client.start().unwrap();
    session.fail_next(CallKind::Create, ServiceError::ConnectionLoss);

    let mut node = client
        .persistent_ephemeral_node("/status/hosts/h1/up", CreateMode::Ephemeral, b"up".to_vec())
        .unwrap();
    node.start().unwrap();
    assert!(node.wait_for_initial_create(Duration::from_secs(2)).await);
    assert!(ensemble.contains("/status/hosts/h1/up"));
    assert!(session.calls(CallKind::Create) >= 2);
}

#[tokio::test]
async fn test_recreated_after_session_expiry() {
    init_tracing();
    let ensemble = MemEnsemble::new();
    let (observer, _observer_handle) = admin(&ensemble);
    let (session, client) = client_with(&ensemble, fast_config());
    let _handle = client.start().unwrap();

    let mut node = client
        .persistent_ephemeral_node("/status/masters/m-", CreateMode::EphemeralSequential, Vec::new())
        .unwrap();
    node.start().unwrap();
    assert!(node.wait_for_initial_create(WAIT).await);
    let first = node.actual_path().unwrap();
    assert!(first.starts_with("/status/masters/m-"));

    session.expire();
    assert!(!ensemble.contains(&first));

    session.reconnect();
    assert!(
        eventually(|| node
            .actual_path()
            .map(|path| path != first && ensemble.contains(&path))
            .unwrap_or(false))
        .await
    );
    let second = node.actual_path().unwrap();
    assert_eq!(observer.get_children("/status/masters").unwrap().len(), 1);
    let stat = observer.exists(&second).unwrap().unwrap();
    assert_eq!(stat.ephemeral_owner, Some(client.session_id()));
}

#[tokio::test]
async fn test_rejects_persistent_mode() {
    let ensemble = MemEnsemble::new();
    let (client, _handle) = admin(&ensemble);
    let err = client
        .persistent_ephemeral_node("/status/x", CreateMode::Persistent, Vec::new())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}
