//! Integration tests for the coordination client

mod common;

use common::{admin, init_tracing};
use minicoord::{
    CallKind, CoordinationClient, CreateMode, Error, ErrorKind, MemEnsemble, OpKind, OpResult,
    Operation, Transaction,
};
use std::sync::Arc;

#[test]
fn test_transaction_is_all_or_nothing() {
    init_tracing();
    let ensemble = MemEnsemble::new();
    let (client, _handle) = admin(&ensemble);
    client.create_and_set_data("/b", b"before").unwrap();

    let err = client
        .transaction([
            Operation::create("/a", b"a".to_vec()),
            Operation::set_data_versioned("/b", b"after".to_vec(), 0),
            Operation::delete("/c"),
        ])
        .unwrap_err();

    match &err {
        Error::Transaction {
            index, op, path, ..
        } => {
            assert_eq!(*index, 2);
            assert_eq!(*op, OpKind::Delete);
            assert_eq!(path, "/c");
        }
        other => panic!("expected transaction failure, got {:?}", other),
    }
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(client.exists("/a").unwrap().is_none());
    let b = client.get_node("/b").unwrap();
    assert_eq!(b.data(), b"before");
    assert_eq!(b.version(), 0);
}

#[test]
fn test_transaction_results_in_order() {
    let ensemble = MemEnsemble::new();
    let (client, _handle) = admin(&ensemble);
    client.create("/jobs").unwrap();

    let txn = Transaction::new()
        .check("/jobs")
        .create("/jobs/etl", b"{}".to_vec())
        .set_data("/jobs", b"1".to_vec());
    let results = client.transaction(txn).unwrap();

    assert_eq!(results.len(), 3);
    assert!(matches!(&results[0], OpResult::Checked { path } if path == "/jobs"));
    assert!(matches!(&results[1], OpResult::Created { path } if path == "/jobs/etl"));
    match &results[2] {
        OpResult::DataSet { stat, .. } => assert_eq!(stat.version, 1),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_transaction_version_conflict() {
    let ensemble = MemEnsemble::new();
    let (client, _handle) = admin(&ensemble);
    client.create("/n").unwrap();
    client.set_data("/n", b"x").unwrap();

    let err = client
        .transaction([
            Operation::check_version("/n", 0),
            Operation::delete("/n"),
        ])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionConflict);
    assert!(matches!(err, Error::Transaction { index: 0, .. }));
    assert!(client.exists("/n").unwrap().is_some());
}

#[test]
fn test_delete_recursive() {
    let ensemble = MemEnsemble::new();
    let (client, _handle) = admin(&ensemble);
    client.ensure_path("/x/a/1").unwrap();
    client.create("/x/b").unwrap();
    client.create("/keep").unwrap();

    assert_eq!(
        client.list_recursive("/x").unwrap(),
        vec!["/x", "/x/a", "/x/b", "/x/a/1"]
    );

    client.delete_recursive("/x").unwrap();
    for path in ["/x", "/x/a", "/x/a/1", "/x/b"] {
        assert!(!ensemble.contains(path), "{} survived", path);
    }
    assert!(ensemble.contains("/keep"));

    // Missing subtree is a no-op.
    client.delete_recursive("/y").unwrap();
}

#[test]
fn test_delete_recursive_is_one_transaction() {
    let ensemble = MemEnsemble::new();
    let session = Arc::new(ensemble.session());
    let client = CoordinationClient::unguarded(session.clone());
    let _handle = client.start().unwrap();
    client.ensure_path("/x/a/1").unwrap();

    let deletes = session.calls(CallKind::Delete);
    client.delete_recursive("/x").unwrap();
    assert_eq!(session.calls(CallKind::Multi), 1);
    assert_eq!(session.calls(CallKind::Delete), deletes);
}

#[test]
fn test_list_recursive_missing_root() {
    let ensemble = MemEnsemble::new();
    let (client, _handle) = admin(&ensemble);
    let err = client.list_recursive("/nope").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_versioned_delete_conflict() {
    let ensemble = MemEnsemble::new();
    let (client, _handle) = admin(&ensemble);
    client.create_and_set_data("/n", b"v0").unwrap();
    client.set_data("/n", b"v1").unwrap();

    let err = client.delete_versioned("/n", 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionConflict);
    assert!(!err.is_retryable());
    let node = client.get_node("/n").unwrap();
    assert_eq!(node.data(), b"v1");
    assert_eq!(node.version(), 1);
}

#[test]
fn test_ensure_path_twice() {
    let ensemble = MemEnsemble::new();
    let (client, _handle) = admin(&ensemble);
    client.ensure_path("/a/b/c").unwrap();
    client.ensure_path("/a/b/c").unwrap();
    assert_eq!(ensemble.paths(), vec!["/", "/a", "/a/b", "/a/b/c"]);
}

#[test]
fn test_connection_loss_is_retryable() {
    let ensemble = MemEnsemble::new();
    let session = Arc::new(ensemble.session());
    let client = CoordinationClient::unguarded(session.clone());
    let _handle = client.start().unwrap();
    client.create("/n").unwrap();

    session.disconnect();
    let err = client.get_data("/n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionLoss);
    assert!(err.is_retryable());

    session.reconnect();
    assert!(client.get_data("/n").is_ok());

    session.expire();
    let err = client.get_data("/n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionExpired);
    assert!(!err.is_retryable());
}

#[test]
fn test_ephemeral_nodes_die_with_session() {
    let ensemble = MemEnsemble::new();
    let (observer, _observer_handle) = admin(&ensemble);
    observer.create("/status").unwrap();

    let client = CoordinationClient::unguarded(Arc::new(ensemble.session()));
    let handle = client.start().unwrap();
    client
        .create_with_mode("/status/h1", CreateMode::Ephemeral)
        .unwrap();
    let stat = observer.exists("/status/h1").unwrap().unwrap();
    assert_eq!(stat.ephemeral_owner, Some(client.session_id()));

    handle.close();
    assert!(observer.exists("/status/h1").unwrap().is_none());
    assert!(matches!(client.get_data("/status"), Err(Error::Closed)));
}
