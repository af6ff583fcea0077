//! # minicoord
//!
//! Client library for a hierarchical coordination service with:
//! - Cluster identity gating: no call reaches the service until the
//!   `/config/id/<cluster-id>` marker has been observed
//! - Atomic multi-operation transactions
//! - Recursive path creation, listing and deletion
//! - A persistent, typed cache of a subtree's children that survives
//!   restarts and outages
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ PersistentPathChildrenCache / EphemeralNode  │
//! │   (background refresh on tokio tasks)        │
//! └───────────────┬──────────────────────────────┘
//!                 │
//! ┌───────────────▼──────────────────────────────┐
//! │ CoordinationClient                           │
//! │   IdentityGuard ── gates every call          │
//! └───────────────┬──────────────────────────────┘
//!                 │ CoordinationService
//! ┌───────────────▼──────────────────────────────┐
//! │ session against the remote tree              │
//! │   (MemEnsemble for tests and embedding)      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use minicoord::{ClientConfig, CoordinationClient, MemEnsemble, Operation};
//! use std::sync::Arc;
//!
//! # fn main() -> minicoord::Result<()> {
//! let ensemble = MemEnsemble::new();
//! let client = CoordinationClient::unguarded(Arc::new(ensemble.session()));
//! let _handle = client.start()?;
//!
//! client.ensure_path("/config/jobs")?;
//! client.transaction([
//!     Operation::create("/config/jobs/etl", b"{}".to_vec()),
//!     Operation::check("/config/jobs"),
//! ])?;
//! # let _ = ClientConfig::default();
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod coordination;
pub mod service;

// Re-export commonly used types
pub use common::{paths, ClientConfig, Config, Error, ErrorKind, OpKind, Result};
pub use coordination::{
    BincodeCodec, CacheEntry, CacheEvent, ClientHandle, Codec, CoordinationClient, IdentityState,
    IdentityStatus, JsonCodec, Node, OpResult, Operation, PersistentEphemeralNode,
    PersistentPathChildrenCache, SnapshotFile, Transaction,
};
pub use service::{
    CallKind, CoordinationService, CreateMode, MemEnsemble, MemSession, SessionState, Stat,
};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
