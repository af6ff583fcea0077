//! Coordination client and the recipes built on top of it
//!
//! - `client`: gated CRUD, recursive helpers and transactions
//! - `identity`: cluster identity marker verification
//! - `cache`: persistent mirror of a subtree's children
//! - `ephemeral`: self-healing ephemeral node

pub mod cache;
pub mod client;
pub mod codec;
pub mod ephemeral;
pub mod identity;
pub mod node;
pub mod operation;
pub mod snapshot;

pub use cache::{CacheEntry, CacheEvent, Nodes, PersistentPathChildrenCache};
pub use client::{ClientHandle, CoordinationClient};
pub use codec::{BincodeCodec, Codec, JsonCodec};
pub use ephemeral::PersistentEphemeralNode;
pub use identity::{IdentityGuard, IdentityState, IdentityStatus};
pub use node::Node;
pub use operation::{OpResult, Operation, Transaction};
pub use snapshot::SnapshotFile;
