//! Error types for minicoord

use crate::service::ServiceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Which client operation produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Start,
    EnsurePath,
    GetData,
    GetNode,
    Exists,
    Stat,
    GetChildren,
    Create,
    SetData,
    Delete,
    DeleteRecursive,
    ListRecursive,
    Check,
    Transaction,
    EphemeralNode,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OpKind::Start => "start",
            OpKind::EnsurePath => "ensure_path",
            OpKind::GetData => "get_data",
            OpKind::GetNode => "get_node",
            OpKind::Exists => "exists",
            OpKind::Stat => "stat",
            OpKind::GetChildren => "get_children",
            OpKind::Create => "create",
            OpKind::SetData => "set_data",
            OpKind::Delete => "delete",
            OpKind::DeleteRecursive => "delete_recursive",
            OpKind::ListRecursive => "list_recursive",
            OpKind::Check => "check",
            OpKind::Transaction => "transaction",
            OpKind::EphemeralNode => "ephemeral_node",
        };
        f.write_str(name)
    }
}

/// Closed classification of every failure the client can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    NoParent,
    VersionConflict,
    ConnectionLoss,
    SessionExpired,
    IdentityUnconfirmed,
    Unexpected,
}

#[derive(Error, Debug)]
pub enum Error {
    // === Remote tree errors ===
    #[error("{op} {path}: node not found")]
    NotFound { op: OpKind, path: String },

    #[error("{op} {path}: node already exists")]
    AlreadyExists { op: OpKind, path: String },

    #[error("{op} {path}: parent node does not exist")]
    NoParent { op: OpKind, path: String },

    #[error("{op} {path}: version conflict")]
    VersionConflict { op: OpKind, path: String },

    // === Session errors ===
    #[error("{op} {path}: connection lost")]
    ConnectionLoss { op: OpKind, path: String },

    #[error("{op} {path}: session expired")]
    SessionExpired { op: OpKind, path: String },

    // === Gating ===
    #[error("cluster identity {cluster_id} is not confirmed")]
    IdentityUnconfirmed { cluster_id: String },

    #[error("transaction operation {index} ({op} {path}) failed: {source}")]
    Transaction {
        index: usize,
        op: OpKind,
        path: String,
        #[source]
        source: Box<Error>,
    },

    // === Lifecycle ===
    #[error("client has not been started")]
    NotStarted,

    #[error("client is closed")]
    Closed,

    #[error("client already started")]
    AlreadyStarted,

    // === Local errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("{op} {path}: unexpected failure: {reason}")]
    Unexpected {
        op: OpKind,
        path: String,
        reason: String,
    },
}

impl Error {
    /// Collapse a service failure into the client taxonomy.
    pub fn remote(op: OpKind, path: &str, err: ServiceError) -> Self {
        let path = path.to_string();
        match err {
            // A create that finds no node is complaining about the parent.
            ServiceError::NoNode if op == OpKind::Create => Error::NoParent { op, path },
            ServiceError::NoNode => Error::NotFound { op, path },
            ServiceError::NodeExists => Error::AlreadyExists { op, path },
            ServiceError::BadVersion => Error::VersionConflict { op, path },
            ServiceError::ConnectionLoss => Error::ConnectionLoss { op, path },
            ServiceError::SessionExpired => Error::SessionExpired { op, path },
            other => Error::Unexpected {
                op,
                path,
                reason: other.to_string(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::NoParent { .. } => ErrorKind::NoParent,
            Error::VersionConflict { .. } => ErrorKind::VersionConflict,
            Error::ConnectionLoss { .. } => ErrorKind::ConnectionLoss,
            Error::SessionExpired { .. } => ErrorKind::SessionExpired,
            Error::IdentityUnconfirmed { .. } => ErrorKind::IdentityUnconfirmed,
            Error::Transaction { source, .. } => source.kind(),
            _ => ErrorKind::Unexpected,
        }
    }

    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ConnectionLoss
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_normalization() {
        let err = Error::remote(OpKind::GetData, "/a", ServiceError::NoNode);
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = Error::remote(OpKind::Create, "/a/b", ServiceError::NoNode);
        assert_eq!(err.kind(), ErrorKind::NoParent);

        let err = Error::remote(OpKind::Delete, "/a", ServiceError::BadVersion);
        assert_eq!(err.kind(), ErrorKind::VersionConflict);

        let err = Error::remote(OpKind::Delete, "/a", ServiceError::NotEmpty);
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(err.to_string().contains("/a"));
    }

    #[test]
    fn test_retryable() {
        assert!(Error::remote(OpKind::Exists, "/a", ServiceError::ConnectionLoss).is_retryable());
        assert!(!Error::remote(OpKind::Exists, "/a", ServiceError::SessionExpired).is_retryable());
        assert!(!Error::NotStarted.is_retryable());
    }

    #[test]
    fn test_transaction_kind_follows_source() {
        let err = Error::Transaction {
            index: 2,
            op: OpKind::Delete,
            path: "/c".into(),
            source: Box::new(Error::remote(OpKind::Delete, "/c", ServiceError::NoNode)),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("operation 2"));
    }
}
