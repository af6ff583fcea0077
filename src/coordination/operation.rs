//! Tree mutations that can be batched into one atomic transaction

use crate::common::OpKind;
use crate::service::{CreateMode, Stat};

/// A single tree mutation
///
/// A `None` version matches whatever version the node currently has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create {
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
    },
    Delete {
        path: String,
        version: Option<i64>,
    },
    SetData {
        path: String,
        data: Vec<u8>,
        version: Option<i64>,
    },
    Check {
        path: String,
        version: Option<i64>,
    },
}

impl Operation {
    /// Create a persistent node
    pub fn create(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self::create_with_mode(path, data, CreateMode::Persistent)
    }

    pub fn create_with_mode(path: impl Into<String>, data: Vec<u8>, mode: CreateMode) -> Self {
        Operation::Create {
            path: path.into(),
            data,
            mode,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Operation::Delete {
            path: path.into(),
            version: None,
        }
    }

    pub fn delete_versioned(path: impl Into<String>, version: i64) -> Self {
        Operation::Delete {
            path: path.into(),
            version: Some(version),
        }
    }

    pub fn set_data(path: impl Into<String>, data: Vec<u8>) -> Self {
        Operation::SetData {
            path: path.into(),
            data,
            version: None,
        }
    }

    pub fn set_data_versioned(path: impl Into<String>, data: Vec<u8>, version: i64) -> Self {
        Operation::SetData {
            path: path.into(),
            data,
            version: Some(version),
        }
    }

    /// Assert the node exists
    pub fn check(path: impl Into<String>) -> Self {
        Operation::Check {
            path: path.into(),
            version: None,
        }
    }

    /// Assert the node exists at exactly `version`
    pub fn check_version(path: impl Into<String>, version: i64) -> Self {
        Operation::Check {
            path: path.into(),
            version: Some(version),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Operation::Create { path, .. }
            | Operation::Delete { path, .. }
            | Operation::SetData { path, .. }
            | Operation::Check { path, .. } => path,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Create { .. } => OpKind::Create,
            Operation::Delete { .. } => OpKind::Delete,
            Operation::SetData { .. } => OpKind::SetData,
            Operation::Check { .. } => OpKind::Check,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create { path, mode, .. } => write!(f, "create({}, {:?})", path, mode),
            Operation::Delete { path, version } => write!(f, "delete({}, {:?})", path, version),
            Operation::SetData { path, version, .. } => {
                write!(f, "set_data({}, {:?})", path, version)
            }
            Operation::Check { path, version } => write!(f, "check({}, {:?})", path, version),
        }
    }
}

/// Per-operation outcome of a committed transaction, in registration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    /// Actual path of the new node
    Created { path: String },
    Deleted { path: String },
    DataSet { path: String, stat: Stat },
    Checked { path: String },
}

impl OpResult {
    pub fn path(&self) -> &str {
        match self {
            OpResult::Created { path }
            | OpResult::Deleted { path }
            | OpResult::DataSet { path, .. }
            | OpResult::Checked { path } => path,
        }
    }
}

/// Operations registered in caller order, committed all-or-nothing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    ops: Vec<Operation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation to the batch
    pub fn register(&mut self, op: Operation) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn create(mut self, path: impl Into<String>, data: Vec<u8>) -> Self {
        self.register(Operation::create(path, data));
        self
    }

    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.register(Operation::delete(path));
        self
    }

    pub fn set_data(mut self, path: impl Into<String>, data: Vec<u8>) -> Self {
        self.register(Operation::set_data(path, data));
        self
    }

    pub fn check(mut self, path: impl Into<String>) -> Self {
        self.register(Operation::check(path));
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl IntoIterator for Transaction {
    type Item = Operation;
    type IntoIter = std::vec::IntoIter<Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

impl FromIterator<Operation> for Transaction {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}
