//! Snapshot of a tree entry at read time

use crate::service::Stat;

/// A node's path, data and metadata, owned by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    path: String,
    data: Vec<u8>,
    stat: Stat,
}

impl Node {
    pub fn new(path: impl Into<String>, data: Vec<u8>, stat: Stat) -> Self {
        Self {
            path: path.into(),
            data,
            stat,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn stat(&self) -> &Stat {
        &self.stat
    }

    pub fn version(&self) -> i64 {
        self.stat.version
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
