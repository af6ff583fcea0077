//! Configuration for minicoord components

use crate::common::{paths, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, looked up relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "minicoord.toml";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordination client settings
    pub client: ClientConfig,
}

/// Coordination client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Cluster identity; `None` disables identity gating entirely
    #[serde(default)]
    pub cluster_id: Option<String>,

    /// Retry period after a failed identity existence check
    #[serde(default = "default_identity_retry")]
    pub identity_retry_ms: u64,

    /// Retry period after a failed cache refresh cycle
    #[serde(default = "default_cache_retry")]
    pub cache_retry_ms: u64,

    /// Retry period after a failed attempt to (re)create an ephemeral node
    #[serde(default = "default_node_retry")]
    pub node_retry_ms: u64,

    /// Directory holding children cache snapshots
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
}

fn default_identity_retry() -> u64 {
    1_000
}
fn default_cache_retry() -> u64 {
    1_000
}
fn default_node_retry() -> u64 {
    1_000
}
fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("./cache-snapshots")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cluster_id: None,
            identity_retry_ms: default_identity_retry(),
            cache_retry_ms: default_cache_retry(),
            node_retry_ms: default_node_retry(),
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

impl ClientConfig {
    /// Config gated on the given cluster identity
    pub fn with_cluster_id(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: Some(cluster_id.into()),
            ..Default::default()
        }
    }

    pub fn identity_retry(&self) -> Duration {
        Duration::from_millis(self.identity_retry_ms)
    }

    pub fn cache_retry(&self) -> Duration {
        Duration::from_millis(self.cache_retry_ms)
    }

    pub fn node_retry(&self) -> Duration {
        Duration::from_millis(self.node_retry_ms)
    }

    /// Snapshot file for a watched subtree, derived from its path
    pub fn snapshot_file(&self, watched_path: &str) -> PathBuf {
        let name = watched_path.trim_start_matches('/').replace('/', "_");
        let name = if name.is_empty() { "root".to_string() } else { name };
        self.snapshot_dir.join(format!("{}.snapshot", name))
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(id) = &self.cluster_id {
            if id.is_empty() || id.contains('/') {
                return Err(Error::InvalidConfig(format!("invalid cluster id: {:?}", id)));
            }
            paths::validate(&paths::config_id(id))?;
        }
        if self.identity_retry_ms == 0 || self.cache_retry_ms == 0 || self.node_retry_ms == 0 {
            return Err(Error::InvalidConfig("retry intervals must be non-zero".into()));
        }
        Ok(())
    }
}

impl Config {
    /// Load from `minicoord.toml` (if present) and `MINICOORD__*` environment variables
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()).required(false))
            .add_source(::config::Environment::with_prefix("MINICOORD").separator("__"))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.client.validate()?;
        Ok(config)
    }
}
