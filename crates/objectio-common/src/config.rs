//! Configuration types for ObjectIO
//!
//! This module defines configuration structures for the metadata service.
//! Every section deserializes with defaults so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the metadata service
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node configuration
    pub node: NodeConfig,
    /// Apply-path batching configuration
    pub double_buffer: DoubleBufferConfig,
    /// Pipeline placement configuration
    pub placement: PlacementConfig,
    /// Logging configuration
    pub log: LogConfig,
}

/// Node identity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name (human-readable identifier)
    pub name: String,
    /// Data directory for metadata and state
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "objectio-meta".to_string(),
            data_dir: PathBuf::from("/var/lib/objectio/meta"),
        }
    }
}

impl NodeConfig {
    /// Path of the metadata database file
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("meta.redb")
    }
}

/// Double buffer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DoubleBufferConfig {
    /// Flush as soon as this many responses are pending
    pub flush_batch_size: usize,
    /// Flush at least this often (milliseconds)
    pub flush_interval_ms: u64,
    /// Block the apply driver once this many responses are pending
    pub max_pending: usize,
    /// Commit attempts before the node is marked failed
    pub max_retries: u32,
    /// First retry delay (milliseconds), doubled on each attempt
    pub retry_backoff_ms: u64,
}

impl Default for DoubleBufferConfig {
    fn default() -> Self {
        Self {
            flush_batch_size: 1000,
            flush_interval_ms: 10,
            max_pending: 10_000,
            max_retries: 5,
            retry_backoff_ms: 50,
        }
    }
}

impl DoubleBufferConfig {
    /// Flush interval as a duration
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Initial retry backoff as a duration
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Statically-known pipeline choose policies
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoosePolicyKind {
    /// Pick a random open pipeline
    #[default]
    Random,
    /// Cycle through open pipelines in order
    RoundRobin,
}

/// Pipeline placement configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Maximum number of live pipelines a node may belong to
    pub pipeline_limit_per_node: usize,
    /// Policy used to choose among open pipelines
    pub choose_policy: ChoosePolicyKind,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            pipeline_limit_per_node: 2,
            choose_policy: ChoosePolicyKind::Random,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.node.name, "objectio-meta");
        assert_eq!(config.double_buffer.flush_interval(), Duration::from_millis(10));
        assert!(config.double_buffer.max_pending >= config.double_buffer.flush_batch_size);
        assert_eq!(config.placement.choose_policy, ChoosePolicyKind::Random);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"placement": {"choose_policy": "round_robin"}}"#).unwrap();
        assert_eq!(config.placement.choose_policy, ChoosePolicyKind::RoundRobin);
        assert_eq!(config.placement.pipeline_limit_per_node, 2);
        assert_eq!(config.double_buffer.max_retries, 5);
    }
}
