//! Core type definitions for ObjectIO
//!
//! Identifiers, resource naming rules and replication settings shared by
//! the metadata apply path and the placement service.

use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Check a volume or bucket name (both follow the same naming rules)
pub fn validate_resource_name(name: &str) -> Result<(), ResourceNameError> {
    if name.len() < 3 {
        return Err(ResourceNameError::TooShort);
    }
    if name.len() > 63 {
        return Err(ResourceNameError::TooLong);
    }

    let Some(first) = name.chars().next() else {
        return Err(ResourceNameError::TooShort);
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return Err(ResourceNameError::InvalidStartChar);
    }

    let Some(last) = name.chars().last() else {
        return Err(ResourceNameError::TooShort);
    };
    if !last.is_ascii_lowercase() && !last.is_ascii_digit() {
        return Err(ResourceNameError::InvalidEndChar);
    }

    for c in name.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '.' {
            return Err(ResourceNameError::InvalidChar(c));
        }
    }

    if name.contains("..") {
        return Err(ResourceNameError::ConsecutivePeriods);
    }

    if name.parse::<std::net::Ipv4Addr>().is_ok() {
        return Err(ResourceNameError::LooksLikeIpAddress);
    }

    Ok(())
}

/// Errors that can occur when validating a volume or bucket name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceNameError {
    #[error("name must be at least 3 characters")]
    TooShort,
    #[error("name must be at most 63 characters")]
    TooLong,
    #[error("name must start with a lowercase letter or number")]
    InvalidStartChar,
    #[error("name must end with a lowercase letter or number")]
    InvalidEndChar,
    #[error("name contains invalid character: {0}")]
    InvalidChar(char),
    #[error("name cannot contain consecutive periods")]
    ConsecutivePeriods,
    #[error("name cannot be formatted as an IP address")]
    LooksLikeIpAddress,
}

/// Check a key name (path within a bucket)
pub fn validate_key_name(key: &str) -> Result<(), KeyNameError> {
    // Maximum length: 1024 bytes (UTF-8)
    if key.len() > 1024 {
        return Err(KeyNameError::TooLong);
    }
    if key.is_empty() {
        return Err(KeyNameError::Empty);
    }
    Ok(())
}

/// Errors that can occur when validating a key name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyNameError {
    #[error("key name cannot be empty")]
    Empty,
    #[error("key name cannot exceed 1024 bytes")]
    TooLong,
}

/// Unique identifier for a storage node
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a new random node ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a replication pipeline
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
pub struct PipelineId(Uuid);

impl PipelineId {
    /// Generate a new random pipeline ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PipelineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipelineId({})", self.0)
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Replication factor for key data
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicationFactor {
    /// Single copy (no redundancy)
    One,
    /// Three-way replication
    #[default]
    Three,
}

impl ReplicationFactor {
    /// Number of nodes a pipeline of this factor spans
    #[must_use]
    pub const fn count(self) -> usize {
        match self {
            Self::One => 1,
            Self::Three => 3,
        }
    }
}

impl fmt::Display for ReplicationFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => write!(f, "ONE"),
            Self::Three => write!(f, "THREE"),
        }
    }
}

/// Node status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Node is healthy and accepting requests
    #[default]
    Active,
    /// Node is down or unreachable
    Down,
}

/// Milliseconds since the Unix epoch
#[must_use]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Where the data of a key was placed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    pub pipeline_id: PipelineId,
    pub nodes: Vec<NodeId>,
}

/// Source of block placements for new keys.
///
/// Called only while a command is being prepared for the log, never while
/// it is applied.
pub trait BlockAllocator: Send + Sync {
    /// Pick a pipeline of `replication` nodes avoiding every node in `excluded`.
    fn allocate(
        &self,
        replication: ReplicationFactor,
        excluded: &[NodeId],
    ) -> crate::error::Result<BlockLocation>;
}
