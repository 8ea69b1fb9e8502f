//! Replication pipelines: ordered node groups that hold block replicas.

use objectio_common::{NodeId, PipelineId, ReplicationFactor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle state of a pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    /// Nodes chosen, not yet serving writes
    Allocated,
    /// Accepting writes
    Open,
    /// No new writes; nodes are free for other pipelines
    Closed,
}

impl PipelineState {
    /// Allocated and open pipelines count against the per-node limit
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocated => write!(f, "ALLOCATED"),
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub replication: ReplicationFactor,
    /// Replica order; the first node leads writes
    pub nodes: Vec<NodeId>,
    pub state: PipelineState,
}

impl Pipeline {
    #[must_use]
    pub fn new(replication: ReplicationFactor, nodes: Vec<NodeId>, state: PipelineState) -> Self {
        Self {
            id: PipelineId::new(),
            replication,
            nodes,
            state,
        }
    }

    /// Membership ignoring order
    #[must_use]
    pub fn node_set(&self) -> BTreeSet<NodeId> {
        self.nodes.iter().copied().collect()
    }

    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }
}

/// Filter for [`crate::PipelineProvider::list_pipelines`]
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineFilter {
    pub replication: Option<ReplicationFactor>,
    pub state: Option<PipelineState>,
}

impl PipelineFilter {
    #[must_use]
    pub fn matches(&self, pipeline: &Pipeline) -> bool {
        self.replication.is_none_or(|r| r == pipeline.replication)
            && self.state.is_none_or(|s| s == pipeline.state)
    }
}
