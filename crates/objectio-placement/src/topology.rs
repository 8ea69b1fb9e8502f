//! Cluster topology representation

use objectio_common::{NodeId, NodeStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Storage nodes known to the placement service
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClusterTopology {
    /// Version number (incremented on changes)
    pub version: u64,
    /// All nodes by id
    pub nodes: HashMap<NodeId, NodeInfo>,
}

impl ClusterTopology {
    /// Create a new empty topology
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all nodes in the cluster
    pub fn all_nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    /// Get a specific node by ID
    pub fn get_node(&self, node_id: NodeId) -> Option<&NodeInfo> {
        self.nodes.get(&node_id)
    }

    /// Get all active nodes
    pub fn active_nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.all_nodes().filter(|n| n.status == NodeStatus::Active)
    }

    /// Add or update a node
    pub fn upsert_node(&mut self, node: NodeInfo) {
        self.nodes.insert(node.id, node);
        self.version += 1;
    }

    /// Change the status of a node. Returns false if the node is unknown.
    pub fn set_status(&mut self, node_id: NodeId, status: NodeStatus) -> bool {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return false;
        };
        node.status = status;
        self.version += 1;
        true
    }

    /// Remove a node
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<NodeInfo> {
        let removed = self.nodes.remove(&node_id);
        if removed.is_some() {
            self.version += 1;
        }
        removed
    }
}

/// Node information
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node unique identifier
    pub id: NodeId,
    /// Human-readable name
    pub name: String,
    /// Data endpoint address
    pub address: SocketAddr,
    /// Node status
    pub status: NodeStatus,
}

impl NodeInfo {
    /// New active node with a random id
    #[must_use]
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            address,
            status: NodeStatus::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_add_node() {
        let mut topology = ClusterTopology::new();
        let node = NodeInfo::new("node1", "127.0.0.1:9001".parse().unwrap());

        topology.upsert_node(node.clone());

        assert_eq!(topology.version, 1);
        assert!(topology.get_node(node.id).is_some());
        assert_eq!(topology.active_nodes().count(), 1);
    }

    #[test]
    fn test_status_and_removal() {
        let mut topology = ClusterTopology::new();
        let node = NodeInfo::new("node1", "127.0.0.1:9001".parse().unwrap());
        topology.upsert_node(node.clone());

        assert!(topology.set_status(node.id, NodeStatus::Down));
        assert_eq!(topology.active_nodes().count(), 0);
        assert!(!topology.set_status(NodeId::new(), NodeStatus::Down));

        assert!(topology.remove_node(node.id).is_some());
        assert!(topology.remove_node(node.id).is_none());
        assert_eq!(topology.version, 3);
    }
}
