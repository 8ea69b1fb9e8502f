//! Pipeline provider: chooses node sets for new replication pipelines.
//!
//! A node may belong to at most `pipeline_limit_per_node` live (allocated or
//! open) pipelines. When choosing among eligible nodes, unused nodes come
//! first, then nodes whose only pipelines are closed, then members of live
//! pipelines. A newly allocated pipeline never repeats the exact node set of
//! a live pipeline with the same factor.

use crate::pipeline::{Pipeline, PipelineFilter, PipelineState};
use crate::topology::ClusterTopology;
use objectio_common::{Error, NodeId, PipelineId, ReplicationFactor, Result};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Preference tier of a candidate node; lower is better
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Unused,
    OnlyClosed,
    Live,
}

#[derive(Default)]
struct Usage {
    live: usize,
    closed: usize,
}

pub struct PipelineProvider {
    topology: RwLock<ClusterTopology>,
    pipelines: RwLock<Vec<Pipeline>>,
    pipeline_limit_per_node: usize,
}

impl PipelineProvider {
    #[must_use]
    pub fn new(topology: ClusterTopology, pipeline_limit_per_node: usize) -> Self {
        Self {
            topology: RwLock::new(topology),
            pipelines: RwLock::new(Vec::new()),
            pipeline_limit_per_node,
        }
    }

    /// Replace the cluster topology
    pub fn update_topology(&self, topology: ClusterTopology) {
        *self.topology.write() = topology;
    }

    /// Run `f` against the current topology
    pub fn with_topology<R>(&self, f: impl FnOnce(&mut ClusterTopology) -> R) -> R {
        f(&mut self.topology.write())
    }

    /// Choose nodes for a new pipeline and register it as allocated.
    pub fn allocate(&self, replication: ReplicationFactor, excluded: &[NodeId]) -> Result<Pipeline> {
        let required = replication.count();
        let mut pipelines = self.pipelines.write();
        let usage = Self::usage(&pipelines);

        let mut candidates: Vec<(Tier, NodeId)> = {
            let topology = self.topology.read();
            topology
                .active_nodes()
                .filter(|n| !excluded.contains(&n.id))
                .filter_map(|n| {
                    let u = usage.get(&n.id);
                    let live = u.map_or(0, |u| u.live);
                    if live >= self.pipeline_limit_per_node {
                        return None;
                    }
                    let tier = match u {
                        None => Tier::Unused,
                        Some(u) if u.live == 0 && u.closed > 0 => Tier::OnlyClosed,
                        Some(u) if u.live == 0 => Tier::Unused,
                        Some(_) => Tier::Live,
                    };
                    Some((tier, n.id))
                })
                .collect()
        };

        if candidates.len() < required {
            return Err(Error::InsufficientNodes {
                available: candidates.len(),
                required,
            });
        }

        // Random within a tier so load spreads across equivalent nodes.
        candidates.shuffle(&mut rand::thread_rng());
        candidates.sort_by_key(|(tier, _)| *tier);
        let ranked: Vec<NodeId> = candidates.into_iter().map(|(_, id)| id).collect();

        let taken: BTreeSet<BTreeSet<NodeId>> = pipelines
            .iter()
            .filter(|p| p.state.is_live() && p.replication == replication)
            .map(Pipeline::node_set)
            .collect();

        let Some(nodes) = first_untaken(&ranked, required, &taken) else {
            return Err(Error::InsufficientNodes {
                available: ranked.len(),
                required,
            });
        };

        let pipeline = Pipeline::new(replication, nodes, PipelineState::Allocated);
        info!(
            "Allocated pipeline {} ({}) on {:?}",
            pipeline.id, replication, pipeline.nodes
        );
        pipelines.push(pipeline.clone());
        Ok(pipeline)
    }

    /// Register an open pipeline on explicitly chosen nodes.
    ///
    /// The per-node limit and node-set uniqueness are not enforced here.
    pub fn create_with_nodes(&self, replication: ReplicationFactor, nodes: Vec<NodeId>) -> Result<Pipeline> {
        if nodes.len() != replication.count() {
            return Err(Error::invalid_argument(format!(
                "replication {replication} needs {} nodes, got {}",
                replication.count(),
                nodes.len()
            )));
        }
        let pipeline = Pipeline::new(replication, nodes, PipelineState::Open);
        debug!("Created pipeline {} on {:?}", pipeline.id, pipeline.nodes);
        self.pipelines.write().push(pipeline.clone());
        Ok(pipeline)
    }

    pub fn open_pipeline(&self, id: PipelineId) -> Result<Pipeline> {
        self.transition(id, PipelineState::Open)
    }

    pub fn close_pipeline(&self, id: PipelineId) -> Result<Pipeline> {
        self.transition(id, PipelineState::Closed)
    }

    pub fn get_pipeline(&self, id: PipelineId) -> Option<Pipeline> {
        self.pipelines.read().iter().find(|p| p.id == id).cloned()
    }

    /// Pipelines matching `filter`, in creation order
    pub fn list_pipelines(&self, filter: PipelineFilter) -> Vec<Pipeline> {
        self.pipelines
            .read()
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect()
    }

    /// Number of live pipelines `node` belongs to
    pub fn live_pipeline_count(&self, node: NodeId) -> usize {
        self.pipelines
            .read()
            .iter()
            .filter(|p| p.state.is_live() && p.contains(node))
            .count()
    }

    fn transition(&self, id: PipelineId, state: PipelineState) -> Result<Pipeline> {
        let mut pipelines = self.pipelines.write();
        let pipeline = pipelines
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::PipelineNotFound(id.to_string()))?;
        if pipeline.state == PipelineState::Closed && state != PipelineState::Closed {
            return Err(Error::invalid_argument(format!("pipeline {id} is closed")));
        }
        pipeline.state = state;
        info!("Pipeline {} is now {}", id, state);
        Ok(pipeline.clone())
    }

    fn usage(pipelines: &[Pipeline]) -> HashMap<NodeId, Usage> {
        let mut usage: HashMap<NodeId, Usage> = HashMap::new();
        for pipeline in pipelines {
            for node in &pipeline.nodes {
                let entry = usage.entry(*node).or_default();
                if pipeline.state.is_live() {
                    entry.live += 1;
                } else {
                    entry.closed += 1;
                }
            }
        }
        usage
    }
}

/// First combination of `required` nodes, in rank order, whose node set is
/// not in `taken`.
fn first_untaken(
    ranked: &[NodeId],
    required: usize,
    taken: &BTreeSet<BTreeSet<NodeId>>,
) -> Option<Vec<NodeId>> {
    let n = ranked.len();
    if required == 0 || required > n {
        return None;
    }
    let mut picks: Vec<usize> = (0..required).collect();
    loop {
        let nodes: Vec<NodeId> = picks.iter().map(|&i| ranked[i]).collect();
        if !taken.contains(&nodes.iter().copied().collect::<BTreeSet<_>>()) {
            return Some(nodes);
        }
        // Advance the rightmost pick that still has room, reset the rest.
        let i = (0..required).rev().find(|&i| picks[i] < n - required + i)?;
        picks[i] += 1;
        for j in i + 1..required {
            picks[j] = picks[j - 1] + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::NodeInfo;
    use objectio_common::NodeStatus;

    fn provider(nodes: usize, limit: usize) -> (PipelineProvider, Vec<NodeId>) {
        let mut topology = ClusterTopology::new();
        let mut ids = Vec::new();
        for i in 0..nodes {
            let node = NodeInfo::new(
                format!("node{i}"),
                format!("127.0.0.1:{}", 9000 + i).parse().unwrap(),
            );
            ids.push(node.id);
            topology.upsert_node(node);
        }
        (PipelineProvider::new(topology, limit), ids)
    }

    fn assert_properties(pipeline: &Pipeline, replication: ReplicationFactor, state: PipelineState) {
        assert_eq!(pipeline.state, state);
        assert_eq!(pipeline.replication, replication);
        assert_eq!(pipeline.nodes.len(), replication.count());
        assert_eq!(pipeline.node_set().len(), replication.count());
    }

    fn allocate_twice(replication: ReplicationFactor) {
        let (provider, _) = provider(10, 1);
        let first = provider.allocate(replication, &[]).unwrap();
        assert_properties(&first, replication, PipelineState::Allocated);
        let second = provider.allocate(replication, &[]).unwrap();
        assert_properties(&second, replication, PipelineState::Allocated);

        // Limit of one pipeline per node: the two must be disjoint.
        assert!(first.node_set().is_disjoint(&second.node_set()));
    }

    #[test]
    fn test_allocate_factor_three() {
        allocate_twice(ReplicationFactor::Three);
    }

    #[test]
    fn test_allocate_factor_one() {
        allocate_twice(ReplicationFactor::One);
    }

    #[test]
    fn test_mixed_factors_do_not_share_nodes() {
        let (provider, _) = provider(10, 1);
        let three = provider.allocate(ReplicationFactor::Three, &[]).unwrap();
        let one = provider.allocate(ReplicationFactor::One, &[]).unwrap();
        assert_ne!(three.node_set(), one.node_set());
        assert!(!three.contains(one.nodes[0]));
    }

    #[test]
    fn test_create_with_nodes_is_open() {
        let (provider, ids) = provider(3, 1);
        let pipeline = provider
            .create_with_nodes(ReplicationFactor::Three, ids.clone())
            .unwrap();
        assert_properties(&pipeline, ReplicationFactor::Three, PipelineState::Open);

        // Explicit node sets may repeat.
        let again = provider
            .create_with_nodes(ReplicationFactor::Three, ids.clone())
            .unwrap();
        assert_eq!(pipeline.node_set(), again.node_set());

        assert!(
            provider
                .create_with_nodes(ReplicationFactor::One, ids)
                .is_err()
        );
    }

    #[test]
    fn test_finds_free_set_beyond_first_ranked_nodes() {
        for _ in 0..50 {
            let (provider, ids) = provider(4, 3);
            let taken = [vec![ids[0], ids[1], ids[2]], vec![ids[0], ids[1], ids[3]]];
            for nodes in &taken {
                provider
                    .create_with_nodes(ReplicationFactor::Three, nodes.clone())
                    .unwrap();
            }

            let pipeline = provider.allocate(ReplicationFactor::Three, &[]).unwrap();
            assert_properties(&pipeline, ReplicationFactor::Three, PipelineState::Allocated);
            let set = pipeline.node_set();
            assert!(taken.iter().all(|t| t.iter().copied().collect::<BTreeSet<_>>() != set));
            assert!(set.contains(&ids[2]) && set.contains(&ids[3]));
        }
    }

    #[test]
    fn test_every_set_taken() {
        let (provider, ids) = provider(3, 3);
        provider
            .create_with_nodes(ReplicationFactor::Three, ids)
            .unwrap();
        assert!(matches!(
            provider.allocate(ReplicationFactor::Three, &[]),
            Err(Error::InsufficientNodes { available: 3, required: 3 })
        ));
    }

    #[test]
    fn test_prefers_closed_members_over_open_members() {
        let (provider, ids) = provider(8, 2);
        let open_members = &ids[0..3];
        for _ in 0..2 {
            provider
                .create_with_nodes(ReplicationFactor::Three, open_members.to_vec())
                .unwrap();
        }
        let closed = provider
            .create_with_nodes(ReplicationFactor::Three, ids[3..6].to_vec())
            .unwrap();
        provider.close_pipeline(closed.id).unwrap();

        // Only two nodes are completely unused.
        let pipeline = provider.allocate(ReplicationFactor::Three, &[]).unwrap();
        assert_properties(&pipeline, ReplicationFactor::Three, PipelineState::Allocated);
        assert!(pipeline.nodes.iter().all(|n| !open_members.contains(n)));
        assert!(pipeline.nodes.iter().any(|n| ids[3..6].contains(n)));
    }

    #[test]
    fn test_excluded_and_inactive_nodes_are_skipped() {
        let (provider, ids) = provider(5, 5);
        provider.with_topology(|t| t.set_status(ids[0], NodeStatus::Down));
        let pipeline = provider
            .allocate(ReplicationFactor::Three, &[ids[1]])
            .unwrap();
        assert_eq!(pipeline.node_set(), ids[2..].iter().copied().collect::<BTreeSet<_>>());
    }

    #[test]
    fn test_insufficient_nodes() {
        let (provider, _) = provider(2, 1);
        let err = provider.allocate(ReplicationFactor::Three, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientNodes { available: 2, required: 3 }
        ));
    }

    #[test]
    fn test_no_duplicate_live_node_set() {
        let (provider, _) = provider(3, 2);
        provider.allocate(ReplicationFactor::Three, &[]).unwrap();
        // Capacity remains on every node but the only possible set is taken.
        assert!(matches!(
            provider.allocate(ReplicationFactor::Three, &[]),
            Err(Error::InsufficientNodes { .. })
        ));
    }

    #[test]
    fn test_lifecycle_and_listing() {
        let (provider, ids) = provider(6, 2);
        let a = provider.allocate(ReplicationFactor::Three, &[]).unwrap();
        let b = provider
            .create_with_nodes(ReplicationFactor::One, vec![ids[0]])
            .unwrap();

        provider.open_pipeline(a.id).unwrap();
        let open = provider.list_pipelines(PipelineFilter {
            state: Some(PipelineState::Open),
            ..PipelineFilter::default()
        });
        assert_eq!(open.len(), 2);

        provider.close_pipeline(b.id).unwrap();
        assert!(provider.open_pipeline(b.id).is_err());
        assert_eq!(provider.live_pipeline_count(ids[0]), usize::from(a.contains(ids[0])));

        let three = provider.list_pipelines(PipelineFilter {
            replication: Some(ReplicationFactor::Three),
            ..PipelineFilter::default()
        });
        assert_eq!(three.len(), 1);
        assert_eq!(three[0].id, a.id);

        assert!(matches!(
            provider.close_pipeline(PipelineId::new()),
            Err(Error::PipelineNotFound(_))
        ));
    }
}
