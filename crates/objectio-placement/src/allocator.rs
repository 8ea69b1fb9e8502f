//! Block allocation on top of the pipeline provider.

use crate::choose::{PipelineChoosePolicy, build_policy};
use crate::pipeline::{PipelineFilter, PipelineState};
use crate::provider::PipelineProvider;
use objectio_common::config::PlacementConfig;
use objectio_common::{BlockAllocator, BlockLocation, Error, NodeId, ReplicationFactor, Result};
use std::sync::Arc;
use tracing::debug;

/// Places blocks on an open pipeline, opening a new one when none fits.
pub struct PipelineAllocator {
    provider: Arc<PipelineProvider>,
    policy: Arc<dyn PipelineChoosePolicy>,
}

impl PipelineAllocator {
    #[must_use]
    pub fn new(provider: Arc<PipelineProvider>, policy: Arc<dyn PipelineChoosePolicy>) -> Self {
        Self { provider, policy }
    }

    #[must_use]
    pub fn from_config(provider: Arc<PipelineProvider>, config: &PlacementConfig) -> Self {
        Self::new(provider, build_policy(config.choose_policy))
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<PipelineProvider> {
        &self.provider
    }
}

impl BlockAllocator for PipelineAllocator {
    fn allocate(&self, replication: ReplicationFactor, excluded: &[NodeId]) -> Result<BlockLocation> {
        let open: Vec<_> = self
            .provider
            .list_pipelines(PipelineFilter {
                replication: Some(replication),
                state: Some(PipelineState::Open),
            })
            .into_iter()
            .filter(|p| !p.nodes.iter().any(|n| excluded.contains(n)))
            .collect();

        let pipeline = match self.policy.choose(&open) {
            Some(i) => open
                .into_iter()
                .nth(i)
                .ok_or_else(|| Error::internal(format!("{} chose out of range", self.policy.name())))?,
            None => {
                let allocated = self.provider.allocate(replication, excluded)?;
                self.provider.open_pipeline(allocated.id)?
            }
        };
        debug!(
            "Chose pipeline {} ({} policy)",
            pipeline.id,
            self.policy.name()
        );
        Ok(BlockLocation {
            pipeline_id: pipeline.id,
            nodes: pipeline.nodes,
        })
    }
}
