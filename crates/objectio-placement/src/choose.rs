//! Policies for picking one of several open pipelines.
//!
//! The set of policies is fixed at compile time; configuration names one via
//! [`ChoosePolicyKind`] and it is built once at startup.

use crate::pipeline::Pipeline;
use objectio_common::config::ChoosePolicyKind;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks the pipeline a new block is written to.
pub trait PipelineChoosePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Index into `pipelines`, `None` only when the slice is empty
    fn choose(&self, pipelines: &[Pipeline]) -> Option<usize>;
}

/// Uniformly random choice
#[derive(Debug, Default)]
pub struct RandomPolicy;

impl PipelineChoosePolicy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn choose(&self, pipelines: &[Pipeline]) -> Option<usize> {
        if pipelines.is_empty() {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..pipelines.len()))
    }
}

/// Cycles through the candidates in order
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    next: AtomicUsize,
}

impl PipelineChoosePolicy for RoundRobinPolicy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn choose(&self, pipelines: &[Pipeline]) -> Option<usize> {
        if pipelines.is_empty() {
            return None;
        }
        Some(self.next.fetch_add(1, Ordering::Relaxed) % pipelines.len())
    }
}

/// Every known policy, in registration order
pub const REGISTERED_POLICIES: [ChoosePolicyKind; 2] =
    [ChoosePolicyKind::Random, ChoosePolicyKind::RoundRobin];

/// Construct the policy named by `kind`
#[must_use]
pub fn build_policy(kind: ChoosePolicyKind) -> Arc<dyn PipelineChoosePolicy> {
    match kind {
        ChoosePolicyKind::Random => Arc::new(RandomPolicy),
        ChoosePolicyKind::RoundRobin => Arc::new(RoundRobinPolicy::default()),
    }
}
