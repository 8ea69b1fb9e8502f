//! ObjectIO Placement - replication pipeline placement
//!
//! Chooses the storage nodes that hold the replicas of new key data. Nodes
//! are grouped into pipelines of one or three nodes; the
//! [`PipelineProvider`] creates pipelines under per-node limits and a
//! [`PipelineChoosePolicy`] picks among the open ones. [`PipelineAllocator`]
//! combines both behind the metadata service's block allocator seam.
//!
//! # Example
//! ```ignore
//! use objectio_placement::{PipelineAllocator, PipelineProvider};
//!
//! let provider = Arc::new(PipelineProvider::new(topology, 2));
//! let allocator = PipelineAllocator::from_config(provider, &config.placement);
//! let location = allocator.allocate(ReplicationFactor::Three, &[])?;
//! ```

pub mod allocator;
pub mod choose;
pub mod pipeline;
pub mod provider;
pub mod topology;

pub use allocator::PipelineAllocator;
pub use choose::{PipelineChoosePolicy, RandomPolicy, RoundRobinPolicy, build_policy};
pub use pipeline::{Pipeline, PipelineFilter, PipelineState};
pub use provider::PipelineProvider;
pub use topology::{ClusterTopology, NodeInfo};
