//! ObjectIO Metadata Store - write-apply path of the metadata service
//!
//! Committed commands arrive from the replicated log in index order. The
//! [`ApplyDriver`] validates each one against the table cache overlaid on
//! the redb store, stages its mutations in the cache and hands the response
//! to the [`DoubleBuffer`], which commits batches atomically and reports the
//! last durable index back to the log.

pub mod cache;
pub mod double_buffer;
pub mod driver;
pub mod keys;
pub mod request;
pub mod response;
pub mod store;
pub mod tables;
pub mod types;
pub mod view;

// Re-exports
pub use cache::{MetadataCache, TableCache};
pub use double_buffer::{Checkpoint, DoubleBuffer, DoubleBufferError, FlushStats, Health};
pub use driver::{ApplyDriver, ApplyError};
pub use request::{Command, CommandKind, CommittedCommand, NormalizeContext};
pub use response::{ApplyOutcome, CacheCleanup, Mutation, Response, ResponseBody, Status};
pub use store::{BatchWriter, MetaStore, MetaStoreError, MetaStoreResult};
pub use tables::Table;
pub use view::{Lookup, MetadataView, ReplayState};
