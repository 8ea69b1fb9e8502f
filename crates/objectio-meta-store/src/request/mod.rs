//! Mutation commands and their two-stage handling.
//!
//! A command is first *normalized* on the node that accepts it: timestamps,
//! caller identity, generated ids and block placements are fixed into the
//! payload. The normalized command is what enters the replicated log. Every
//! node then *applies* it at its log index; apply reads only the payload and
//! the cache-over-store view, so every replica derives the same mutations.

mod bucket;
mod key;
mod multipart;
mod volume;

pub use bucket::{CreateBucket, DeleteBucket};
pub use key::{CreateKey, DeleteKey, RenameKey};
pub use multipart::{AbortMultipartUpload, InitiateMultipartUpload};
pub use volume::{CreateVolume, DeleteVolume, SetVolumeOwner};

use crate::response::{Response, Status};
use crate::store::MetaStoreResult;
use crate::tables::Table;
use crate::types::Record;
use crate::view::{Lookup, MetadataView};
use objectio_common::{BlockAllocator, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind tag of a [`Command`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    CreateVolume,
    SetVolumeOwner,
    DeleteVolume,
    CreateBucket,
    DeleteBucket,
    CreateKey,
    DeleteKey,
    RenameKey,
    InitiateMultipartUpload,
    AbortMultipartUpload,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A metadata mutation as carried by the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    CreateVolume(CreateVolume),
    SetVolumeOwner(SetVolumeOwner),
    DeleteVolume(DeleteVolume),
    CreateBucket(CreateBucket),
    DeleteBucket(DeleteBucket),
    CreateKey(CreateKey),
    DeleteKey(DeleteKey),
    RenameKey(RenameKey),
    InitiateMultipartUpload(InitiateMultipartUpload),
    AbortMultipartUpload(AbortMultipartUpload),
}

/// Inputs available only on the node that accepts a command.
pub struct NormalizeContext<'a> {
    /// Authenticated caller
    pub user: String,
    /// Wall clock in milliseconds, sampled once per command
    pub now: u64,
    pub allocator: Option<&'a dyn BlockAllocator>,
}

impl<'a> NormalizeContext<'a> {
    #[must_use]
    pub fn new(user: impl Into<String>, now: u64) -> Self {
        Self {
            user: user.into(),
            now,
            allocator: None,
        }
    }

    #[must_use]
    pub fn with_allocator(mut self, allocator: &'a dyn BlockAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    fn allocator(&self) -> Result<&'a dyn BlockAllocator> {
        self.allocator
            .ok_or_else(|| Error::ServiceUnavailable("no block allocator configured".into()))
    }
}

impl Command {
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::CreateVolume(_) => CommandKind::CreateVolume,
            Self::SetVolumeOwner(_) => CommandKind::SetVolumeOwner,
            Self::DeleteVolume(_) => CommandKind::DeleteVolume,
            Self::CreateBucket(_) => CommandKind::CreateBucket,
            Self::DeleteBucket(_) => CommandKind::DeleteBucket,
            Self::CreateKey(_) => CommandKind::CreateKey,
            Self::DeleteKey(_) => CommandKind::DeleteKey,
            Self::RenameKey(_) => CommandKind::RenameKey,
            Self::InitiateMultipartUpload(_) => CommandKind::InitiateMultipartUpload,
            Self::AbortMultipartUpload(_) => CommandKind::AbortMultipartUpload,
        }
    }

    /// Fix every non-deterministic input into the payload.
    ///
    /// Runs once, before the command is proposed to the log.
    pub fn normalize(self, ctx: &NormalizeContext<'_>) -> Result<Self> {
        Ok(match self {
            Self::CreateVolume(c) => Self::CreateVolume(c.normalize(ctx)),
            Self::SetVolumeOwner(c) => Self::SetVolumeOwner(c.normalize(ctx)),
            Self::CreateBucket(c) => Self::CreateBucket(c.normalize(ctx)),
            Self::CreateKey(c) => Self::CreateKey(c.normalize(ctx)?),
            Self::RenameKey(c) => Self::RenameKey(c.normalize(ctx)),
            Self::InitiateMultipartUpload(c) => Self::InitiateMultipartUpload(c.normalize(ctx)),
            cmd @ (Self::DeleteVolume(_)
            | Self::DeleteBucket(_)
            | Self::DeleteKey(_)
            | Self::AbortMultipartUpload(_)) => cmd,
        })
    }

    /// Validate against the current view and, on success, stage the
    /// mutations in the cache at `index`.
    ///
    /// Errors are store read failures only; domain failures are statuses.
    pub fn apply(&self, index: u64, view: &MetadataView) -> MetaStoreResult<Response> {
        let ctx = ApplyContext::new(view, index, self.kind());
        match self {
            Self::CreateVolume(c) => volume::create(c, ctx),
            Self::SetVolumeOwner(c) => volume::set_owner(c, ctx),
            Self::DeleteVolume(c) => volume::delete(c, ctx),
            Self::CreateBucket(c) => bucket::create(c, ctx),
            Self::DeleteBucket(c) => bucket::delete(c, ctx),
            Self::CreateKey(c) => key::create(c, ctx),
            Self::DeleteKey(c) => key::delete(c, ctx),
            Self::RenameKey(c) => key::rename(c, ctx),
            Self::InitiateMultipartUpload(c) => multipart::initiate(c, ctx),
            Self::AbortMultipartUpload(c) => multipart::abort(c, ctx),
        }
    }
}

/// A command together with the log index it was committed at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedCommand {
    pub index: u64,
    pub command: Command,
}

impl CommittedCommand {
    #[must_use]
    pub const fn new(index: u64, command: Command) -> Self {
        Self { index, command }
    }

    pub fn encode(&self) -> MetaStoreResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> MetaStoreResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Per-command state threaded through a handler.
///
/// Handlers register the keys they write with [`ApplyContext::target`]
/// before validating, and only mutate once every check has passed.
pub(crate) struct ApplyContext<'a> {
    view: &'a MetadataView,
    response: Response,
}

impl<'a> ApplyContext<'a> {
    fn new(view: &'a MetadataView, index: u64, kind: CommandKind) -> Self {
        Self {
            view,
            response: Response::new(index, kind),
        }
    }

    pub(crate) const fn index(&self) -> u64 {
        self.response.index
    }

    pub(crate) const fn view(&self) -> &MetadataView {
        self.view
    }

    /// Declare a key this command may write
    pub(crate) fn target(&mut self, table: Table, key: &str) {
        self.response.track(table, key);
    }

    pub(crate) fn lookup<T: Record>(&self, key: &str) -> MetaStoreResult<Lookup<T>> {
        self.view.lookup(key)
    }

    pub(crate) fn exists<T: Record>(&self, key: &str) -> MetaStoreResult<bool> {
        Ok(self.lookup::<T>(key)?.exists())
    }

    pub(crate) fn put<T: Record>(&mut self, key: &str, record: &T) -> MetaStoreResult<()> {
        let bytes = record.encode()?;
        self.put_bytes(T::TABLE, key, bytes);
        Ok(())
    }

    pub(crate) fn put_bytes(&mut self, table: Table, key: &str, bytes: Vec<u8>) {
        self.view
            .cache()
            .put(table, key, bytes.clone(), self.response.index);
        self.response.put(table, key, bytes);
    }

    pub(crate) fn delete(&mut self, table: Table, key: &str) {
        self.view.cache().tombstone(table, key, self.response.index);
        self.response.delete(table, key);
    }

    pub(crate) fn finish(self) -> Response {
        self.response
    }

    pub(crate) fn replay(mut self) -> Response {
        debug_assert!(self.response.mutations.is_empty());
        self.response.status = Status::Replay;
        self.response
    }

    /// Reject the command. Targets are stamped as observed at this index so
    /// a redelivery is recognised without re-running validation.
    pub(crate) fn fail(self, status: Status) -> Response {
        let cache = self.view.cache();
        for c in &self.response.cleanup {
            cache.observe(c.table, &c.key, c.index);
        }
        self.response.fail(status)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::cache::MetadataCache;
    use crate::store::MetaStore;
    use objectio_common::{BlockLocation, NodeId, PipelineId, ReplicationFactor};
    use std::sync::Arc;
    use tempfile::TempDir;

    pub(crate) fn view() -> (TempDir, MetadataView) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        (dir, MetadataView::new(store, Arc::new(MetadataCache::new())))
    }

    pub(crate) struct FixedAllocator;

    impl BlockAllocator for FixedAllocator {
        fn allocate(&self, replication: ReplicationFactor, _: &[NodeId]) -> Result<BlockLocation> {
            Ok(BlockLocation {
                pipeline_id: PipelineId::new(),
                nodes: (0..replication.count()).map(|_| NodeId::new()).collect(),
            })
        }
    }

    pub(crate) fn ctx() -> NormalizeContext<'static> {
        NormalizeContext::new("alice", 1_000).with_allocator(&FixedAllocator)
    }

    /// Apply a sequence of commands starting at index 1
    pub(crate) fn apply_all(view: &MetadataView, commands: Vec<Command>) -> Vec<Response> {
        commands
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let c = c.normalize(&ctx()).unwrap();
                c.apply(i as u64 + 1, view).unwrap()
            })
            .collect()
    }

    pub(crate) fn create_volume(name: &str) -> Command {
        Command::CreateVolume(CreateVolume::new(name))
    }

    pub(crate) fn create_bucket(volume: &str, bucket: &str) -> Command {
        Command::CreateBucket(CreateBucket::new(volume, bucket))
    }

    pub(crate) fn create_key(volume: &str, bucket: &str, key: &str) -> Command {
        Command::CreateKey(CreateKey::new(volume, bucket, key, 64))
    }
}
