//! Key commands: create (overwrite allowed), delete and rename.

use super::{ApplyContext, NormalizeContext};
use crate::keys;
use crate::response::{Response, ResponseBody, Status};
use crate::store::MetaStoreResult;
use crate::tables::Table;
use crate::types::{BucketInfo, KeyInfo, Record, VolumeInfo};
use objectio_common::{BlockLocation, NodeId, ReplicationFactor, Result, validate_key_name};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateKey {
    pub volume: String,
    pub bucket: String,
    pub key: String,
    pub data_size: u64,
    pub replication: ReplicationFactor,
    /// Nodes the client could not write to
    pub excluded_nodes: Vec<NodeId>,
    pub locations: Vec<BlockLocation>,
    pub metadata: BTreeMap<String, String>,
    pub creation_time: u64,
}

impl CreateKey {
    #[must_use]
    pub fn new(
        volume: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        data_size: u64,
    ) -> Self {
        Self {
            volume: volume.into(),
            bucket: bucket.into(),
            key: key.into(),
            data_size,
            ..Self::default()
        }
    }

    pub(super) fn normalize(mut self, ctx: &NormalizeContext<'_>) -> Result<Self> {
        if self.creation_time == 0 {
            self.creation_time = ctx.now;
        }
        if self.locations.is_empty() && self.data_size > 0 {
            let location = ctx
                .allocator()?
                .allocate(self.replication, &self.excluded_nodes)?;
            debug!(
                "Placed {}/{}/{} on pipeline {}",
                self.volume, self.bucket, self.key, location.pipeline_id
            );
            self.locations.push(location);
        }
        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteKey {
    pub volume: String,
    pub bucket: String,
    pub key: String,
}

impl DeleteKey {
    #[must_use]
    pub fn new(volume: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameKey {
    pub volume: String,
    pub bucket: String,
    pub from: String,
    pub to: String,
    pub modification_time: u64,
}

impl RenameKey {
    #[must_use]
    pub fn new(
        volume: impl Into<String>,
        bucket: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            volume: volume.into(),
            bucket: bucket.into(),
            from: from.into(),
            to: to.into(),
            modification_time: 0,
        }
    }

    pub(super) fn normalize(mut self, ctx: &NormalizeContext<'_>) -> Self {
        if self.modification_time == 0 {
            self.modification_time = ctx.now;
        }
        self
    }
}

/// Volume and bucket must both exist for any key command.
fn check_parents(ctx: &ApplyContext<'_>, volume: &str, bucket: &str) -> MetaStoreResult<Option<Status>> {
    if !ctx.exists::<VolumeInfo>(&keys::volume_key(volume))? {
        return Ok(Some(Status::VolumeNotFound));
    }
    if !ctx.exists::<BucketInfo>(&keys::bucket_key(volume, bucket))? {
        return Ok(Some(Status::BucketNotFound));
    }
    Ok(None)
}

pub(super) fn create(c: &CreateKey, mut ctx: ApplyContext<'_>) -> MetaStoreResult<Response> {
    let key = keys::object_key(&c.volume, &c.bucket, &c.key);
    ctx.target(Table::Key, &key);

    if ctx.lookup::<KeyInfo>(&key)?.is_replay(ctx.index()) {
        return Ok(ctx.replay());
    }
    if validate_key_name(&c.key).is_err() {
        return Ok(ctx.fail(Status::InvalidKeyName));
    }
    if let Some(status) = check_parents(&ctx, &c.volume, &c.bucket)? {
        return Ok(ctx.fail(status));
    }

    let info = KeyInfo {
        volume: c.volume.clone(),
        bucket: c.bucket.clone(),
        key_name: c.key.clone(),
        data_size: c.data_size,
        creation_time: c.creation_time,
        modification_time: c.creation_time,
        replication: c.replication,
        locations: c.locations.clone(),
        metadata: c.metadata.clone(),
        update_id: ctx.index(),
    };
    ctx.put(&key, &info)?;
    Ok(ctx.finish())
}

pub(super) fn delete(c: &DeleteKey, mut ctx: ApplyContext<'_>) -> MetaStoreResult<Response> {
    let key = keys::object_key(&c.volume, &c.bucket, &c.key);
    ctx.target(Table::Key, &key);

    let existing = ctx.lookup::<KeyInfo>(&key)?;
    if existing.is_replay(ctx.index()) {
        return Ok(ctx.replay());
    }
    if let Some(status) = check_parents(&ctx, &c.volume, &c.bucket)? {
        return Ok(ctx.fail(status));
    }
    if !existing.exists() {
        return Ok(ctx.fail(Status::KeyNotFound));
    }

    ctx.delete(Table::Key, &key);
    Ok(ctx.finish())
}

/// Rename within one bucket: tombstone the source, write the destination.
///
/// Replay is decided on the destination, the last object written. If the
/// destination already reflects this index but the source is still visible
/// with an older index, only the source tombstone is emitted so the two
/// keys converge without recreating the destination.
pub(super) fn rename(c: &RenameKey, mut ctx: ApplyContext<'_>) -> MetaStoreResult<Response> {
    let src_key = keys::object_key(&c.volume, &c.bucket, &c.from);
    let dst_key = keys::object_key(&c.volume, &c.bucket, &c.to);
    ctx.target(Table::Key, &src_key);
    ctx.target(Table::Key, &dst_key);

    let index = ctx.index();
    let source = ctx.lookup::<KeyInfo>(&src_key)?;
    let destination = ctx.lookup::<KeyInfo>(&dst_key)?;

    if destination.is_replay(index) {
        if source.exists() && !source.is_replay(index) {
            debug!("Rename replay at {index}: removing stale source {src_key}");
            ctx.delete(Table::Key, &src_key);
            return Ok(ctx.finish().with_body(ResponseBody::RenameSourceCleanup));
        }
        return Ok(ctx.replay());
    }
    // The source moved past this index; touching it would undo a newer write.
    if source.is_replay(index) {
        return Ok(ctx.replay());
    }

    if validate_key_name(&c.from).is_err() || validate_key_name(&c.to).is_err() {
        return Ok(ctx.fail(Status::InvalidKeyName));
    }
    if let Some(status) = check_parents(&ctx, &c.volume, &c.bucket)? {
        return Ok(ctx.fail(status));
    }
    let Some(mut info) = source.value else {
        return Ok(ctx.fail(Status::KeyNotFound));
    };
    if destination.exists() {
        return Ok(ctx.fail(Status::KeyAlreadyExists));
    }

    info.key_name.clone_from(&c.to);
    info.modification_time = c.modification_time;
    info.update_id = index;
    let bytes = info.encode()?;

    ctx.delete(Table::Key, &src_key);
    ctx.put_bytes(Table::Key, &dst_key, bytes);
    Ok(ctx.finish())
}
