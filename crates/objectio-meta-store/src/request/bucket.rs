//! Bucket commands.

use super::{ApplyContext, NormalizeContext};
use crate::keys;
use crate::response::{Response, Status};
use crate::store::MetaStoreResult;
use crate::tables::Table;
use crate::types::{BucketInfo, VolumeInfo};
use objectio_common::validate_resource_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateBucket {
    pub volume: String,
    pub bucket: String,
    pub versioning: bool,
    pub metadata: BTreeMap<String, String>,
    pub creation_time: u64,
}

impl CreateBucket {
    #[must_use]
    pub fn new(volume: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    pub(super) fn normalize(mut self, ctx: &NormalizeContext<'_>) -> Self {
        if self.creation_time == 0 {
            self.creation_time = ctx.now;
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteBucket {
    pub volume: String,
    pub bucket: String,
}

impl DeleteBucket {
    #[must_use]
    pub fn new(volume: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            bucket: bucket.into(),
        }
    }
}

pub(super) fn create(c: &CreateBucket, mut ctx: ApplyContext<'_>) -> MetaStoreResult<Response> {
    let key = keys::bucket_key(&c.volume, &c.bucket);
    ctx.target(Table::Bucket, &key);

    let existing = ctx.lookup::<BucketInfo>(&key)?;
    if existing.is_replay(ctx.index()) {
        return Ok(ctx.replay());
    }
    if validate_resource_name(&c.bucket).is_err() {
        return Ok(ctx.fail(Status::InvalidBucketName));
    }
    if !ctx.exists::<VolumeInfo>(&keys::volume_key(&c.volume))? {
        return Ok(ctx.fail(Status::VolumeNotFound));
    }
    if existing.exists() {
        return Ok(ctx.fail(Status::BucketAlreadyExists));
    }

    let info = BucketInfo {
        volume: c.volume.clone(),
        bucket: c.bucket.clone(),
        creation_time: c.creation_time,
        versioning: c.versioning,
        metadata: c.metadata.clone(),
        update_id: ctx.index(),
    };
    ctx.put(&key, &info)?;
    Ok(ctx.finish())
}

pub(super) fn delete(c: &DeleteBucket, mut ctx: ApplyContext<'_>) -> MetaStoreResult<Response> {
    let key = keys::bucket_key(&c.volume, &c.bucket);
    ctx.target(Table::Bucket, &key);

    let existing = ctx.lookup::<BucketInfo>(&key)?;
    if existing.is_replay(ctx.index()) {
        return Ok(ctx.replay());
    }
    if !ctx.exists::<VolumeInfo>(&keys::volume_key(&c.volume))? {
        return Ok(ctx.fail(Status::VolumeNotFound));
    }
    if !existing.exists() {
        return Ok(ctx.fail(Status::BucketNotFound));
    }
    if ctx
        .view()
        .has_rows_with_prefix(Table::Key, &keys::object_prefix(&c.volume, &c.bucket))?
    {
        return Ok(ctx.fail(Status::BucketNotEmpty));
    }

    ctx.delete(Table::Bucket, &key);
    Ok(ctx.finish())
}
