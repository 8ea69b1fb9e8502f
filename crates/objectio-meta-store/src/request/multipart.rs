//! Multipart upload lifecycle: initiate and abort.

use super::{ApplyContext, NormalizeContext};
use crate::keys;
use crate::response::{Response, ResponseBody, Status};
use crate::store::MetaStoreResult;
use crate::tables::Table;
use crate::types::{BucketInfo, KeyInfo, MultipartKeyInfo, OpenKeyInfo, VolumeInfo};
use objectio_common::{ReplicationFactor, validate_key_name};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitiateMultipartUpload {
    pub volume: String,
    pub bucket: String,
    pub key: String,
    pub replication: ReplicationFactor,
    /// Generated at normalize time
    pub upload_id: String,
    pub creation_time: u64,
}

impl InitiateMultipartUpload {
    #[must_use]
    pub fn new(volume: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            bucket: bucket.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    pub(super) fn normalize(mut self, ctx: &NormalizeContext<'_>) -> Self {
        if self.upload_id.is_empty() {
            self.upload_id = Uuid::new_v4().to_string();
        }
        if self.creation_time == 0 {
            self.creation_time = ctx.now;
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortMultipartUpload {
    pub volume: String,
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

impl AbortMultipartUpload {
    #[must_use]
    pub fn new(
        volume: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> Self {
        Self {
            volume: volume.into(),
            bucket: bucket.into(),
            key: key.into(),
            upload_id: upload_id.into(),
        }
    }
}

pub(super) fn initiate(
    c: &InitiateMultipartUpload,
    mut ctx: ApplyContext<'_>,
) -> MetaStoreResult<Response> {
    let key = keys::multipart_key(&c.volume, &c.bucket, &c.key, &c.upload_id);
    ctx.target(Table::OpenKey, &key);
    ctx.target(Table::MultipartInfo, &key);

    let body = ResponseBody::MultipartUpload {
        upload_id: c.upload_id.clone(),
    };
    let index = ctx.index();
    let existing = ctx.lookup::<MultipartKeyInfo>(&key)?;
    // Both rows are written together; a replay must find both.
    if existing.is_replay(index) && ctx.lookup::<OpenKeyInfo>(&key)?.is_replay(index) {
        return Ok(ctx.replay().with_body(body));
    }
    if validate_key_name(&c.key).is_err() {
        return Ok(ctx.fail(Status::InvalidKeyName));
    }
    if !ctx.exists::<VolumeInfo>(&keys::volume_key(&c.volume))? {
        return Ok(ctx.fail(Status::VolumeNotFound));
    }
    if !ctx.exists::<BucketInfo>(&keys::bucket_key(&c.volume, &c.bucket))? {
        return Ok(ctx.fail(Status::BucketNotFound));
    }
    if existing.exists() {
        return Ok(ctx.fail(Status::KeyAlreadyExists));
    }

    let open_key = OpenKeyInfo(KeyInfo {
        volume: c.volume.clone(),
        bucket: c.bucket.clone(),
        key_name: c.key.clone(),
        data_size: 0,
        creation_time: c.creation_time,
        modification_time: c.creation_time,
        replication: c.replication,
        locations: Vec::new(),
        metadata: BTreeMap::new(),
        update_id: index,
    });
    let multipart = MultipartKeyInfo {
        upload_id: c.upload_id.clone(),
        creation_time: c.creation_time,
        replication: c.replication,
        update_id: index,
    };
    ctx.put(&key, &open_key)?;
    ctx.put(&key, &multipart)?;
    Ok(ctx.finish().with_body(body))
}

pub(super) fn abort(c: &AbortMultipartUpload, mut ctx: ApplyContext<'_>) -> MetaStoreResult<Response> {
    let key = keys::multipart_key(&c.volume, &c.bucket, &c.key, &c.upload_id);
    ctx.target(Table::OpenKey, &key);
    ctx.target(Table::MultipartInfo, &key);

    let index = ctx.index();
    let existing = ctx.lookup::<MultipartKeyInfo>(&key)?;
    if existing.is_replay(index) && ctx.lookup::<OpenKeyInfo>(&key)?.is_replay(index) {
        return Ok(ctx.replay());
    }
    if !ctx.exists::<VolumeInfo>(&keys::volume_key(&c.volume))? {
        return Ok(ctx.fail(Status::VolumeNotFound));
    }
    if !ctx.exists::<BucketInfo>(&keys::bucket_key(&c.volume, &c.bucket))? {
        return Ok(ctx.fail(Status::BucketNotFound));
    }
    if !existing.exists() {
        return Ok(ctx.fail(Status::NoSuchMultipartUpload));
    }

    ctx.delete(Table::OpenKey, &key);
    ctx.delete(Table::MultipartInfo, &key);
    Ok(ctx.finish())
}
