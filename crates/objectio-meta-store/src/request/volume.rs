//! Volume commands.

use super::{ApplyContext, NormalizeContext};
use crate::keys;
use crate::response::{Response, Status};
use crate::store::MetaStoreResult;
use crate::tables::Table;
use crate::types::VolumeInfo;
use objectio_common::validate_resource_name;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateVolume {
    pub volume: String,
    /// Empty means the caller
    pub owner: String,
    /// Empty means the caller
    pub admin: String,
    pub quota_bytes: Option<u64>,
    pub creation_time: u64,
}

impl CreateVolume {
    #[must_use]
    pub fn new(volume: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            ..Self::default()
        }
    }

    pub(super) fn normalize(mut self, ctx: &NormalizeContext<'_>) -> Self {
        if self.owner.is_empty() {
            self.owner.clone_from(&ctx.user);
        }
        if self.admin.is_empty() {
            self.admin.clone_from(&ctx.user);
        }
        if self.creation_time == 0 {
            self.creation_time = ctx.now;
        }
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetVolumeOwner {
    pub volume: String,
    pub owner: String,
    pub modification_time: u64,
}

impl SetVolumeOwner {
    #[must_use]
    pub fn new(volume: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            owner: owner.into(),
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

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteVolume {
    pub volume: String,
}

impl DeleteVolume {
    #[must_use]
    pub fn new(volume: impl Into<String>) -> Self {
        Self { volume: volume.into() }
    }
}

pub(super) fn create(c: &CreateVolume, mut ctx: ApplyContext<'_>) -> MetaStoreResult<Response> {
    let key = keys::volume_key(&c.volume);
    ctx.target(Table::Volume, &key);

    let existing = ctx.lookup::<VolumeInfo>(&key)?;
    if existing.is_replay(ctx.index()) {
        return Ok(ctx.replay());
    }
    if validate_resource_name(&c.volume).is_err() {
        return Ok(ctx.fail(Status::InvalidVolumeName));
    }
    if existing.exists() {
        return Ok(ctx.fail(Status::VolumeAlreadyExists));
    }

    let info = VolumeInfo {
        volume: c.volume.clone(),
        owner: c.owner.clone(),
        admin: c.admin.clone(),
        creation_time: c.creation_time,
        modification_time: c.creation_time,
        quota_bytes: c.quota_bytes,
        update_id: ctx.index(),
    };
    ctx.put(&key, &info)?;
    Ok(ctx.finish())
}

pub(super) fn set_owner(c: &SetVolumeOwner, mut ctx: ApplyContext<'_>) -> MetaStoreResult<Response> {
    let key = keys::volume_key(&c.volume);
    ctx.target(Table::Volume, &key);

    let existing = ctx.lookup::<VolumeInfo>(&key)?;
    if existing.is_replay(ctx.index()) {
        return Ok(ctx.replay());
    }
    let Some(mut info) = existing.value else {
        return Ok(ctx.fail(Status::VolumeNotFound));
    };

    info.owner.clone_from(&c.owner);
    info.modification_time = c.modification_time;
    info.update_id = ctx.index();
    ctx.put(&key, &info)?;
    Ok(ctx.finish())
}

pub(super) fn delete(c: &DeleteVolume, mut ctx: ApplyContext<'_>) -> MetaStoreResult<Response> {
    let key = keys::volume_key(&c.volume);
    ctx.target(Table::Volume, &key);

    let existing = ctx.lookup::<VolumeInfo>(&key)?;
    if existing.is_replay(ctx.index()) {
        return Ok(ctx.replay());
    }
    if !existing.exists() {
        return Ok(ctx.fail(Status::VolumeNotFound));
    }
    if ctx
        .view()
        .has_rows_with_prefix(Table::Bucket, &keys::bucket_prefix(&c.volume))?
    {
        return Ok(ctx.fail(Status::VolumeNotEmpty));
    }

    ctx.delete(Table::Volume, &key);
    Ok(ctx.finish())
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::Command;
    use super::*;
    use crate::cache::CacheLookup;

    #[test]
    fn test_create_volume_fills_owner_from_caller() {
        let (_dir, view) = view();
        let responses = apply_all(&view, vec![create_volume("vol1")]);
        assert_eq!(responses[0].status, Status::Ok);
        assert_eq!(responses[0].mutations.len(), 1);

        let info = view.volume_info("vol1").unwrap().unwrap();
        assert_eq!(info.owner, "alice");
        assert_eq!(info.creation_time, 1_000);
        assert_eq!(info.update_id, 1);
    }

    #[test]
    fn test_create_volume_twice() {
        let (_dir, view) = view();
        let responses = apply_all(&view, vec![create_volume("vol1"), create_volume("vol1")]);
        assert_eq!(responses[1].status, Status::VolumeAlreadyExists);
        assert!(responses[1].mutations.is_empty());
    }

    #[test]
    fn test_invalid_volume_name() {
        let (_dir, view) = view();
        let responses = apply_all(&view, vec![create_volume("Bad_Name")]);
        assert_eq!(responses[0].status, Status::InvalidVolumeName);
        assert!(view.volume_info("Bad_Name").unwrap().is_none());
    }

    #[test]
    fn test_redelivered_create_is_replay() {
        let (_dir, view) = view();
        let cmd = create_volume("vol1").normalize(&ctx()).unwrap();
        assert_eq!(cmd.apply(4, &view).unwrap().status, Status::Ok);

        let again = cmd.apply(4, &view).unwrap();
        assert_eq!(again.status, Status::Replay);
        assert!(again.mutations.is_empty());
    }

    #[test]
    fn test_failed_command_observes_target() {
        let (_dir, view) = view();
        let cmd = Command::SetVolumeOwner(SetVolumeOwner::new("vol1", "bob"))
            .normalize(&ctx())
            .unwrap();
        assert_eq!(cmd.apply(3, &view).unwrap().status, Status::VolumeNotFound);
        assert_eq!(
            view.cache().table(Table::Volume).get("/vol1"),
            CacheLookup::Observed { index: 3 }
        );
    }

    #[test]
    fn test_set_owner() {
        let (_dir, view) = view();
        let responses = apply_all(
            &view,
            vec![
                create_volume("vol1"),
                Command::SetVolumeOwner(SetVolumeOwner::new("vol1", "bob")),
            ],
        );
        assert_eq!(responses[1].status, Status::Ok);
        let info = view.volume_info("vol1").unwrap().unwrap();
        assert_eq!(info.owner, "bob");
        assert_eq!(info.update_id, 2);
    }

    #[test]
    fn test_delete_volume_requires_empty() {
        let (_dir, view) = view();
        let responses = apply_all(
            &view,
            vec![
                create_volume("vol1"),
                create_bucket("vol1", "bucket1"),
                Command::DeleteVolume(DeleteVolume::new("vol1")),
                Command::DeleteBucket(super::super::DeleteBucket::new("vol1", "bucket1")),
                Command::DeleteVolume(DeleteVolume::new("vol1")),
            ],
        );
        assert_eq!(responses[2].status, Status::VolumeNotEmpty);
        assert_eq!(responses[3].status, Status::Ok);
        assert_eq!(responses[4].status, Status::Ok);
        assert!(view.volume_info("vol1").unwrap().is_none());
    }
}
