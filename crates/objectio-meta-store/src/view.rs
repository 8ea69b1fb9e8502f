//! Read path: the table cache overlaid on the persistent store.
//!
//! Used by request handlers (point lookups with producing index) and by the
//! read-only listing queries. Neither ever writes.

use crate::cache::{CacheLookup, CacheValue, MetadataCache};
use crate::keys;
use crate::store::{MetaStore, MetaStoreResult};
use crate::tables::Table;
use crate::types::{BucketInfo, KeyInfo, Record, VolumeInfo};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of a versioned point lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lookup<T> {
    /// Visible value, `None` when absent or deleted
    pub value: Option<T>,
    /// Highest known producing index, `None` when the key was never seen
    pub index: Option<u64>,
}

impl<T> Lookup<T> {
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.value.is_some()
    }

    #[must_use]
    pub const fn state(&self) -> ReplayState {
        ReplayState::of(self.index)
    }

    /// True when the command at `index` has already been reflected here
    #[must_use]
    pub const fn is_replay(&self, index: u64) -> bool {
        self.state().is_replay(index)
    }
}

/// Replay state of a single object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayState {
    /// No command has touched the object yet
    Unknown,
    /// Last touched by the command at this index
    Applied(u64),
}

impl ReplayState {
    #[must_use]
    pub const fn of(index: Option<u64>) -> Self {
        match index {
            Some(i) => Self::Applied(i),
            None => Self::Unknown,
        }
    }

    /// A command at `index` is a replay when the object already moved past it
    #[must_use]
    pub const fn is_replay(self, index: u64) -> bool {
        match self {
            Self::Unknown => false,
            Self::Applied(last) => last >= index,
        }
    }
}

/// Cache-over-store view shared by the apply driver and readers.
#[derive(Clone)]
pub struct MetadataView {
    store: Arc<MetaStore>,
    cache: Arc<MetadataCache>,
}

impl MetadataView {
    #[must_use]
    pub const fn new(store: Arc<MetaStore>, cache: Arc<MetadataCache>) -> Self {
        Self { store, cache }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<MetaStore> {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Visible raw value: cache overlay first, then the store.
    pub fn get(&self, table: Table, key: &str) -> MetaStoreResult<Option<Vec<u8>>> {
        match self.cache.table(table).get(key) {
            CacheLookup::Hit { value, .. } => Ok(value),
            CacheLookup::Observed { .. } | CacheLookup::Miss => self.store.get(table, key),
        }
    }

    /// Typed lookup returning the visible value and its producing index.
    pub fn lookup<T: Record>(&self, key: &str) -> MetaStoreResult<Lookup<T>> {
        let (bytes, cached_index) = match self.cache.table(T::TABLE).get(key) {
            CacheLookup::Hit { value, index } => (value, Some(index)),
            CacheLookup::Observed { index } => (self.store.get(T::TABLE, key)?, Some(index)),
            CacheLookup::Miss => (self.store.get(T::TABLE, key)?, None),
        };
        let value = bytes.as_deref().map(T::decode).transpose()?;
        let stored_index = value.as_ref().map(Record::update_id);
        Ok(Lookup {
            index: cached_index.max(stored_index),
            value,
        })
    }

    /// True when any visible row of `table` starts with `prefix`.
    pub fn has_rows_with_prefix(&self, table: Table, prefix: &str) -> MetaStoreResult<bool> {
        Ok(!self.merged_rows(table, prefix, None)?.is_empty())
    }

    /// Visible rows under `prefix` strictly after `start_after`, in key order.
    pub fn list<T: Record>(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max: usize,
    ) -> MetaStoreResult<Vec<T>> {
        self.merged_rows(T::TABLE, prefix, start_after)?
            .into_values()
            .take(max)
            .map(|bytes| T::decode(&bytes))
            .collect()
    }

    pub fn volume_info(&self, volume: &str) -> MetaStoreResult<Option<VolumeInfo>> {
        Ok(self.lookup::<VolumeInfo>(&keys::volume_key(volume))?.value)
    }

    pub fn bucket_info(&self, volume: &str, bucket: &str) -> MetaStoreResult<Option<BucketInfo>> {
        Ok(self.lookup::<BucketInfo>(&keys::bucket_key(volume, bucket))?.value)
    }

    pub fn key_info(&self, volume: &str, bucket: &str, key: &str) -> MetaStoreResult<Option<KeyInfo>> {
        Ok(self.lookup::<KeyInfo>(&keys::object_key(volume, bucket, key))?.value)
    }

    /// Volumes whose name starts with `prefix`, optionally only those owned
    /// by `owner`, after the volume named `start_after`.
    pub fn list_volumes(
        &self,
        owner: Option<&str>,
        prefix: &str,
        start_after: Option<&str>,
        max: usize,
    ) -> MetaStoreResult<Vec<VolumeInfo>> {
        let full_prefix = keys::volume_key(prefix);
        let start = start_after.map(keys::volume_key);
        let mut out = Vec::new();
        for bytes in self
            .merged_rows(Table::Volume, &full_prefix, start.as_deref())?
            .into_values()
        {
            if out.len() >= max {
                break;
            }
            let volume = VolumeInfo::decode(&bytes)?;
            if owner.is_none_or(|o| o == volume.owner) {
                out.push(volume);
            }
        }
        Ok(out)
    }

    pub fn list_buckets(
        &self,
        volume: &str,
        prefix: &str,
        start_after: Option<&str>,
        max: usize,
    ) -> MetaStoreResult<Vec<BucketInfo>> {
        let full_prefix = format!("{}{prefix}", keys::bucket_prefix(volume));
        let start = start_after.map(|b| keys::bucket_key(volume, b));
        self.list(&full_prefix, start.as_deref(), max)
    }

    pub fn list_keys(
        &self,
        volume: &str,
        bucket: &str,
        prefix: &str,
        start_after: Option<&str>,
        max: usize,
    ) -> MetaStoreResult<Vec<KeyInfo>> {
        let full_prefix = format!("{}{prefix}", keys::object_prefix(volume, bucket));
        let start = start_after.map(|k| keys::object_key(volume, bucket, k));
        self.list(&full_prefix, start.as_deref(), max)
    }

    // The cache snapshot is taken before the store scan: an entry flushed
    // and cleaned up in between is then still seen through the snapshot.
    fn merged_rows(
        &self,
        table: Table,
        prefix: &str,
        start_after: Option<&str>,
    ) -> MetaStoreResult<BTreeMap<String, Vec<u8>>> {
        let overlay = self.cache.table(table).snapshot_prefix(prefix);
        let mut rows: BTreeMap<String, Vec<u8>> =
            self.store.scan_prefix(table, prefix)?.into_iter().collect();

        for (key, entry) in overlay {
            match entry.value {
                Some(CacheValue::Present(value)) => {
                    rows.insert(key, value);
                }
                Some(CacheValue::Tombstone) => {
                    rows.remove(&key);
                }
                None => {}
            }
        }

        if let Some(start) = start_after {
            rows.retain(|k, _| k.as_str() > start);
        }
        Ok(rows)
    }
}
