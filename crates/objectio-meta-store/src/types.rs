//! Stored types for metadata persistence.
//!
//! These types are serialized to redb via bincode. Every record carries the
//! transaction index that last produced it (`update_id`), which is what the
//! replay check reads back once the cache entry has been flushed away.

use crate::store::MetaStoreResult;
use crate::tables::Table;
use objectio_common::{BlockLocation, ReplicationFactor};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed row of one metadata table.
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// Table the record lives in
    const TABLE: Table;

    /// Index of the transaction that produced this version
    fn update_id(&self) -> u64;

    fn encode(&self) -> MetaStoreResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn decode(bytes: &[u8]) -> MetaStoreResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Volume metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub volume: String,
    pub owner: String,
    pub admin: String,
    pub creation_time: u64,
    pub modification_time: u64,
    pub quota_bytes: Option<u64>,
    pub update_id: u64,
}

impl Record for VolumeInfo {
    const TABLE: Table = Table::Volume;

    fn update_id(&self) -> u64 {
        self.update_id
    }
}

/// Bucket metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub volume: String,
    pub bucket: String,
    pub creation_time: u64,
    pub versioning: bool,
    pub metadata: BTreeMap<String, String>,
    pub update_id: u64,
}

impl Record for BucketInfo {
    const TABLE: Table = Table::Bucket;

    fn update_id(&self) -> u64 {
        self.update_id
    }
}

/// Key (object) metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub volume: String,
    pub bucket: String,
    pub key_name: String,
    pub data_size: u64,
    pub creation_time: u64,
    pub modification_time: u64,
    pub replication: ReplicationFactor,
    pub locations: Vec<BlockLocation>,
    pub metadata: BTreeMap<String, String>,
    pub update_id: u64,
}

impl Record for KeyInfo {
    const TABLE: Table = Table::Key;

    fn update_id(&self) -> u64 {
        self.update_id
    }
}

/// Open-key row written when a multipart upload starts.
///
/// Same shape as a committed key but stored under the multipart key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenKeyInfo(pub KeyInfo);

impl Record for OpenKeyInfo {
    const TABLE: Table = Table::OpenKey;

    fn update_id(&self) -> u64 {
        self.0.update_id
    }
}

/// State of an in-progress multipart upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartKeyInfo {
    pub upload_id: String,
    pub creation_time: u64,
    pub replication: ReplicationFactor,
    pub update_id: u64,
}

impl Record for MultipartKeyInfo {
    const TABLE: Table = Table::MultipartInfo;

    fn update_id(&self) -> u64 {
        self.update_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_encoding() {
        let volume = VolumeInfo {
            volume: "vol1".into(),
            owner: "alice".into(),
            admin: "admin".into(),
            creation_time: 1,
            modification_time: 2,
            quota_bytes: Some(1 << 30),
            update_id: 7,
        };
        let bytes = volume.encode().unwrap();
        let decoded = VolumeInfo::decode(&bytes).unwrap();
        assert_eq!(decoded, volume);
        assert_eq!(decoded.update_id(), 7);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(KeyInfo::decode(&[0xff, 0x01]).is_err());
    }
}
