//! Redb table definitions for persistent metadata storage.

use redb::TableDefinition;
use serde::{Deserialize, Serialize};
use std::fmt;

// Namespace metadata
pub const VOLUMES: TableDefinition<&str, &[u8]> = TableDefinition::new("volume");
pub const BUCKETS: TableDefinition<&str, &[u8]> = TableDefinition::new("bucket");

// Key metadata
pub const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("key");
pub const OPEN_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("open_key");
// Key: "/vol/bucket/key/upload_id", Value: bincode-encoded MultipartKeyInfo
pub const MULTIPART_INFO: TableDefinition<&str, &[u8]> = TableDefinition::new("multipart_info");

// Apply bookkeeping, written in the same transaction as every flushed batch
pub const TRANSACTION_INFO: TableDefinition<&str, u64> = TableDefinition::new("transaction_info");

/// Row of `TRANSACTION_INFO` holding the highest flushed transaction index
pub const LAST_APPLIED_INDEX: &str = "last_applied_index";

/// Number of logical tables written through the apply path
pub const TABLE_COUNT: usize = 5;

/// Logical table touched by a mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Table {
    Volume,
    Bucket,
    Key,
    OpenKey,
    MultipartInfo,
}

impl Table {
    pub const ALL: [Self; TABLE_COUNT] = [
        Self::Volume,
        Self::Bucket,
        Self::Key,
        Self::OpenKey,
        Self::MultipartInfo,
    ];

    /// Redb definition backing this table
    #[must_use]
    pub const fn definition(self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            Self::Volume => VOLUMES,
            Self::Bucket => BUCKETS,
            Self::Key => KEYS,
            Self::OpenKey => OPEN_KEYS,
            Self::MultipartInfo => MULTIPART_INFO,
        }
    }

    /// Position in [`Table::ALL`]
    #[must_use]
    pub const fn ordinal(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Bucket => "bucket",
            Self::Key => "key",
            Self::OpenKey => "open_key",
            Self::MultipartInfo => "multipart_info",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_match_all() {
        for (i, table) in Table::ALL.iter().enumerate() {
            assert_eq!(table.ordinal(), i);
        }
    }
}
