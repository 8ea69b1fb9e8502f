//! Persistent metadata store backed by redb.
//!
//! Provides point get/put/delete, ordered prefix scans, and the single
//! atomic multi-table batch commit used by the double buffer. Reads that
//! must see in-flight mutations go through [`crate::view::MetadataView`];
//! this module only handles persistence.

use crate::tables::{self, LAST_APPLIED_INDEX, Table};
use redb::{Database, ReadableTable};
use std::path::Path;
use tracing::{debug, info};

/// Error type for metadata store operations
#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for MetaStoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

pub type MetaStoreResult<T> = Result<T, MetaStoreError>;

/// One row change inside a batch. `None` deletes the row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchOp {
    pub table: Table,
    pub key: String,
    pub value: Option<Vec<u8>>,
}

/// Ordered row changes committed in a single write transaction.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    pub ops: Vec<BatchOp>,
    /// Highest transaction index covered by this batch
    pub last_index: u64,
}

impl WriteBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Destination of flushed batches.
///
/// `MetaStore` is the production implementation; the seam exists so the
/// flush loop can be exercised against failing storage.
pub trait BatchWriter: Send + Sync {
    /// Apply every op of `batch` atomically, in order.
    fn write_batch(&self, batch: &WriteBatch) -> MetaStoreResult<()>;
}

/// Persistent metadata store backed by redb.
pub struct MetaStore {
    db: Database,
}

impl MetaStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> MetaStoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            for table in Table::ALL {
                let _t = write_txn.open_table(table.definition())?;
            }
            let _t = write_txn.open_table(tables::TRANSACTION_INFO)?;
        }
        write_txn.commit()?;

        let store = Self { db };
        info!(
            "Opened metadata store at {:?} (last applied index {})",
            path,
            store.last_applied_index()?
        );
        Ok(store)
    }

    /// Point lookup of the raw value stored under `key`.
    pub fn get(&self, table: Table, key: &str) -> MetaStoreResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(table.definition())?;
        Ok(t.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Write a single row outside the batch path.
    pub fn put(&self, table: Table, key: &str, value: &[u8]) -> MetaStoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(table.definition())?;
            t.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Delete a single row outside the batch path.
    pub fn delete(&self, table: Table, key: &str) -> MetaStoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(table.definition())?;
            t.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All rows whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, table: Table, prefix: &str) -> MetaStoreResult<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(table.definition())?;
        let mut result = Vec::new();
        for entry in t.range(prefix..)? {
            let (k, v) = entry?;
            let k = k.value();
            if !k.starts_with(prefix) {
                break;
            }
            result.push((k.to_string(), v.value().to_vec()));
        }
        Ok(result)
    }

    /// Highest transaction index whose batch has been committed.
    pub fn last_applied_index(&self) -> MetaStoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(tables::TRANSACTION_INFO)?;
        Ok(t.get(LAST_APPLIED_INDEX)?.map_or(0, |v| v.value()))
    }
}

impl BatchWriter for MetaStore {
    fn write_batch(&self, batch: &WriteBatch) -> MetaStoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut open = Vec::with_capacity(Table::ALL.len());
            for table in Table::ALL {
                open.push(write_txn.open_table(table.definition())?);
            }
            for op in &batch.ops {
                let t = &mut open[op.table.ordinal()];
                match &op.value {
                    Some(value) => {
                        t.insert(op.key.as_str(), value.as_slice())?;
                    }
                    None => {
                        t.remove(op.key.as_str())?;
                    }
                }
            }

            let mut info = write_txn.open_table(tables::TRANSACTION_INFO)?;
            let current = info.get(LAST_APPLIED_INDEX)?.map_or(0, |v| v.value());
            if batch.last_index > current {
                info.insert(LAST_APPLIED_INDEX, batch.last_index)?;
            }
        }
        write_txn.commit()?;
        debug!(
            "Committed batch of {} ops up to index {}",
            batch.ops.len(),
            batch.last_index
        );
        Ok(())
    }
}
