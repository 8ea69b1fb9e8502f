//! Table cache: in-memory overlay of mutations that are not yet flushed.
//!
//! Every entry remembers the transaction index that produced it. Only the
//! apply driver writes entries (`put`, `tombstone`, `observe`); only the
//! flush loop removes them (`cleanup`), and only once the producing batch is
//! durable. Readers take the table read lock for the duration of a lookup or
//! a snapshot copy and never see a half-applied command.

use crate::tables::{TABLE_COUNT, Table};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Business value held by a cache entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheValue {
    Present(Vec<u8>),
    /// Deleted, but the delete has not reached the store yet
    Tombstone,
}

/// Overlay entry for one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    /// `None` when the key was only observed by a failed command; reads
    /// then fall through to the store.
    pub value: Option<CacheValue>,
    /// Highest transaction index that touched the key
    pub index: u64,
}

/// Result of a cache-only lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheLookup {
    /// The cache decides the value (present or deleted)
    Hit { value: Option<Vec<u8>>, index: u64 },
    /// Index is known, value must be read from the store
    Observed { index: u64 },
    Miss,
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub cleanups: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total == 0.0 { 0.0 } else { hits / total }
    }
}

/// Overlay for a single table.
#[derive(Default)]
pub struct TableCache {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
    stats: CacheStats,
}

impl TableCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> CacheLookup {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(CacheEntry { value: Some(CacheValue::Present(v)), index }) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Hit { value: Some(v.clone()), index: *index }
            }
            Some(CacheEntry { value: Some(CacheValue::Tombstone), index }) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Hit { value: None, index: *index }
            }
            Some(CacheEntry { value: None, index }) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Observed { index: *index }
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Miss
            }
        }
    }

    /// Upsert `value` produced at `index`.
    pub fn put(&self, key: &str, value: Vec<u8>, index: u64) {
        self.write(key, Some(CacheValue::Present(value)), index);
    }

    /// Mark `key` deleted at `index`.
    pub fn tombstone(&self, key: &str, index: u64) {
        self.write(key, Some(CacheValue::Tombstone), index);
    }

    /// Record that the command at `index` examined `key` without changing it.
    ///
    /// Keeps any pending value and only raises the index.
    pub fn observe(&self, key: &str, index: u64) {
        let mut entries = self.entries.write();
        entries
            .entry(key.to_string())
            .and_modify(|e| e.index = e.index.max(index))
            .or_insert(CacheEntry { value: None, index });
    }

    /// Drop the entry for `key` if nothing newer than `up_to` produced it.
    ///
    /// Returns true when an entry was removed.
    pub fn cleanup(&self, key: &str, up_to: u64) -> bool {
        let mut entries = self.entries.write();
        let removable = entries.get(key).is_some_and(|e| e.index <= up_to);
        if removable {
            entries.remove(key);
            self.stats.cleanups.fetch_add(1, Ordering::Relaxed);
        }
        removable
    }

    /// Copy of every entry whose key starts with `prefix`, in key order.
    pub fn snapshot_prefix(&self, prefix: &str) -> BTreeMap<String, CacheEntry> {
        let entries = self.entries.read();
        entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn write(&self, key: &str, value: Option<CacheValue>, index: u64) {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            // Commands arrive in index order; an older write never wins.
            Some(existing) if existing.index > index => {}
            Some(existing) => {
                existing.value = value;
                existing.index = index;
            }
            None => {
                entries.insert(key.to_string(), CacheEntry { value, index });
            }
        }
    }
}

/// One [`TableCache`] per metadata table.
pub struct MetadataCache {
    tables: [TableCache; TABLE_COUNT],
}

impl MetadataCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: std::array::from_fn(|_| TableCache::new()),
        }
    }

    #[must_use]
    pub fn table(&self, table: Table) -> &TableCache {
        &self.tables[table.ordinal()]
    }

    pub fn put(&self, table: Table, key: &str, value: Vec<u8>, index: u64) {
        self.table(table).put(key, value, index);
    }

    pub fn tombstone(&self, table: Table, key: &str, index: u64) {
        self.table(table).tombstone(key, index);
    }

    pub fn observe(&self, table: Table, key: &str, index: u64) {
        self.table(table).observe(key, index);
    }

    pub fn cleanup(&self, table: Table, key: &str, up_to: u64) -> bool {
        self.table(table).cleanup(key, up_to)
    }

    /// Total entries across all tables
    pub fn len(&self) -> usize {
        self.tables.iter().map(TableCache::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(TableCache::is_empty)
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}
