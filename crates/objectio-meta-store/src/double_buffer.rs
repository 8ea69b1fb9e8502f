//! Double buffer between the apply driver and the persistent store.
//!
//! The driver appends responses to the *current* queue. A dedicated flush
//! thread swaps it out under the lock, commits every mutation of the swapped
//! queue in one store transaction with the lock released, then advances the
//! last-flushed index and drops the flushed cache entries. Both happen under
//! the checkpoint gate, so a [`Checkpoint`] holder never sees a cache that
//! was cleaned past the index it read.
//!
//! When the current queue reaches `max_pending`, `enqueue` blocks until a
//! flush completes. A commit that still fails after `max_retries` attempts
//! marks the buffer failed; every later enqueue is rejected.

use crate::cache::MetadataCache;
use crate::response::Response;
use crate::store::{BatchOp, BatchWriter, WriteBatch};
use objectio_common::config::DoubleBufferConfig;
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Errors returned to producers
#[derive(Debug, thiserror::Error)]
pub enum DoubleBufferError {
    #[error("double buffer is stopped")]
    Stopped,
    #[error("failed to start flush thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Health of the flush loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Health {
    Running,
    /// A batch could not be committed; the node must stop applying
    Failed,
    /// Shut down after draining
    Stopped,
}

/// Flush counters
#[derive(Debug, Default)]
pub struct FlushStats {
    pub flushes: AtomicU64,
    pub responses: AtomicU64,
    pub mutations: AtomicU64,
    pub retries: AtomicU64,
    /// Total time spent committing, in microseconds
    pub commit_micros: AtomicU64,
}

#[derive(Default)]
struct BufferState {
    current: Vec<Response>,
    flush_in_progress: bool,
    paused: bool,
    /// Set by `flush_now`; flush even if paused or below the threshold
    force: bool,
    shutdown: bool,
    failed: bool,
}

struct Shared {
    state: Mutex<BufferState>,
    /// Wakes the flush thread
    work: Condvar,
    /// Wakes producers waiting for room or for a drain
    drained: Condvar,
    writer: Arc<dyn BatchWriter>,
    cache: Arc<MetadataCache>,
    config: DoubleBufferConfig,
    last_flushed: AtomicU64,
    /// Held for writing while the checkpoint advances and the cache is cleaned
    checkpoint_gate: RwLock<()>,
    flushed_tx: watch::Sender<u64>,
    stats: FlushStats,
}

/// The last-flushed index, pinned.
///
/// While held, the flush thread can neither advance the index nor drop cache
/// entries, so everything at or below [`Checkpoint::index`] is in the store
/// and everything above it is still in the cache.
pub struct Checkpoint<'a> {
    index: u64,
    _gate: RwLockReadGuard<'a, ()>,
}

impl Checkpoint<'_> {
    pub const fn index(&self) -> u64 {
        self.index
    }
}

/// Batches responses from the apply driver into store commits.
pub struct DoubleBuffer {
    shared: Arc<Shared>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DoubleBuffer {
    /// Start the flush thread.
    ///
    /// `last_flushed` seeds the published index, normally the store's
    /// persisted last applied index.
    pub fn start(
        writer: Arc<dyn BatchWriter>,
        cache: Arc<MetadataCache>,
        config: DoubleBufferConfig,
        last_flushed: u64,
    ) -> Result<Self, DoubleBufferError> {
        let (flushed_tx, _) = watch::channel(last_flushed);
        let shared = Arc::new(Shared {
            state: Mutex::new(BufferState::default()),
            work: Condvar::new(),
            drained: Condvar::new(),
            writer,
            cache,
            config,
            last_flushed: AtomicU64::new(last_flushed),
            checkpoint_gate: RwLock::new(()),
            flushed_tx,
            stats: FlushStats::default(),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("meta-flush".into())
            .spawn(move || flush_loop(&loop_shared))?;
        info!(
            "Double buffer started (batch {}, interval {:?}, max pending {})",
            shared.config.flush_batch_size,
            shared.config.flush_interval(),
            shared.config.max_pending
        );

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a response for the next flush, blocking while the buffer is full.
    pub fn enqueue(&self, response: Response) -> Result<(), DoubleBufferError> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        while state.current.len() >= shared.config.max_pending && !state.failed && !state.shutdown {
            shared.work.notify_one();
            shared.drained.wait(&mut state);
        }
        if state.failed || state.shutdown {
            return Err(DoubleBufferError::Stopped);
        }

        state.current.push(response);
        if state.current.len() >= shared.config.flush_batch_size {
            shared.work.notify_one();
        }
        Ok(())
    }

    /// Flush everything queued so far and wait for it to be durable.
    pub fn flush_now(&self) -> Result<(), DoubleBufferError> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        state.force = true;
        shared.work.notify_one();
        while (!state.current.is_empty() || state.flush_in_progress) && !state.failed && !state.shutdown {
            shared.drained.wait(&mut state);
        }
        if state.failed || (state.shutdown && !state.current.is_empty()) {
            return Err(DoubleBufferError::Stopped);
        }
        Ok(())
    }

    /// Stall the flush loop. Enqueue keeps working until the buffer is full.
    pub fn pause(&self) {
        self.shared.state.lock().paused = true;
    }

    pub fn resume(&self) {
        self.shared.state.lock().paused = false;
        self.shared.work.notify_one();
    }

    /// Drain pending responses and stop the flush thread.
    pub fn shutdown(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.work.notify_one();
            self.shared.drained.notify_all();
        }
        if handle.join().is_err() {
            error!("Flush thread panicked");
        }
        info!(
            "Double buffer stopped at index {}",
            self.last_flushed_index()
        );
    }

    pub fn health(&self) -> Health {
        let state = self.shared.state.lock();
        if state.failed {
            Health::Failed
        } else if state.shutdown {
            Health::Stopped
        } else {
            Health::Running
        }
    }

    /// Highest index whose response is durable
    pub fn last_flushed_index(&self) -> u64 {
        self.shared.last_flushed.load(Ordering::Acquire)
    }

    /// Pin the last-flushed index. Release it before calling
    /// [`DoubleBuffer::enqueue`], which may wait on a flush.
    pub fn checkpoint(&self) -> Checkpoint<'_> {
        let gate = self.shared.checkpoint_gate.read();
        Checkpoint {
            index: self.shared.last_flushed.load(Ordering::Acquire),
            _gate: gate,
        }
    }

    /// Receiver notified each time the last-flushed index advances
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.flushed_tx.subscribe()
    }

    /// Responses queued and not yet handed to the flush thread
    pub fn pending(&self) -> usize {
        self.shared.state.lock().current.len()
    }

    pub fn stats(&self) -> &FlushStats {
        &self.shared.stats
    }
}

impl Drop for DoubleBuffer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn flush_loop(shared: &Shared) {
    debug!("Flush thread started");
    let interval = shared.config.flush_interval();
    let mut flushing: Vec<Response> = Vec::new();

    loop {
        {
            let mut state = shared.state.lock();
            let mut timed_out = false;
            loop {
                if state.failed {
                    return;
                }
                if state.current.is_empty() {
                    if state.force {
                        state.force = false;
                        shared.drained.notify_all();
                    }
                    if state.shutdown {
                        debug!("Flush thread exiting");
                        return;
                    }
                } else if state.force
                    || state.shutdown
                    || (!state.paused
                        && (timed_out || state.current.len() >= shared.config.flush_batch_size))
                {
                    break;
                }
                timed_out = shared.work.wait_for(&mut state, interval).timed_out();
            }
            std::mem::swap(&mut state.current, &mut flushing);
            state.flush_in_progress = true;
            // Room was just made for blocked producers.
            shared.drained.notify_all();
        }

        let committed = flush(shared, &flushing);
        flushing.clear();

        let mut state = shared.state.lock();
        state.flush_in_progress = false;
        if !committed {
            state.failed = true;
        }
        shared.drained.notify_all();
        if state.failed {
            return;
        }
    }
}

/// Commit one swapped-out queue. Returns false once retries are exhausted.
fn flush(shared: &Shared, responses: &[Response]) -> bool {
    let batch = WriteBatch {
        ops: responses
            .iter()
            .flat_map(|r| r.mutations.iter().map(BatchOp::from))
            .collect(),
        last_index: responses.iter().map(|r| r.index).max().unwrap_or(0),
    };

    let started = Instant::now();
    let mut attempt = 0;
    loop {
        match shared.writer.write_batch(&batch) {
            Ok(()) => break,
            Err(e) if attempt < shared.config.max_retries => {
                let delay = shared
                    .config
                    .retry_backoff()
                    .saturating_mul(1 << attempt.min(16));
                warn!(
                    "Commit of batch up to index {} failed (attempt {}): {}; retrying in {:?}",
                    batch.last_index,
                    attempt + 1,
                    e,
                    delay
                );
                shared.stats.retries.fetch_add(1, Ordering::Relaxed);
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                error!(
                    "Commit of batch up to index {} failed after {} attempts: {}",
                    batch.last_index,
                    attempt + 1,
                    e
                );
                return false;
            }
        }
    }

    let flushed = {
        let _gate = shared.checkpoint_gate.write();
        let previous = shared.last_flushed.fetch_max(batch.last_index, Ordering::AcqRel);
        for response in responses {
            for c in &response.cleanup {
                shared.cache.cleanup(c.table, &c.key, c.index);
            }
        }
        previous.max(batch.last_index)
    };
    shared.flushed_tx.send_replace(flushed);

    let stats = &shared.stats;
    stats.flushes.fetch_add(1, Ordering::Relaxed);
    stats.responses.fetch_add(responses.len() as u64, Ordering::Relaxed);
    stats.mutations.fetch_add(batch.ops.len() as u64, Ordering::Relaxed);
    stats.commit_micros.fetch_add(
        u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
        Ordering::Relaxed,
    );
    debug!(
        "Flushed {} responses ({} mutations), last flushed index {}",
        responses.len(),
        batch.ops.len(),
        flushed
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLookup;
    use crate::request::CommandKind;
    use crate::store::{MetaStore, MetaStoreError, MetaStoreResult};
    use crate::tables::Table;
    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config() -> DoubleBufferConfig {
        DoubleBufferConfig {
            flush_batch_size: 4,
            flush_interval_ms: 5,
            max_pending: 8,
            max_retries: 3,
            retry_backoff_ms: 1,
        }
    }

    fn open_store() -> (TempDir, Arc<MetaStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        (dir, store)
    }

    /// Stage a put in the cache and return the matching response
    fn staged_put(cache: &MetadataCache, index: u64, key: &str) -> Response {
        let value = format!("v{index}").into_bytes();
        cache.put(Table::Key, key, value.clone(), index);
        let mut response = Response::new(index, CommandKind::CreateKey);
        response.put(Table::Key, key, value);
        response
    }

    /// Fails the first `failures` commits, then delegates
    struct FlakyWriter {
        inner: Arc<MetaStore>,
        failures: AtomicU32,
    }

    impl BatchWriter for FlakyWriter {
        fn write_batch(&self, batch: &WriteBatch) -> MetaStoreResult<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(MetaStoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.write_batch(batch)
        }
    }

    #[test]
    fn test_flush_persists_and_cleans_cache() {
        let (_dir, store) = open_store();
        let cache = Arc::new(MetadataCache::new());
        let buffer = DoubleBuffer::start(store.clone(), cache.clone(), config(), 0).unwrap();
        let mut flushed = buffer.subscribe();

        for i in 1..=6 {
            buffer.enqueue(staged_put(&cache, i, &format!("/v/b/k{i}"))).unwrap();
        }
        buffer.flush_now().unwrap();

        assert_eq!(buffer.last_flushed_index(), 6);
        assert_eq!(*flushed.borrow_and_update(), 6);
        assert_eq!(store.last_applied_index().unwrap(), 6);
        assert_eq!(store.get(Table::Key, "/v/b/k3").unwrap(), Some(b"v3".to_vec()));
        assert!(cache.is_empty());
        assert_eq!(buffer.stats().responses.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_cleanup_keeps_newer_entries() {
        let (_dir, store) = open_store();
        let cache = Arc::new(MetadataCache::new());
        let buffer = DoubleBuffer::start(store, cache.clone(), config(), 0).unwrap();

        buffer.pause();
        buffer.enqueue(staged_put(&cache, 1, "/v/b/k")).unwrap();
        // Index 2 rewrites the key before index 1 is flushed.
        let newer = staged_put(&cache, 2, "/v/b/k");
        buffer.flush_now().unwrap();
        assert_eq!(
            cache.table(Table::Key).get("/v/b/k"),
            CacheLookup::Hit { value: Some(b"v2".to_vec()), index: 2 }
        );
        buffer.enqueue(newer).unwrap();
        buffer.flush_now().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_enqueue_blocks_when_full() {
        let (_dir, store) = open_store();
        let cache = Arc::new(MetadataCache::new());
        let buffer = Arc::new(DoubleBuffer::start(store.clone(), cache.clone(), config(), 0).unwrap());

        buffer.pause();
        for i in 1..=8 {
            buffer.enqueue(staged_put(&cache, i, &format!("/v/b/k{i}"))).unwrap();
        }
        assert_eq!(buffer.pending(), 8);

        let (done_tx, done_rx) = mpsc::channel();
        let producer = {
            let buffer = Arc::clone(&buffer);
            let response = staged_put(&cache, 9, "/v/b/k9");
            thread::spawn(move || {
                buffer.enqueue(response).unwrap();
                done_tx.send(()).unwrap();
            })
        };

        // Still blocked while the flush loop is stalled.
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(store.last_applied_index().unwrap(), 0);

        buffer.resume();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        producer.join().unwrap();
        buffer.flush_now().unwrap();
        assert_eq!(buffer.last_flushed_index(), 9);
    }

    #[test]
    fn test_checkpoint_holds_off_cleanup() {
        let (_dir, store) = open_store();
        let cache = Arc::new(MetadataCache::new());
        let buffer = DoubleBuffer::start(store.clone(), cache.clone(), config(), 0).unwrap();
        buffer.pause();
        buffer.enqueue(staged_put(&cache, 1, "/v/b/k")).unwrap();

        thread::scope(|s| {
            let checkpoint = buffer.checkpoint();
            let flusher = s.spawn(|| buffer.flush_now());

            // The commit may land, but the index and the cache stay put.
            thread::sleep(Duration::from_millis(100));
            assert_eq!(checkpoint.index(), 0);
            assert_eq!(buffer.last_flushed_index(), 0);
            assert!(!cache.is_empty());

            drop(checkpoint);
            flusher.join().unwrap().unwrap();
        });

        assert_eq!(buffer.checkpoint().index(), 1);
        assert_eq!(store.last_applied_index().unwrap(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_commit_retries_then_succeeds() {
        let (_dir, store) = open_store();
        let cache = Arc::new(MetadataCache::new());
        let writer = Arc::new(FlakyWriter { inner: store.clone(), failures: AtomicU32::new(2) });
        let buffer = DoubleBuffer::start(writer, cache.clone(), config(), 0).unwrap();

        buffer.enqueue(staged_put(&cache, 1, "/v/b/k")).unwrap();
        buffer.flush_now().unwrap();

        assert_eq!(buffer.health(), Health::Running);
        assert_eq!(buffer.stats().retries.load(Ordering::Relaxed), 2);
        assert_eq!(store.get(Table::Key, "/v/b/k").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn test_exhausted_retries_stop_the_buffer() {
        let (_dir, store) = open_store();
        let cache = Arc::new(MetadataCache::new());
        let writer = Arc::new(FlakyWriter { inner: store.clone(), failures: AtomicU32::new(100) });
        let buffer = DoubleBuffer::start(writer, cache.clone(), config(), 0).unwrap();

        buffer.enqueue(staged_put(&cache, 1, "/v/b/k")).unwrap();
        assert!(matches!(buffer.flush_now(), Err(DoubleBufferError::Stopped)));
        assert_eq!(buffer.health(), Health::Failed);
        assert!(matches!(
            buffer.enqueue(staged_put(&cache, 2, "/v/b/k2")),
            Err(DoubleBufferError::Stopped)
        ));
        // Nothing was durable, so the staged entry must still be readable.
        assert_eq!(buffer.last_flushed_index(), 0);
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_shutdown_drains_pending() {
        let (_dir, store) = open_store();
        let cache = Arc::new(MetadataCache::new());
        let buffer = DoubleBuffer::start(store.clone(), cache.clone(), config(), 0).unwrap();

        buffer.pause();
        buffer.enqueue(staged_put(&cache, 1, "/v/b/k")).unwrap();
        buffer.shutdown();

        assert_eq!(store.last_applied_index().unwrap(), 1);
        assert_eq!(buffer.health(), Health::Stopped);
        assert!(matches!(
            buffer.enqueue(staged_put(&cache, 2, "/v/b/k2")),
            Err(DoubleBufferError::Stopped)
        ));
    }
}
