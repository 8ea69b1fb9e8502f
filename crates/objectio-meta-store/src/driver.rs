//! Apply driver: the single writer of the table cache.
//!
//! Pulls committed commands in index order, runs each through its handler
//! and hands the response to the double buffer.

use crate::double_buffer::{DoubleBuffer, Health};
use crate::request::CommittedCommand;
use crate::response::{ApplyOutcome, Response, Status};
use crate::store::MetaStoreError;
use crate::view::MetadataView;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Errors that stop the driver
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("store read failed while applying index {index}: {source}")]
    Store {
        index: u64,
        #[source]
        source: MetaStoreError,
    },
    #[error("double buffer stopped accepting responses")]
    Unhealthy,
}

pub struct ApplyDriver {
    view: MetadataView,
    buffer: Arc<DoubleBuffer>,
    last_applied: u64,
}

impl ApplyDriver {
    #[must_use]
    pub fn new(view: MetadataView, buffer: Arc<DoubleBuffer>) -> Self {
        let last_applied = buffer.last_flushed_index();
        Self {
            view,
            buffer,
            last_applied,
        }
    }

    #[must_use]
    pub const fn view(&self) -> &MetadataView {
        &self.view
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<DoubleBuffer> {
        &self.buffer
    }

    /// Highest index handed to the double buffer so far
    #[must_use]
    pub const fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Apply one committed command and queue its response for flushing.
    pub fn apply(&mut self, committed: CommittedCommand) -> Result<Response, ApplyError> {
        if self.buffer.health() != Health::Running {
            return Err(ApplyError::Unhealthy);
        }

        let CommittedCommand { index, command } = committed;
        let response = {
            // Pinned until the handler returns: no cleanup can slip in between
            // the checkpoint read and the handler's cache lookups.
            let checkpoint = self.buffer.checkpoint();
            // At or below the checkpoint every effect is already in the store,
            // but a key deleted since has lost the record its replay check needs.
            if index <= checkpoint.index() {
                debug!(
                    "Skipping {} at index {}: durable through {}",
                    command.kind(),
                    index,
                    checkpoint.index()
                );
                return Ok(Response::new(index, command.kind()).fail(Status::Replay));
            }
            if index <= self.last_applied {
                warn!(
                    "Redelivered {} at index {} (last applied {})",
                    command.kind(),
                    index,
                    self.last_applied
                );
            }
            command
                .apply(index, &self.view)
                .map_err(|source| ApplyError::Store { index, source })?
        };
        debug!("Applied {} at index {}: {}", response.kind, index, response.status);

        self.buffer
            .enqueue(response.clone())
            .map_err(|_| ApplyError::Unhealthy)?;
        self.last_applied = self.last_applied.max(index);
        Ok(response)
    }

    /// Apply commands from `rx` until it closes, reporting each outcome on `tx`.
    ///
    /// Blocks the calling thread; see [`ApplyDriver::spawn`].
    pub fn run(
        &mut self,
        mut rx: mpsc::Receiver<CommittedCommand>,
        tx: mpsc::Sender<ApplyOutcome>,
    ) -> Result<(), ApplyError> {
        while let Some(committed) = rx.blocking_recv() {
            let response = match self.apply(committed) {
                Ok(response) => response,
                Err(e) => {
                    error!("Apply driver stopping: {}", e);
                    return Err(e);
                }
            };
            if tx.blocking_send(ApplyOutcome::from(&response)).is_err() {
                info!("Outcome receiver closed, apply driver stopping");
                break;
            }
        }
        info!("Apply driver finished at index {}", self.last_applied);
        Ok(())
    }

    /// Run the driver on a dedicated `meta-apply` thread.
    pub fn spawn(
        mut self,
        rx: mpsc::Receiver<CommittedCommand>,
        tx: mpsc::Sender<ApplyOutcome>,
    ) -> std::io::Result<thread::JoinHandle<Result<Self, ApplyError>>> {
        thread::Builder::new()
            .name("meta-apply".into())
            .spawn(move || self.run(rx, tx).map(|()| self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetadataCache;
    use crate::request::{Command, CreateBucket, CreateVolume, DeleteVolume};
    use crate::store::{BatchWriter, MetaStore, MetaStoreResult, WriteBatch};
    use objectio_common::config::DoubleBufferConfig;
    use tempfile::TempDir;

    fn setup(writer: Option<Arc<dyn BatchWriter>>) -> (TempDir, ApplyDriver) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        let cache = Arc::new(MetadataCache::new());
        let config = DoubleBufferConfig {
            max_retries: 1,
            retry_backoff_ms: 1,
            ..DoubleBufferConfig::default()
        };
        let writer = writer.unwrap_or_else(|| store.clone() as Arc<dyn BatchWriter>);
        let buffer = Arc::new(DoubleBuffer::start(writer, cache.clone(), config, 0).unwrap());
        (dir, ApplyDriver::new(MetadataView::new(store, cache), buffer))
    }

    fn volume(index: u64, name: &str) -> CommittedCommand {
        CommittedCommand::new(
            index,
            Command::CreateVolume(CreateVolume {
                owner: "alice".into(),
                creation_time: 1,
                ..CreateVolume::new(name)
            }),
        )
    }

    struct BrokenWriter;

    impl BatchWriter for BrokenWriter {
        fn write_batch(&self, _: &WriteBatch) -> MetaStoreResult<()> {
            Err(std::io::Error::other("read-only filesystem").into())
        }
    }

    #[test]
    fn test_apply_tracks_last_applied() {
        let (_dir, mut driver) = setup(None);
        assert_eq!(driver.apply(volume(1, "vol1")).unwrap().status, Status::Ok);
        assert_eq!(driver.apply(volume(2, "vol2")).unwrap().status, Status::Ok);
        assert_eq!(driver.last_applied(), 2);

        // Redelivery is answered as a replay.
        assert_eq!(driver.apply(volume(1, "vol1")).unwrap().status, Status::Replay);
        assert_eq!(driver.last_applied(), 2);

        driver.buffer().flush_now().unwrap();
        assert_eq!(driver.view().store().last_applied_index().unwrap(), 2);
        assert!(driver.view().cache().is_empty());
    }

    #[test]
    fn test_flushed_index_is_not_reapplied() {
        let (_dir, mut driver) = setup(None);
        driver.apply(volume(1, "vol1")).unwrap();
        let delete = CommittedCommand::new(2, Command::DeleteVolume(DeleteVolume::new("vol1")));
        assert_eq!(driver.apply(delete).unwrap().status, Status::Ok);
        driver.buffer().flush_now().unwrap();
        assert!(driver.view().cache().is_empty());

        // Nothing records vol1 any more; only the checkpoint stops a rerun.
        let replay = driver.apply(volume(1, "vol1")).unwrap();
        assert_eq!(replay.status, Status::Replay);
        assert!(replay.mutations.is_empty());
        assert_eq!(driver.view().volume_info("vol1").unwrap(), None);
    }

    #[test]
    fn test_unhealthy_buffer_stops_driver() {
        let (_dir, mut driver) = setup(Some(Arc::new(BrokenWriter)));
        driver.apply(volume(1, "vol1")).unwrap();
        assert!(driver.buffer().flush_now().is_err());
        assert!(matches!(
            driver.apply(volume(2, "vol2")),
            Err(ApplyError::Unhealthy)
        ));
    }

    #[test]
    fn test_run_reports_outcomes() {
        let (_dir, driver) = setup(None);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let handle = driver.spawn(cmd_rx, out_tx).unwrap();

        cmd_tx.blocking_send(volume(1, "vol1")).unwrap();
        cmd_tx
            .blocking_send(CommittedCommand::new(
                2,
                Command::CreateBucket(CreateBucket::new("nope", "bucket1")),
            ))
            .unwrap();
        drop(cmd_tx);

        let first = out_rx.blocking_recv().unwrap();
        assert_eq!((first.index, first.status), (1, Status::Ok));
        let second = out_rx.blocking_recv().unwrap();
        assert_eq!((second.index, second.status), (2, Status::VolumeNotFound));

        let driver = handle.join().unwrap().unwrap();
        assert_eq!(driver.last_applied(), 2);
    }
}
