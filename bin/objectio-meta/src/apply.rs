//! The `apply` and `list` actions.

use anyhow::{Context, Result, anyhow};
use objectio_common::{Config, now_millis};
use objectio_meta_store::{
    ApplyDriver, Command, CommittedCommand, DoubleBuffer, MetaStore, MetadataCache, MetadataView,
    NormalizeContext,
};
use objectio_placement::{ClusterTopology, NodeInfo, PipelineAllocator, PipelineProvider};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 256;

fn topology(nodes: &[SocketAddr]) -> ClusterTopology {
    let mut topology = ClusterTopology::new();
    for (i, addr) in nodes.iter().enumerate() {
        topology.upsert_node(NodeInfo::new(format!("node{i}"), *addr));
    }
    topology
}

fn read_input(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        return Ok(input);
    }
    std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
}

/// One command per line; blank lines and `#` comments are skipped.
fn parse_commands(input: &str) -> Result<Vec<Command>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}: invalid command", n + 1))
        })
        .collect()
}

/// Normalize `commands` and number the accepted ones after `last_applied`.
///
/// `clock` is read once per command. A command that cannot be normalized
/// (no room for its data, say) is rejected before it would be logged and
/// takes no index.
fn commit(
    commands: Vec<Command>,
    ctx: &mut NormalizeContext<'_>,
    clock: impl Fn() -> u64,
    last_applied: u64,
) -> Vec<CommittedCommand> {
    let mut index = last_applied;
    let mut committed = Vec::with_capacity(commands.len());
    for command in commands {
        let kind = command.kind();
        ctx.now = clock();
        match command.normalize(ctx) {
            Ok(command) => {
                index += 1;
                committed.push(CommittedCommand::new(index, command));
            }
            Err(e) => warn!("Rejected {}: {}", kind, e),
        }
    }
    committed
}

pub async fn run(config: &Config, nodes: &[SocketAddr], user: &str, file: &Path) -> Result<()> {
    let commands = parse_commands(&read_input(file)?)?;

    let store = Arc::new(MetaStore::open(config.node.db_path())?);
    let cache = Arc::new(MetadataCache::new());
    let view = MetadataView::new(store.clone(), cache.clone());
    let last_applied = store.last_applied_index()?;

    let provider = Arc::new(PipelineProvider::new(
        topology(nodes),
        config.placement.pipeline_limit_per_node,
    ));
    let allocator = PipelineAllocator::from_config(provider, &config.placement);
    let mut ctx = NormalizeContext::new(user, 0).with_allocator(&allocator);
    let committed = commit(commands, &mut ctx, now_millis, last_applied);
    info!(
        "Applying {} commands from index {}",
        committed.len(),
        last_applied + 1
    );

    let buffer = Arc::new(DoubleBuffer::start(
        store,
        cache,
        config.double_buffer.clone(),
        last_applied,
    )?);
    let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (outcome_tx, mut outcome_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = ApplyDriver::new(view, buffer.clone()).spawn(command_rx, outcome_tx)?;

    let producer = tokio::spawn(async move {
        for command in committed {
            if command_tx.send(command).await.is_err() {
                break;
            }
        }
    });

    let mut statuses: BTreeMap<&'static str, usize> = BTreeMap::new();
    while let Some(outcome) = outcome_rx.recv().await {
        *statuses.entry(outcome.status.as_str()).or_default() += 1;
        println!("{}", serde_json::to_string(&outcome)?);
    }
    producer.await?;

    let joined = tokio::task::spawn_blocking(move || handle.join()).await?;
    let flushed = tokio::task::spawn_blocking({
        let buffer = buffer.clone();
        move || {
            let result = buffer.flush_now();
            buffer.shutdown();
            result
        }
    })
    .await?;
    let driver = joined.map_err(|_| anyhow!("apply thread panicked"))??;
    flushed?;

    let stats = buffer.stats();
    info!(
        "Applied through index {}, flushed through {} ({} flushes, {} retries)",
        driver.last_applied(),
        buffer.last_flushed_index(),
        stats.flushes.load(Ordering::Relaxed),
        stats.retries.load(Ordering::Relaxed)
    );
    for (status, count) in statuses {
        info!("{}: {}", status, count);
    }
    Ok(())
}

fn print_all<T: Serialize>(rows: &[T]) -> Result<()> {
    for row in rows {
        println!("{}", serde_json::to_string(row)?);
    }
    Ok(())
}

pub fn list(
    config: &Config,
    volume: Option<&str>,
    bucket: Option<&str>,
    prefix: &str,
    max: usize,
) -> Result<()> {
    let store = Arc::new(MetaStore::open(config.node.db_path())?);
    let view = MetadataView::new(store, Arc::new(MetadataCache::new()));
    match (volume, bucket) {
        (None, _) => print_all(&view.list_volumes(None, prefix, None, max)?),
        (Some(volume), None) => print_all(&view.list_buckets(volume, prefix, None, max)?),
        (Some(volume), Some(bucket)) => {
            print_all(&view.list_keys(volume, bucket, prefix, None, max)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectio_meta_store::CommandKind;
    use std::cell::Cell;

    #[test]
    fn test_parse_skips_blank_and_comment_lines() {
        let input = r#"
# setup
{"CreateVolume": {"volume": "vol1"}}

{"CreateBucket": {"volume": "vol1", "bucket": "bucket1"}}
{"DeleteKey": {"volume": "vol1", "bucket": "bucket1", "key": "k"}}
"#;
        let kinds: Vec<_> = parse_commands(input)
            .unwrap()
            .iter()
            .map(Command::kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                CommandKind::CreateVolume,
                CommandKind::CreateBucket,
                CommandKind::DeleteKey
            ]
        );
    }

    #[test]
    fn test_parse_reports_line() {
        let err = parse_commands("{\"CreateVolume\": {}}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_rejected_commands_take_no_index() {
        let commands = parse_commands(
            r#"{"CreateVolume": {"volume": "vol1"}}
{"CreateKey": {"volume": "vol1", "bucket": "b", "key": "k", "data_size": 10}}
{"DeleteVolume": {"volume": "vol1"}}"#,
        )
        .unwrap();
        // No allocator: the key with data cannot be placed.
        let mut ctx = NormalizeContext::new("alice", 0);
        let committed = commit(commands, &mut ctx, || 5, 40);

        let indices: Vec<_> = committed.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![41, 42]);
        assert_eq!(committed[1].command.kind(), CommandKind::DeleteVolume);
    }

    #[test]
    fn test_clock_read_per_command() {
        let commands = parse_commands(
            r#"{"CreateVolume": {"volume": "vol1"}}
{"CreateVolume": {"volume": "vol2"}}
{"CreateVolume": {"volume": "vol3", "creation_time": 7}}"#,
        )
        .unwrap();
        let ticks = Cell::new(1_000);
        let clock = || {
            ticks.set(ticks.get() + 1);
            ticks.get()
        };
        let mut ctx = NormalizeContext::new("alice", 0);
        let committed = commit(commands, &mut ctx, clock, 0);

        let times: Vec<_> = committed
            .iter()
            .map(|c| match &c.command {
                Command::CreateVolume(v) => v.creation_time,
                other => panic!("unexpected {}", other.kind()),
            })
            .collect();
        // A client-supplied time is kept.
        assert_eq!(times, vec![1_001, 1_002, 7]);
        assert_eq!(ticks.get(), 1_003);
    }
}
