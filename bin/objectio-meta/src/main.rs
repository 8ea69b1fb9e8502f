//! ObjectIO Metadata Service
//!
//! Runs the metadata write path on one node: commands read from a
//! JSON-lines log are normalized, given consecutive log indices after the
//! store's last applied index, applied through the table cache and flushed
//! to redb by the double buffer.

mod apply;
mod settings;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "objectio-meta")]
#[command(about = "ObjectIO Metadata Service")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/objectio/meta.toml")]
    config: PathBuf,

    /// Data directory (overrides node.data_dir)
    #[arg(long, env = "OBJECTIO_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (overrides log.level)
    #[arg(long)]
    log_level: Option<String>,

    /// Storage node addresses available for placement (host:port)
    #[arg(long = "node")]
    nodes: Vec<SocketAddr>,

    /// User recorded as owner of created volumes
    #[arg(long, default_value = "admin")]
    user: String,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Apply commands from a JSON-lines file ("-" for stdin)
    Apply {
        file: PathBuf,
    },
    /// List volumes, buckets of a volume, or keys of a bucket
    List {
        volume: Option<String>,
        bucket: Option<String>,
        /// Only names starting with this prefix
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, default_value = "1000")]
        max: usize,
    },
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (plain, structured) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = settings::load(&args.config)?;
    if let Some(dir) = args.data_dir {
        config.node.data_dir = dir;
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    init_logging(&config.log.level, config.log.json);

    info!("Starting ObjectIO Metadata Service");
    info!("Node: {}", config.node.name);
    info!("Data directory: {}", config.node.data_dir.display());

    match args.command {
        Action::Apply { file } => apply::run(&config, &args.nodes, &args.user, &file).await,
        Action::List {
            volume,
            bucket,
            prefix,
            max,
        } => apply::list(&config, volume.as_deref(), bucket.as_deref(), &prefix, max),
    }
}
