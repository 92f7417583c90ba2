//! cellsync daemon.
//!
//! Follows a chain node over JSON-RPC, records every transaction touching the
//! configured addresses in a RocksDB wallet store, and keeps going across
//! chain reorganizations and node restarts.

mod settings;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use cellsync_core::{CheckpointStore, Network};
use cellsync_store::RocksWalletStore;
use cellsync_sync::{AddressUsageRecorder, BlockListener, NodeRpcClient, SyncEngine, SyncEvent};

use settings::Settings;

/// Grace period for an in-flight batch and queued bookkeeping on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Wallet sync daemon.
#[derive(Parser, Debug)]
#[command(name = "cellsync", version, about = "Fork-aware wallet sync against a chain node")]
struct Args {
    /// TOML configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Node JSON-RPC URL
    #[arg(long)]
    node_url: Option<String>,

    /// Data directory for the wallet store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Network the tracked addresses belong to (mainnet or testnet)
    #[arg(long)]
    network: Option<Network>,

    /// Address to track (repeatable, or comma-separated)
    #[arg(long = "address", value_delimiter = ',')]
    addresses: Vec<String>,

    /// Raw 0x-prefixed lock hash to track (repeatable, or comma-separated)
    #[arg(long = "lock-hash", value_delimiter = ',')]
    lock_hashes: Vec<String>,

    /// Blocks per batch
    #[arg(long)]
    fetch_size: Option<u64>,

    /// Headers kept for fork detection
    #[arg(long)]
    check_size: Option<usize>,

    /// Tip poll interval in milliseconds
    #[arg(long)]
    listener_interval_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(self, mut settings: Settings) -> Settings {
        if let Some(url) = self.node_url {
            settings.node_url = url;
        }
        if let Some(dir) = self.data_dir {
            settings.data_dir = dir;
        }
        if let Some(network) = self.network {
            settings.network = network;
        }
        settings.addresses.extend(self.addresses);
        settings.lock_hashes.extend(self.lock_hashes);
        if let Some(n) = self.fetch_size {
            settings.sync.fetch_size = n;
        }
        if let Some(n) = self.check_size {
            settings.sync.check_size = n;
        }
        if let Some(ms) = self.listener_interval_ms {
            settings.sync.listener_interval_ms = ms;
        }
        if let Some(level) = self.log_level {
            settings.log_level = level;
        }
        if let Some(format) = self.log_format {
            settings.log_format = format;
        }
        settings
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => args.apply(settings),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(2);
        }
    };

    init_logging(&settings.log_level, &settings.log_format);

    if let Err(e) = run(settings).await {
        error!("{e:#}");
        process::exit(1);
    }
}

async fn run(settings: Settings) -> Result<()> {
    info!("cellsync v{}", env!("CARGO_PKG_VERSION"));
    info!(node_url = %settings.node_url, network = ?settings.network, "starting");
    info!("data_dir: {:?}", settings.data_dir);

    let lock_hashes = settings.lock_hash_set()?;
    if lock_hashes.is_empty() {
        warn!("no addresses or lock hashes configured; blocks will be followed but nothing saved");
    } else {
        info!(count = lock_hashes.len(), "tracking lock hashes");
    }

    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("failed to create data_dir {:?}", settings.data_dir))?;
    let store = Arc::new(RocksWalletStore::open(settings.db_path()).context("failed to open wallet store")?);
    if let Some(checkpoint) = store.load_block_number()? {
        info!(checkpoint, "resuming from checkpoint");
    }

    let config = settings.sync_config();
    let rpc = Arc::new(NodeRpcClient::new(&settings.node_url, config.request_timeout)?);
    let engine = SyncEngine::new(config, rpc, store.clone(), store.clone())?;

    let recorder = AddressUsageRecorder::spawn(&engine, store.clone());
    let progress = spawn_progress_logger(&engine);
    let listener = BlockListener::new(engine.clone(), lock_hashes);
    let mut listener_task = listener.spawn();

    info!("cellsync running (Ctrl+C to stop)");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
        }
    };

    tokio::select! {
        _ = shutdown_signal => info!("shutdown signal received"),
        res = &mut listener_task => {
            if let Err(e) = res {
                error!("block listener task failed: {e}");
            }
        }
    }

    if !listener.stop_and_wait(SHUTDOWN_TIMEOUT).await {
        warn!("in-flight batch did not finish before shutdown timeout");
    }
    if !recorder.shutdown(SHUTDOWN_TIMEOUT).await {
        warn!("address usage updates were still pending at shutdown");
    }
    progress.abort();
    store.flush()?;
    info!("cellsync shutdown complete");
    Ok(())
}

/// Log checkpoint movement and address activity.
fn spawn_progress_logger(engine: &SyncEngine) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::BlockNumberChanged { block_number }) => {
                    debug!(block_number, "checkpoint");
                }
                Ok(SyncEvent::AddressesUsed { addresses, url }) => {
                    info!(count = addresses.len(), %url, "address activity");
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "progress logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_settings() {
        let args = Args::parse_from([
            "cellsync",
            "--node-url",
            "http://node:8114",
            "--network",
            "testnet",
            "--address",
            "ckt1a,ckt1b",
            "--fetch-size",
            "9",
            "--log-format",
            "json",
        ]);
        let settings = args.apply(Settings {
            addresses: vec!["ckt1z".into()],
            ..Settings::default()
        });
        assert_eq!(settings.node_url, "http://node:8114");
        assert_eq!(settings.network, Network::Testnet);
        assert_eq!(settings.addresses, vec!["ckt1z", "ckt1a", "ckt1b"]);
        assert_eq!(settings.sync.fetch_size, 9);
        assert_eq!(settings.log_format, "json");
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn no_flags_keep_settings() {
        let args = Args::parse_from(["cellsync"]);
        assert_eq!(args.apply(Settings::default()), Settings::default());
    }
}
