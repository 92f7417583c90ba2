//! Daemon settings.
//!
//! Layered lowest to highest: built-in defaults, an optional TOML file,
//! `CELLSYNC_*` environment variables (nested keys use `__`, e.g.
//! `CELLSYNC_SYNC__FETCH_SIZE`), then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use cellsync_core::{Address, Hash256, LockHashSet, Network};
use cellsync_sync::config as defaults;
use cellsync_sync::SyncConfig;

pub const DEFAULT_NODE_URL: &str = "http://127.0.0.1:8114";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// JSON-RPC endpoint of the chain node.
    pub node_url: String,
    pub data_dir: PathBuf,
    pub network: Network,
    /// Full-format addresses whose lock scripts are tracked.
    pub addresses: Vec<String>,
    /// Raw `0x`-prefixed lock hashes tracked in addition to `addresses`.
    pub lock_hashes: Vec<String>,
    pub log_level: String,
    /// `text` or `json`.
    pub log_format: String,
    pub sync: SyncSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cellsync");

        Self {
            node_url: DEFAULT_NODE_URL.to_string(),
            data_dir,
            network: Network::default(),
            addresses: Vec::new(),
            lock_hashes: Vec::new(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            sync: SyncSettings::default(),
        }
    }
}

/// Engine tuning, with intervals in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub fetch_size: u64,
    pub check_size: usize,
    pub retry_time: u32,
    pub retry_interval_ms: u64,
    pub busy_interval_ms: u64,
    pub idle_interval_ms: u64,
    pub listener_interval_ms: u64,
    pub max_concurrent_fetches: usize,
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fetch_size: defaults::DEFAULT_FETCH_SIZE,
            check_size: defaults::DEFAULT_CHECK_SIZE,
            retry_time: defaults::DEFAULT_RETRY_TIME,
            retry_interval_ms: defaults::DEFAULT_RETRY_INTERVAL.as_millis() as u64,
            busy_interval_ms: defaults::DEFAULT_BUSY_INTERVAL.as_millis() as u64,
            idle_interval_ms: defaults::DEFAULT_IDLE_INTERVAL.as_millis() as u64,
            listener_interval_ms: defaults::DEFAULT_LISTENER_INTERVAL.as_millis() as u64,
            max_concurrent_fetches: defaults::DEFAULT_MAX_CONCURRENT_FETCHES,
            request_timeout_secs: defaults::DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl Settings {
    /// Defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("CELLSYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("addresses")
                    .with_list_parse_key("lock_hashes")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        Ok(settings)
    }

    /// RocksDB directory for the wallet store.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("wallet")
    }

    pub fn sync_config(&self) -> SyncConfig {
        let s = &self.sync;
        SyncConfig {
            fetch_size: s.fetch_size,
            check_size: s.check_size,
            retry_time: s.retry_time,
            retry_interval: Duration::from_millis(s.retry_interval_ms),
            busy_interval: Duration::from_millis(s.busy_interval_ms),
            idle_interval: Duration::from_millis(s.idle_interval_ms),
            listener_interval: Duration::from_millis(s.listener_interval_ms),
            max_concurrent_fetches: s.max_concurrent_fetches,
            request_timeout: Duration::from_secs(s.request_timeout_secs),
            network: self.network,
        }
    }

    /// Lock hashes of every configured address plus the raw lock hashes.
    pub fn lock_hash_set(&self) -> Result<LockHashSet> {
        let mut set = LockHashSet::new();
        for raw in &self.addresses {
            let address = Address::decode(raw).with_context(|| format!("invalid address {raw}"))?;
            if address.network() != self.network {
                bail!("address {raw} is not a {:?} address", self.network);
            }
            set.insert(address.script().lock_hash());
        }
        for raw in &self.lock_hashes {
            let hash = Hash256::from_hex(raw).with_context(|| format!("invalid lock hash {raw}"))?;
            set.insert(hash);
        }
        Ok(set)
    }
}
