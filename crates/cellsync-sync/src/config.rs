//! Tuning knobs for the sync engine.
//!
//! [`SyncConfig`] carries every interval, batch size, and retry budget the
//! pipeline uses. The defaults match what a wallet needs against a local or
//! LAN node; the daemon layers a config file and environment on top.

use std::time::Duration;

use cellsync_core::Network;

use crate::error::SyncError;

/// Blocks fetched per pipeline iteration.
pub const DEFAULT_FETCH_SIZE: u64 = 4;
/// Headers retained in the fork-detection window.
pub const DEFAULT_CHECK_SIZE: usize = 12;
/// Attempts per block or header fetch.
pub const DEFAULT_RETRY_TIME: u32 = 3;
/// Pause between fetch attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
/// Queue yield while more blocks remain.
pub const DEFAULT_BUSY_INTERVAL: Duration = Duration::from_millis(1);
/// Queue yield once caught up to the target.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(1_000);
/// Tip poll period of the block listener.
pub const DEFAULT_LISTENER_INTERVAL: Duration = Duration::from_millis(5_000);
/// Concurrent block fetches within one batch.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;
/// Per-request timeout of the JSON-RPC client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Maximum number of blocks per batch.
    pub fetch_size: u64,
    /// Capacity of the fork-detection window.
    pub check_size: usize,
    /// Attempts per block fetch, including the first.
    pub retry_time: u32,
    pub retry_interval: Duration,
    pub busy_interval: Duration,
    pub idle_interval: Duration,
    pub listener_interval: Duration,
    /// Upper bound on in-flight `get_block_by_number` calls.
    pub max_concurrent_fetches: usize,
    pub request_timeout: Duration,
    /// Network used to render addresses in usage events.
    pub network: Network,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
            check_size: DEFAULT_CHECK_SIZE,
            retry_time: DEFAULT_RETRY_TIME,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            busy_interval: DEFAULT_BUSY_INTERVAL,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            listener_interval: DEFAULT_LISTENER_INTERVAL,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            network: Network::default(),
        }
    }
}

impl SyncConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.fetch_size == 0 {
            return Err(SyncError::InvalidConfig("fetch_size must be at least 1".into()));
        }
        if self.check_size == 0 {
            return Err(SyncError::InvalidConfig("check_size must be at least 1".into()));
        }
        if self.retry_time == 0 {
            return Err(SyncError::InvalidConfig("retry_time must be at least 1".into()));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(SyncError::InvalidConfig(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(SyncError::InvalidConfig("request_timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Config with millisecond-scale intervals, for tests driving a real clock.
    pub fn fast() -> Self {
        Self {
            retry_interval: Duration::from_millis(5),
            idle_interval: Duration::from_millis(20),
            listener_interval: Duration::from_millis(20),
            request_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}
