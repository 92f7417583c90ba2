//! # cellsync-sync
//! Fork-aware block synchronization for wallet stores.
//!
//! Walks a node's chain in small batches, detects reorganizations against a
//! sliding window of recent headers, and hands every transaction touching a
//! tracked lock hash to a [`TxSink`](cellsync_core::TxSink).
//!
//! # Modules
//!
//! - [`engine`]: [`SyncEngine`], the shared context queues and listeners run against
//! - [`queue`]: batch loop and per-batch pipeline with fork rollback
//! - [`block_listener`]: tip polling and queue lifecycle
//! - [`get_blocks`]: retried, bounded-concurrency fetching and transaction scanning
//! - [`range_for_check`]: fork-detection header window
//! - [`block_number`]: cached, persisted checkpoint
//! - [`simple_queue`]: generic FIFO worker queue
//! - [`address_usage`]: address bookkeeping fed by sync events
//! - [`rpc`]: JSON-RPC [`ChainRpc`](cellsync_core::ChainRpc) client
//! - [`memory`]: in-memory store
//! - [`events`], [`config`], [`error`]

pub mod address_usage;
pub mod block_listener;
pub mod block_number;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod get_blocks;
pub mod memory;
pub mod queue;
pub mod range_for_check;
pub mod rpc;
pub mod simple_queue;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

pub use address_usage::{AddressUsage, AddressUsageRecorder};
pub use block_listener::BlockListener;
pub use block_number::BlockNumber;
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{RangeError, SyncError};
pub use events::{EventBus, SyncEvent};
pub use get_blocks::GetBlocks;
pub use memory::MemoryStore;
pub use queue::{Queue, QueueState};
pub use range_for_check::{CheckResult, RangeForCheck};
pub use rpc::NodeRpcClient;
pub use simple_queue::{SimpleQueue, WorkerError};
