//! The sync engine: one value owning every shared component.
//!
//! A [`SyncEngine`] is built once per wallet store and node endpoint and
//! handed to queues and listeners by `Arc`. It owns the event channel, the
//! checkpoint, the fork-detection window, and the pipeline lock that keeps
//! at most one batch in flight.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, MutexGuard};

use cellsync_core::{ChainRpc, CheckpointStore, TxSink};

use crate::block_number::BlockNumber;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::get_blocks::GetBlocks;
use crate::range_for_check::RangeForCheck;

pub struct SyncEngine {
    config: SyncConfig,
    events: EventBus,
    sink: Arc<dyn TxSink>,
    get_blocks: Arc<GetBlocks>,
    block_number: Arc<BlockNumber>,
    range_for_check: Arc<RangeForCheck>,
    pipeline: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        rpc: Arc<dyn ChainRpc>,
        sink: Arc<dyn TxSink>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Arc<Self>, SyncError> {
        config.validate()?;

        let events = EventBus::default();
        let get_blocks = Arc::new(GetBlocks::new(rpc, sink.clone(), events.clone(), &config));
        let block_number = Arc::new(BlockNumber::new(checkpoints, events.clone()));
        let range_for_check = Arc::new(RangeForCheck::new(
            config.check_size,
            get_blocks.clone(),
            block_number.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            events,
            sink,
            get_blocks,
            block_number,
            range_for_check,
            pipeline: Mutex::new(()),
        }))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn url(&self) -> &str {
        self.get_blocks.url()
    }

    pub fn sink(&self) -> &Arc<dyn TxSink> {
        &self.sink
    }

    pub fn get_blocks(&self) -> &Arc<GetBlocks> {
        &self.get_blocks
    }

    pub fn block_number(&self) -> &Arc<BlockNumber> {
        &self.block_number
    }

    pub fn range_for_check(&self) -> &Arc<RangeForCheck> {
        &self.range_for_check
    }

    /// Exclusive access to the pipeline. Held for the whole of one batch.
    pub(crate) async fn lock_pipeline(&self) -> MutexGuard<'_, ()> {
        self.pipeline.lock().await
    }
}
