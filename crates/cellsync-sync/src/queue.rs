//! Batch sync loop over a block range.
//!
//! A [`Queue`] walks from the checkpoint toward `end_block_number` in
//! batches of `fetch_size`. Each batch runs the pipeline:
//!
//! 1. fetch the blocks (ordered, bounded concurrency, retried)
//! 2. check their headers against the fork-detection window
//! 3. scan and save matching transactions
//! 4. advance the checkpoint and extend the window
//!
//! On a fork the checkpoint is rolled back to the window's oldest header,
//! transactions at or above it are purged, and the window is cleared.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use cellsync_core::{BlockHeader, LockHashSet};

use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::range_for_check::CheckResult;

/// Poll period of [`Queue::wait_for_drained`].
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    /// Between batches, or caught up.
    Idle,
    /// A batch covering `start..=end` is in the pipeline.
    Processing { start: u64, end: u64 },
    Stopped,
}

/// The blocks one loop iteration should process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub numbers: Vec<u64>,
    /// Whether this batch reaches the target, so the loop should idle after it.
    pub caught_up: bool,
}

/// Plan the batch after checkpoint `current`, capped at `end`.
pub fn plan_batch(current: u64, fetch_size: u64, end: u64) -> BatchPlan {
    let start = current.saturating_add(1);
    let real_end = current.saturating_add(fetch_size).min(end);
    BatchPlan {
        numbers: if real_end >= start { (start..=real_end).collect() } else { Vec::new() },
        caught_up: real_end >= end,
    }
}

pub struct Queue {
    engine: Arc<SyncEngine>,
    lock_hashes: RwLock<Arc<LockHashSet>>,
    start_block_number: AtomicU64,
    end_block_number: AtomicU64,
    stopped: AtomicBool,
    paused: AtomicBool,
    in_process: AtomicBool,
    state: Mutex<QueueState>,
}

impl Queue {
    pub fn new(
        engine: Arc<SyncEngine>,
        lock_hashes: LockHashSet,
        start_block_number: u64,
        end_block_number: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            lock_hashes: RwLock::new(Arc::new(lock_hashes)),
            start_block_number: AtomicU64::new(start_block_number),
            end_block_number: AtomicU64::new(end_block_number),
            stopped: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            in_process: AtomicBool::new(false),
            state: Mutex::new(QueueState::Idle),
        })
    }

    /// Run [`start`](Self::start) on the tokio runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<Result<(), SyncError>> {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.start().await })
    }

    /// Loop until stopped.
    ///
    /// Transient node errors are logged at debug level and the loop carries
    /// on; other pipeline errors are logged at error level and the loop
    /// carries on. A window contiguity violation ends the loop with `Err`.
    pub async fn start(&self) -> Result<(), SyncError> {
        info!(
            start = self.start_block_number(),
            end = self.end_block_number(),
            "sync queue started"
        );

        while !self.is_stopped() {
            let mut caught_up = true;
            let result = async {
                let current = self.engine.block_number().get_current()?;
                let plan = plan_batch(current, self.engine.config().fetch_size, self.end_block_number());
                caught_up = plan.caught_up || self.is_paused();
                if !plan.numbers.is_empty() && !self.is_paused() {
                    self.pipeline(&plan.numbers).await?;
                }
                Ok::<(), SyncError>(())
            }
            .await;

            match result {
                Ok(()) => {}
                Err(err) if err.is_logic_error() => {
                    error!(error = %err, "sync queue halted");
                    self.stopped.store(true, Ordering::SeqCst);
                    self.set_state(QueueState::Stopped);
                    return Err(err);
                }
                Err(err) if err.is_transient() => {
                    debug!(error = %err, "node unavailable, retrying next cycle");
                }
                Err(err) => {
                    error!(error = %err, "sync batch failed");
                }
            }

            let config = self.engine.config();
            let delay = if caught_up { config.idle_interval } else { config.busy_interval };
            sleep(delay).await;
        }

        self.set_state(QueueState::Stopped);
        info!("sync queue stopped");
        Ok(())
    }

    /// Run one batch through fetch, fork check, scan, and checkpoint.
    ///
    /// Only one pipeline per engine runs at a time. A batch whose first
    /// block no longer follows the checkpoint is skipped.
    pub async fn pipeline(&self, block_numbers: &[u64]) -> Result<(), SyncError> {
        let (Some(&start), Some(&end)) = (block_numbers.first(), block_numbers.last()) else {
            return Ok(());
        };

        let _guard = self.engine.lock_pipeline().await;
        let current = self.engine.block_number().get_current()?;
        if start != current.saturating_add(1) {
            debug!(start, current, "checkpoint moved, skipping stale batch");
            return Ok(());
        }

        self.in_process.store(true, Ordering::SeqCst);
        self.set_state(QueueState::Processing { start, end });
        let result = self.run_pipeline(block_numbers, start, end).await;
        self.in_process.store(false, Ordering::SeqCst);
        if !self.is_stopped() {
            self.set_state(QueueState::Idle);
        }
        result
    }

    async fn run_pipeline(&self, block_numbers: &[u64], start: u64, end: u64) -> Result<(), SyncError> {
        let get_blocks = self.engine.get_blocks();
        let range = self.engine.range_for_check();

        let blocks = get_blocks.get_range_blocks(block_numbers).await?;
        let headers: Vec<BlockHeader> = blocks.iter().map(|b| b.header.clone()).collect();

        match range.check(&headers).await? {
            CheckResult::Success => {}
            CheckResult::FirstNotMatch => {
                let rollback_to = self.rollback()?;
                return Err(SyncError::Fork { rollback_to });
            }
            CheckResult::BlockHeadersNotMatch => {
                return Err(SyncError::InconsistentBatch { start, end });
            }
        }

        let lock_hashes = self.lock_hashes();
        let saved = get_blocks.check_and_save(&blocks, &lock_hashes).await?;

        self.engine.block_number().update_current(end)?;
        range.push_range(&headers)?;

        if saved > 0 {
            info!(start, end, saved, "synced blocks");
        } else {
            debug!(start, end, "synced blocks");
        }
        Ok(())
    }

    /// Roll back to the oldest header in the window and purge everything
    /// recorded at or above it.
    fn rollback(&self) -> Result<u64, SyncError> {
        let block_number = self.engine.block_number();
        let range = self.engine.range_for_check();
        let rollback_to = match range.first_number() {
            Some(number) => number,
            None => block_number.get_current()?,
        };

        warn!(rollback_to, "chain fork detected, rolling back");
        block_number.update_current(rollback_to)?;
        self.engine.sink().delete_when_fork(rollback_to)?;
        range.clear_range();
        Ok(rollback_to)
    }

    pub fn state(&self) -> QueueState {
        self.state.lock().clone()
    }

    fn set_state(&self, state: QueueState) {
        *self.state.lock() = state;
    }

    pub fn start_block_number(&self) -> u64 {
        self.start_block_number.load(Ordering::SeqCst)
    }

    pub fn end_block_number(&self) -> u64 {
        self.end_block_number.load(Ordering::SeqCst)
    }

    pub fn lock_hashes(&self) -> Arc<LockHashSet> {
        self.lock_hashes.read().clone()
    }

    /// Replace the tracked lock hashes; takes effect from the next batch.
    pub fn set_lock_hashes(&self, lock_hashes: LockHashSet) {
        *self.lock_hashes.write() = Arc::new(lock_hashes);
    }

    pub fn reset(&self, start_block_number: u64, end_block_number: u64) {
        self.start_block_number.store(start_block_number, Ordering::SeqCst);
        self.end_block_number.store(end_block_number, Ordering::SeqCst);
    }

    pub fn reset_end_block_number(&self, end_block_number: u64) {
        self.end_block_number.store(end_block_number, Ordering::SeqCst);
    }

    /// Whether a batch is in flight or the checkpoint is short of the target.
    pub fn has_pending_work(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        if self.in_process.load(Ordering::SeqCst) {
            return true;
        }
        self.engine
            .block_number()
            .get_current()
            .map(|current| current < self.end_block_number())
            .unwrap_or(true)
    }

    pub fn is_processing(&self) -> bool {
        self.in_process.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Ask the loop to exit after the current batch.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Wait until no batch is in flight. Returns `false` on timeout.
    pub async fn wait_for_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_processing() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// [`stop`](Self::stop), then [`wait_for_drained`](Self::wait_for_drained).
    pub async fn stop_and_wait(&self, timeout: Duration) -> bool {
        self.stop();
        self.wait_for_drained(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::events::SyncEvent;
    use crate::memory::MemoryStore;
    use crate::test_utils::{script, transfer, wait_until, MockChain};

    fn engine_with(chain: Arc<MockChain>, store: Arc<MemoryStore>, config: SyncConfig) -> Arc<SyncEngine> {
        SyncEngine::new(config, chain, store.clone(), store).unwrap()
    }

    #[test]
    fn plan_caps_at_end() {
        assert_eq!(plan_batch(0, 4, 100), BatchPlan { numbers: vec![1, 2, 3, 4], caught_up: false });
        assert_eq!(plan_batch(98, 4, 100), BatchPlan { numbers: vec![99, 100], caught_up: true });
        assert_eq!(plan_batch(100, 4, 100), BatchPlan { numbers: vec![], caught_up: true });
        assert_eq!(plan_batch(96, 4, 100), BatchPlan { numbers: vec![97, 98, 99, 100], caught_up: true });
    }

    #[tokio::test]
    async fn pipeline_advances_checkpoint_and_window() {
        let chain = Arc::new(MockChain::with_length(10));
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(chain.clone(), store.clone(), SyncConfig::fast());
        let queue = Queue::new(engine.clone(), LockHashSet::new(), 1, 10);

        queue.pipeline(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(store.checkpoint(), Some(4));
        let window = engine.range_for_check().snapshot();
        assert_eq!(window.last(), Some(&chain.header(4)));
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[tokio::test]
    async fn forward_batch_slides_window() {
        let chain = Arc::new(MockChain::with_length(102));
        let store = Arc::new(MemoryStore::with_checkpoint(100));
        let config = SyncConfig { check_size: 3, ..SyncConfig::fast() };
        let engine = engine_with(chain.clone(), store.clone(), config);
        let queue = Queue::new(engine.clone(), LockHashSet::new(), 101, 102);
        let numbers = |headers: Vec<BlockHeader>| headers.iter().map(|h| h.number).collect::<Vec<_>>();

        let window = engine.range_for_check().get_range().await.unwrap();
        assert_eq!(numbers(window), vec![98, 99, 100]);

        queue.pipeline(&[101, 102]).await.unwrap();
        assert_eq!(store.checkpoint(), Some(102));
        assert_eq!(numbers(engine.range_for_check().snapshot()), vec![100, 101, 102]);
    }

    #[tokio::test]
    async fn replayed_batch_leaves_store_unchanged() {
        let chain = Arc::new(MockChain::with_length(10));
        let mine = script(5);
        chain.push_transaction(2, transfer(0x70, vec![], vec![mine.clone()]));
        chain.push_transaction(3, transfer(0x71, vec![], vec![mine.clone()]));
        let tracked: LockHashSet = [mine.lock_hash()].into_iter().collect();
        let store = Arc::new(MemoryStore::new());

        let engine = engine_with(chain.clone(), store.clone(), SyncConfig::fast());
        Queue::new(engine, tracked.clone(), 1, 10).pipeline(&[1, 2, 3, 4]).await.unwrap();
        let first_pass = store.transactions();
        assert_eq!(first_pass.len(), 2);

        // Checkpoint lost after the scan, as if the process died before saving it.
        store.save_block_number_raw(0);
        let engine = engine_with(chain.clone(), store.clone(), SyncConfig::fast());
        Queue::new(engine, tracked, 1, 10).pipeline(&[1, 2, 3, 4]).await.unwrap();

        assert_eq!(store.transactions(), first_pass);
        assert_eq!(store.checkpoint(), Some(4));
        assert!(store.fork_deletes().is_empty());
        assert_eq!(chain.block_calls(2), 2);
    }

    #[tokio::test]
    async fn stale_batch_is_skipped() {
        let chain = Arc::new(MockChain::with_length(10));
        let store = Arc::new(MemoryStore::with_checkpoint(6));
        let engine = engine_with(chain.clone(), store.clone(), SyncConfig::fast());
        let queue = Queue::new(engine, LockHashSet::new(), 1, 10);

        queue.pipeline(&[3, 4]).await.unwrap();
        assert_eq!(store.checkpoint(), Some(6));
        assert_eq!(chain.block_calls(3), 0);
    }

    #[tokio::test]
    async fn fork_rolls_back_to_window_start() {
        let chain = Arc::new(MockChain::with_length(104));
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig { check_size: 3, ..SyncConfig::fast() };
        let engine = engine_with(chain.clone(), store.clone(), config);
        let mine = script(4);
        chain.push_transaction(99, transfer(0x61, vec![], vec![mine.clone()]));
        chain.push_transaction(97, transfer(0x60, vec![], vec![mine.clone()]));
        let queue = Queue::new(engine.clone(), [mine.lock_hash()].into_iter().collect(), 1, 104);

        store.save_block_number_raw(96);
        queue.pipeline(&[97, 98, 99, 100]).await.unwrap();
        assert_eq!(
            engine.range_for_check().snapshot().iter().map(|h| h.number).collect::<Vec<_>>(),
            vec![98, 99, 100]
        );
        assert_eq!(store.transactions().len(), 2);

        chain.reorg_from(100, 1);
        let mut rx = engine.subscribe();
        let err = queue.pipeline(&[101, 102, 103, 104]).await.unwrap_err();
        assert_eq!(err, SyncError::Fork { rollback_to: 98 });
        assert_eq!(store.checkpoint(), Some(98));
        assert_eq!(store.fork_deletes(), vec![98]);
        assert!(engine.range_for_check().is_empty());
        let left: Vec<u64> = store.transactions().iter().map(|t| t.block_number).collect();
        assert_eq!(left, vec![97]);
        assert_eq!(rx.try_recv().unwrap(), SyncEvent::BlockNumberChanged { block_number: 98 });
    }

    #[tokio::test]
    async fn inconsistent_batch_changes_nothing() {
        let chain = Arc::new(MockChain::with_length(10));
        let store = Arc::new(MemoryStore::with_checkpoint(4));
        let engine = engine_with(chain.clone(), store.clone(), SyncConfig::fast());
        let queue = Queue::new(engine.clone(), LockHashSet::new(), 1, 10);
        queue.pipeline(&[5]).await.unwrap();

        chain.corrupt_parent(7);
        let err = queue.pipeline(&[6, 7, 8]).await.unwrap_err();
        assert_eq!(err, SyncError::InconsistentBatch { start: 6, end: 8 });
        assert_eq!(store.checkpoint(), Some(5));
        assert!(store.fork_deletes().is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_checkpoint() {
        let chain = Arc::new(MockChain::with_length(10));
        chain.fail_block(3, 100);
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(chain, store.clone(), SyncConfig::fast());
        let queue = Queue::new(engine, LockHashSet::new(), 1, 10);

        assert!(queue.pipeline(&[1, 2, 3, 4]).await.is_err());
        assert_eq!(store.checkpoint(), None);
        assert!(!queue.is_processing());
    }

    #[tokio::test]
    async fn loop_reaches_end_and_goes_idle() {
        let chain = Arc::new(MockChain::with_length(30));
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(chain, store.clone(), SyncConfig::fast());
        let queue = Queue::new(engine, LockHashSet::new(), 1, 25);
        let handle = queue.spawn();

        assert!(
            wait_until(Duration::from_secs(5), || {
                store.checkpoint() == Some(25) && !queue.has_pending_work()
            })
            .await
        );

        assert!(queue.stop_and_wait(Duration::from_secs(1)).await);
        handle.await.unwrap().unwrap();
        assert_eq!(queue.state(), QueueState::Stopped);
        assert_eq!(store.checkpoint(), Some(25));
    }

    #[tokio::test]
    async fn reset_end_extends_target() {
        let chain = Arc::new(MockChain::with_length(30));
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(chain, store.clone(), SyncConfig::fast());
        let queue = Queue::new(engine, LockHashSet::new(), 1, 8);
        let handle = queue.spawn();

        assert!(wait_until(Duration::from_secs(5), || store.checkpoint() == Some(8)).await);
        queue.reset_end_block_number(20);
        assert!(queue.has_pending_work());
        assert!(wait_until(Duration::from_secs(5), || store.checkpoint() == Some(20)).await);

        queue.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn paused_queue_makes_no_progress() {
        let chain = Arc::new(MockChain::with_length(30));
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(chain, store.clone(), SyncConfig::fast());
        let queue = Queue::new(engine, LockHashSet::new(), 1, 30);
        queue.pause();
        let handle = queue.spawn();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.checkpoint(), None);

        queue.resume();
        assert!(wait_until(Duration::from_secs(5), || store.checkpoint() == Some(30)).await);
        queue.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn loop_survives_node_outage() {
        let chain = Arc::new(MockChain::with_length(12));
        chain.set_offline(true);
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(chain.clone(), store.clone(), SyncConfig::fast());
        let queue = Queue::new(engine, LockHashSet::new(), 1, 12);
        let handle = queue.spawn();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.checkpoint(), None);
        chain.set_offline(false);

        assert!(wait_until(Duration::from_secs(5), || store.checkpoint() == Some(12)).await);
        queue.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn lock_hash_update_applies_to_later_batches() {
        let chain = Arc::new(MockChain::with_length(8));
        let mine = script(2);
        chain.push_transaction(2, transfer(0x70, vec![], vec![mine.clone()]));
        chain.push_transaction(6, transfer(0x71, vec![], vec![mine.clone()]));
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(chain, store.clone(), SyncConfig::fast());
        let queue = Queue::new(engine, LockHashSet::new(), 1, 8);

        queue.pipeline(&[1, 2, 3, 4]).await.unwrap();
        queue.set_lock_hashes([mine.lock_hash()].into_iter().collect());
        queue.pipeline(&[5, 6, 7, 8]).await.unwrap();

        let saved: Vec<u64> = store.transactions().iter().map(|t| t.block_number).collect();
        assert_eq!(saved, vec![6]);
    }
}
