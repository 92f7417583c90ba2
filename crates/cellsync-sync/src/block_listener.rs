//! Tip polling and queue lifecycle.
//!
//! A [`BlockListener`] polls the node tip every `listener_interval` (or
//! sooner when [`notify_tip`](BlockListener::notify_tip) is called) and keeps
//! a [`Queue`] running over `[checkpoint + 1, tip]`. While the current queue
//! still has work nothing happens; once it has caught up, a fresh queue is
//! spawned for the new range and the old one is stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use cellsync_core::LockHashSet;

use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::queue::Queue;

pub struct BlockListener {
    engine: Arc<SyncEngine>,
    lock_hashes: RwLock<LockHashSet>,
    queue: Mutex<Option<Arc<Queue>>>,
    stopped: AtomicBool,
    paused: AtomicBool,
    wake: Notify,
}

impl BlockListener {
    pub fn new(engine: Arc<SyncEngine>, lock_hashes: LockHashSet) -> Arc<Self> {
        Arc::new(Self {
            engine,
            lock_hashes: RwLock::new(lock_hashes),
            queue: Mutex::new(None),
            stopped: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let listener = Arc::clone(self);
        tokio::spawn(async move { listener.start().await })
    }

    /// Poll until [`stop`](Self::stop) is called.
    pub async fn start(&self) {
        info!(url = %self.engine.url(), "block listener started");
        while !self.is_stopped() {
            match self.regenerate().await {
                Ok(()) => {}
                Err(err) if err.is_transient() => {
                    debug!(error = %err, "tip poll failed, node unavailable");
                }
                Err(err) => error!(error = %err, "tip poll failed"),
            }

            tokio::select! {
                _ = sleep(self.engine.config().listener_interval) => {}
                _ = self.wake.notified() => {}
            }
        }
        if let Some(queue) = self.active_queue() {
            queue.stop();
        }
        info!("block listener stopped");
    }

    /// Spawn a queue for `[checkpoint + 1, tip]` unless the current one is busy.
    pub async fn regenerate(&self) -> Result<(), SyncError> {
        if self.active_queue().is_some_and(|queue| queue.has_pending_work()) {
            return Ok(());
        }

        let current = self.engine.block_number().get_current()?;
        let tip = self.engine.get_blocks().get_tip_block_number().await?;
        let start = current.saturating_add(1);
        if start > tip || self.is_stopped() {
            return Ok(());
        }

        let queue = Queue::new(self.engine.clone(), self.lock_hashes.read().clone(), start, tip);
        if self.is_paused() {
            queue.pause();
        }
        let previous = self.queue.lock().replace(queue.clone());
        if let Some(previous) = previous {
            previous.stop();
        }
        // Queue errors are logged by the queue itself.
        drop(queue.spawn());
        info!(start, tip, "spawned sync queue");
        Ok(())
    }

    /// Wake the poll loop now instead of at the next interval.
    pub fn notify_tip(&self) {
        self.wake.notify_one();
    }

    pub fn active_queue(&self) -> Option<Arc<Queue>> {
        self.queue.lock().clone()
    }

    /// Replace the tracked lock hashes, for the running queue and future ones.
    pub fn set_lock_hashes(&self, lock_hashes: LockHashSet) {
        *self.lock_hashes.write() = lock_hashes.clone();
        if let Some(queue) = self.active_queue() {
            queue.set_lock_hashes(lock_hashes);
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        if let Some(queue) = self.active_queue() {
            queue.pause();
        }
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        if let Some(queue) = self.active_queue() {
            queue.resume();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(queue) = self.active_queue() {
            queue.stop();
        }
        self.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop, then wait for an in-flight batch to finish. `false` on timeout.
    pub async fn stop_and_wait(&self, timeout: Duration) -> bool {
        self.stop();
        match self.active_queue() {
            Some(queue) => queue.wait_for_drained(timeout).await,
            None => true,
        }
    }
}
