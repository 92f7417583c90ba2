//! FIFO work queue drained by a single async worker.
//!
//! Items are processed one at a time in push order. A worker error is
//! logged and the loop moves on to the next item.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::error;

/// Error type returned by [`SimpleQueue`] workers.
pub type WorkerError = Box<dyn std::error::Error + Send + Sync>;

type Worker<T> = Box<dyn Fn(T) -> BoxFuture<'static, Result<(), WorkerError>> + Send + Sync>;

pub const DEFAULT_SIMPLE_BUSY_INTERVAL: Duration = Duration::from_millis(1);
pub const DEFAULT_SIMPLE_IDLE_INTERVAL: Duration = Duration::from_millis(50);

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

pub struct SimpleQueue<T> {
    items: Mutex<VecDeque<T>>,
    worker: Worker<T>,
    stopped: AtomicBool,
    processing: AtomicBool,
    busy_interval: Duration,
    idle_interval: Duration,
}

impl<T: Send + 'static> SimpleQueue<T> {
    pub fn new<F, Fut>(worker: F) -> Arc<Self>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        Self::with_intervals(worker, DEFAULT_SIMPLE_BUSY_INTERVAL, DEFAULT_SIMPLE_IDLE_INTERVAL)
    }

    pub fn with_intervals<F, Fut>(worker: F, busy_interval: Duration, idle_interval: Duration) -> Arc<Self>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        Arc::new(Self {
            items: Mutex::new(VecDeque::new()),
            worker: Box::new(move |item| worker(item).boxed()),
            stopped: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            busy_interval,
            idle_interval,
        })
    }

    /// Enqueue an item. Returns `false` once the queue has been stopped.
    pub fn push(&self, item: T) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.items.lock().push_back(item);
        true
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.start().await })
    }

    pub async fn start(&self) {
        while !self.is_stopped() {
            let next = {
                let mut items = self.items.lock();
                let item = items.pop_front();
                if item.is_some() {
                    self.processing.store(true, Ordering::SeqCst);
                }
                item
            };

            if let Some(item) = next {
                if let Err(err) = (self.worker)(item).await {
                    error!(error = %err, "queued task failed");
                }
                self.processing.store(false, Ordering::SeqCst);
            }

            let delay = if self.is_empty() { self.idle_interval } else { self.busy_interval };
            sleep(delay).await;
        }
    }

    /// Halt the loop after the current item and drop everything still queued.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.items.lock().clear();
    }

    /// Like [`stop`](Self::stop), but also stops reporting the in-flight
    /// item as processing so [`wait_for_drained`](Self::wait_for_drained)
    /// returns at once.
    pub fn kill(&self) {
        self.stop();
        self.processing.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Wait until the queue is empty and no item is being processed.
    pub async fn wait_for_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_empty() && !self.processing.load(Ordering::SeqCst) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}
