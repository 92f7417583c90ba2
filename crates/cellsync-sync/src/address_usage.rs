//! Address-usage bookkeeping fed by sync events.
//!
//! [`AddressUsageRecorder`] subscribes to an engine's events and forwards
//! every [`SyncEvent::AddressesUsed`] to an [`AddressUsageSink`] through a
//! [`SimpleQueue`], so slow bookkeeping never blocks the sync pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cellsync_core::AddressUsageSink;

use crate::engine::SyncEngine;
use crate::events::SyncEvent;
use crate::simple_queue::{SimpleQueue, WorkerError};

/// One `AddressesUsed` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressUsage {
    pub addresses: Vec<String>,
    pub url: String,
}

pub struct AddressUsageRecorder {
    queue: Arc<SimpleQueue<AddressUsage>>,
    forwarder: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl AddressUsageRecorder {
    /// Start forwarding `engine`'s address events into `sink`.
    pub fn spawn(engine: &SyncEngine, sink: Arc<dyn AddressUsageSink>) -> Self {
        let queue = SimpleQueue::new(move |usage: AddressUsage| {
            let sink = sink.clone();
            async move {
                sink.mark_addresses_used(&usage.addresses, &usage.url)?;
                debug!(count = usage.addresses.len(), url = %usage.url, "marked addresses used");
                Ok::<(), WorkerError>(())
            }
        });
        let worker = queue.spawn();

        let mut events = engine.subscribe();
        let target = queue.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SyncEvent::AddressesUsed { addresses, url }) => {
                        target.push(AddressUsage { addresses, url });
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "address usage recorder lagged behind sync events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self { queue, forwarder, worker }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Stop forwarding, then give queued items up to `timeout` to drain.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        self.forwarder.abort();
        let drained = self.queue.wait_for_drained(timeout).await;
        self.queue.stop();
        if !drained {
            self.worker.abort();
        }
        drained
    }
}
