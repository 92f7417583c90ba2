//! Notifications published by the sync engine.
//!
//! Each [`SyncEngine`](crate::SyncEngine) owns one [`EventBus`]; consumers
//! call `subscribe()` and receive every event published after that point.

use tokio::sync::broadcast;

/// Buffered events per subscriber before it starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The checkpoint moved, forward after a batch or backward after a fork.
    BlockNumberChanged { block_number: u64 },
    /// Tracked addresses appeared in a saved batch.
    AddressesUsed { addresses: Vec<String>, url: String },
}

/// Broadcast channel for [`SyncEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Returns how many received it; an event
    /// published with nobody listening is dropped.
    pub fn publish(&self, event: SyncEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(SyncEvent::BlockNumberChanged { block_number: 1 }), 0);
    }

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(SyncEvent::BlockNumberChanged { block_number: 1 });
        bus.publish(SyncEvent::BlockNumberChanged { block_number: 2 });
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::BlockNumberChanged { block_number: 1 });
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::BlockNumberChanged { block_number: 2 });
    }

    #[test]
    fn separate_buses_are_isolated() {
        let a = EventBus::default();
        let b = EventBus::default();
        let mut rx_b = b.subscribe();
        a.publish(SyncEvent::BlockNumberChanged { block_number: 7 });
        assert!(rx_b.try_recv().is_err());
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
    }
}
