//! Cached, persisted sync checkpoint.
//!
//! The checkpoint is the height of the last fully processed block; zero
//! when nothing has been stored yet. Writes go to the [`CheckpointStore`]
//! first, then the cache, then a [`SyncEvent::BlockNumberChanged`] goes out.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use cellsync_core::{CheckpointStore, StoreError};

use crate::events::{EventBus, SyncEvent};

pub struct BlockNumber {
    store: Arc<dyn CheckpointStore>,
    events: EventBus,
    current: Mutex<Option<u64>>,
}

impl BlockNumber {
    pub fn new(store: Arc<dyn CheckpointStore>, events: EventBus) -> Self {
        Self { store, events, current: Mutex::new(None) }
    }

    /// The checkpoint, loaded from the store on first access.
    pub fn get_current(&self) -> Result<u64, StoreError> {
        let mut current = self.current.lock();
        if let Some(number) = *current {
            return Ok(number);
        }
        let number = self.store.load_block_number()?.unwrap_or(0);
        *current = Some(number);
        Ok(number)
    }

    /// Persist and publish a new checkpoint.
    ///
    /// The lock is held across the store write so concurrent callers cannot
    /// interleave a stale cache with a newer persisted value.
    pub fn update_current(&self, number: u64) -> Result<(), StoreError> {
        {
            let mut current = self.current.lock();
            self.store.save_block_number(number)?;
            *current = Some(number);
        }
        trace!(number, "checkpoint updated");
        self.events.publish(SyncEvent::BlockNumberChanged { block_number: number });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn defaults_to_zero() {
        let store = Arc::new(MemoryStore::new());
        let number = BlockNumber::new(store, EventBus::default());
        assert_eq!(number.get_current().unwrap(), 0);
    }

    #[test]
    fn loads_persisted_value_once() {
        let store = Arc::new(MemoryStore::with_checkpoint(42));
        let number = BlockNumber::new(store.clone(), EventBus::default());
        assert_eq!(number.get_current().unwrap(), 42);

        // Later store changes are not observed through the cache.
        store.save_block_number_raw(7);
        assert_eq!(number.get_current().unwrap(), 42);
    }

    #[test]
    fn update_persists_and_publishes() {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let number = BlockNumber::new(store.clone(), events);

        number.update_current(12).unwrap();
        assert_eq!(number.get_current().unwrap(), 12);
        assert_eq!(store.checkpoint(), Some(12));
        assert_eq!(rx.try_recv().unwrap(), SyncEvent::BlockNumberChanged { block_number: 12 });
    }

    #[test]
    fn failed_write_leaves_cache_untouched() {
        let store = Arc::new(MemoryStore::with_checkpoint(5));
        let number = BlockNumber::new(store.clone(), EventBus::default());
        assert_eq!(number.get_current().unwrap(), 5);

        store.fail_writes(true);
        assert!(number.update_current(9).is_err());
        assert_eq!(number.get_current().unwrap(), 5);
    }
}
