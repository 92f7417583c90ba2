//! In-memory implementation of the engine's storage traits.
//!
//! Useful for embedding the engine without a database and as the default
//! store in tests. Writes can be made to fail on demand.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use cellsync_core::{
    AddressUsageSink, CheckpointStore, FetchedTransaction, Hash256, StoreError, TxSink,
};

#[derive(Default)]
struct State {
    transactions: BTreeMap<Hash256, FetchedTransaction>,
    checkpoint: Option<u64>,
    address_usage: HashMap<String, String>,
    fork_deletes: Vec<u64>,
    fail_writes: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(number: u64) -> Self {
        let store = Self::default();
        store.state.lock().checkpoint = Some(number);
        store
    }

    /// Saved transactions ordered by block number, then hash.
    pub fn transactions(&self) -> Vec<FetchedTransaction> {
        let mut txs: Vec<_> = self.state.lock().transactions.values().cloned().collect();
        txs.sort_by_key(|tx| (tx.block_number, tx.hash));
        txs
    }

    pub fn transaction(&self, hash: &Hash256) -> Option<FetchedTransaction> {
        self.state.lock().transactions.get(hash).cloned()
    }

    pub fn checkpoint(&self) -> Option<u64> {
        self.state.lock().checkpoint
    }

    /// Overwrite the checkpoint without going through the trait.
    pub fn save_block_number_raw(&self, number: u64) {
        self.state.lock().checkpoint = Some(number);
    }

    /// Heights passed to `delete_when_fork`, in call order.
    pub fn fork_deletes(&self) -> Vec<u64> {
        self.state.lock().fork_deletes.clone()
    }

    /// Node URL an address was last seen on.
    pub fn address_usage(&self, address: &str) -> Option<String> {
        self.state.lock().address_usage.get(address).cloned()
    }

    pub fn used_address_count(&self) -> usize {
        self.state.lock().address_usage.len()
    }

    /// Make every subsequent write fail with [`StoreError::Storage`].
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }
}

fn check_writable(state: &State) -> Result<(), StoreError> {
    if state.fail_writes {
        return Err(StoreError::Storage("writes disabled".into()));
    }
    Ok(())
}

impl TxSink for MemoryStore {
    fn save_fetch_tx(&self, tx: &FetchedTransaction) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        check_writable(&state)?;
        state.transactions.insert(tx.hash, tx.clone());
        Ok(())
    }

    fn delete_when_fork(&self, block_number: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        check_writable(&state)?;
        state.transactions.retain(|_, tx| tx.block_number < block_number);
        state.fork_deletes.push(block_number);
        Ok(())
    }
}

impl CheckpointStore for MemoryStore {
    fn load_block_number(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.state.lock().checkpoint)
    }

    fn save_block_number(&self, number: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        check_writable(&state)?;
        state.checkpoint = Some(number);
        Ok(())
    }
}

impl AddressUsageSink for MemoryStore {
    fn mark_addresses_used(&self, addresses: &[String], url: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        check_writable(&state)?;
        for address in addresses {
            state.address_usage.insert(address.clone(), url.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsync_core::BlockHeader;

    fn tx(seed: u8, block_number: u64) -> FetchedTransaction {
        let header = BlockHeader {
            number: block_number,
            hash: Hash256([seed; 32]),
            parent_hash: Hash256::ZERO,
            timestamp: 0,
        };
        let mut tx = FetchedTransaction::from_block_tx(
            &header,
            1,
            &cellsync_core::Transaction {
                hash: Hash256([seed; 32]),
                version: 0,
                inputs: vec![],
                outputs: vec![],
                outputs_data: vec![],
            },
        );
        tx.block_number = block_number;
        tx
    }

    #[test]
    fn save_is_idempotent() {
        let store = MemoryStore::new();
        store.save_fetch_tx(&tx(1, 10)).unwrap();
        store.save_fetch_tx(&tx(1, 10)).unwrap();
        assert_eq!(store.transactions().len(), 1);
    }

    #[test]
    fn delete_when_fork_purges_at_and_above() {
        let store = MemoryStore::new();
        for (seed, number) in [(1, 97), (2, 98), (3, 99), (4, 100)] {
            store.save_fetch_tx(&tx(seed, number)).unwrap();
        }
        store.delete_when_fork(98).unwrap();
        let left: Vec<u64> = store.transactions().iter().map(|t| t.block_number).collect();
        assert_eq!(left, vec![97]);
        assert_eq!(store.fork_deletes(), vec![98]);
    }

    #[test]
    fn failing_writes() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        assert!(store.save_fetch_tx(&tx(1, 1)).is_err());
        assert!(store.save_block_number(3).is_err());
        assert_eq!(store.load_block_number().unwrap(), None);
    }

    #[test]
    fn address_usage_records_latest_url() {
        let store = MemoryStore::new();
        let addrs = vec!["ckb1a".to_string(), "ckb1b".to_string()];
        store.mark_addresses_used(&addrs, "http://a").unwrap();
        store.mark_addresses_used(&addrs[..1], "http://b").unwrap();
        assert_eq!(store.address_usage("ckb1a").as_deref(), Some("http://b"));
        assert_eq!(store.address_usage("ckb1b").as_deref(), Some("http://a"));
        assert_eq!(store.used_address_count(), 2);
    }
}
