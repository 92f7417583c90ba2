//! # cellsync-store
//! RocksDB persistence for synced wallet data.
//!
//! [`RocksWalletStore`] implements the engine's [`TxSink`],
//! [`CheckpointStore`], and [`AddressUsageSink`] traits over four column
//! families:
//!
//! | CF | key | value |
//! |----|-----|-------|
//! | `transactions` | tx hash | bincode [`FetchedTransaction`] |
//! | `block_index` | `u64-BE(block_number) \|\| tx hash` | empty |
//! | `metadata` | `current_block_number` | `u64-LE` |
//! | `address_usage` | address string | node URL |
//!
//! `block_index` keys sort by height, which makes fork purges a single
//! forward scan. Every mutation is one atomic [`WriteBatch`].

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use cellsync_core::{
    AddressUsageSink, CheckpointStore, FetchedTransaction, Hash256, StoreError, TxSink,
};

const CF_TRANSACTIONS: &str = "transactions";
const CF_BLOCK_INDEX: &str = "block_index";
const CF_METADATA: &str = "metadata";
const CF_ADDRESS_USAGE: &str = "address_usage";

const ALL_CFS: &[&str] = &[CF_TRANSACTIONS, CF_BLOCK_INDEX, CF_METADATA, CF_ADDRESS_USAGE];

const META_CURRENT_BLOCK_NUMBER: &[u8] = b"current_block_number";

pub struct RocksWalletStore {
    db: DB,
}

impl RocksWalletStore {
    /// Open or create a store at `path`, creating missing column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        info!(path = %path.as_ref().display(), "opened wallet store");
        Ok(Self { db })
    }

    pub fn transaction(&self, hash: &Hash256) -> Result<Option<FetchedTransaction>, StoreError> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        self.db
            .get_cf(cf, hash.as_bytes())
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .map(|bytes| decode_tx(&bytes))
            .transpose()
    }

    /// Transactions recorded at `from_block` or above, ordered by height.
    pub fn transactions_from(&self, from_block: u64) -> Result<Vec<FetchedTransaction>, StoreError> {
        let mut txs = Vec::new();
        for hash in self.indexed_hashes_from(from_block)? {
            let tx = self.transaction(&hash)?.ok_or_else(|| {
                StoreError::Corrupted(format!("block index points at missing transaction {hash}"))
            })?;
            txs.push(tx);
        }
        Ok(txs)
    }

    pub fn transaction_count(&self) -> Result<usize, StoreError> {
        Ok(self.indexed_hashes_from(0)?.len())
    }

    /// Node URL an address was last seen on.
    pub fn address_usage(&self, address: &str) -> Result<Option<String>, StoreError> {
        let cf = self.cf_handle(CF_ADDRESS_USAGE)?;
        self.db
            .get_cf(cf, address.as_bytes())
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .map(|bytes| {
                String::from_utf8(bytes).map_err(|e| StoreError::Corrupted(e.to_string()))
            })
            .transpose()
    }

    /// Every used address with its URL, in key order.
    pub fn used_addresses(&self) -> Result<Vec<(String, String)>, StoreError> {
        let cf = self.cf_handle(CF_ADDRESS_USAGE)?;
        let mut used = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Storage(e.to_string()))?;
            let address =
                String::from_utf8(key.to_vec()).map_err(|e| StoreError::Corrupted(e.to_string()))?;
            let url =
                String::from_utf8(value.to_vec()).map_err(|e| StoreError::Corrupted(e.to_string()))?;
            used.push((address, url));
        }
        Ok(used)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(|e| StoreError::Storage(e.to_string()))
    }

    // --- Internal helpers ---

    fn indexed_hashes_from(&self, from_block: u64) -> Result<Vec<Hash256>, StoreError> {
        let cf = self.cf_handle(CF_BLOCK_INDEX)?;
        let start = from_block.to_be_bytes();
        let mut hashes = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::From(&start, Direction::Forward)) {
            let (key, _) = item.map_err(|e| StoreError::Storage(e.to_string()))?;
            let (_, hash) = split_index_key(&key)?;
            hashes.push(hash);
        }
        Ok(hashes)
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Storage(format!("missing column family: {name}")))
    }
}

fn index_key(block_number: u64, hash: &Hash256) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&block_number.to_be_bytes());
    key[8..].copy_from_slice(hash.as_bytes());
    key
}

fn split_index_key(key: &[u8]) -> Result<(u64, Hash256), StoreError> {
    let bad = || StoreError::Corrupted(format!("bad index key length {}", key.len()));
    let (number, hash) = key.split_first_chunk::<8>().ok_or_else(bad)?;
    let hash: [u8; 32] = hash.try_into().map_err(|_| bad())?;
    Ok((u64::from_be_bytes(*number), Hash256(hash)))
}

fn encode_tx(tx: &FetchedTransaction) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(tx, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_tx(bytes: &[u8]) -> Result<FetchedTransaction, StoreError> {
    let (tx, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(tx)
}

impl TxSink for RocksWalletStore {
    fn save_fetch_tx(&self, tx: &FetchedTransaction) -> Result<(), StoreError> {
        let cf_txs = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_index = self.cf_handle(CF_BLOCK_INDEX)?;
        let mut batch = WriteBatch::default();

        // A transaction re-mined at another height after a fork moves its index entry.
        if let Some(existing) = self.transaction(&tx.hash)? {
            if existing.block_number != tx.block_number {
                batch.delete_cf(cf_index, index_key(existing.block_number, &existing.hash));
            }
        }
        batch.put_cf(cf_txs, tx.hash.as_bytes(), encode_tx(tx)?);
        batch.put_cf(cf_index, index_key(tx.block_number, &tx.hash), b"");

        self.db.write(batch).map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn delete_when_fork(&self, block_number: u64) -> Result<(), StoreError> {
        let cf_txs = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_index = self.cf_handle(CF_BLOCK_INDEX)?;
        let mut batch = WriteBatch::default();
        let mut purged = 0usize;

        let start = block_number.to_be_bytes();
        for item in self.db.iterator_cf(cf_index, IteratorMode::From(&start, Direction::Forward)) {
            let (key, _) = item.map_err(|e| StoreError::Storage(e.to_string()))?;
            let (_, hash) = split_index_key(&key)?;
            batch.delete_cf(cf_index, &key);
            batch.delete_cf(cf_txs, hash.as_bytes());
            purged += 1;
        }

        if purged > 0 {
            self.db.write(batch).map_err(|e| StoreError::Storage(e.to_string()))?;
        }
        debug!(block_number, purged, "purged forked transactions");
        Ok(())
    }
}

impl CheckpointStore for RocksWalletStore {
    fn load_block_number(&self) -> Result<Option<u64>, StoreError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self
            .db
            .get_cf(cf, META_CURRENT_BLOCK_NUMBER)
            .map_err(|e| StoreError::Storage(e.to_string()))?
        {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::Corrupted("invalid checkpoint value length".into())
                })?;
                Ok(Some(u64::from_le_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    fn save_block_number(&self, number: u64) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_METADATA)?;
        self.db
            .put_cf(cf, META_CURRENT_BLOCK_NUMBER, number.to_le_bytes())
            .map_err(|e| StoreError::Storage(e.to_string()))
    }
}

impl AddressUsageSink for RocksWalletStore {
    fn mark_addresses_used(&self, addresses: &[String], url: &str) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_ADDRESS_USAGE)?;
        let mut batch = WriteBatch::default();
        for address in addresses {
            batch.put_cf(cf, address.as_bytes(), url.as_bytes());
        }
        self.db.write(batch).map_err(|e| StoreError::Storage(e.to_string()))
    }
}
