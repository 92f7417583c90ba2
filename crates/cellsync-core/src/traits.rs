//! Trait interfaces between the sync engine and its collaborators.
//!
//! - [`ChainRpc`]: read access to a chain node (cellsync-sync implements over JSON-RPC)
//! - [`TxSink`]: persistence of matched transactions (cellsync-store implements)
//! - [`CheckpointStore`]: durable "last fully processed block" record
//! - [`AddressUsageSink`]: bookkeeping of which addresses have seen activity

use async_trait::async_trait;

use crate::error::{RpcError, StoreError};
use crate::types::{Block, BlockHeader, FetchedTransaction, Hash256, TransactionWithStatus};

/// Read-only access to a remote chain node.
///
/// Implementations perform exactly one remote call per method (or one
/// batched call for [`get_block_hashes`](Self::get_block_hashes)); retry
/// policy belongs to the caller.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Endpoint identifier reported in address-usage events.
    fn url(&self) -> &str;

    /// Height of the node's current tip.
    async fn get_tip_block_number(&self) -> Result<u64, RpcError>;

    /// Full block at `number`.
    async fn get_block_by_number(&self, number: u64) -> Result<Block, RpcError>;

    /// Hash of the block at `number` on the node's current main chain.
    async fn get_block_hash(&self, number: u64) -> Result<Hash256, RpcError>;

    /// Hashes for several heights, in the order given.
    ///
    /// Default implementation issues one [`get_block_hash`](Self::get_block_hash)
    /// per number; JSON-RPC clients override it with a batch request.
    async fn get_block_hashes(&self, numbers: &[u64]) -> Result<Vec<Hash256>, RpcError> {
        let mut hashes = Vec::with_capacity(numbers.len());
        for &number in numbers {
            hashes.push(self.get_block_hash(number).await?);
        }
        Ok(hashes)
    }

    /// Header by block hash.
    async fn get_header(&self, hash: &Hash256) -> Result<BlockHeader, RpcError>;

    /// Transaction with its commit status.
    async fn get_transaction(&self, hash: &Hash256) -> Result<TransactionWithStatus, RpcError>;
}

/// Persistence sink for transactions that touch tracked lock hashes.
pub trait TxSink: Send + Sync {
    /// Insert or replace a transaction. Must be idempotent by `tx.hash`.
    fn save_fetch_tx(&self, tx: &FetchedTransaction) -> Result<(), StoreError>;

    /// Remove every transaction recorded at `block_number` or above.
    fn delete_when_fork(&self, block_number: u64) -> Result<(), StoreError>;
}

/// Durable storage of the sync checkpoint.
pub trait CheckpointStore: Send + Sync {
    /// Last persisted checkpoint, `None` if never written.
    fn load_block_number(&self) -> Result<Option<u64>, StoreError>;

    /// Persist a new checkpoint.
    fn save_block_number(&self, number: u64) -> Result<(), StoreError>;
}

/// Records that addresses have appeared on chain.
pub trait AddressUsageSink: Send + Sync {
    /// Mark every address in `addresses` as used, tagging the node `url`
    /// the activity was observed on. Repeated marks are no-ops.
    fn mark_addresses_used(&self, addresses: &[String], url: &str) -> Result<(), StoreError>;
}
