//! Test fixtures: a scripted in-memory chain and transaction builders.
//!
//! Available to this crate's tests and, with the `testing` feature, to
//! downstream test suites.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

use cellsync_core::{
    Block, BlockHeader, CellInput, CellOutput, ChainRpc, Hash256, HashType, OutPoint, RpcError,
    Script, Transaction, TransactionWithStatus, TxStatus,
};

const GENESIS_TIMESTAMP: u64 = 1_700_000_000_000;
const BLOCK_INTERVAL_MS: u64 = 8_000;
const OUTPUT_CAPACITY: u64 = 100 * 100_000_000;
const CELLBASE_CAPACITY: u64 = 1_000 * 100_000_000;

/// Lock script with `args = [seed; 20]`.
pub fn script(seed: u8) -> Script {
    Script {
        code_hash: Hash256([0x9b; 32]),
        hash_type: HashType::Type,
        args: vec![seed; 20],
    }
}

/// Lock used for cellbase outputs unless a test picks its own.
pub fn miner_script() -> Script {
    script(0xFF)
}

pub fn block_hash(number: u64, seed: u8) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"block");
    hasher.update(&number.to_le_bytes());
    hasher.update(&[seed]);
    Hash256(*hasher.finalize().as_bytes())
}

pub fn header(number: u64, parent_hash: Hash256, seed: u8) -> BlockHeader {
    BlockHeader {
        number,
        hash: block_hash(number, seed),
        parent_hash,
        timestamp: GENESIS_TIMESTAMP + number * BLOCK_INTERVAL_MS,
    }
}

/// `count` headers from `start`, each the parent of the next. The first
/// header's parent is `block_hash(start - 1, seed)` (zero for genesis).
pub fn chained_headers(start: u64, count: u64, seed: u8) -> Vec<BlockHeader> {
    let mut parent = match start {
        0 => Hash256::ZERO,
        n => block_hash(n - 1, seed),
    };
    (start..start + count)
        .map(|number| {
            let h = header(number, parent, seed);
            parent = h.hash;
            h
        })
        .collect()
}

pub fn cellbase(number: u64, seed: u8, lock: Script) -> Transaction {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"cellbase");
    hasher.update(&number.to_le_bytes());
    hasher.update(&[seed]);
    Transaction {
        hash: Hash256(*hasher.finalize().as_bytes()),
        version: 0,
        inputs: vec![CellInput {
            previous_output: OutPoint { tx_hash: Hash256::ZERO, index: u32::MAX },
            since: number,
        }],
        outputs: vec![CellOutput { capacity: CELLBASE_CAPACITY, lock, type_script: None }],
        outputs_data: vec![Vec::new()],
    }
}

/// A non-cellbase transaction spending `inputs` into one output per lock.
pub fn transfer(seed: u8, inputs: Vec<OutPoint>, locks: Vec<Script>) -> Transaction {
    let hash = Hash256(*blake3::hash(&[b't', b'x', seed]).as_bytes());
    let outputs_data = vec![Vec::new(); locks.len()];
    Transaction {
        hash,
        version: 0,
        inputs: inputs
            .into_iter()
            .map(|previous_output| CellInput { previous_output, since: 0 })
            .collect(),
        outputs: locks
            .into_iter()
            .map(|lock| CellOutput { capacity: OUTPUT_CAPACITY, lock, type_script: None })
            .collect(),
        outputs_data,
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<Block>,
    loose_transactions: HashMap<Hash256, Transaction>,
    failures: HashMap<u64, u32>,
    delays: HashMap<u64, Duration>,
    block_calls: HashMap<u64, u32>,
    transaction_calls: u32,
    offline: bool,
    branch_seed: u8,
}

impl ChainState {
    fn append(&mut self, count: u64, lock: &Script) {
        let seed = self.branch_seed;
        for _ in 0..count {
            let number = self.blocks.len() as u64;
            let parent = self.blocks.last().map(|b| b.header.hash).unwrap_or(Hash256::ZERO);
            self.blocks.push(Block {
                header: header(number, parent, seed),
                transactions: vec![cellbase(number, seed, lock.clone())],
            });
        }
    }

    fn check_online(&self) -> Result<(), RpcError> {
        if self.offline {
            return Err(RpcError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

/// An in-memory chain node with scripted failures, delays, and reorgs.
pub struct MockChain {
    url: String,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub const DEFAULT_URL: &'static str = "mock://node";

    /// Genesis plus `length` blocks, so the tip is at height `length`.
    pub fn with_length(length: u64) -> Self {
        let mut state = ChainState::default();
        state.append(length + 1, &miner_script());
        Self { url: Self::DEFAULT_URL.to_string(), state: Mutex::new(state) }
    }

    pub fn tip(&self) -> u64 {
        self.state.lock().blocks.len() as u64 - 1
    }

    /// Header at `number` on the current chain. Panics if absent.
    pub fn header(&self, number: u64) -> BlockHeader {
        self.state.lock().blocks[number as usize].header.clone()
    }

    pub fn block(&self, number: u64) -> Option<Block> {
        self.state.lock().blocks.get(number as usize).cloned()
    }

    /// Append `count` blocks on top of the tip.
    pub fn extend(&self, count: u64) {
        self.state.lock().append(count, &miner_script());
    }

    /// Append `count` blocks whose cellbase pays `lock`.
    pub fn extend_with_cellbase_lock(&self, count: u64, lock: Script) {
        self.state.lock().append(count, &lock);
    }

    /// Replace every block from `number` upward with a sibling branch of the
    /// same length. Transactions in the replaced blocks are dropped; later
    /// [`extend`](Self::extend) calls build on the new branch.
    pub fn reorg_from(&self, number: u64, seed: u8) {
        let mut state = self.state.lock();
        let length = state.blocks.len() as u64;
        state.blocks.truncate(number as usize);
        state.branch_seed = seed;
        state.append(length - number, &miner_script());
    }

    /// Append `tx` to the block at `number`.
    pub fn push_transaction(&self, number: u64, tx: Transaction) {
        self.state.lock().blocks[number as usize].transactions.push(tx);
    }

    /// Make `tx` retrievable by hash without placing it in a block.
    pub fn insert_transaction(&self, tx: Transaction) {
        self.state.lock().loose_transactions.insert(tx.hash, tx);
    }

    /// Break the parent link of the block at `number`.
    pub fn corrupt_parent(&self, number: u64) {
        self.state.lock().blocks[number as usize].header.parent_hash = Hash256([0xBA; 32]);
    }

    /// Fail the next `times` fetches of block `number`.
    pub fn fail_block(&self, number: u64, times: u32) {
        self.state.lock().failures.insert(number, times);
    }

    pub fn set_delay(&self, number: u64, delay: Duration) {
        self.state.lock().delays.insert(number, delay);
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn block_calls(&self, number: u64) -> u32 {
        self.state.lock().block_calls.get(&number).copied().unwrap_or(0)
    }

    pub fn transaction_calls(&self) -> u32 {
        self.state.lock().transaction_calls
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_tip_block_number(&self) -> Result<u64, RpcError> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state.blocks.len() as u64 - 1)
    }

    async fn get_block_by_number(&self, number: u64) -> Result<Block, RpcError> {
        let (delay, result) = {
            let mut state = self.state.lock();
            state.check_online()?;
            *state.block_calls.entry(number).or_default() += 1;
            let result = match state.failures.get_mut(&number) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Err(RpcError::Transport(format!("injected failure for block {number}")))
                }
                _ => state
                    .blocks
                    .get(number as usize)
                    .cloned()
                    .ok_or_else(|| RpcError::NotFound(format!("block {number}"))),
            };
            (state.delays.get(&number).copied(), result)
        };
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        result
    }

    async fn get_block_hash(&self, number: u64) -> Result<Hash256, RpcError> {
        let state = self.state.lock();
        state.check_online()?;
        state
            .blocks
            .get(number as usize)
            .map(|b| b.header.hash)
            .ok_or_else(|| RpcError::NotFound(format!("block hash {number}")))
    }

    async fn get_header(&self, hash: &Hash256) -> Result<BlockHeader, RpcError> {
        let state = self.state.lock();
        state.check_online()?;
        state
            .blocks
            .iter()
            .find(|b| b.header.hash == *hash)
            .map(|b| b.header.clone())
            .ok_or_else(|| RpcError::NotFound(format!("header {hash}")))
    }

    async fn get_transaction(&self, hash: &Hash256) -> Result<TransactionWithStatus, RpcError> {
        let mut state = self.state.lock();
        state.check_online()?;
        state.transaction_calls += 1;
        let committed = state.blocks.iter().find_map(|b| {
            b.transactions.iter().find(|tx| tx.hash == *hash).map(|tx| (tx.clone(), b.header.hash))
        });
        match committed {
            Some((transaction, block_hash)) => Ok(TransactionWithStatus {
                transaction,
                tx_status: TxStatus { status: "committed".into(), block_hash: Some(block_hash) },
            }),
            None => state
                .loose_transactions
                .get(hash)
                .cloned()
                .map(|transaction| TransactionWithStatus {
                    transaction,
                    tx_status: TxStatus { status: "committed".into(), block_hash: None },
                })
                .ok_or_else(|| RpcError::NotFound(format!("transaction {hash}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_for_check::is_chained;

    #[test]
    fn chain_is_linked() {
        let chain = MockChain::with_length(5);
        let headers: Vec<_> = (0..=5).map(|n| chain.header(n)).collect();
        assert!(is_chained(&headers));
        assert_eq!(chain.tip(), 5);
        assert_eq!(headers, chained_headers(0, 6, 0));
    }

    #[test]
    fn reorg_changes_hashes_from_fork_point() {
        let chain = MockChain::with_length(10);
        let before: Vec<_> = (0..=10).map(|n| chain.header(n)).collect();
        chain.reorg_from(6, 1);
        let after: Vec<_> = (0..=10).map(|n| chain.header(n)).collect();
        assert_eq!(before[..6], after[..6]);
        assert!(before[6..].iter().zip(&after[6..]).all(|(a, b)| a.hash != b.hash));
        assert!(is_chained(&after));
    }

    #[test]
    fn extend_after_reorg_stays_on_branch() {
        let chain = MockChain::with_length(4);
        chain.reorg_from(3, 2);
        chain.extend(3);
        let headers: Vec<_> = (0..=chain.tip()).map(|n| chain.header(n)).collect();
        assert!(is_chained(&headers));
        assert_eq!(chain.tip(), 7);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let chain = MockChain::with_length(3);
        chain.fail_block(2, 1);
        assert!(chain.get_block_by_number(2).await.is_err());
        assert!(chain.get_block_by_number(2).await.is_ok());
        assert_eq!(chain.block_calls(2), 2);
    }
}
