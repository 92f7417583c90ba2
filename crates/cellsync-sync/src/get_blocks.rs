//! Block and header fetching, plus scanning of fetched blocks.
//!
//! [`GetBlocks`] wraps a [`ChainRpc`] with the engine's retry policy and
//! bounded concurrency, and owns the scan that turns blocks into
//! [`FetchedTransaction`]s for the [`TxSink`].

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use cellsync_core::{
    Address, Block, BlockHeader, ChainRpc, FetchedTransaction, Hash256, LockHashSet, Network,
    RpcError, Transaction, TransactionWithStatus, TxSink,
};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};

/// Log a progress line every this many blocks scanned.
const SCAN_LOG_INTERVAL: u64 = 1_000;

pub struct GetBlocks {
    rpc: Arc<dyn ChainRpc>,
    sink: Arc<dyn TxSink>,
    events: EventBus,
    retry_time: u32,
    retry_interval: Duration,
    max_concurrent_fetches: usize,
    network: Network,
}

impl GetBlocks {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        sink: Arc<dyn TxSink>,
        events: EventBus,
        config: &SyncConfig,
    ) -> Self {
        Self {
            rpc,
            sink,
            events,
            retry_time: config.retry_time,
            retry_interval: config.retry_interval,
            max_concurrent_fetches: config.max_concurrent_fetches.max(1),
            network: config.network,
        }
    }

    pub fn url(&self) -> &str {
        self.rpc.url()
    }

    /// Current tip height, single attempt.
    pub async fn get_tip_block_number(&self) -> Result<u64, SyncError> {
        Ok(self.rpc.get_tip_block_number().await?)
    }

    /// Fetch the blocks at `numbers`, returned in input order.
    ///
    /// Up to `max_concurrent_fetches` requests are in flight at once. The
    /// first failure (after retries) fails the batch immediately, whatever
    /// its position, and drops the outstanding requests.
    pub async fn get_range_blocks(&self, numbers: &[u64]) -> Result<Vec<Block>, SyncError> {
        self.fetch_all(numbers.iter().copied(), |number| self.retry_get_block(number))
            .await
    }

    /// Fetch one block with up to `retry_time` attempts.
    pub async fn retry_get_block(&self, number: u64) -> Result<Block, SyncError> {
        const METHOD: &str = "get_block_by_number";

        let block = self
            .with_retry(METHOD, number, || self.rpc.get_block_by_number(number))
            .await?;
        if block.number() != number {
            return Err(RpcError::Decode {
                method: METHOD,
                message: format!("requested block {number}, node returned {}", block.number()),
            }
            .into());
        }
        Ok(block)
    }

    /// Headers for `numbers`, in input order.
    ///
    /// Hashes are resolved with one batched `get_block_hash` call, then each
    /// header is fetched by hash with retries.
    pub async fn get_range_headers(&self, numbers: &[u64]) -> Result<Vec<BlockHeader>, SyncError> {
        let Some(&first) = numbers.first() else {
            return Ok(Vec::new());
        };

        let hashes = self
            .with_retry("get_block_hashes", first, || self.rpc.get_block_hashes(numbers))
            .await?;
        if hashes.len() != numbers.len() {
            return Err(RpcError::Decode {
                method: "get_block_hashes",
                message: format!("expected {} hashes, got {}", numbers.len(), hashes.len()),
            }
            .into());
        }

        self.fetch_all(hashes.into_iter().zip(numbers.iter().copied()), |(hash, number)| async move {
            let header = self
                .with_retry("get_header", number, || self.rpc.get_header(&hash))
                .await?;
            if header.number != number {
                return Err(SyncError::Rpc(RpcError::Decode {
                    method: "get_header",
                    message: format!(
                        "header {hash} is at height {}, expected {number}",
                        header.number
                    ),
                }));
            }
            Ok::<BlockHeader, SyncError>(header)
        })
        .await
    }

    pub async fn get_header(&self, hash: &Hash256) -> Result<BlockHeader, SyncError> {
        Ok(self.rpc.get_header(hash).await?)
    }

    pub async fn get_transaction(&self, hash: &Hash256) -> Result<TransactionWithStatus, SyncError> {
        Ok(self.rpc.get_transaction(hash).await?)
    }

    /// Scan `blocks` and persist every transaction touching `lock_hashes`.
    ///
    /// Inputs of non-cellbase transactions are resolved against their
    /// previous outputs before matching. Previous transactions are looked up
    /// first among the batch itself, then fetched from the node once per
    /// call. When anything matched, a single
    /// [`SyncEvent::AddressesUsed`] is published with each address once, in
    /// first-seen order. Returns the number of transactions saved.
    pub async fn check_and_save(
        &self,
        blocks: &[Block],
        lock_hashes: &LockHashSet,
    ) -> Result<usize, SyncError> {
        if lock_hashes.is_empty() {
            return Ok(0);
        }

        let mut cache: HashMap<Hash256, Transaction> = blocks
            .iter()
            .flat_map(|block| block.transactions.iter())
            .map(|tx| (tx.hash, tx.clone()))
            .collect();
        let mut seen = HashSet::new();
        let mut addresses = Vec::new();
        let mut saved = 0;

        for block in blocks {
            if block.number() % SCAN_LOG_INTERVAL == 0 {
                debug!(number = block.number(), "scanning block");
            }

            for (index, tx) in block.transactions.iter().enumerate() {
                let mut fetched = FetchedTransaction::from_block_tx(&block.header, index, tx);
                if !fetched.is_cellbase {
                    self.resolve_inputs(&mut fetched, &mut cache).await?;
                }

                let matched: Vec<String> = fetched
                    .matching_locks(lock_hashes)
                    .map(|lock| Address::from_script(lock.clone(), self.network).encode())
                    .collect();
                if matched.is_empty() {
                    continue;
                }

                self.sink.save_fetch_tx(&fetched)?;
                saved += 1;
                debug!(hash = %fetched.hash, number = fetched.block_number, "saved transaction");

                for address in matched {
                    if seen.insert(address.clone()) {
                        addresses.push(address);
                    }
                }
            }
        }

        if !addresses.is_empty() {
            self.events.publish(SyncEvent::AddressesUsed {
                addresses,
                url: self.url().to_string(),
            });
        }
        Ok(saved)
    }

    async fn resolve_inputs(
        &self,
        fetched: &mut FetchedTransaction,
        cache: &mut HashMap<Hash256, Transaction>,
    ) -> Result<(), SyncError> {
        for input in &mut fetched.inputs {
            let out_point = &input.previous_output;
            let previous = match cache.entry(out_point.tx_hash) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let with_status = self.rpc.get_transaction(&out_point.tx_hash).await?;
                    entry.insert(with_status.transaction)
                }
            };
            let output = previous
                .outputs
                .get(out_point.index as usize)
                .ok_or_else(|| SyncError::MissingPreviousOutput(out_point.to_string()))?;
            input.lock = Some(output.lock.clone());
            input.capacity = Some(output.capacity);
        }
        Ok(())
    }

    /// Run `fetch` for every item with bounded concurrency, keeping input
    /// order. Returns on the first error and drops the rest.
    async fn fetch_all<I, T, F, Fut>(&self, items: I, fetch: F) -> Result<Vec<T>, SyncError>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let permits = Semaphore::new(self.max_concurrent_fetches);
        let (permits, fetch) = (&permits, &fetch);
        try_join_all(items.into_iter().map(|item| async move {
            let _permit = permits
                .acquire()
                .await
                .map_err(|e| RpcError::Other(format!("fetch limiter closed: {e}")))?;
            fetch(item).await
        }))
        .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        method: &'static str,
        number: u64,
        mut op: F,
    ) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(method, number, attempt, "rpc recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= self.retry_time => {
                    warn!(method, number, attempt, error = %err, "rpc retries exhausted");
                    return Err(err);
                }
                Err(err) => {
                    debug!(method, number, attempt, error = %err, "rpc failed, retrying");
                    attempt += 1;
                    sleep(self.retry_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::test_utils::{script, transfer, MockChain};
    use cellsync_core::{OutPoint, Script};

    fn setup(chain: Arc<MockChain>) -> (GetBlocks, Arc<MemoryStore>, EventBus) {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::default();
        let get_blocks =
            GetBlocks::new(chain, store.clone(), events.clone(), &SyncConfig::fast());
        (get_blocks, store, events)
    }

    fn tracked(scripts: &[&Script]) -> LockHashSet {
        scripts.iter().map(|s| s.lock_hash()).collect()
    }

    #[tokio::test]
    async fn range_blocks_keep_input_order() {
        let chain = Arc::new(MockChain::with_length(20));
        chain.set_delay(10, Duration::from_millis(40));
        chain.set_delay(11, Duration::from_millis(20));
        let (get_blocks, _, _) = setup(chain);

        let blocks = get_blocks.get_range_blocks(&[10, 11, 12]).await.unwrap();
        let numbers: Vec<u64> = blocks.iter().map(Block::number).collect();
        assert_eq!(numbers, vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let chain = Arc::new(MockChain::with_length(10));
        chain.fail_block(5, 2);
        let (get_blocks, _, _) = setup(chain.clone());

        let block = get_blocks.retry_get_block(5).await.unwrap();
        assert_eq!(block.number(), 5);
        assert_eq!(chain.block_calls(5), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_retry_time() {
        let chain = Arc::new(MockChain::with_length(10));
        chain.fail_block(5, 3);
        let (get_blocks, _, _) = setup(chain.clone());

        let err = get_blocks.retry_get_block(5).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(chain.block_calls(5), 3);
    }

    #[tokio::test]
    async fn range_fails_when_any_block_fails() {
        let chain = Arc::new(MockChain::with_length(10));
        chain.fail_block(3, 10);
        let (get_blocks, _, _) = setup(chain);

        assert!(get_blocks.get_range_blocks(&[1, 2, 3, 4]).await.is_err());
    }

    #[tokio::test]
    async fn range_fails_fast_behind_a_slow_block() {
        let chain = Arc::new(MockChain::with_length(10));
        chain.set_delay(1, Duration::from_secs(5));
        chain.fail_block(3, 10);
        let (get_blocks, _, _) = setup(chain.clone());

        let started = tokio::time::Instant::now();
        let err = get_blocks.get_range_blocks(&[1, 2, 3, 4]).await.unwrap_err();
        assert!(err.is_transient());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(chain.block_calls(3), 3);
    }

    #[tokio::test]
    async fn range_respects_concurrency_limit() {
        let chain = Arc::new(MockChain::with_length(10));
        for number in 1..=4 {
            chain.set_delay(number, Duration::from_millis(50));
        }
        let config = SyncConfig { max_concurrent_fetches: 1, ..SyncConfig::fast() };
        let get_blocks =
            GetBlocks::new(chain, Arc::new(MemoryStore::new()), EventBus::default(), &config);

        let started = tokio::time::Instant::now();
        let blocks = get_blocks.get_range_blocks(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(blocks.len(), 4);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn point_lookups_hit_the_node_once() {
        let chain = Arc::new(MockChain::with_length(6));
        let tx = transfer(0x33, vec![], vec![script(2)]);
        chain.push_transaction(4, tx.clone());
        let (get_blocks, _, _) = setup(chain.clone());

        let header = chain.header(5);
        assert_eq!(get_blocks.get_header(&header.hash).await.unwrap(), header);
        let found = get_blocks.get_transaction(&tx.hash).await.unwrap();
        assert_eq!(found.transaction, tx);
        assert_eq!(found.tx_status.block_hash, Some(chain.header(4).hash));
        assert_eq!(chain.transaction_calls(), 1);
    }

    #[tokio::test]
    async fn point_lookups_report_missing_objects() {
        let chain = Arc::new(MockChain::with_length(3));
        let (get_blocks, _, _) = setup(chain.clone());
        let unknown = Hash256([0x5A; 32]);

        assert!(matches!(
            get_blocks.get_header(&unknown).await,
            Err(SyncError::Rpc(RpcError::NotFound(_)))
        ));
        assert!(matches!(
            get_blocks.get_transaction(&unknown).await,
            Err(SyncError::Rpc(RpcError::NotFound(_)))
        ));
        assert_eq!(chain.transaction_calls(), 1);
    }

    #[tokio::test]
    async fn range_headers_match_chain() {
        let chain = Arc::new(MockChain::with_length(10));
        let (get_blocks, _, _) = setup(chain.clone());

        let headers = get_blocks.get_range_headers(&[4, 5, 6]).await.unwrap();
        assert_eq!(headers, vec![chain.header(4), chain.header(5), chain.header(6)]);
        assert!(get_blocks.get_range_headers(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_lock_hashes_skip_resolution() {
        let chain = Arc::new(MockChain::with_length(3));
        let unknown = OutPoint { tx_hash: Hash256([0xEE; 32]), index: 0 };
        chain.push_transaction(3, transfer(0x01, vec![unknown], vec![script(1)]));
        let (get_blocks, store, _) = setup(chain.clone());

        let blocks = get_blocks.get_range_blocks(&[3]).await.unwrap();
        assert_eq!(get_blocks.check_and_save(&blocks, &LockHashSet::new()).await.unwrap(), 0);
        assert!(store.transactions().is_empty());
        assert_eq!(chain.transaction_calls(), 0);
    }

    #[tokio::test]
    async fn saves_output_and_input_matches() {
        let chain = Arc::new(MockChain::with_length(2));
        let mine = script(7);
        let other = script(8);

        // Block 1: pays `mine`. Block 2: spends it to `other`.
        let receive = transfer(0x10, vec![], vec![mine.clone()]);
        let spend = transfer(
            0x11,
            vec![OutPoint { tx_hash: receive.hash, index: 0 }],
            vec![other.clone()],
        );
        chain.push_transaction(1, receive.clone());
        chain.push_transaction(2, spend.clone());
        let (get_blocks, store, events) = setup(chain.clone());
        let mut rx = events.subscribe();

        let blocks = get_blocks.get_range_blocks(&[1, 2]).await.unwrap();
        let saved = get_blocks.check_and_save(&blocks, &tracked(&[&mine])).await.unwrap();
        assert_eq!(saved, 2);

        let stored = store.transaction(&spend.hash).unwrap();
        assert_eq!(stored.inputs[0].lock.as_ref(), Some(&mine));
        assert_eq!(stored.block_number, 2);
        // Previous output came from the batch itself.
        assert_eq!(chain.transaction_calls(), 0);

        let expected = Address::from_script(mine, Network::Mainnet).encode();
        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::AddressesUsed { addresses: vec![expected], url: chain.url().to_string() }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn previous_outputs_outside_batch_are_fetched_once() {
        let chain = Arc::new(MockChain::with_length(3));
        let mine = script(3);
        let funding = transfer(0x20, vec![], vec![mine.clone(), mine.clone()]);
        chain.insert_transaction(funding.clone());
        chain.push_transaction(
            3,
            transfer(0x21, vec![OutPoint { tx_hash: funding.hash, index: 0 }], vec![script(9)]),
        );
        chain.push_transaction(
            3,
            transfer(0x22, vec![OutPoint { tx_hash: funding.hash, index: 1 }], vec![script(9)]),
        );
        let (get_blocks, store, _) = setup(chain.clone());

        let blocks = get_blocks.get_range_blocks(&[3]).await.unwrap();
        let saved = get_blocks.check_and_save(&blocks, &tracked(&[&mine])).await.unwrap();
        assert_eq!(saved, 2);
        assert_eq!(store.transactions().len(), 2);
        assert_eq!(chain.transaction_calls(), 1);
    }

    #[tokio::test]
    async fn cellbase_inputs_are_not_resolved() {
        let chain = Arc::new(MockChain::with_length(0));
        let miner = script(5);
        chain.extend_with_cellbase_lock(1, miner.clone());
        let (get_blocks, store, _) = setup(chain.clone());

        let blocks = get_blocks.get_range_blocks(&[1]).await.unwrap();
        let saved = get_blocks.check_and_save(&blocks, &tracked(&[&miner])).await.unwrap();
        assert_eq!(saved, 1);
        let stored = store.transactions();
        assert!(stored[0].is_cellbase);
        assert!(stored[0].inputs.iter().all(|input| input.lock.is_none()));
        assert_eq!(chain.transaction_calls(), 0);
    }

    #[tokio::test]
    async fn one_event_per_batch_with_deduplicated_addresses() {
        let chain = Arc::new(MockChain::with_length(2));
        let a = script(1);
        let b = script(2);
        chain.push_transaction(1, transfer(0x30, vec![], vec![b.clone(), a.clone()]));
        chain.push_transaction(2, transfer(0x31, vec![], vec![a.clone()]));
        let (get_blocks, _, events) = setup(chain);
        let mut rx = events.subscribe();

        let blocks = get_blocks.get_range_blocks(&[1, 2]).await.unwrap();
        get_blocks.check_and_save(&blocks, &tracked(&[&a, &b])).await.unwrap();

        let SyncEvent::AddressesUsed { addresses, .. } = rx.try_recv().unwrap() else {
            panic!("expected AddressesUsed");
        };
        assert_eq!(
            addresses,
            vec![
                Address::from_script(b, Network::Mainnet).encode(),
                Address::from_script(a, Network::Mainnet).encode(),
            ]
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn no_event_when_nothing_matches() {
        let chain = Arc::new(MockChain::with_length(2));
        chain.push_transaction(1, transfer(0x40, vec![], vec![script(1)]));
        let (get_blocks, store, events) = setup(chain);
        let mut rx = events.subscribe();

        let blocks = get_blocks.get_range_blocks(&[1, 2]).await.unwrap();
        let saved = get_blocks.check_and_save(&blocks, &tracked(&[&script(99)])).await.unwrap();
        assert_eq!(saved, 0);
        assert!(store.transactions().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_previous_output_index_is_an_error() {
        let chain = Arc::new(MockChain::with_length(2));
        let funding = transfer(0x50, vec![], vec![script(1)]);
        chain.push_transaction(1, funding.clone());
        chain.push_transaction(
            2,
            transfer(0x51, vec![OutPoint { tx_hash: funding.hash, index: 4 }], vec![script(2)]),
        );
        let (get_blocks, _, _) = setup(chain);

        let blocks = get_blocks.get_range_blocks(&[1, 2]).await.unwrap();
        let err = get_blocks.check_and_save(&blocks, &tracked(&[&script(1)])).await.unwrap_err();
        assert!(matches!(err, SyncError::MissingPreviousOutput(_)));
    }
}
