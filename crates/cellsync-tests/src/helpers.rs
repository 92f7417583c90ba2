//! Shared helpers for the integration tests.

use std::sync::Arc;

use cellsync_core::{ChainRpc, LockHashSet, Script};
use cellsync_store::RocksWalletStore;
use cellsync_sync::{SyncConfig, SyncEngine};

pub use cellsync_sync::test_utils::{script, transfer, wait_until, MockChain};

/// A wallet store in a fresh temporary directory.
pub fn temp_store() -> (Arc<RocksWalletStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksWalletStore::open(dir.path().join("wallet")).unwrap();
    (Arc::new(store), dir)
}

/// Engine over `rpc` persisting into `store`, with fast test intervals.
pub fn engine(rpc: Arc<dyn ChainRpc>, store: &Arc<RocksWalletStore>) -> Arc<SyncEngine> {
    engine_with(rpc, store, SyncConfig::fast())
}

pub fn engine_with(
    rpc: Arc<dyn ChainRpc>,
    store: &Arc<RocksWalletStore>,
    config: SyncConfig,
) -> Arc<SyncEngine> {
    SyncEngine::new(config, rpc, store.clone(), store.clone()).unwrap()
}

pub fn tracking(scripts: &[&Script]) -> LockHashSet {
    scripts.iter().map(|s| s.lock_hash()).collect()
}
