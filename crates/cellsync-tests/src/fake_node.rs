//! A JSON-RPC chain node backed by a [`MockChain`].
//!
//! Speaks the same method names and hex encodings as a real node, so the
//! production [`NodeRpcClient`](cellsync_sync::NodeRpcClient) can be tested
//! end to end.

use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;

use cellsync_core::codec::{decode_quantity, encode_quantity};
use cellsync_core::{
    Block, BlockHeader, ChainRpc, Hash256, RpcError, TransactionWithStatus,
};
use cellsync_sync::test_utils::MockChain;

/// JSON-RPC error code for failures injected through the mock.
pub const INJECTED_ERROR_CODE: i32 = -32000;

#[rpc(server)]
pub trait FakeNode {
    #[method(name = "get_tip_block_number")]
    async fn get_tip_block_number(&self) -> Result<String, ErrorObjectOwned>;

    #[method(name = "get_block_by_number")]
    async fn get_block_by_number(&self, number: String) -> Result<Option<Block>, ErrorObjectOwned>;

    #[method(name = "get_block_hash")]
    async fn get_block_hash(&self, number: String) -> Result<Option<Hash256>, ErrorObjectOwned>;

    #[method(name = "get_header")]
    async fn get_header(&self, hash: Hash256) -> Result<Option<BlockHeader>, ErrorObjectOwned>;

    #[method(name = "get_transaction")]
    async fn get_transaction(
        &self,
        hash: Hash256,
    ) -> Result<Option<TransactionWithStatus>, ErrorObjectOwned>;
}

struct FakeNodeImpl {
    chain: Arc<MockChain>,
}

fn parse_number(raw: &str) -> Result<u64, ErrorObjectOwned> {
    decode_quantity(raw).map_err(|e| ErrorObjectOwned::owned(-32602, e.to_string(), None::<()>))
}

fn call_error(err: RpcError) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(INJECTED_ERROR_CODE, err.to_string(), None::<()>)
}

/// `null` for missing objects, an error object for everything else.
fn found<T>(result: Result<T, RpcError>) -> Result<Option<T>, ErrorObjectOwned> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(RpcError::NotFound(_)) => Ok(None),
        Err(err) => Err(call_error(err)),
    }
}

#[async_trait]
impl FakeNodeServer for FakeNodeImpl {
    async fn get_tip_block_number(&self) -> Result<String, ErrorObjectOwned> {
        self.chain.get_tip_block_number().await.map(encode_quantity).map_err(call_error)
    }

    async fn get_block_by_number(&self, number: String) -> Result<Option<Block>, ErrorObjectOwned> {
        found(self.chain.get_block_by_number(parse_number(&number)?).await)
    }

    async fn get_block_hash(&self, number: String) -> Result<Option<Hash256>, ErrorObjectOwned> {
        found(self.chain.get_block_hash(parse_number(&number)?).await)
    }

    async fn get_header(&self, hash: Hash256) -> Result<Option<BlockHeader>, ErrorObjectOwned> {
        found(self.chain.get_header(&hash).await)
    }

    async fn get_transaction(
        &self,
        hash: Hash256,
    ) -> Result<Option<TransactionWithStatus>, ErrorObjectOwned> {
        found(self.chain.get_transaction(&hash).await)
    }
}

/// A running fake node. The server stops when this is dropped.
pub struct RunningNode {
    pub addr: SocketAddr,
    handle: ServerHandle,
}

impl RunningNode {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for RunningNode {
    fn drop(&mut self) {
        self.handle.stop().ok();
    }
}

/// Serve `chain` on an ephemeral localhost port.
pub async fn start(chain: Arc<MockChain>) -> RunningNode {
    let server = Server::builder().build("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.start(FakeNodeImpl { chain }.into_rpc());
    RunningNode { addr, handle }
}
