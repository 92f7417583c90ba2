//! JSON-RPC client for a chain node.
//!
//! [`NodeRpcClient`] implements [`ChainRpc`] over `jsonrpsee`'s HTTP client.
//! Each trait method is a single call; `get_block_hashes` is sent as one
//! batch. Retries are layered on top by [`GetBlocks`](crate::GetBlocks).

use std::time::Duration;

use async_trait::async_trait;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::params::{ArrayParams, BatchRequestBuilder};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use cellsync_core::codec::{self, encode_quantity};
use cellsync_core::{
    Block, BlockHeader, ChainRpc, Hash256, RpcError, TransactionWithStatus,
};

/// A `0x`-hex quantity as returned by `get_tip_block_number`.
#[derive(Deserialize)]
struct Quantity(#[serde(with = "codec::quantity")] u64);

#[derive(Debug, Clone)]
pub struct NodeRpcClient {
    url: String,
    client: HttpClient,
}

impl NodeRpcClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, RpcError> {
        let url = url.into();
        let client = HttpClientBuilder::default()
            .request_timeout(request_timeout)
            .build(&url)
            .map_err(|e| RpcError::Transport(format!("failed to build client for {url}: {e}")))?;
        Ok(Self { url, client })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: ArrayParams,
    ) -> Result<T, RpcError> {
        self.client
            .request(method, params)
            .await
            .map_err(|e| map_client_error(method, e))
    }
}

#[async_trait]
impl ChainRpc for NodeRpcClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_tip_block_number(&self) -> Result<u64, RpcError> {
        let Quantity(tip) = self.call("get_tip_block_number", rpc_params![]).await?;
        Ok(tip)
    }

    async fn get_block_by_number(&self, number: u64) -> Result<Block, RpcError> {
        let block: Option<Block> = self
            .call("get_block_by_number", rpc_params![encode_quantity(number)])
            .await?;
        block.ok_or_else(|| RpcError::NotFound(format!("block {number}")))
    }

    async fn get_block_hash(&self, number: u64) -> Result<Hash256, RpcError> {
        let hash: Option<Hash256> = self
            .call("get_block_hash", rpc_params![encode_quantity(number)])
            .await?;
        hash.ok_or_else(|| RpcError::NotFound(format!("block hash {number}")))
    }

    async fn get_block_hashes(&self, numbers: &[u64]) -> Result<Vec<Hash256>, RpcError> {
        const METHOD: &str = "get_block_hash";

        if numbers.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch = BatchRequestBuilder::new();
        for &number in numbers {
            batch
                .insert(METHOD, rpc_params![encode_quantity(number)])
                .map_err(|e| RpcError::Other(format!("failed to serialize {METHOD} params: {e}")))?;
        }

        let response = self
            .client
            .batch_request::<Option<Hash256>>(batch)
            .await
            .map_err(|e| map_client_error(METHOD, e))?;

        if response.len() != numbers.len() {
            return Err(RpcError::Decode {
                method: METHOD,
                message: format!("expected {} results, got {}", numbers.len(), response.len()),
            });
        }

        let mut hashes = Vec::with_capacity(numbers.len());
        for (entry, &number) in response.into_iter().zip(numbers) {
            match entry {
                Ok(Some(hash)) => hashes.push(hash),
                Ok(None) => return Err(RpcError::NotFound(format!("block hash {number}"))),
                Err(err) => {
                    return Err(RpcError::Call {
                        method: METHOD,
                        code: err.code(),
                        message: err.message().to_string(),
                    });
                }
            }
        }

        debug!(method = METHOD, count = hashes.len(), "batch call completed");
        Ok(hashes)
    }

    async fn get_header(&self, hash: &Hash256) -> Result<BlockHeader, RpcError> {
        let header: Option<BlockHeader> = self.call("get_header", rpc_params![hash]).await?;
        header.ok_or_else(|| RpcError::NotFound(format!("header {hash}")))
    }

    async fn get_transaction(&self, hash: &Hash256) -> Result<TransactionWithStatus, RpcError> {
        let tx: Option<TransactionWithStatus> =
            self.call("get_transaction", rpc_params![hash]).await?;
        tx.ok_or_else(|| RpcError::NotFound(format!("transaction {hash}")))
    }
}

fn map_client_error(method: &'static str, err: JsonRpcError) -> RpcError {
    match err {
        JsonRpcError::Call(obj) => RpcError::Call {
            method,
            code: obj.code(),
            message: obj.message().to_string(),
        },
        JsonRpcError::Transport(e) => RpcError::Transport(e.to_string()),
        JsonRpcError::RestartNeeded(e) => RpcError::Transport(e.to_string()),
        JsonRpcError::RequestTimeout => RpcError::Timeout { method },
        JsonRpcError::ParseError(e) => RpcError::Decode { method, message: e.to_string() },
        other => RpcError::Other(other.to_string()),
    }
}
