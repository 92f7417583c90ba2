//! # cellsync-core
//! Foundation types, wire codecs, and trait seams for the cellsync engine.
//!
//! # Modules
//!
//! - [`types`]: hashes, scripts, cells, transactions, headers, blocks
//! - [`codec`]: `0x`-prefixed hex codecs used on the JSON-RPC wire
//! - [`hash`]: the chain's personalized BLAKE2b
//! - [`address`]: full-format Bech32m addresses for lock scripts
//! - [`error`]: error enums shared across crates
//! - [`traits`]: `ChainRpc`, `TxSink`, `CheckpointStore`, `AddressUsageSink`

pub mod address;
pub mod codec;
pub mod error;
pub mod hash;
pub mod traits;
pub mod types;

pub use address::{Address, Network};
pub use error::{AddressError, HexError, RpcError, StoreError};
pub use hash::ckb_hash;
pub use traits::{AddressUsageSink, ChainRpc, CheckpointStore, TxSink};
pub use types::{
    Block, BlockHeader, CellInput, CellOutput, FetchedTransaction, Hash256, HashType,
    LockHashSet, OutPoint, ResolvedInput, Script, Transaction, TransactionWithStatus, TxStatus,
};
