//! Chain data types: hashes, scripts, cells, transactions, headers, blocks.
//!
//! Wire types mirror the node's JSON-RPC views (unknown fields are ignored).
//! Every type also derives bincode `Encode`/`Decode` so stores can persist
//! them without a second schema.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec;
use crate::error::HexError;
use crate::hash::ckb_hash;

/// A 32-byte hash value (block hash, transaction hash, lock hash, code hash).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse a `0x`-prefixed 64-digit hex string.
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let bytes = codec::decode_bytes(s)?;
        let got = bytes.len();
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HexError::InvalidLength { expected: 32, got })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// The set of lock hashes a wallet is interested in.
pub type LockHashSet = HashSet<Hash256>;

/// How a script's `code_hash` is interpreted by the VM.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum HashType {
    Data,
    Type,
    Data1,
    Data2,
}

impl HashType {
    /// Single-byte encoding used in hashes and addresses.
    pub fn as_byte(self) -> u8 {
        match self {
            HashType::Data => 0,
            HashType::Type => 1,
            HashType::Data1 => 2,
            HashType::Data2 => 4,
        }
    }

    /// Inverse of [`as_byte`](Self::as_byte).
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(HashType::Data),
            1 => Some(HashType::Type),
            2 => Some(HashType::Data1),
            4 => Some(HashType::Data2),
            _ => None,
        }
    }
}

/// A lock or type script.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct Script {
    pub code_hash: Hash256,
    pub hash_type: HashType,
    #[serde(with = "codec::bytes")]
    pub args: Vec<u8>,
}

impl Script {
    /// Molecule encoding of the script table, the form the chain hashes.
    ///
    /// Layout: `u32-LE total size`, three `u32-LE` field offsets, then
    /// `code_hash`, the hash-type byte and `args` as a length-prefixed
    /// byte vector.
    pub fn to_molecule(&self) -> Vec<u8> {
        const HEADER: usize = 4 * 4;
        let args_offset = HEADER + 32 + 1;
        let total = args_offset + 4 + self.args.len();

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(HEADER as u32).to_le_bytes());
        out.extend_from_slice(&((HEADER + 32) as u32).to_le_bytes());
        out.extend_from_slice(&(args_offset as u32).to_le_bytes());
        out.extend_from_slice(self.code_hash.as_bytes());
        out.push(self.hash_type.as_byte());
        out.extend_from_slice(&(self.args.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.args);
        out
    }

    /// Script hash as the node reports it: [`ckb_hash`] of the molecule
    /// encoding.
    pub fn lock_hash(&self) -> Hash256 {
        ckb_hash(&self.to_molecule())
    }
}

/// Reference to an output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    pub tx_hash: Hash256,
    #[serde(with = "codec::quantity_u32")]
    pub index: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.index)
    }
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct CellInput {
    pub previous_output: OutPoint,
    #[serde(with = "codec::quantity")]
    pub since: u64,
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct CellOutput {
    /// Capacity in shannons.
    #[serde(with = "codec::quantity")]
    pub capacity: u64,
    pub lock: Script,
    #[serde(rename = "type", default)]
    pub type_script: Option<Script>,
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    pub hash: Hash256,
    #[serde(with = "codec::quantity_u32", default)]
    pub version: u32,
    pub inputs: Vec<CellInput>,
    pub outputs: Vec<CellOutput>,
    #[serde(with = "codec::bytes_vec", default)]
    pub outputs_data: Vec<Vec<u8>>,
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    #[serde(with = "codec::quantity")]
    pub number: u64,
    pub hash: Hash256,
    pub parent_hash: Hash256,
    /// Milliseconds since the Unix epoch.
    #[serde(with = "codec::quantity")]
    pub timestamp: u64,
}

/// A block; `transactions[0]` is the cellbase.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxStatus {
    pub status: String,
    #[serde(default)]
    pub block_hash: Option<Hash256>,
}

/// Result of `get_transaction`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransactionWithStatus {
    pub transaction: Transaction,
    pub tx_status: TxStatus,
}

/// A transaction input with its previous output's lock and capacity filled in.
///
/// `lock` and `capacity` stay `None` for cellbase inputs, which never spend
/// a real output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct ResolvedInput {
    pub previous_output: OutPoint,
    pub since: u64,
    pub lock: Option<Script>,
    pub capacity: Option<u64>,
    pub input_index: u32,
}

/// A transaction as handed to the persistence sink.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct FetchedTransaction {
    pub hash: Hash256,
    pub block_number: u64,
    pub block_hash: Hash256,
    pub timestamp: u64,
    pub is_cellbase: bool,
    pub inputs: Vec<ResolvedInput>,
    pub outputs: Vec<CellOutput>,
    pub outputs_data: Vec<Vec<u8>>,
}

impl FetchedTransaction {
    /// Build an unresolved record for the transaction at `index` in a block.
    pub fn from_block_tx(header: &BlockHeader, index: usize, tx: &Transaction) -> Self {
        let inputs = tx
            .inputs
            .iter()
            .enumerate()
            .map(|(i, input)| ResolvedInput {
                previous_output: input.previous_output.clone(),
                since: input.since,
                lock: None,
                capacity: None,
                input_index: i as u32,
            })
            .collect();

        Self {
            hash: tx.hash,
            block_number: header.number,
            block_hash: header.hash,
            timestamp: header.timestamp,
            is_cellbase: index == 0,
            inputs,
            outputs: tx.outputs.clone(),
            outputs_data: tx.outputs_data.clone(),
        }
    }

    /// All known lock scripts: resolved inputs first, then outputs.
    pub fn locks(&self) -> impl Iterator<Item = &Script> {
        self.inputs
            .iter()
            .filter_map(|input| input.lock.as_ref())
            .chain(self.outputs.iter().map(|output| &output.lock))
    }

    /// Lock scripts whose hash is in `lock_hashes`, in [`locks`](Self::locks) order.
    pub fn matching_locks<'a>(
        &'a self,
        lock_hashes: &'a LockHashSet,
    ) -> impl Iterator<Item = &'a Script> + 'a {
        self.locks()
            .filter(move |script| lock_hashes.contains(&script.lock_hash()))
    }

    /// Whether any input or output lock belongs to `lock_hashes`.
    pub fn touches(&self, lock_hashes: &LockHashSet) -> bool {
        self.matching_locks(lock_hashes).next().is_some()
    }
}
