//! Error types shared by the cellsync crates.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HexError {
    #[error("missing 0x prefix: {0}")] MissingPrefix(String),
    #[error("invalid hex: {0}")] InvalidHex(String),
    #[error("invalid length: expected {expected}, got {got}")] InvalidLength { expected: usize, got: usize },
    #[error("quantity overflow: {0}")] Overflow(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid HRP")] InvalidHrp,
    #[error("invalid length")] InvalidLength,
    #[error("invalid checksum")] InvalidChecksum,
    #[error("invalid character: {0}")] InvalidCharacter(char),
    #[error("unsupported address format: {0:#04x}")] InvalidFormat(u8),
    #[error("invalid hash type: {0}")] InvalidHashType(u8),
    #[error("invalid padding bits")] InvalidPadding,
    #[error("unknown network: {0}")] UnknownNetwork(String),
    #[error("missing separator")] MissingSeparator,
    #[error("mixed case")] MixedCase,
}

/// Failures talking to the chain node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Connection refused, reset, non-2xx status, or any other transport failure.
    #[error("transport: {0}")]
    Transport(String),

    /// The request did not complete within the client timeout.
    #[error("rpc {method} timed out")]
    Timeout { method: &'static str },

    /// The node answered with a JSON-RPC `error` object.
    #[error("rpc {method} failed with code {code}: {message}")]
    Call {
        method: &'static str,
        code: i32,
        message: String,
    },

    /// The node answered, but the payload could not be decoded.
    #[error("rpc {method} returned malformed data: {message}")]
    Decode {
        method: &'static str,
        message: String,
    },

    /// The node returned `null` for the requested object.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rpc: {0}")]
    Other(String),
}

impl RpcError {
    /// Whether the failure is a network condition worth retrying quietly.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::Timeout { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage: {0}")] Storage(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error("corrupted record: {0}")] Corrupted(String),
}
