//! Errors raised by the sync pipeline.
use thiserror::Error;

use cellsync_core::{Hash256, RpcError, StoreError};

/// Violation of the fork-detection window's contiguity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("batch parent {got} does not extend window tip {expected}")]
    Discontinuous { expected: Hash256, got: Hash256 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)] Rpc(#[from] RpcError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Range(#[from] RangeError),
    #[error("chain fork detected, rolled back to block {rollback_to}")] Fork { rollback_to: u64 },
    #[error("headers of blocks {start}..={end} are not chained")] InconsistentBatch { start: u64, end: u64 },
    #[error("previous output {0} does not exist")] MissingPreviousOutput(String),
    #[error("invalid config: {0}")] InvalidConfig(String),
}

impl SyncError {
    /// Node unreachable or slow; logged quietly and retried next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Rpc(e) if e.is_transient())
    }

    /// A bug in the caller's bookkeeping; the queue loop stops on these.
    pub fn is_logic_error(&self) -> bool {
        matches!(self, SyncError::Range(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_follows_rpc_classification() {
        assert!(SyncError::from(RpcError::Transport("connection refused".into())).is_transient());
        assert!(SyncError::from(RpcError::Timeout { method: "get_header" }).is_transient());
        assert!(!SyncError::from(RpcError::NotFound("block 9".into())).is_transient());
        assert!(!SyncError::Fork { rollback_to: 3 }.is_transient());
        assert!(!SyncError::from(StoreError::Storage("disk full".into())).is_transient());
    }

    #[test]
    fn only_range_errors_are_logic_errors() {
        let err = SyncError::from(RangeError::Discontinuous {
            expected: Hash256([1; 32]),
            got: Hash256([2; 32]),
        });
        assert!(err.is_logic_error());
        assert!(!SyncError::InconsistentBatch { start: 1, end: 4 }.is_logic_error());
    }

    #[test]
    fn fork_message_names_rollback_point() {
        assert_eq!(
            SyncError::Fork { rollback_to: 98 }.to_string(),
            "chain fork detected, rolled back to block 98"
        );
    }
}
