//! Sliding window of recent headers used to detect chain reorganizations.
//!
//! The window holds the last `check_size` synced headers, each the parent of
//! the next. A new batch is accepted only if its first block's parent is the
//! window's newest header and the batch is internally chained.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use cellsync_core::BlockHeader;

use crate::block_number::BlockNumber;
use crate::error::{RangeError, SyncError};
use crate::get_blocks::GetBlocks;

/// Outcome of comparing a batch against the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Success,
    /// The batch does not extend the window; the node is on a different branch.
    FirstNotMatch,
    /// The batch itself is not a parent-linked sequence.
    BlockHeadersNotMatch,
}

impl CheckResult {
    pub fn is_success(self) -> bool {
        self == CheckResult::Success
    }
}

/// Compare `headers` against `window` without touching either.
///
/// An empty window or an empty batch always succeeds.
pub fn check_headers(window: &[BlockHeader], headers: &[BlockHeader]) -> CheckResult {
    let (Some(last), Some(first)) = (window.last(), headers.first()) else {
        return CheckResult::Success;
    };
    if last.hash != first.parent_hash {
        return CheckResult::FirstNotMatch;
    }
    if !is_chained(headers) {
        return CheckResult::BlockHeadersNotMatch;
    }
    CheckResult::Success
}

/// Whether every header is the parent of the one after it.
pub fn is_chained(headers: &[BlockHeader]) -> bool {
    headers.windows(2).all(|pair| pair[1].parent_hash == pair[0].hash)
}

pub struct RangeForCheck {
    check_size: usize,
    range: Mutex<VecDeque<BlockHeader>>,
    get_blocks: Arc<GetBlocks>,
    block_number: Arc<BlockNumber>,
}

impl RangeForCheck {
    /// `check_size` is clamped to at least one header.
    pub fn new(check_size: usize, get_blocks: Arc<GetBlocks>, block_number: Arc<BlockNumber>) -> Self {
        let check_size = check_size.max(1);
        Self {
            check_size,
            range: Mutex::new(VecDeque::with_capacity(check_size)),
            get_blocks,
            block_number,
        }
    }

    pub fn check_size(&self) -> usize {
        self.check_size
    }

    /// The window, regenerated from the node if currently empty.
    ///
    /// Regeneration fetches the headers of the `check_size` blocks ending at
    /// the checkpoint (fewer near genesis).
    pub async fn get_range(&self) -> Result<Vec<BlockHeader>, SyncError> {
        let current = self.snapshot();
        if !current.is_empty() {
            return Ok(current);
        }

        let checkpoint = self.block_number.get_current()?;
        let start = checkpoint.saturating_sub(self.check_size as u64 - 1);
        let numbers: Vec<u64> = (start..=checkpoint).collect();
        let headers = self.get_blocks.get_range_headers(&numbers).await?;
        if !is_chained(&headers) {
            return Err(SyncError::InconsistentBatch { start, end: checkpoint });
        }

        debug!(start, end = checkpoint, "regenerated check window");
        let mut range = self.range.lock();
        *range = headers.iter().cloned().collect();
        Ok(headers)
    }

    /// Check a fetched batch against the window, regenerating it first if empty.
    pub async fn check(&self, headers: &[BlockHeader]) -> Result<CheckResult, SyncError> {
        if headers.is_empty() {
            return Ok(CheckResult::Success);
        }
        let window = self.get_range().await?;
        Ok(check_headers(&window, headers))
    }

    /// Append a verified batch, evicting the oldest headers beyond `check_size`.
    pub fn push_range(&self, headers: &[BlockHeader]) -> Result<(), RangeError> {
        let Some(first) = headers.first() else {
            return Ok(());
        };
        let mut range = self.range.lock();
        if let Some(last) = range.back() {
            if last.hash != first.parent_hash {
                return Err(RangeError::Discontinuous {
                    expected: last.hash,
                    got: first.parent_hash,
                });
            }
        }
        range.extend(headers.iter().cloned());
        while range.len() > self.check_size {
            range.pop_front();
        }
        Ok(())
    }

    pub fn clear_range(&self) {
        self.range.lock().clear();
    }

    /// Height of the oldest retained header.
    pub fn first_number(&self) -> Option<u64> {
        self.range.lock().front().map(|h| h.number)
    }

    pub fn snapshot(&self) -> Vec<BlockHeader> {
        self.range.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.range.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.lock().is_empty()
    }
}
