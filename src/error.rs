//! Error taxonomy of the reconciliation pipeline.

use thiserror::Error;

/// Errors that abort (or, for `Decode`, are reported by) the batch pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A Transfer log whose topics or data could not be decoded. Recovered
    /// per log by the accumulator; never aborts a batch on its own.
    #[error("failed to decode transfer log {tx_hash}-{log_index} at block {block_number}: {reason}")]
    Decode {
        block_number: u64,
        tx_hash: String,
        log_index: u64,
        reason: String,
    },

    #[error("log at block {block_number} is missing its {missing}; cannot form a transfer id")]
    MissingTransactionContext {
        block_number: u64,
        missing: &'static str,
    },

    #[error("transfer {0} was already recorded; refusing to apply it twice")]
    DuplicateTransferId(String),

    #[error("block {height} pushed after block {previous}; batches must be ascending")]
    OutOfOrderBlock { previous: u64, height: u64 },

    #[error("batch range {from_block}..={to_block} is inverted")]
    InvalidBatchRange { from_block: u64, to_block: u64 },

    #[error("batch {from_block}..={to_block} overlaps the committed watermark {watermark}")]
    OverlappingBatch {
        from_block: u64,
        to_block: u64,
        watermark: u64,
    },

    #[error("batch starts at block {from_block} but block {expected} is next after the watermark")]
    NonContiguousBatch { expected: u64, from_block: u64 },

    #[error("block {height} lies outside batch {from_block}..={to_block}")]
    BlockOutsideBatch {
        height: u64,
        from_block: u64,
        to_block: u64,
    },

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl PipelineError {
    /// Returns `true` when restarting from the committed watermark can clear
    /// the error without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_) | Self::MissingTransactionContext { .. }
        )
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(PipelineError::Persistence("disk I/O error".into()).is_retryable());
        assert!(
            PipelineError::MissingTransactionContext {
                block_number: 7,
                missing: "transaction hash",
            }
            .is_retryable()
        );
        assert!(!PipelineError::DuplicateTransferId("0xab-1".into()).is_retryable());
        assert!(
            !PipelineError::OverlappingBatch {
                from_block: 5,
                to_block: 10,
                watermark: 7,
            }
            .is_retryable()
        );
    }
}
