//! The per-batch reconciliation pipeline:
//! normalize → accumulate → load → reconcile → commit.
//!
//! Batches must arrive in ascending, contiguous block order. A batch is the
//! unit of atomicity: it is either fully committed together with the
//! watermark, or not at all and safe to re-run.

pub mod accumulator;
pub mod committer;
pub mod loader;
pub mod normalizer;
pub mod reconciler;

pub use accumulator::{BatchAccumulator, BatchKeys, DecodeFailure};
pub use loader::{LoadedState, load_state};
pub use normalizer::{TransferRecord, normalize};
pub use reconciler::reconcile;

use crate::error::{PipelineError, PipelineResult};
use crate::repository::{PlaceholderMetadata, Store};
use crate::source::BlockBatch;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub from_block: u64,
    pub to_block: u64,
    pub transfers: usize,
    pub new_tokens: usize,
    pub new_accounts: usize,
    pub token_holders: usize,
    pub decode_failures: Vec<DecodeFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Committed(BatchSummary),
    /// The watermark already covers the batch; nothing was done.
    AlreadyCommitted { to_block: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    placeholder: PlaceholderMetadata,
}

impl Pipeline {
    pub fn new(placeholder: PlaceholderMetadata) -> Self {
        Pipeline { placeholder }
    }

    pub fn process_batch<S: Store + ?Sized>(
        &self,
        store: &mut S,
        batch: &BlockBatch,
    ) -> PipelineResult<BatchOutcome> {
        let (from_block, to_block) = (batch.from_block, batch.to_block);
        if from_block > to_block {
            return Err(PipelineError::InvalidBatchRange {
                from_block,
                to_block,
            });
        }

        if let Some(watermark) = store.last_processed_block()? {
            if to_block <= watermark {
                warn!(
                    "Batch {}..={} is already covered by watermark {}, skipping",
                    from_block, to_block, watermark
                );
                return Ok(BatchOutcome::AlreadyCommitted { to_block });
            }
            if from_block <= watermark {
                return Err(PipelineError::OverlappingBatch {
                    from_block,
                    to_block,
                    watermark,
                });
            }
            if from_block != watermark + 1 {
                return Err(PipelineError::NonContiguousBatch {
                    expected: watermark + 1,
                    from_block,
                });
            }
        }

        let mut accumulator = BatchAccumulator::new();
        for block in &batch.blocks {
            let height = block.header.height;
            if height < from_block || height > to_block {
                return Err(PipelineError::BlockOutsideBatch {
                    height,
                    from_block,
                    to_block,
                });
            }
            accumulator.push_block(block)?;
        }

        let keys = accumulator.keys();
        let state = load_state(store, &keys)?;
        let (records, decode_failures) = accumulator.into_parts();
        let changes = reconcile(&records, state, &self.placeholder)?;
        committer::commit(store, &changes, to_block)?;

        let summary = BatchSummary {
            from_block,
            to_block,
            transfers: changes.transfers.len(),
            new_tokens: changes.new_tokens.len(),
            new_accounts: changes.new_accounts.len(),
            token_holders: changes.token_holders.len(),
            decode_failures,
        };
        info!(
            "Blocks {}..={}: {} transfers, {} new tokens, {} new accounts, {} holders updated, {} undecodable logs",
            summary.from_block,
            summary.to_block,
            summary.transfers,
            summary.new_tokens,
            summary.new_accounts,
            summary.token_holders,
            summary.decode_failures.len()
        );
        Ok(BatchOutcome::Committed(summary))
    }
}
