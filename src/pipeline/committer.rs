//! Persists one reconciled batch and advances the watermark with it.

use crate::error::PipelineResult;
use crate::repository::{BatchChanges, Store};
use std::time::Instant;
use tracing::{debug, error};

pub fn commit<S: Store + ?Sized>(
    store: &mut S,
    changes: &BatchChanges,
    to_block: u64,
) -> PipelineResult<()> {
    let start = Instant::now();
    if changes.is_empty() {
        debug!("No transfers up to block {}, advancing watermark only", to_block);
    }

    if let Err(e) = store.commit_batch(changes, to_block) {
        error!(
            "Commit of batch ending at block {} failed, nothing was written: {}",
            to_block, e
        );
        return Err(e);
    }

    debug!(
        "Committed {} transfers, {} holders, {} tokens, {} accounts in {:?}",
        changes.transfers.len(),
        changes.token_holders.len(),
        changes.new_tokens.len(),
        changes.new_accounts.len(),
        start.elapsed()
    );
    Ok(())
}
