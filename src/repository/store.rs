use crate::error::PipelineResult;
use crate::repository::{Account, Token, TokenHolder, Transfer};
use std::collections::{HashMap, HashSet};

/// Everything one batch writes. Committed as a single unit together with the
/// watermark.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchChanges {
    pub new_tokens: Vec<Token>,
    pub new_accounts: Vec<Account>,
    /// Created or updated holders, in first-touch order.
    pub token_holders: Vec<TokenHolder>,
    /// New transfers in (block, log index) order.
    pub transfers: Vec<Transfer>,
}

impl BatchChanges {
    pub fn is_empty(&self) -> bool {
        self.new_tokens.is_empty()
            && self.new_accounts.is_empty()
            && self.token_holders.is_empty()
            && self.transfers.is_empty()
    }
}

/// Persistence seam of the pipeline: batched lookups by id, plus an atomic
/// per-batch commit that also moves the watermark.
pub trait Store {
    fn find_tokens(&self, ids: &[String]) -> PipelineResult<HashMap<String, Token>>;

    fn find_accounts(&self, ids: &[String]) -> PipelineResult<HashMap<String, Account>>;

    fn find_token_holders(&self, ids: &[String]) -> PipelineResult<HashMap<String, TokenHolder>>;

    /// Subset of `ids` that already exist as Transfer rows.
    fn find_transfer_ids(&self, ids: &[String]) -> PipelineResult<HashSet<String>>;

    /// Highest block whose batch has been committed.
    fn last_processed_block(&self) -> PipelineResult<Option<u64>>;

    /// Writes `changes` and sets the watermark to `to_block`, all or nothing.
    fn commit_batch(&mut self, changes: &BatchChanges, to_block: u64) -> PipelineResult<()>;
}
