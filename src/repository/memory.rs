//! In-memory store.
//!
//! Keeps the ledger in RAM for tests. Lookups are
//! counted so callers can check that loading stays batched.

use crate::error::{PipelineError, PipelineResult};
use crate::repository::{Account, BatchChanges, Store, Token, TokenHolder, Transfer};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct MemoryStore {
    pub tokens: HashMap<String, Token>,
    pub accounts: HashMap<String, Account>,
    pub token_holders: HashMap<String, TokenHolder>,
    pub transfers: Vec<Transfer>,
    pub watermark: Option<u64>,
    lookups: Cell<usize>,
    fail_commits: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following commit fail without writing anything.
    pub fn fail_commits(&mut self, fail: bool) {
        self.fail_commits = fail;
    }

    /// Number of `find_*` calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.get()
    }

    pub fn holder(&self, account: &str, token: &str) -> Option<&TokenHolder> {
        self.token_holders.get(&TokenHolder::holder_id(account, token))
    }

    fn pick<T: Clone>(&self, map: &HashMap<String, T>, ids: &[String]) -> HashMap<String, T> {
        self.lookups.set(self.lookups.get() + 1);
        ids.iter()
            .filter_map(|id| map.get(id).map(|v| (id.clone(), v.clone())))
            .collect()
    }
}

impl Store for MemoryStore {
    fn find_tokens(&self, ids: &[String]) -> PipelineResult<HashMap<String, Token>> {
        Ok(self.pick(&self.tokens, ids))
    }

    fn find_accounts(&self, ids: &[String]) -> PipelineResult<HashMap<String, Account>> {
        Ok(self.pick(&self.accounts, ids))
    }

    fn find_token_holders(&self, ids: &[String]) -> PipelineResult<HashMap<String, TokenHolder>> {
        Ok(self.pick(&self.token_holders, ids))
    }

    fn find_transfer_ids(&self, ids: &[String]) -> PipelineResult<HashSet<String>> {
        self.lookups.set(self.lookups.get() + 1);
        let wanted: HashSet<&String> = ids.iter().collect();
        Ok(self
            .transfers
            .iter()
            .filter(|t| wanted.contains(&t.id))
            .map(|t| t.id.clone())
            .collect())
    }

    fn last_processed_block(&self) -> PipelineResult<Option<u64>> {
        Ok(self.watermark)
    }

    fn commit_batch(&mut self, changes: &BatchChanges, to_block: u64) -> PipelineResult<()> {
        if self.fail_commits {
            return Err(PipelineError::Persistence(
                "memory store configured to fail".to_string(),
            ));
        }

        let known: HashSet<&String> = self.transfers.iter().map(|t| &t.id).collect();
        if let Some(dup) = changes.transfers.iter().find(|t| known.contains(&t.id)) {
            return Err(PipelineError::DuplicateTransferId(dup.id.clone()));
        }

        for token in &changes.new_tokens {
            self.tokens
                .entry(token.id.clone())
                .or_insert_with(|| token.clone());
        }
        for account in &changes.new_accounts {
            self.accounts
                .entry(account.id.clone())
                .or_insert_with(|| account.clone());
        }
        for holder in &changes.token_holders {
            self.token_holders.insert(holder.id.clone(), holder.clone());
        }
        self.transfers.extend(changes.transfers.iter().cloned());
        self.watermark = Some(to_block);
        Ok(())
    }
}
