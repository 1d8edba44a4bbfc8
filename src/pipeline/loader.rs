//! Loads the already-known entities a batch touches, one lookup per kind.

use crate::error::PipelineResult;
use crate::pipeline::accumulator::BatchKeys;
use crate::repository::{Account, Store, Token, TokenHolder};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Known entities keyed by id. Absence means "create it".
#[derive(Debug, Default, Clone)]
pub struct LoadedState {
    pub tokens: HashMap<String, Token>,
    pub accounts: HashMap<String, Account>,
    pub token_holders: HashMap<String, TokenHolder>,
    pub existing_transfer_ids: HashSet<String>,
}

pub fn load_state<S: Store + ?Sized>(store: &S, keys: &BatchKeys) -> PipelineResult<LoadedState> {
    if keys.transfer_ids.is_empty() {
        return Ok(LoadedState::default());
    }

    let state = LoadedState {
        tokens: store.find_tokens(&to_vec(&keys.token_addresses))?,
        accounts: store.find_accounts(&to_vec(&keys.account_addresses))?,
        token_holders: store.find_token_holders(&to_vec(&keys.holder_keys))?,
        existing_transfer_ids: store.find_transfer_ids(&to_vec(&keys.transfer_ids))?,
    };

    debug!(
        "Loaded {}/{} tokens, {}/{} accounts, {}/{} holders",
        state.tokens.len(),
        keys.token_addresses.len(),
        state.accounts.len(),
        keys.account_addresses.len(),
        state.token_holders.len(),
        keys.holder_keys.len()
    );
    Ok(state)
}

fn to_vec(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}
