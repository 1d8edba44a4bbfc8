//! Turns a batch of records plus the loaded state into the entity changes
//! to persist.
//!
//! Mint (`from` is the zero address) and burn (`to` is the zero address)
//! records produce a Transfer row but never touch a TokenHolder, and token
//! `total_supply` is never derived from transfers. Circulating supply is
//! therefore not tracked here.
//!
//! Balances are only exact when indexing started at the token's first
//! block. Starting later means earlier credits are missing and holders can
//! go negative; that is reported, not corrected.

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::loader::LoadedState;
use crate::pipeline::normalizer::TransferRecord;
use crate::repository::{
    Account, BatchChanges, PlaceholderMetadata, Token, TokenHolder, Transfer, u256_to_bigint,
};
use num_bigint::Sign;
use std::collections::HashSet;
use tracing::debug;

pub fn reconcile(
    records: &[TransferRecord],
    state: LoadedState,
    placeholder: &PlaceholderMetadata,
) -> PipelineResult<BatchChanges> {
    let LoadedState {
        mut tokens,
        mut accounts,
        mut token_holders,
        existing_transfer_ids,
    } = state;
    let mut changes = BatchChanges::default();

    // 1. tokens
    for record in records {
        if !tokens.contains_key(&record.token_address) {
            let token = Token::placeholder(&record.token_address, placeholder);
            debug!("New token {} with placeholder metadata", token.id);
            tokens.insert(token.id.clone(), token.clone());
            changes.new_tokens.push(token);
        }
    }

    // 2. accounts
    for record in records {
        for address in [&record.from, &record.to] {
            if !accounts.contains_key(address) {
                let account = Account {
                    id: address.clone(),
                };
                accounts.insert(account.id.clone(), account.clone());
                changes.new_accounts.push(account);
            }
        }
    }

    // 3. transfers
    let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());
    for record in records {
        if existing_transfer_ids.contains(&record.id) || !seen.insert(&record.id) {
            return Err(PipelineError::DuplicateTransferId(record.id.clone()));
        }
        debug_assert!(tokens.contains_key(&record.token_address));
        debug_assert!(accounts.contains_key(&record.from) && accounts.contains_key(&record.to));

        changes.transfers.push(Transfer {
            id: record.id.clone(),
            block_number: record.block_number,
            timestamp: record.block_timestamp,
            tx_hash: record.tx_hash.clone(),
            log_index: record.event_index,
            from: record.from.clone(),
            to: record.to.clone(),
            token: record.token_address.clone(),
            amount: record.amount,
        });
    }

    // 4. balances
    let mut touched: Vec<String> = Vec::new();
    let mut touched_set: HashSet<String> = HashSet::new();
    for record in records {
        if record.is_mint() || record.is_burn() {
            continue;
        }
        let amount = u256_to_bigint(record.amount);

        for (account, delta) in [(&record.from, -amount.clone()), (&record.to, amount)] {
            let id = TokenHolder::holder_id(account, &record.token_address);
            let holder = token_holders
                .entry(id.clone())
                .or_insert_with(|| TokenHolder::new(account, &record.token_address));
            holder.balance += delta;

            if holder.balance.sign() == Sign::Minus {
                debug!(
                    "Holder {} is negative ({}) after {}; indexing likely started after the token's first block",
                    holder.id, holder.balance, record.id
                );
            }
            if touched_set.insert(id.clone()) {
                touched.push(id);
            }
        }
    }

    changes.token_holders = touched
        .iter()
        .filter_map(|id| token_holders.remove(id))
        .collect();

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ZERO_ADDRESS;
    use alloy_primitives::U256;
    use num_bigint::BigInt;

    const TOKEN: &str = "0x00000000000000000000000000000000000000aa";
    const AAA: &str = "0x0000000000000000000000000000000000000aaa";
    const BBB: &str = "0x0000000000000000000000000000000000000bbb";
    const CCC: &str = "0x0000000000000000000000000000000000000ccc";

    /// Sum of all balance movements in `changes` relative to `before`. Zero for
    /// any batch, since mint and burn legs are not applied.
    fn net_balance_delta(before: &LoadedState, changes: &BatchChanges) -> BigInt {
        changes
            .token_holders
            .iter()
            .map(|holder| {
                let start = before
                    .token_holders
                    .get(&holder.id)
                    .map(|h| h.balance.clone())
                    .unwrap_or_default();
                &holder.balance - start
            })
            .sum()
    }

    fn record(block: u64, index: u64, from: &str, to: &str, amount: u64) -> TransferRecord {
        let tx_hash = format!("0x{:064x}", block * 1_000 + index);
        TransferRecord {
            id: format!("{tx_hash}-{index}"),
            token_address: TOKEN.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            amount: U256::from(amount),
            block_number: block,
            block_timestamp: block * 12,
            event_index: index,
            tx_hash,
        }
    }

    fn balance(changes: &BatchChanges, account: &str) -> Option<BigInt> {
        changes
            .token_holders
            .iter()
            .find(|h| h.account == account)
            .map(|h| h.balance.clone())
    }

    #[test]
    fn mint_then_transfer_scenario() {
        let records = vec![
            record(1, 0, ZERO_ADDRESS, AAA, 100),
            record(1, 1, AAA, BBB, 40),
        ];
        let changes =
            reconcile(&records, LoadedState::default(), &PlaceholderMetadata::default()).unwrap();

        assert_eq!(changes.transfers.len(), 2);
        assert_eq!(balance(&changes, AAA), Some(BigInt::from(-40)));
        assert_eq!(balance(&changes, BBB), Some(BigInt::from(40)));
        assert_eq!(balance(&changes, ZERO_ADDRESS), None);
        assert_eq!(changes.token_holders.len(), 2);

        assert_eq!(changes.new_tokens.len(), 1);
        let token = &changes.new_tokens[0];
        assert_eq!(token.id, TOKEN);
        assert_eq!(token.symbol, "DFUND");
        assert_eq!(token.decimals, 18);
        assert_eq!(token.total_supply, U256::ZERO);

        let accounts: Vec<&str> = changes.new_accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(accounts, vec![ZERO_ADDRESS, AAA, BBB]);
    }

    #[test]
    fn each_new_address_creates_exactly_one_account() {
        let records = vec![
            record(1, 0, AAA, BBB, 1),
            record(1, 1, BBB, AAA, 1),
            record(2, 0, AAA, CCC, 1),
            record(2, 1, CCC, AAA, 1),
        ];
        let mut state = LoadedState::default();
        state
            .accounts
            .insert(CCC.to_string(), Account { id: CCC.to_string() });

        let changes = reconcile(&records, state, &PlaceholderMetadata::default()).unwrap();
        let mut ids: Vec<&str> = changes.new_accounts.iter().map(|a| a.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec![AAA, BBB]);
        assert_eq!(changes.new_tokens.len(), 1);
    }

    #[test]
    fn applies_deltas_on_top_of_loaded_balances() {
        let mut state = LoadedState::default();
        let mut known = TokenHolder::new(AAA, TOKEN);
        known.balance = BigInt::from(500);
        state.token_holders.insert(known.id.clone(), known);
        state.tokens.insert(
            TOKEN.to_string(),
            Token::placeholder(TOKEN, &PlaceholderMetadata::default()),
        );

        let records = vec![record(5, 0, AAA, BBB, 120), record(5, 1, BBB, AAA, 20)];
        let before = state.clone();
        let changes = reconcile(&records, state, &PlaceholderMetadata::default()).unwrap();

        assert!(changes.new_tokens.is_empty());
        assert_eq!(balance(&changes, AAA), Some(BigInt::from(400)));
        assert_eq!(balance(&changes, BBB), Some(BigInt::from(100)));
        assert_eq!(net_balance_delta(&before, &changes), BigInt::default());
    }

    #[test]
    fn burn_creates_no_holder_and_keeps_order() {
        let records = vec![record(3, 0, AAA, ZERO_ADDRESS, 5), record(3, 4, AAA, BBB, 1)];
        let changes =
            reconcile(&records, LoadedState::default(), &PlaceholderMetadata::default()).unwrap();

        let order: Vec<(u64, u64)> = changes
            .transfers
            .iter()
            .map(|t| (t.block_number, t.log_index))
            .collect();
        assert_eq!(order, vec![(3, 0), (3, 4)]);
        assert_eq!(balance(&changes, AAA), Some(BigInt::from(-1)));
        assert!(changes.token_holders.iter().all(|h| h.account != ZERO_ADDRESS));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let r = record(1, 0, AAA, BBB, 1);
        let err = reconcile(
            &[r.clone(), r.clone()],
            LoadedState::default(),
            &PlaceholderMetadata::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateTransferId(ref id) if *id == r.id));

        let mut state = LoadedState::default();
        state.existing_transfer_ids.insert(r.id.clone());
        let err = reconcile(&[r.clone()], state, &PlaceholderMetadata::default()).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateTransferId(_)));
    }

    #[test]
    fn balances_do_not_overflow_uint256() {
        let mut state = LoadedState::default();
        let mut rich = TokenHolder::new(BBB, TOKEN);
        rich.balance = u256_to_bigint(U256::MAX);
        state.token_holders.insert(rich.id.clone(), rich);

        let mut big = record(9, 0, AAA, BBB, 0);
        big.amount = U256::MAX;
        let changes = reconcile(&[big], state, &PlaceholderMetadata::default()).unwrap();

        let expected = u256_to_bigint(U256::MAX) * 2;
        assert_eq!(balance(&changes, BBB), Some(expected));
        assert_eq!(balance(&changes, AAA), Some(-u256_to_bigint(U256::MAX)));
    }
}
