use super::database::{MAX_KEYS_PER_QUERY, parse_bigint, parse_u256, placeholders};
use super::models::{TokenHolder, u256_to_bigint};
use crate::error::PipelineResult;
use crate::events::ZERO_ADDRESS;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::collections::HashMap;
use tracing::info;

pub struct HolderRepository<'a> {
    conn: &'a Connection,
}

impl<'a> HolderRepository<'a> {
    const UPSERT_HOLDER: &'static str =
        "INSERT INTO token_holders (id, account_id, token_id, balance) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET balance = excluded.balance";

    const SELECT_HOLDER: &'static str =
        "SELECT id, account_id, token_id, balance FROM token_holders";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn find_by_ids(&self, ids: &[String]) -> PipelineResult<HashMap<String, TokenHolder>> {
        let mut found = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_KEYS_PER_QUERY) {
            let query = format!(
                "{} WHERE id IN ({})",
                Self::SELECT_HOLDER,
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&query)?;
            let rows = stmt.query_map(params_from_iter(chunk), Self::row_to_holder)?;
            for holder in rows {
                let holder = holder?;
                found.insert(holder.id.clone(), holder);
            }
        }
        Ok(found)
    }

    pub fn upsert_batch(&self, holders: &[TokenHolder]) -> PipelineResult<usize> {
        let mut stmt = self.conn.prepare_cached(Self::UPSERT_HOLDER)?;
        let mut count = 0;
        for holder in holders {
            count += stmt.execute(params![
                holder.id,
                holder.account,
                holder.token,
                holder.balance.to_string(),
            ])?;
        }
        Ok(count)
    }

    pub fn get(&self, account: &str, token: &str) -> PipelineResult<Option<TokenHolder>> {
        let query = format!("{} WHERE id = ?1", Self::SELECT_HOLDER);
        let holder = self
            .conn
            .query_row(
                &query,
                params![TokenHolder::holder_id(account, token)],
                Self::row_to_holder,
            )
            .optional()?;
        Ok(holder)
    }

    /// Holders of `token`, largest balance first. Balances are stored as
    /// signed decimal text, so ordering happens here rather than in SQL.
    pub fn top_holders(&self, token: &str, limit: usize) -> PipelineResult<Vec<TokenHolder>> {
        let query = format!("{} WHERE token_id = ?1", Self::SELECT_HOLDER);
        let mut stmt = self.conn.prepare(&query)?;
        let mut holders = stmt
            .query_map(params![token], Self::row_to_holder)?
            .collect::<Result<Vec<_>, _>>()?;

        holders.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.id.cmp(&b.id)));
        holders.truncate(limit);
        Ok(holders)
    }

    pub fn holdings_of(&self, account: &str) -> PipelineResult<Vec<TokenHolder>> {
        let query = format!("{} WHERE account_id = ?1 ORDER BY token_id", Self::SELECT_HOLDER);
        let mut stmt = self.conn.prepare(&query)?;
        let holders = stmt
            .query_map(params![account], Self::row_to_holder)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(holders)
    }

    pub fn count(&self) -> PipelineResult<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM token_holders", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Recomputes every holder by replaying the transfer log in
    /// (block, log index) order, with mint and burn legs left out exactly as
    /// the pipeline does. Returns the number of holders written.
    pub fn rebuild_from_transfers(&self) -> PipelineResult<usize> {
        info!("Replaying transfers to rebuild token holders...");

        let tx = self.conn.unchecked_transaction()?;
        let mut holders: HashMap<String, TokenHolder> = HashMap::new();
        let mut replayed = 0usize;

        {
            let mut stmt = tx.prepare(
                "SELECT token_id, from_id, to_id, amount FROM transfers
                 ORDER BY block_number, log_index",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    parse_u256(3, &row.get::<_, String>(3)?)?,
                ))
            })?;

            for row in rows {
                let (token, from, to, amount) = row?;
                replayed += 1;
                if from == ZERO_ADDRESS || to == ZERO_ADDRESS {
                    continue;
                }
                let amount = u256_to_bigint(amount);

                holders
                    .entry(TokenHolder::holder_id(&from, &token))
                    .or_insert_with(|| TokenHolder::new(&from, &token))
                    .balance -= &amount;
                holders
                    .entry(TokenHolder::holder_id(&to, &token))
                    .or_insert_with(|| TokenHolder::new(&to, &token))
                    .balance += amount;

                if replayed % 100_000 == 0 {
                    info!("Replayed {} transfers...", replayed);
                }
            }
        }

        tx.execute("DELETE FROM token_holders", [])?;
        let holders: Vec<TokenHolder> = holders.into_values().collect();
        HolderRepository::new(&tx).upsert_batch(&holders)?;
        tx.commit()?;

        info!(
            "Rebuilt {} token holders from {} transfers",
            holders.len(),
            replayed
        );
        Ok(holders.len())
    }

    fn row_to_holder(row: &Row) -> rusqlite::Result<TokenHolder> {
        Ok(TokenHolder {
            id: row.get(0)?,
            account: row.get(1)?,
            token: row.get(2)?,
            balance: parse_bigint(3, &row.get::<_, String>(3)?)?,
        })
    }
}
