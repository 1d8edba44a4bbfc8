use super::database::{MAX_KEYS_PER_QUERY, parse_u256, placeholders};
use super::models::Transfer;
use crate::error::{PipelineError, PipelineResult};
use rusqlite::{OptionalExtension, Row, ToSql, params, params_from_iter};
use serde::Serialize;
use std::collections::HashSet;

/// Optional filters for transfer listings; all set filters must match.
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    pub token: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Either side of the transfer.
    pub account: Option<String>,
    pub block_range: Option<(u64, u64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferStats {
    pub total_transfers: usize,
    pub earliest_block: Option<u64>,
    pub latest_block: Option<u64>,
}

pub struct TransferRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> TransferRepository<'a> {
    const INSERT_TRANSFER: &'static str = "INSERT INTO transfers (
            id, block_number, timestamp, tx_hash, log_index,
            from_id, to_id, token_id, amount
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

    const SELECT_TRANSFER: &'static str = "SELECT id, block_number, timestamp, tx_hash, log_index, from_id, to_id, token_id, amount FROM transfers";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn find_existing_ids(&self, ids: &[String]) -> PipelineResult<HashSet<String>> {
        let mut found = HashSet::new();
        for chunk in ids.chunks(MAX_KEYS_PER_QUERY) {
            let query = format!(
                "SELECT id FROM transfers WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&query)?;
            let rows = stmt.query_map(params_from_iter(chunk), |row| row.get::<_, String>(0))?;
            for id in rows {
                found.insert(id?);
            }
        }
        Ok(found)
    }

    /// Appends `transfers`. A primary-key clash means the transfer was
    /// already recorded and surfaces as [`PipelineError::DuplicateTransferId`].
    pub fn insert_batch(&self, transfers: &[Transfer]) -> PipelineResult<usize> {
        let mut stmt = self.conn.prepare_cached(Self::INSERT_TRANSFER)?;
        let mut count = 0;

        for transfer in transfers {
            count += stmt
                .execute(params![
                    transfer.id,
                    transfer.block_number,
                    transfer.timestamp,
                    transfer.tx_hash,
                    transfer.log_index,
                    transfer.from,
                    transfer.to,
                    transfer.token,
                    transfer.amount.to_string(),
                ])
                .map_err(|e| match e {
                    rusqlite::Error::SqliteFailure(ref err, _)
                        if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
                    {
                        PipelineError::DuplicateTransferId(transfer.id.clone())
                    }
                    other => other.into(),
                })?;
        }

        Ok(count)
    }

    pub fn get(&self, id: &str) -> PipelineResult<Option<Transfer>> {
        let query = format!("{} WHERE id = ?1", Self::SELECT_TRANSFER);
        let transfer = self
            .conn
            .query_row(&query, params![id], Self::row_to_transfer)
            .optional()?;
        Ok(transfer)
    }

    /// Matching transfers in (block, log index) order.
    pub fn query(
        &self,
        filter: &TransferFilter,
        limit: usize,
        offset: usize,
    ) -> PipelineResult<Vec<Transfer>> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(token) = &filter.token {
            conditions.push("token_id = ?");
            params.push(Box::new(token.clone()));
        }

        if let Some(from) = &filter.from {
            conditions.push("from_id = ?");
            params.push(Box::new(from.clone()));
        }

        if let Some(to) = &filter.to {
            conditions.push("to_id = ?");
            params.push(Box::new(to.clone()));
        }

        if let Some(account) = &filter.account {
            conditions.push("(from_id = ? OR to_id = ?)");
            params.push(Box::new(account.clone()));
            params.push(Box::new(account.clone()));
        }

        if let Some((start, end)) = filter.block_range {
            conditions.push("block_number >= ?");
            params.push(Box::new(start));
            conditions.push("block_number <= ?");
            params.push(Box::new(end));
        }

        let mut query = Self::SELECT_TRANSFER.to_string();
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(&format!(
            " ORDER BY block_number, log_index LIMIT {limit} OFFSET {offset}"
        ));

        let mut stmt = self.conn.prepare(&query)?;
        let transfers = stmt
            .query_map(params_from_iter(params), Self::row_to_transfer)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transfers)
    }

    /// `(outgoing, incoming)` transfer counts for an account.
    pub fn counts_for_account(&self, account: &str) -> PipelineResult<(usize, usize)> {
        let counts = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM transfers WHERE from_id = ?1),
                (SELECT COUNT(*) FROM transfers WHERE to_id = ?1)",
            params![account],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }

    pub fn get_statistics(&self) -> PipelineResult<TransferStats> {
        let (total_transfers, earliest_block, latest_block) = self.conn.query_row(
            "SELECT COUNT(*), MIN(block_number), MAX(block_number) FROM transfers",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(TransferStats {
            total_transfers,
            earliest_block,
            latest_block,
        })
    }

    fn row_to_transfer(row: &Row) -> rusqlite::Result<Transfer> {
        Ok(Transfer {
            id: row.get(0)?,
            block_number: row.get(1)?,
            timestamp: row.get(2)?,
            tx_hash: row.get(3)?,
            log_index: row.get(4)?,
            from: row.get(5)?,
            to: row.get(6)?,
            token: row.get(7)?,
            amount: parse_u256(8, &row.get::<_, String>(8)?)?,
        })
    }
}
