use super::database::{MAX_KEYS_PER_QUERY, parse_u256, placeholders};
use super::models::Token;
use crate::error::PipelineResult;
use alloy_primitives::U256;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use std::collections::HashMap;

pub struct TokenRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> TokenRepository<'a> {
    // Existing rows win: metadata may have been refreshed since first sight.
    const INSERT_TOKEN: &'static str =
        "INSERT INTO tokens (id, name, symbol, decimals, total_supply)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO NOTHING";

    const UPDATE_METADATA: &'static str =
        "UPDATE tokens SET name = ?2, symbol = ?3, decimals = ?4, total_supply = ?5 WHERE id = ?1";

    const SELECT_TOKEN: &'static str =
        "SELECT id, name, symbol, decimals, total_supply FROM tokens";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn find_by_ids(&self, ids: &[String]) -> PipelineResult<HashMap<String, Token>> {
        let mut found = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_KEYS_PER_QUERY) {
            let query = format!(
                "{} WHERE id IN ({})",
                Self::SELECT_TOKEN,
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&query)?;
            let rows = stmt.query_map(params_from_iter(chunk), Self::row_to_token)?;
            for token in rows {
                let token = token?;
                found.insert(token.id.clone(), token);
            }
        }
        Ok(found)
    }

    pub fn insert_batch(&self, tokens: &[Token]) -> PipelineResult<usize> {
        let mut stmt = self.conn.prepare_cached(Self::INSERT_TOKEN)?;
        let mut count = 0;
        for token in tokens {
            count += stmt.execute(params![
                token.id,
                token.name,
                token.symbol,
                token.decimals,
                token.total_supply.to_string(),
            ])?;
        }
        Ok(count)
    }

    pub fn get(&self, id: &str) -> PipelineResult<Option<Token>> {
        let query = format!("{} WHERE id = ?1", Self::SELECT_TOKEN);
        let token = self
            .conn
            .query_row(&query, params![id], Self::row_to_token)
            .optional()?;
        Ok(token)
    }

    pub fn list(&self) -> PipelineResult<Vec<Token>> {
        let query = format!("{} ORDER BY id", Self::SELECT_TOKEN);
        let mut stmt = self.conn.prepare(&query)?;
        let tokens = stmt
            .query_map([], Self::row_to_token)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tokens)
    }

    pub fn count(&self) -> PipelineResult<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM tokens", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Entry point for an out-of-band metadata refresher. Returns `false`
    /// when the token is unknown.
    pub fn update_metadata(
        &self,
        id: &str,
        name: &str,
        symbol: &str,
        decimals: u8,
        total_supply: U256,
    ) -> PipelineResult<bool> {
        let updated = self.conn.execute(
            Self::UPDATE_METADATA,
            params![id, name, symbol, decimals, total_supply.to_string()],
        )?;
        Ok(updated > 0)
    }

    fn row_to_token(row: &Row) -> rusqlite::Result<Token> {
        Ok(Token {
            id: row.get(0)?,
            name: row.get(1)?,
            symbol: row.get(2)?,
            decimals: row.get(3)?,
            total_supply: parse_u256(4, &row.get::<_, String>(4)?)?,
        })
    }
}
