use super::database::{MAX_KEYS_PER_QUERY, placeholders};
use super::models::Account;
use crate::error::PipelineResult;
use rusqlite::{OptionalExtension, params, params_from_iter};
use std::collections::HashMap;

pub struct AccountRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> AccountRepository<'a> {
    const INSERT_ACCOUNT: &'static str = "INSERT OR IGNORE INTO accounts (id) VALUES (?1)";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn find_by_ids(&self, ids: &[String]) -> PipelineResult<HashMap<String, Account>> {
        let mut found = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_KEYS_PER_QUERY) {
            let query = format!(
                "SELECT id FROM accounts WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&query)?;
            let rows = stmt.query_map(params_from_iter(chunk), |row| row.get::<_, String>(0))?;
            for id in rows {
                let id = id?;
                found.insert(id.clone(), Account { id });
            }
        }
        Ok(found)
    }

    pub fn insert_batch(&self, accounts: &[Account]) -> PipelineResult<usize> {
        let mut stmt = self.conn.prepare_cached(Self::INSERT_ACCOUNT)?;
        let mut count = 0;
        for account in accounts {
            count += stmt.execute(params![account.id])?;
        }
        Ok(count)
    }

    pub fn get(&self, id: &str) -> PipelineResult<Option<Account>> {
        let account = self
            .conn
            .query_row("SELECT id FROM accounts WHERE id = ?1", params![id], |row| {
                Ok(Account { id: row.get(0)? })
            })
            .optional()?;
        Ok(account)
    }

    pub fn count(&self) -> PipelineResult<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(count)
    }
}
