use crate::error::PipelineResult;
use crate::repository::{
    Account, AccountRepository, BatchChanges, CursorRepository, HolderRepository, Store, Token,
    TokenHolder, TokenRepository, TransferRepository,
};
use alloy_primitives::U256;
use anyhow::{Context, Result};
use num_bigint::BigInt;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// Keeps `IN (...)` lists well below SQLite's bound-parameter limit.
pub(crate) const MAX_KEYS_PER_QUERY: usize = 500;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tokens (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        symbol TEXT NOT NULL,
        decimals INTEGER NOT NULL,
        total_supply TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS token_holders (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL REFERENCES accounts(id),
        token_id TEXT NOT NULL REFERENCES tokens(id),
        balance TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_token_holders_account ON token_holders(account_id);
    CREATE INDEX IF NOT EXISTS idx_token_holders_token ON token_holders(token_id);

    CREATE TABLE IF NOT EXISTS transfers (
        id TEXT PRIMARY KEY,
        block_number INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        tx_hash TEXT NOT NULL,
        log_index INTEGER NOT NULL,
        from_id TEXT NOT NULL REFERENCES accounts(id),
        to_id TEXT NOT NULL REFERENCES accounts(id),
        token_id TEXT NOT NULL REFERENCES tokens(id),
        amount TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_transfers_block ON transfers(block_number, log_index);
    CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers(from_id);
    CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers(to_id);
    CREATE INDEX IF NOT EXISTS idx_transfers_token ON transfers(token_id);

    CREATE TABLE IF NOT EXISTS indexer_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        last_processed_block INTEGER NOT NULL
    );
";

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path).context("Failed to open database")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("Failed to create schema")?;
        Ok(())
    }
}

impl Store for Database {
    fn find_tokens(&self, ids: &[String]) -> PipelineResult<HashMap<String, Token>> {
        TokenRepository::new(&self.conn).find_by_ids(ids)
    }

    fn find_accounts(&self, ids: &[String]) -> PipelineResult<HashMap<String, Account>> {
        AccountRepository::new(&self.conn).find_by_ids(ids)
    }

    fn find_token_holders(&self, ids: &[String]) -> PipelineResult<HashMap<String, TokenHolder>> {
        HolderRepository::new(&self.conn).find_by_ids(ids)
    }

    fn find_transfer_ids(&self, ids: &[String]) -> PipelineResult<HashSet<String>> {
        TransferRepository::new(&self.conn).find_existing_ids(ids)
    }

    fn last_processed_block(&self) -> PipelineResult<Option<u64>> {
        CursorRepository::new(&self.conn).get()
    }

    fn commit_batch(&mut self, changes: &BatchChanges, to_block: u64) -> PipelineResult<()> {
        let tx = self.conn.transaction()?;

        // Referenced rows first so every foreign key resolves.
        TokenRepository::new(&tx).insert_batch(&changes.new_tokens)?;
        AccountRepository::new(&tx).insert_batch(&changes.new_accounts)?;
        HolderRepository::new(&tx).upsert_batch(&changes.token_holders)?;
        TransferRepository::new(&tx).insert_batch(&changes.transfers)?;
        CursorRepository::new(&tx).set(to_block)?;

        tx.commit()?;
        Ok(())
    }
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

pub(crate) fn parse_u256(column: usize, value: &str) -> rusqlite::Result<U256> {
    U256::from_str_radix(value, 10).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_bigint(column: usize, value: &str) -> rusqlite::Result<BigInt> {
    BigInt::from_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}
