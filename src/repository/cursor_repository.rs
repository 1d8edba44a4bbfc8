use crate::error::PipelineResult;
use rusqlite::{Connection, OptionalExtension, params};

/// The durable watermark: highest block whose batch has been committed.
pub struct CursorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> CursorRepository<'a> {
    const GET_LAST_PROCESSED_BLOCK: &'static str =
        "SELECT last_processed_block FROM indexer_state WHERE id = 1";

    const SET_LAST_PROCESSED_BLOCK: &'static str =
        "INSERT INTO indexer_state (id, last_processed_block) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET last_processed_block = excluded.last_processed_block";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self) -> PipelineResult<Option<u64>> {
        let block = self
            .conn
            .query_row(Self::GET_LAST_PROCESSED_BLOCK, [], |row| row.get(0))
            .optional()?;
        Ok(block)
    }

    pub fn set(&self, block_number: u64) -> PipelineResult<()> {
        self.conn
            .execute(Self::SET_LAST_PROCESSED_BLOCK, params![block_number])?;
        Ok(())
    }
}
