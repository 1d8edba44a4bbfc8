//! Chain-data input: the ordered block batches the pipeline consumes, and
//! the RPC-backed producer of those batches.

use crate::events::TRANSFER_TOPIC;
use crate::rpc::RpcClient;
use alloy::rpc::types::Log;
use alloy_primitives::{Address, B256, Bytes};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::debug;

/// Header lookups in flight at once while resolving block timestamps.
const MAX_CONCURRENT_HEADER_REQUESTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    /// Unix seconds.
    pub timestamp: u64,
}

/// One log as handed over by the chain source. Transaction hash and log
/// index are optional because not every source guarantees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub logs: Vec<RawLog>,
}

/// A contiguous, inclusive block range. Blocks without logs may be absent
/// from `blocks`; the range still counts as processed once committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBatch {
    pub from_block: u64,
    pub to_block: u64,
    pub blocks: Vec<Block>,
}

impl BlockBatch {
    pub fn empty(from_block: u64, to_block: u64) -> Self {
        BlockBatch {
            from_block,
            to_block,
            blocks: Vec::new(),
        }
    }

    pub fn log_count(&self) -> usize {
        self.blocks.iter().map(|b| b.logs.len()).sum()
    }
}

#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn latest_block(&self) -> Result<u64>;

    async fn fetch_batch(&self, from_block: u64, to_block: u64) -> Result<BlockBatch>;
}

/// Fetches Transfer logs over JSON-RPC and groups them into blocks.
pub struct RpcBlockSource {
    client: RpcClient,
    token_addresses: Vec<Address>,
}

impl RpcBlockSource {
    pub fn new(client: RpcClient, token_addresses: Vec<Address>) -> Self {
        RpcBlockSource {
            client,
            token_addresses,
        }
    }
}

#[async_trait]
impl BlockSource for RpcBlockSource {
    async fn latest_block(&self) -> Result<u64> {
        self.client.get_latest_block().await
    }

    async fn fetch_batch(&self, from_block: u64, to_block: u64) -> Result<BlockBatch> {
        let logs = self
            .client
            .get_logs(from_block, to_block, &self.token_addresses, TRANSFER_TOPIC)
            .await?;
        if logs.is_empty() {
            return Ok(BlockBatch::empty(from_block, to_block));
        }

        let mut grouped: BTreeMap<u64, (Option<u64>, Vec<RawLog>)> = BTreeMap::new();
        for log in logs {
            let height = log
                .block_number
                .context("RPC returned a log without a block number")?;
            let entry = grouped.entry(height).or_insert((None, Vec::new()));
            if entry.0.is_none() {
                entry.0 = log.block_timestamp;
            }
            entry.1.push(raw_log(&log));
        }

        let missing: Vec<u64> = grouped
            .iter()
            .filter(|(_, (ts, _))| ts.is_none())
            .map(|(height, _)| *height)
            .collect();
        if !missing.is_empty() {
            debug!("Fetching {} block headers for timestamps", missing.len());
        }
        let fetched =
            resolve_timestamps(&missing, |height| self.client.get_block_timestamp(height)).await?;
        for (height, timestamp) in missing.into_iter().zip(fetched) {
            if let Some(entry) = grouped.get_mut(&height) {
                entry.0 = Some(timestamp);
            }
        }

        let blocks = grouped
            .into_iter()
            .map(|(height, (timestamp, logs))| Block {
                header: BlockHeader {
                    height,
                    timestamp: timestamp.unwrap_or_default(),
                },
                logs,
            })
            .collect();

        Ok(BlockBatch {
            from_block,
            to_block,
            blocks,
        })
    }
}

/// Looks up `heights` in order, with at most
/// [`MAX_CONCURRENT_HEADER_REQUESTS`] lookups outstanding.
async fn resolve_timestamps<F, Fut>(heights: &[u64], fetch: F) -> Result<Vec<u64>>
where
    F: Fn(u64) -> Fut,
    Fut: Future<Output = Result<u64>>,
{
    stream::iter(heights.iter().copied())
        .map(fetch)
        .buffered(MAX_CONCURRENT_HEADER_REQUESTS)
        .try_collect()
        .await
}

fn raw_log(log: &Log) -> RawLog {
    RawLog {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
    }
}
