use crate::config::Config;
use crate::error::PipelineError;
use crate::pipeline::{BatchOutcome, Pipeline};
use crate::repository::Store;
use crate::source::BlockSource;
use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

const RATE_LIMIT_DELAY_MS: u64 = 200; // 200ms between requests = 5 requests per second

/// What a single scanner iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStep {
    Processed { from_block: u64, to_block: u64 },
    CaughtUp { head: u64 },
    Finished { end_block: u64 },
}

#[derive(Debug, Clone)]
pub struct ScanRange {
    pub start_block: u64,
    pub end_block: Option<u64>,
    pub batch_size: u64,
    pub poll_interval: Duration,
}

impl From<&Config> for ScanRange {
    fn from(config: &Config) -> Self {
        ScanRange {
            start_block: config.start_block,
            end_block: config.end_block,
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
        }
    }
}

pub struct Scanner<B: BlockSource, S: Store> {
    source: B,
    store: S,
    pipeline: Pipeline,
    range: ScanRange,
}

impl<B: BlockSource, S: Store> Scanner<B, S> {
    pub fn new(source: B, store: S, pipeline: Pipeline, range: ScanRange) -> Self {
        Scanner {
            source,
            store,
            pipeline,
            range,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Next block to fetch: right after the watermark, or the configured
    /// start when nothing has been committed yet.
    pub fn next_block(&self) -> Result<u64> {
        Ok(match self.store.last_processed_block()? {
            Some(watermark) => watermark + 1,
            None => self.range.start_block,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        if self.store.last_processed_block()?.is_none() && self.range.start_block > 0 {
            warn!(
                "Starting at block {} instead of genesis; balances of holders active before it will be incomplete",
                self.range.start_block
            );
        }
        info!("Starting scan from block {}", self.next_block()?);

        loop {
            let loop_start = Instant::now();

            match self.step().await {
                Ok(ScanStep::Processed { .. }) => {}
                Ok(ScanStep::CaughtUp { head }) => {
                    info!(
                        "Caught up to latest block {}. Entering polling mode...",
                        head
                    );
                    sleep(self.range.poll_interval).await;
                    continue;
                }
                Ok(ScanStep::Finished { end_block }) => {
                    info!("Reached END_BLOCK {}, stopping", end_block);
                    return Ok(());
                }
                Err(e) => {
                    if let Some(pipeline_err) = e.downcast_ref::<PipelineError>() {
                        if pipeline_err.is_retryable() {
                            warn!(
                                "Batch rolled back; a restart resumes after block {}",
                                self.store
                                    .last_processed_block()
                                    .ok()
                                    .flatten()
                                    .map_or("none".to_string(), |b| b.to_string())
                            );
                        }
                    }
                    return Err(e);
                }
            }

            let loop_duration = loop_start.elapsed();
            let target_duration = Duration::from_millis(RATE_LIMIT_DELAY_MS);
            if loop_duration < target_duration {
                sleep(target_duration - loop_duration).await;
            }
        }
    }

    /// Fetches and commits at most one batch.
    pub async fn step(&mut self) -> Result<ScanStep> {
        let from = self.next_block()?;

        if let Some(end_block) = self.range.end_block {
            if from > end_block {
                return Ok(ScanStep::Finished { end_block });
            }
        }

        let head = self.source.latest_block().await?;
        if from > head {
            return Ok(ScanStep::CaughtUp { head });
        }

        let mut to_block = (from + self.range.batch_size - 1).min(head);
        if let Some(end_block) = self.range.end_block {
            to_block = to_block.min(end_block);
        }

        info!("Fetching logs for blocks {} to {}", from, to_block);
        let batch = self.source.fetch_batch(from, to_block).await?;
        info!(
            "Received {} logs for blocks {} to {}",
            batch.log_count(),
            from,
            to_block
        );

        if let BatchOutcome::AlreadyCommitted { .. } =
            self.pipeline.process_batch(&mut self.store, &batch)?
        {
            warn!("Blocks {} to {} were already committed", from, to_block);
        }

        Ok(ScanStep::Processed {
            from_block: from,
            to_block,
        })
    }
}
