use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log};
use alloy::transports::TransportResult;
use alloy_primitives::{Address, B256};
use anyhow::Result;
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_RESULTS_MARKER: &str = "exceeds max results";

/// Read-only JSON-RPC client that rotates across endpoints on failure.
#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<DynProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    max_retries: usize,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String]) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::with_capacity(rpc_urls.len());
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            providers.push(ProviderBuilder::new().connect_http(parsed_url).erased());
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            max_retries: 5,
        })
    }

    fn provider(&self) -> DynProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        self.providers[index].clone()
    }

    pub fn current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    fn rotate_provider(&self) {
        let next = (self.current_provider.load(Ordering::Relaxed) + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn retry_strategy(&self) -> impl Iterator<Item = Duration> + Send {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    /// Runs `op` against the current provider with timeout, backoff and
    /// rotation. "exceeds max results" answers are returned without retrying
    /// so the caller can split the range instead.
    async fn request<T, F, Fut>(&self, what: &'static str, op: F) -> Result<T>
    where
        T: Send,
        F: Fn(DynProvider) -> Fut + Send,
        Fut: Future<Output = TransportResult<T>> + Send,
    {
        let client = self.clone();
        Retry::spawn(self.retry_strategy(), move || {
            let client = client.clone();
            let call = op(client.provider());
            async move {
                match timeout(REQUEST_TIMEOUT, call).await {
                    Ok(Ok(value)) => Ok(Ok(value)),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        if error_str.contains(MAX_RESULTS_MARKER) {
                            return Ok(Err(anyhow::anyhow!("{}", error_str)));
                        }
                        warn!(
                            "{} failed on {}: {}, rotating provider",
                            what,
                            client.current_url(),
                            error_str
                        );
                        client.rotate_provider();
                        Err(anyhow::anyhow!("{}", error_str))
                    }
                    Err(_) => {
                        warn!(
                            "{} timed out after {} seconds on {}, rotating provider",
                            what,
                            REQUEST_TIMEOUT.as_secs(),
                            client.current_url()
                        );
                        client.rotate_provider();
                        Err(anyhow::anyhow!(
                            "{} timed out after {} seconds",
                            what,
                            REQUEST_TIMEOUT.as_secs()
                        ))
                    }
                }
            }
        })
        .await
        .and_then(|r| r)
    }

    pub async fn get_latest_block(&self) -> Result<u64> {
        self.request("eth_blockNumber", |provider| async move {
            provider.get_block_number().await
        })
        .await
    }

    pub async fn get_block_timestamp(&self, block_number: u64) -> Result<u64> {
        let block = self
            .request("eth_getBlockByNumber", move |provider| async move {
                provider
                    .get_block_by_number(BlockNumberOrTag::Number(block_number))
                    .await
            })
            .await?;

        let block = block.ok_or_else(|| anyhow::anyhow!("Block {} not found", block_number))?;
        Ok(block.header.timestamp)
    }

    async fn get_logs_once(
        &self,
        from_block: u64,
        to_block: u64,
        addresses: &[Address],
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let mut filter = Filter::new()
            .event_signature(topic0)
            .from_block(from_block)
            .to_block(to_block);
        if !addresses.is_empty() {
            filter = filter.address(addresses.to_vec());
        }

        self.request("eth_getLogs", move |provider| {
            let filter = filter.clone();
            async move { provider.get_logs(&filter).await }
        })
        .await
    }

    fn parse_max_results_error(error_str: &str) -> Option<(u64, u64)> {
        let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        let captures = re.captures(error_str)?;

        let from = captures.get(1)?.as_str().parse().ok()?;
        let to = captures.get(2)?.as_str().parse().ok()?;

        Some((from, to))
    }

    /// All logs with `topic0` in `from_block..=to_block`, restricted to
    /// `addresses` unless it is empty. Splits the range when the node caps
    /// the result size.
    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        addresses: &[Address],
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let mut all_logs = Vec::new();
        let mut current_from = from_block;

        while current_from <= to_block {
            match self
                .get_logs_once(current_from, to_block, addresses, topic0)
                .await
            {
                Ok(logs) => {
                    all_logs.extend(logs);
                    break;
                }
                Err(e) => {
                    let error_str = e.to_string();
                    let Some((suggested_from, suggested_to)) = error_str
                        .contains(MAX_RESULTS_MARKER)
                        .then(|| Self::parse_max_results_error(&error_str))
                        .flatten()
                    else {
                        return Err(e);
                    };

                    info!(
                        "Hit max results limit for blocks {}-{}, splitting at block {}",
                        current_from, to_block, suggested_to
                    );
                    let logs = self
                        .get_logs_once(suggested_from, suggested_to, addresses, topic0)
                        .await?;
                    all_logs.extend(logs);
                    current_from = suggested_to + 1;
                }
            }
        }

        Ok(all_logs)
    }
}
