use crate::repository::PlaceholderMetadata;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DATABASE_URL: &str = "sqlite:./indexer.db";
const DEFAULT_BATCH_SIZE: u64 = 1000; // Most public RPCs allow up to 1k blocks per eth_getLogs
const DEFAULT_POLL_INTERVAL_SECS: u64 = 12;

#[derive(Debug, Clone)]
pub struct Config {
    pub json_rpc_urls: Vec<String>,
    /// Contracts to index. Empty means every contract emitting Transfer.
    pub token_addresses: Vec<Address>,
    pub database_url: String,
    pub start_block: u64,
    pub end_block: Option<u64>,
    pub batch_size: u64,
    pub poll_interval: Duration,
    pub placeholder: PlaceholderMetadata,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let urls = var("JSON_RPC_URLS")
            .or_else(|| var("JSON_RPC_URL"))
            .context("JSON_RPC_URLS must be set in .env")?;
        let json_rpc_urls = split_list(&urls);
        if json_rpc_urls.is_empty() {
            anyhow::bail!("JSON_RPC_URLS must contain at least one URL");
        }

        let token_addresses = var("TOKEN_ADDRESSES")
            .map(|list| {
                split_list(&list)
                    .iter()
                    .map(|addr| {
                        Address::from_str(addr)
                            .with_context(|| format!("Invalid address in TOKEN_ADDRESSES: {addr}"))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let database_url =
            var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let start_block = parse_var(&var, "START_BLOCK")?.unwrap_or(0);
        let end_block = parse_var(&var, "END_BLOCK")?;
        if let Some(end) = end_block {
            if end < start_block {
                anyhow::bail!("END_BLOCK ({end}) is below START_BLOCK ({start_block})");
            }
        }

        let batch_size = parse_var(&var, "BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            anyhow::bail!("BATCH_SIZE must be greater than zero");
        }

        let poll_interval = Duration::from_secs(
            parse_var(&var, "POLL_INTERVAL_SECS")?.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        );

        let defaults = PlaceholderMetadata::default();
        let placeholder = PlaceholderMetadata {
            name: var("TOKEN_PLACEHOLDER_NAME").unwrap_or(defaults.name),
            symbol: var("TOKEN_PLACEHOLDER_SYMBOL").unwrap_or(defaults.symbol),
            decimals: parse_var(&var, "TOKEN_PLACEHOLDER_DECIMALS")?.unwrap_or(defaults.decimals),
        };

        Ok(Config {
            json_rpc_urls,
            token_addresses,
            database_url,
            start_block,
            end_block,
            batch_size,
            poll_interval,
            placeholder,
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<F, T>(var: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid {key}: {raw}"))
        })
        .transpose()
}
