use anyhow::Result;
use erc20_ledger::config::Config;
use erc20_ledger::pipeline::Pipeline;
use erc20_ledger::repository::Database;
use erc20_ledger::rpc::RpcClient;
use erc20_ledger::scanner::{ScanRange, Scanner};
use erc20_ledger::source::RpcBlockSource;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting ERC20 transfer ledger indexer");

    let config = Config::from_env()?;
    info!("Configuration loaded");
    if config.token_addresses.is_empty() {
        info!("Indexing Transfer events of every contract");
    } else {
        info!("Indexing {} token contract(s)", config.token_addresses.len());
    }
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.json_rpc_urls.len()
    );

    let db = Database::new(&config.database_url)?;
    info!("Database initialized");

    let client = RpcClient::new(&config.json_rpc_urls)?;
    info!("RPC client connected");

    let source = RpcBlockSource::new(client, config.token_addresses.clone());
    let pipeline = Pipeline::new(config.placeholder.clone());
    let mut scanner = Scanner::new(source, db, pipeline, ScanRange::from(&config));

    if let Err(e) = scanner.run().await {
        error!("Scanner error: {}", e);
        return Err(e);
    }

    Ok(())
}
