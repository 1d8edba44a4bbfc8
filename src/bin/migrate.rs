use anyhow::Result;
use clap::Parser;
use erc20_ledger::repository::{Database, HolderRepository};
use tracing::info;

const DEFAULT_DATABASE_URL: &str = "sqlite:./indexer.db";

#[derive(Parser)]
#[command(name = "migrate")]
#[command(about = "Create or update the ledger schema", long_about = None)]
struct Cli {
    /// Recompute every token holder balance from the stored transfers
    #[arg(long)]
    rebuild_holders: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

    info!("Running migrations on database: {database_url}");
    let db = Database::new(&database_url)?;
    info!("Migrations completed successfully!");

    if cli.rebuild_holders {
        let rebuilt = HolderRepository::new(&db.conn).rebuild_from_transfers()?;
        info!("Token holders rebuilt: {}", rebuilt);
    }

    Ok(())
}
