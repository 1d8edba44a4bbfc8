use anyhow::Result;
use clap::{Parser, Subcommand};
use erc20_ledger::query::commands::{
    TransferQuery, cmd_account, cmd_holders, cmd_status, cmd_token, cmd_tokens, cmd_transfer,
    cmd_transfers,
};
use erc20_ledger::query::formatters::OutputFormat;
use erc20_ledger::repository::Database;

const DEFAULT_DATABASE_URL: &str = "sqlite:./indexer.db";

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Query the indexed ERC20 transfer ledger", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watermark and row counts
    Status,
    Token {
        address: String,
    },
    Tokens,
    /// Balances and transfer counts of one account
    Account {
        address: String,
    },
    Holders {
        token: String,
        #[arg(default_value = "10")]
        count: usize,
    },
    Transfers {
        #[arg(long)]
        token: Option<String>,

        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,

        /// Either side of the transfer
        #[arg(long)]
        account: Option<String>,

        #[arg(long)]
        block: Option<u64>,

        #[arg(long, num_args = 2, value_names = ["START", "END"])]
        block_range: Option<Vec<u64>>,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// A single transfer by `<tx hash>-<log index>`
    Transfer {
        id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    dotenv::dotenv().ok();
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
    let db = Database::new(&database_url)?;
    let conn = &db.conn;

    match cli.command {
        Commands::Status => cmd_status(conn, &format)?,
        Commands::Token { address } => cmd_token(conn, &address, &format)?,
        Commands::Tokens => cmd_tokens(conn, &format)?,
        Commands::Account { address } => cmd_account(conn, &address, &format)?,
        Commands::Holders { token, count } => cmd_holders(conn, &token, count, &format)?,
        Commands::Transfers {
            token,
            from,
            to,
            account,
            block,
            block_range,
            limit,
            offset,
        } => {
            let block_range = block_range.and_then(|v| match v.as_slice() {
                [start, end] => Some((*start, *end)),
                _ => None,
            });
            let query = TransferQuery {
                token,
                from,
                to,
                account,
                block,
                block_range,
                limit,
                offset,
            };
            cmd_transfers(conn, query, &format)?;
        }
        Commands::Transfer { id } => cmd_transfer(conn, &id, &format)?,
    }

    Ok(())
}
