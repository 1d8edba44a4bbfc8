use crate::events::address_key;
use crate::query::formatters::{
    AccountView, IndexerStatus, OutputFormat, format_account, format_holders, format_status,
    format_tokens, format_transfers,
};
use crate::repository::{
    AccountRepository, CursorRepository, HolderRepository, TokenRepository, TransferFilter,
    TransferRepository,
};
use alloy_primitives::Address;
use anyhow::{Result, anyhow};
use rusqlite::Connection;
use std::collections::HashMap;
use std::str::FromStr;

const DEFAULT_DECIMALS: u8 = 18;

/// Parses a user-supplied address into the lower-case key used in storage.
pub fn parse_address(label: &str, value: &str) -> Result<String> {
    let address = Address::from_str(value)
        .map_err(|_| anyhow!("Invalid {} address: {}", label, value))?;
    Ok(address_key(&address))
}

pub fn cmd_status(conn: &Connection, format: &OutputFormat) -> Result<()> {
    let status = IndexerStatus {
        last_processed_block: CursorRepository::new(conn).get()?,
        tokens: TokenRepository::new(conn).count()?,
        accounts: AccountRepository::new(conn).count()?,
        token_holders: HolderRepository::new(conn).count()?,
        transfers: TransferRepository::new(conn).get_statistics()?,
    };
    println!("{}", format_status(&status, format));
    Ok(())
}

pub fn cmd_token(conn: &Connection, address: &str, format: &OutputFormat) -> Result<()> {
    let id = parse_address("token", address)?;
    let token = TokenRepository::new(conn)
        .get(&id)?
        .ok_or_else(|| anyhow!("Token {} has not been indexed", id))?;
    println!("{}", format_tokens(&[token], format));
    Ok(())
}

pub fn cmd_tokens(conn: &Connection, format: &OutputFormat) -> Result<()> {
    let tokens = TokenRepository::new(conn).list()?;
    println!("{}", format_tokens(&tokens, format));
    Ok(())
}

pub fn cmd_account(conn: &Connection, address: &str, format: &OutputFormat) -> Result<()> {
    let id = parse_address("account", address)?;
    if AccountRepository::new(conn).get(&id)?.is_none() {
        return Err(anyhow!("Account {} has not been indexed", id));
    }

    let holders = HolderRepository::new(conn).holdings_of(&id)?;
    let token_ids: Vec<String> = holders.iter().map(|h| h.token.clone()).collect();
    let mut tokens = TokenRepository::new(conn).find_by_ids(&token_ids)?;
    let (outgoing_transfers, incoming_transfers) =
        TransferRepository::new(conn).counts_for_account(&id)?;

    let view = AccountView {
        id,
        outgoing_transfers,
        incoming_transfers,
        holdings: holders
            .into_iter()
            .map(|holder| {
                let token = tokens.remove(&holder.token);
                (holder, token)
            })
            .collect(),
    };
    println!("{}", format_account(&view, format));
    Ok(())
}

pub fn cmd_holders(
    conn: &Connection,
    token: &str,
    count: usize,
    format: &OutputFormat,
) -> Result<()> {
    let token_id = parse_address("token", token)?;
    let holders = HolderRepository::new(conn).top_holders(&token_id, count)?;
    let decimals = TokenRepository::new(conn)
        .get(&token_id)?
        .map_or(DEFAULT_DECIMALS, |t| t.decimals);
    println!("{}", format_holders(&holders, decimals, format));
    Ok(())
}

#[derive(Debug, Default)]
pub struct TransferQuery {
    pub token: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub account: Option<String>,
    pub block: Option<u64>,
    pub block_range: Option<(u64, u64)>,
    pub limit: usize,
    pub offset: usize,
}

impl TransferQuery {
    pub fn to_filter(&self) -> Result<TransferFilter> {
        let parse = |label: &str, value: &Option<String>| {
            value
                .as_deref()
                .map(|v| parse_address(label, v))
                .transpose()
        };

        let block_range = match (self.block, self.block_range) {
            (Some(block), _) => Some((block, block)),
            (None, Some((start, end))) if start > end => {
                return Err(anyhow!("Invalid block range: {} > {}", start, end));
            }
            (None, range) => range,
        };

        Ok(TransferFilter {
            token: parse("token", &self.token)?,
            from: parse("from", &self.from)?,
            to: parse("to", &self.to)?,
            account: parse("account", &self.account)?,
            block_range,
        })
    }
}

pub fn cmd_transfers(conn: &Connection, query: TransferQuery, format: &OutputFormat) -> Result<()> {
    let filter = query.to_filter()?;
    let transfers = TransferRepository::new(conn).query(&filter, query.limit, query.offset)?;
    let decimals = token_decimals(conn, transfers.iter().map(|t| t.token.clone()))?;
    println!("{}", format_transfers(&transfers, &decimals, format));
    Ok(())
}

pub fn cmd_transfer(conn: &Connection, id: &str, format: &OutputFormat) -> Result<()> {
    let transfer = TransferRepository::new(conn)
        .get(&id.to_lowercase())?
        .ok_or_else(|| anyhow!("Transfer {} not found", id))?;
    let decimals = token_decimals(conn, std::iter::once(transfer.token.clone()))?;
    println!("{}", format_transfers(&[transfer], &decimals, format));
    Ok(())
}

fn token_decimals(
    conn: &Connection,
    tokens: impl Iterator<Item = String>,
) -> Result<HashMap<String, u8>> {
    let mut ids: Vec<String> = tokens.collect();
    ids.sort();
    ids.dedup();
    Ok(TokenRepository::new(conn)
        .find_by_ids(&ids)?
        .into_iter()
        .map(|(id, token)| (id, token.decimals))
        .collect())
}
