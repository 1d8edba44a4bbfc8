use crate::repository::{Token, TokenHolder, Transfer, TransferStats};
use alloy_primitives::utils::format_units;
use alloy_primitives::{I256, U256};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use num_bigint::BigInt;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

const DEFAULT_DECIMALS: u8 = 18; // Most ERC20 tokens use 18 decimals

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexerStatus {
    pub last_processed_block: Option<u64>,
    pub tokens: usize,
    pub accounts: usize,
    pub token_holders: usize,
    #[serde(flatten)]
    pub transfers: TransferStats,
}

/// An account together with its per-token balances.
#[derive(Debug, Clone)]
pub struct AccountView {
    pub id: String,
    pub outgoing_transfers: usize,
    pub incoming_transfers: usize,
    pub holdings: Vec<(TokenHolder, Option<Token>)>,
}

pub fn scale_amount(value: U256, decimals: u8) -> String {
    format_units(value, decimals).unwrap_or_else(|_| value.to_string())
}

/// Like [`scale_amount`] for signed balances. Values outside the int256
/// range are shown unscaled.
pub fn scale_balance(value: &BigInt, decimals: u8) -> String {
    I256::from_dec_str(&value.to_string())
        .ok()
        .and_then(|v| format_units(v, decimals).ok())
        .unwrap_or_else(|| value.to_string())
}

pub fn format_status(status: &IndexerStatus, format: &OutputFormat) -> String {
    if *format == OutputFormat::Json {
        return serde_json::to_string_pretty(status).unwrap_or_else(|_| "{}".to_string());
    }

    let or_na = |v: Option<u64>| v.map_or("N/A".to_string(), |b| b.to_string());
    let rows = vec![
        vec![json!("Last Processed Block"), json!(or_na(status.last_processed_block))],
        vec![json!("Tokens"), json!(status.tokens)],
        vec![json!("Accounts"), json!(status.accounts)],
        vec![json!("Token Holders"), json!(status.token_holders)],
        vec![json!("Transfers"), json!(status.transfers.total_transfers)],
        vec![json!("Earliest Block"), json!(or_na(status.transfers.earliest_block))],
        vec![json!("Latest Block"), json!(or_na(status.transfers.latest_block))],
    ];
    render(&["Metric", "Value"], &rows, format, "")
}

pub fn format_tokens(tokens: &[Token], format: &OutputFormat) -> String {
    let rows: Vec<Vec<Value>> = tokens
        .iter()
        .map(|token| {
            vec![
                json!(token.id),
                json!(token.name),
                json!(token.symbol),
                json!(token.decimals),
                json!(token.total_supply.to_string()),
            ]
        })
        .collect();
    render(
        &["Address", "Name", "Symbol", "Decimals", "Total Supply"],
        &rows,
        format,
        "No tokens found.",
    )
}

pub fn format_holders(holders: &[TokenHolder], decimals: u8, format: &OutputFormat) -> String {
    let rows: Vec<Vec<Value>> = holders
        .iter()
        .enumerate()
        .map(|(i, holder)| {
            vec![
                json!(i + 1),
                json!(holder.account),
                json!(scale_balance(&holder.balance, decimals)),
                json!(holder.balance.to_string()),
            ]
        })
        .collect();
    render(
        &["Rank", "Address", "Balance", "Balance (Raw)"],
        &rows,
        format,
        "No holders found.",
    )
}

pub fn format_account(view: &AccountView, format: &OutputFormat) -> String {
    let holdings: Vec<Vec<Value>> = view
        .holdings
        .iter()
        .map(|(holder, token)| {
            let decimals = token.as_ref().map_or(DEFAULT_DECIMALS, |t| t.decimals);
            vec![
                json!(holder.token),
                json!(token.as_ref().map(|t| t.symbol.clone()).unwrap_or_default()),
                json!(scale_balance(&holder.balance, decimals)),
                json!(holder.balance.to_string()),
            ]
        })
        .collect();
    let headers = ["Token", "Symbol", "Balance", "Balance (Raw)"];

    match format {
        OutputFormat::Json => {
            let doc = json!({
                "account": view.id,
                "outgoing_transfers": view.outgoing_transfers,
                "incoming_transfers": view.incoming_transfers,
                "holdings": to_objects(&headers, &holdings),
            });
            serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Csv => render(&headers, &holdings, format, ""),
        OutputFormat::Table => format!(
            "Account {}\nOutgoing transfers: {}, incoming transfers: {}\n{}",
            view.id,
            view.outgoing_transfers,
            view.incoming_transfers,
            render(&headers, &holdings, format, "No holdings.")
        ),
    }
}

/// `decimals` maps token address to decimals; unknown tokens use 18.
pub fn format_transfers(
    transfers: &[Transfer],
    decimals: &HashMap<String, u8>,
    format: &OutputFormat,
) -> String {
    let rows: Vec<Vec<Value>> = transfers
        .iter()
        .map(|t| {
            let token_decimals = decimals.get(&t.token).copied().unwrap_or(DEFAULT_DECIMALS);
            let tx_hash = match format {
                OutputFormat::Table => shorten_hash(&t.tx_hash),
                _ => t.tx_hash.clone(),
            };
            vec![
                json!(t.block_number),
                json!(t.timestamp),
                json!(t.token),
                json!(t.from),
                json!(t.to),
                json!(scale_amount(t.amount, token_decimals)),
                json!(t.amount.to_string()),
                json!(tx_hash),
                json!(t.log_index),
            ]
        })
        .collect();
    render(
        &[
            "Block",
            "Timestamp",
            "Token",
            "From",
            "To",
            "Amount",
            "Amount (Raw)",
            "Tx Hash",
            "Log Index",
        ],
        &rows,
        format,
        "No transfers found.",
    )
}

fn render(headers: &[&str], rows: &[Vec<Value>], format: &OutputFormat, empty: &str) -> String {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() && !empty.is_empty() {
                return empty.to_string();
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(headers.to_vec());
            for row in rows {
                table.add_row(row.iter().map(|v| Cell::new(plain(v))).collect::<Vec<_>>());
            }
            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(&to_objects(headers, rows))
            .unwrap_or_else(|_| "[]".to_string()),
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(headers.iter().map(|h| snake_case(h)));
            for row in rows {
                let _ = wtr.write_record(row.iter().map(plain));
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

fn to_objects(headers: &[&str], rows: &[Vec<Value>]) -> Value {
    Value::Array(
        rows.iter()
            .map(|row| {
                let object: Map<String, Value> = headers
                    .iter()
                    .map(|h| snake_case(h))
                    .zip(row.iter().cloned())
                    .collect();
                Value::Object(object)
            })
            .collect(),
    )
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// "Amount (Raw)" -> "amount_raw"
fn snake_case(header: &str) -> String {
    header
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn shorten_hash(hash: &str) -> String {
    if hash.len() <= 10 {
        return hash.to_string();
    }
    format!("{}...{}", &hash[..6], &hash[hash.len() - 4..])
}
