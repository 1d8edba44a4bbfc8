use alloy_primitives::U256;
use num_bigint::{BigInt, Sign};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,
}

impl Token {
    pub fn placeholder(id: &str, metadata: &PlaceholderMetadata) -> Self {
        Token {
            id: id.to_string(),
            name: metadata.name.clone(),
            symbol: metadata.symbol.clone(),
            decimals: metadata.decimals,
            total_supply: U256::ZERO,
        }
    }
}

/// Metadata given to a token the first time it is seen. Real values are
/// filled in later by whatever refreshes token metadata out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Default for PlaceholderMetadata {
    fn default() -> Self {
        PlaceholderMetadata {
            name: "DeFi DAO Fund Token".to_string(),
            symbol: "DFUND".to_string(),
            decimals: 18,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
}

/// Lossless widening of a token amount into the signed balance domain.
pub fn u256_to_bigint(value: U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHolder {
    pub id: String,
    pub account: String,
    pub token: String,
    /// Signed: starting mid-history can drive a holder below zero.
    pub balance: BigInt,
}

impl TokenHolder {
    pub fn new(account: &str, token: &str) -> Self {
        TokenHolder {
            id: Self::holder_id(account, token),
            account: account.to_string(),
            token: token.to_string(),
            balance: BigInt::default(),
        }
    }

    pub fn holder_id(account: &str, token: &str) -> String {
        format!("{account}:{token}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub id: String,
    pub block_number: u64,
    /// Block timestamp, unix seconds.
    pub timestamp: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub from: String,
    pub to: String,
    pub token: String,
    pub amount: U256,
}
