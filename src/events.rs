use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 = Transfer::SIGNATURE_HASH;

/// Lower-case hex form of the zero address, the mint/burn sentinel.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub fn decode_transfer_event(topics: &[B256], data: &[u8]) -> anyhow::Result<Transfer> {
    let decoded = Transfer::decode_raw_log(topics.iter().copied(), data)?;
    Ok(decoded)
}

/// Canonical id form of an address: `0x` + 40 lower-case hex digits.
pub fn address_key(address: &Address) -> String {
    format!("{address:?}")
}

pub fn is_transfer_topic(topics: &[B256]) -> bool {
    topics.first() == Some(&TRANSFER_TOPIC)
}
