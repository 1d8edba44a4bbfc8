//! Turns one Transfer log into a canonical [`TransferRecord`].

use crate::error::{PipelineError, PipelineResult};
use crate::events::{ZERO_ADDRESS, address_key, decode_transfer_event};
use crate::source::{BlockHeader, RawLog};
use alloy_primitives::U256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    /// `{txHash}-{logIndex}`
    pub id: String,
    pub token_address: String,
    pub from: String,
    pub to: String,
    pub amount: U256,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub event_index: u64,
    pub tx_hash: String,
}

impl TransferRecord {
    pub fn is_mint(&self) -> bool {
        self.from == ZERO_ADDRESS
    }

    pub fn is_burn(&self) -> bool {
        self.to == ZERO_ADDRESS
    }
}

/// Callers only pass logs whose first topic is the Transfer signature.
pub fn normalize(log: &RawLog, header: &BlockHeader) -> PipelineResult<TransferRecord> {
    let tx_hash = log
        .transaction_hash
        .ok_or(PipelineError::MissingTransactionContext {
            block_number: header.height,
            missing: "transaction hash",
        })?;
    let log_index = log
        .log_index
        .ok_or(PipelineError::MissingTransactionContext {
            block_number: header.height,
            missing: "log index",
        })?;
    let tx_hash = format!("{tx_hash:?}");

    let event = decode_transfer_event(&log.topics, &log.data).map_err(|e| {
        PipelineError::Decode {
            block_number: header.height,
            tx_hash: tx_hash.clone(),
            log_index,
            reason: e.to_string(),
        }
    })?;

    Ok(TransferRecord {
        id: format!("{tx_hash}-{log_index}"),
        token_address: address_key(&log.address),
        from: address_key(&event.from),
        to: address_key(&event.to),
        amount: event.value,
        block_number: header.height,
        block_timestamp: header.timestamp,
        event_index: log_index,
        tx_hash,
    })
}

#[cfg(test)]
pub(crate) mod test_logs {
    use crate::events::TRANSFER_TOPIC;
    use crate::source::RawLog;
    use alloy_primitives::{Address, B256, Bytes, U256};

    pub fn transfer_log(
        token: Address,
        from: Address,
        to: Address,
        amount: u64,
        tx: u8,
        log_index: u64,
    ) -> RawLog {
        RawLog {
            address: token,
            topics: vec![TRANSFER_TOPIC, from.into_word(), to.into_word()],
            data: Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec()),
            transaction_hash: Some(B256::repeat_byte(tx)),
            log_index: Some(log_index),
        }
    }
}
