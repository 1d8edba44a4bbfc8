//! Buffers the records of one batch and derives the keys it touches.

use crate::error::{PipelineError, PipelineResult};
use crate::events::{ZERO_ADDRESS, is_transfer_topic};
use crate::pipeline::normalizer::{TransferRecord, normalize};
use crate::repository::TokenHolder;
use crate::source::Block;
use std::collections::BTreeSet;
use tracing::warn;

/// A Transfer log that was excluded from the batch because it did not decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub reason: String,
}

/// Distinct keys touched by a batch, in sorted order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchKeys {
    pub token_addresses: BTreeSet<String>,
    /// Every `from`/`to`, the zero address included.
    pub account_addresses: BTreeSet<String>,
    /// TokenHolder ids (`account:token`), never for the zero address.
    pub holder_keys: BTreeSet<String>,
    pub transfer_ids: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct BatchAccumulator {
    records: Vec<TransferRecord>,
    failures: Vec<DecodeFailure>,
    last_height: Option<u64>,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes every Transfer log of `block`. Decode failures are
    /// reported and skipped; a log without transaction context fails the
    /// whole batch.
    pub fn push_block(&mut self, block: &Block) -> PipelineResult<()> {
        let height = block.header.height;
        if let Some(previous) = self.last_height {
            if height <= previous {
                return Err(PipelineError::OutOfOrderBlock { previous, height });
            }
        }
        self.last_height = Some(height);

        let mut block_records = Vec::new();
        for log in block.logs.iter().filter(|log| is_transfer_topic(&log.topics)) {
            match normalize(log, &block.header) {
                Ok(record) => block_records.push(record),
                Err(PipelineError::Decode {
                    block_number,
                    tx_hash,
                    log_index,
                    reason,
                }) => {
                    warn!(
                        "Skipping undecodable transfer log {}-{} in block {}: {}",
                        tx_hash, log_index, block_number, reason
                    );
                    self.failures.push(DecodeFailure {
                        block_number,
                        tx_hash,
                        log_index,
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        block_records.sort_by_key(|r| r.event_index);
        self.records.extend(block_records);
        Ok(())
    }

    pub fn records(&self) -> &[TransferRecord] {
        &self.records
    }

    pub fn failures(&self) -> &[DecodeFailure] {
        &self.failures
    }

    pub fn keys(&self) -> BatchKeys {
        let mut keys = BatchKeys::default();
        for record in &self.records {
            keys.token_addresses.insert(record.token_address.clone());
            keys.account_addresses.insert(record.from.clone());
            keys.account_addresses.insert(record.to.clone());
            for account in [&record.from, &record.to] {
                if account != ZERO_ADDRESS {
                    keys.holder_keys
                        .insert(TokenHolder::holder_id(account, &record.token_address));
                }
            }
            keys.transfer_ids.insert(record.id.clone());
        }
        keys
    }

    pub fn into_parts(self) -> (Vec<TransferRecord>, Vec<DecodeFailure>) {
        (self.records, self.failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalizer::test_logs::transfer_log;
    use crate::source::{BlockHeader, RawLog};
    use alloy_primitives::{Address, B256, Bytes, address};

    const TOKEN: Address = address!("0x00000000000000000000000000000000000000aa");
    const ALICE: Address = address!("0xa11ce00000000000000000000000000000000001");
    const BOB: Address = address!("0xb0b0000000000000000000000000000000000002");

    fn block(height: u64, logs: Vec<RawLog>) -> Block {
        Block {
            header: BlockHeader {
                height,
                timestamp: height * 12,
            },
            logs,
        }
    }

    #[test]
    fn derives_keys_and_excludes_zero_holder() {
        let mut acc = BatchAccumulator::new();
        acc.push_block(&block(
            10,
            vec![
                transfer_log(TOKEN, Address::ZERO, ALICE, 100, 1, 0),
                transfer_log(TOKEN, ALICE, BOB, 40, 2, 1),
            ],
        ))
        .unwrap();

        let keys = acc.keys();
        assert_eq!(keys.token_addresses.len(), 1);
        assert_eq!(keys.account_addresses.len(), 3);
        assert!(keys.account_addresses.contains(ZERO_ADDRESS));
        assert_eq!(keys.holder_keys.len(), 2);
        assert!(keys.holder_keys.iter().all(|k| !k.starts_with(ZERO_ADDRESS)));
        assert_eq!(keys.transfer_ids.len(), 2);
    }

    #[test]
    fn ignores_other_events_and_reports_decode_failures() {
        let approval = RawLog {
            address: TOKEN,
            topics: vec![B256::repeat_byte(0x8c)],
            data: Bytes::new(),
            transaction_hash: Some(B256::repeat_byte(9)),
            log_index: Some(0),
        };
        let mut broken = transfer_log(TOKEN, ALICE, BOB, 1, 3, 2);
        broken.data = Bytes::new();

        let mut acc = BatchAccumulator::new();
        acc.push_block(&block(
            5,
            vec![approval, broken, transfer_log(TOKEN, ALICE, BOB, 7, 4, 3)],
        ))
        .unwrap();

        assert_eq!(acc.records().len(), 1);
        assert_eq!(acc.failures().len(), 1);
        assert_eq!(acc.failures()[0].log_index, 2);
    }

    #[test]
    fn orders_logs_within_block_and_rejects_descending_blocks() {
        let mut acc = BatchAccumulator::new();
        acc.push_block(&block(
            20,
            vec![
                transfer_log(TOKEN, ALICE, BOB, 1, 1, 5),
                transfer_log(TOKEN, BOB, ALICE, 1, 1, 2),
            ],
        ))
        .unwrap();
        let indexes: Vec<u64> = acc.records().iter().map(|r| r.event_index).collect();
        assert_eq!(indexes, vec![2, 5]);

        let err = acc.push_block(&block(20, vec![])).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OutOfOrderBlock {
                previous: 20,
                height: 20
            }
        ));
    }

    #[test]
    fn missing_transaction_hash_fails_the_batch() {
        let mut log = transfer_log(TOKEN, ALICE, BOB, 1, 1, 0);
        log.transaction_hash = None;

        let mut acc = BatchAccumulator::new();
        assert!(matches!(
            acc.push_block(&block(1, vec![log])),
            Err(PipelineError::MissingTransactionContext { .. })
        ));
    }
}
