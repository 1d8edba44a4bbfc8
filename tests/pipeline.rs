use alloy_primitives::{Address, B256, Bytes, U256, address};
use erc20_ledger::error::PipelineError;
use erc20_ledger::events::{TRANSFER_TOPIC, ZERO_ADDRESS, address_key};
use erc20_ledger::pipeline::{BatchOutcome, Pipeline};
use erc20_ledger::repository::{
    Account, AccountRepository, BatchChanges, CursorRepository, Database, HolderRepository, Store,
    TokenHolder, TokenRepository, Transfer, TransferFilter, TransferRepository,
};
use erc20_ledger::source::{Block, BlockBatch, BlockHeader, RawLog};
use num_bigint::BigInt;

const TOKEN: Address = address!("0x00000000000000000000000000000000000000aa");
const OTHER_TOKEN: Address = address!("0x00000000000000000000000000000000000000bb");
const AAA: Address = address!("0x0000000000000000000000000000000000000aaa");
const BBB: Address = address!("0x0000000000000000000000000000000000000bbb");
const CCC: Address = address!("0x0000000000000000000000000000000000000ccc");

fn log(token: Address, from: Address, to: Address, amount: u64, tx: u8, log_index: u64) -> RawLog {
    RawLog {
        address: token,
        topics: vec![TRANSFER_TOPIC, from.into_word(), to.into_word()],
        data: Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec()),
        transaction_hash: Some(B256::repeat_byte(tx)),
        log_index: Some(log_index),
    }
}

fn batch(from_block: u64, to_block: u64, blocks: Vec<(u64, Vec<RawLog>)>) -> BlockBatch {
    BlockBatch {
        from_block,
        to_block,
        blocks: blocks
            .into_iter()
            .map(|(height, logs)| Block {
                header: BlockHeader {
                    height,
                    timestamp: 1_700_000_000 + height * 12,
                },
                logs,
            })
            .collect(),
    }
}

fn balance(db: &Database, account: Address, token: Address) -> Option<BigInt> {
    HolderRepository::new(&db.conn)
        .get(&address_key(&account), &address_key(&token))
        .unwrap()
        .map(|h| h.balance)
}

fn row_count(db: &Database, table: &str) -> usize {
    db.conn
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap() as usize
}

#[test]
fn mint_then_transfer_is_persisted() {
    let mut db = Database::in_memory().unwrap();
    let outcome = Pipeline::default()
        .process_batch(
            &mut db,
            &batch(
                0,
                10,
                vec![
                    (4, vec![log(TOKEN, Address::ZERO, AAA, 100, 1, 0)]),
                    (5, vec![log(TOKEN, AAA, BBB, 40, 2, 3)]),
                ],
            ),
        )
        .unwrap();
    assert!(matches!(outcome, BatchOutcome::Committed(_)));

    assert_eq!(CursorRepository::new(&db.conn).get().unwrap(), Some(10));
    assert_eq!(row_count(&db, "accounts"), 3);
    assert!(
        AccountRepository::new(&db.conn)
            .get(ZERO_ADDRESS)
            .unwrap()
            .is_some()
    );
    assert_eq!(row_count(&db, "token_holders"), 2);
    assert_eq!(balance(&db, AAA, TOKEN), Some(BigInt::from(-40)));
    assert_eq!(balance(&db, BBB, TOKEN), Some(BigInt::from(40)));
    assert_eq!(balance(&db, Address::ZERO, TOKEN), None);

    let token = TokenRepository::new(&db.conn)
        .get(&address_key(&TOKEN))
        .unwrap()
        .unwrap();
    assert_eq!(token.symbol, "DFUND");
    assert_eq!(token.decimals, 18);
    assert_eq!(token.total_supply, U256::ZERO);

    let transfers = TransferRepository::new(&db.conn)
        .query(&TransferFilter::default(), 10, 0)
        .unwrap();
    let ids: Vec<String> = transfers.iter().map(|t| t.id.clone()).collect();
    assert_eq!(
        ids,
        vec![
            format!("{:?}-0", B256::repeat_byte(1)),
            format!("{:?}-3", B256::repeat_byte(2)),
        ]
    );
    assert_eq!(transfers[1].amount, U256::from(40));
    assert_eq!(transfers[1].timestamp, 1_700_000_060);
}

#[test]
fn replaying_a_committed_range_changes_nothing() {
    let mut db = Database::in_memory().unwrap();
    let pipeline = Pipeline::default();
    let b = batch(0, 5, vec![(3, vec![log(TOKEN, AAA, BBB, 7, 1, 0)])]);

    pipeline.process_batch(&mut db, &b).unwrap();
    let outcome = pipeline.process_batch(&mut db, &b).unwrap();

    assert_eq!(outcome, BatchOutcome::AlreadyCommitted { to_block: 5 });
    assert_eq!(row_count(&db, "transfers"), 1);
    assert_eq!(balance(&db, BBB, TOKEN), Some(BigInt::from(7)));
}

#[test]
fn balances_sum_to_zero_per_token() {
    let mut db = Database::in_memory().unwrap();
    let pipeline = Pipeline::default();
    pipeline
        .process_batch(
            &mut db,
            &batch(
                0,
                9,
                vec![
                    (1, vec![log(TOKEN, Address::ZERO, AAA, 1_000, 1, 0)]),
                    (
                        2,
                        vec![
                            log(TOKEN, AAA, BBB, 300, 2, 0),
                            log(OTHER_TOKEN, CCC, AAA, 5, 2, 1),
                        ],
                    ),
                ],
            ),
        )
        .unwrap();
    pipeline
        .process_batch(
            &mut db,
            &batch(
                10,
                19,
                vec![(
                    12,
                    vec![
                        log(TOKEN, BBB, CCC, 100, 3, 0),
                        log(TOKEN, CCC, Address::ZERO, 50, 3, 1),
                    ],
                )],
            ),
        )
        .unwrap();

    for token in [TOKEN, OTHER_TOKEN] {
        let total: BigInt = HolderRepository::new(&db.conn)
            .top_holders(&address_key(&token), usize::MAX)
            .unwrap()
            .into_iter()
            .map(|h| h.balance)
            .sum();
        assert_eq!(total, BigInt::default());
    }
    assert_eq!(balance(&db, CCC, TOKEN), Some(BigInt::from(100)));
    assert_eq!(row_count(&db, "tokens"), 2);
}

#[test]
fn refreshed_metadata_survives_later_batches() {
    let mut db = Database::in_memory().unwrap();
    let pipeline = Pipeline::default();
    pipeline
        .process_batch(&mut db, &batch(0, 0, vec![(0, vec![log(TOKEN, AAA, BBB, 1, 1, 0)])]))
        .unwrap();

    let updated = TokenRepository::new(&db.conn)
        .update_metadata(
            &address_key(&TOKEN),
            "Real Token",
            "REAL",
            6,
            U256::from(1_000_000u64),
        )
        .unwrap();
    assert!(updated);

    pipeline
        .process_batch(&mut db, &batch(1, 1, vec![(1, vec![log(TOKEN, BBB, AAA, 1, 2, 0)])]))
        .unwrap();

    let token = TokenRepository::new(&db.conn)
        .get(&address_key(&TOKEN))
        .unwrap()
        .unwrap();
    assert_eq!(token.symbol, "REAL");
    assert_eq!(token.decimals, 6);
    assert_eq!(token.total_supply, U256::from(1_000_000u64));
    assert!(
        !TokenRepository::new(&db.conn)
            .update_metadata(&address_key(&CCC), "x", "X", 0, U256::ZERO)
            .unwrap()
    );
}

#[test]
fn rebuilt_holders_match_incremental_balances() {
    let mut db = Database::in_memory().unwrap();
    let pipeline = Pipeline::default();
    let batches = [
        batch(0, 4, vec![(2, vec![log(TOKEN, Address::ZERO, AAA, 500, 1, 0)])]),
        batch(
            5,
            9,
            vec![
                (5, vec![log(TOKEN, AAA, BBB, 200, 2, 0)]),
                (8, vec![log(TOKEN, BBB, CCC, 50, 3, 0), log(TOKEN, CCC, AAA, 10, 3, 1)]),
            ],
        ),
        batch(10, 14, vec![(11, vec![log(TOKEN, AAA, Address::ZERO, 90, 4, 0)])]),
    ];
    for b in &batches {
        pipeline.process_batch(&mut db, b).unwrap();
    }

    let snapshot = |db: &Database| -> Vec<TokenHolder> {
        HolderRepository::new(&db.conn)
            .top_holders(&address_key(&TOKEN), usize::MAX)
            .unwrap()
    };
    let incremental = snapshot(&db);

    let rebuilt = HolderRepository::new(&db.conn)
        .rebuild_from_transfers()
        .unwrap();
    assert_eq!(rebuilt, incremental.len());
    assert_eq!(snapshot(&db), incremental);
}

#[test]
fn transfer_replayed_past_the_watermark_is_rejected() {
    let mut db = Database::in_memory().unwrap();
    let pipeline = Pipeline::default();
    let l = log(TOKEN, AAA, BBB, 3, 1, 0);
    pipeline
        .process_batch(&mut db, &batch(0, 5, vec![(2, vec![l.clone()])]))
        .unwrap();

    let err = pipeline
        .process_batch(&mut db, &batch(6, 9, vec![(7, vec![l])]))
        .unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateTransferId(_)));
    assert_eq!(CursorRepository::new(&db.conn).get().unwrap(), Some(5));
    assert_eq!(balance(&db, BBB, TOKEN), Some(BigInt::from(3)));
}

#[test]
fn primary_key_violation_maps_to_duplicate_id() {
    let mut db = Database::in_memory().unwrap();
    Pipeline::default()
        .process_batch(&mut db, &batch(0, 0, vec![(0, vec![log(TOKEN, AAA, BBB, 3, 1, 0)])]))
        .unwrap();

    let existing = TransferRepository::new(&db.conn)
        .query(&TransferFilter::default(), 1, 0)
        .unwrap();
    let err = TransferRepository::new(&db.conn)
        .insert_batch(&existing)
        .unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateTransferId(ref id) if *id == existing[0].id));
}

#[test]
fn failed_commit_rolls_back_every_write() {
    let mut db = Database::in_memory().unwrap();
    let orphan = Transfer {
        id: "0x01-0".to_string(),
        block_number: 1,
        timestamp: 0,
        tx_hash: "0x01".to_string(),
        log_index: 0,
        from: address_key(&AAA),
        to: address_key(&BBB),
        token: address_key(&TOKEN),
        amount: U256::from(1),
    };
    let changes = BatchChanges {
        new_accounts: vec![Account {
            id: address_key(&AAA),
        }],
        transfers: vec![orphan],
        ..Default::default()
    };

    let err = db.commit_batch(&changes, 1).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(db.last_processed_block().unwrap(), None);
    assert_eq!(row_count(&db, "accounts"), 0);
    assert_eq!(row_count(&db, "transfers"), 0);
}

#[test]
fn transfer_queries_filter_and_page() {
    let mut db = Database::in_memory().unwrap();
    Pipeline::default()
        .process_batch(
            &mut db,
            &batch(
                0,
                20,
                vec![
                    (3, vec![log(TOKEN, AAA, BBB, 1, 1, 0)]),
                    (7, vec![log(TOKEN, BBB, CCC, 2, 2, 0), log(OTHER_TOKEN, AAA, CCC, 3, 2, 1)]),
                    (15, vec![log(TOKEN, CCC, AAA, 4, 3, 0)]),
                ],
            ),
        )
        .unwrap();
    let repo = TransferRepository::new(&db.conn);

    let by_account = repo
        .query(
            &TransferFilter {
                account: Some(address_key(&AAA)),
                ..Default::default()
            },
            100,
            0,
        )
        .unwrap();
    let blocks: Vec<u64> = by_account.iter().map(|t| t.block_number).collect();
    assert_eq!(blocks, vec![3, 7, 15]);

    let in_range = repo
        .query(
            &TransferFilter {
                token: Some(address_key(&TOKEN)),
                block_range: Some((4, 15)),
                ..Default::default()
            },
            1,
            1,
        )
        .unwrap();
    assert_eq!(in_range.len(), 1);
    assert_eq!(in_range[0].block_number, 15);

    assert_eq!(repo.counts_for_account(&address_key(&CCC)).unwrap(), (1, 2));
    let stats = repo.get_statistics().unwrap();
    assert_eq!(stats.total_transfers, 4);
    assert_eq!(stats.earliest_block, Some(3));
    assert_eq!(stats.latest_block, Some(15));
}

#[test]
fn undecodable_log_is_reported_and_the_rest_commits() {
    let mut db = Database::in_memory().unwrap();
    let mut truncated = log(TOKEN, AAA, BBB, 9, 2, 1);
    truncated.data = Bytes::from(vec![0u8; 7]);

    let outcome = Pipeline::default()
        .process_batch(
            &mut db,
            &batch(
                0,
                4,
                vec![(2, vec![log(TOKEN, AAA, BBB, 5, 1, 0), truncated])],
            ),
        )
        .unwrap();

    let BatchOutcome::Committed(summary) = outcome else {
        panic!("expected a committed batch");
    };
    assert_eq!(summary.transfers, 1);
    assert_eq!(summary.decode_failures.len(), 1);
    let failure = &summary.decode_failures[0];
    assert_eq!(failure.block_number, 2);
    assert_eq!(failure.log_index, 1);
    assert_eq!(failure.tx_hash, format!("{:?}", B256::repeat_byte(2)));

    assert_eq!(CursorRepository::new(&db.conn).get().unwrap(), Some(4));
    assert_eq!(row_count(&db, "transfers"), 1);
    assert_eq!(balance(&db, BBB, TOKEN), Some(BigInt::from(5)));
}

#[test]
fn log_without_transaction_hash_aborts_the_batch() {
    let mut db = Database::in_memory().unwrap();
    let mut orphan = log(TOKEN, AAA, BBB, 5, 1, 1);
    orphan.transaction_hash = None;

    let err = Pipeline::default()
        .process_batch(
            &mut db,
            &batch(
                0,
                4,
                vec![(1, vec![log(TOKEN, AAA, BBB, 5, 3, 0)]), (3, vec![orphan])],
            ),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::MissingTransactionContext {
            block_number: 3,
            ..
        }
    ));
    assert_eq!(CursorRepository::new(&db.conn).get().unwrap(), None);
    assert_eq!(row_count(&db, "transfers"), 0);
    assert_eq!(row_count(&db, "accounts"), 0);
}

#[test]
fn inverted_range_never_moves_the_watermark() {
    let mut db = Database::in_memory().unwrap();
    let err = Pipeline::default()
        .process_batch(&mut db, &BlockBatch::empty(10, 5))
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidBatchRange { .. }));
    assert_eq!(CursorRepository::new(&db.conn).get().unwrap(), None);
}
