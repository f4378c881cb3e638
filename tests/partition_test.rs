/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests for partition winner determination and chain snapshotting.

mod common;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use common::fixtures::{founder, keypairs, validator_set, value_block, LedgerFolder, QuorumSigners};
use common::mem_db::MemDB;
use fedsync_rs::checkpoint::builder::build_checkpoint;
use fedsync_rs::partition::{determine_winner, snapshot_chain, PartitionSnapshot, PartitionVerdict};
use fedsync_rs::store::{camera::StoreCamera, BlockStore};
use fedsync_rs::types::basic::{CryptoHash, Timestamp};
use fedsync_rs::types::checkpoint::Checkpoint;

fn snapshot(
    chain_length: u64,
    signature_count: u64,
    transaction_count: u64,
    timestamp: u64,
) -> PartitionSnapshot {
    PartitionSnapshot {
        head: CryptoHash::new([1; 32]),
        chain_length,
        signature_count,
        transaction_count,
        timestamp: Timestamp::new(timestamp),
    }
}

#[test]
fn longer_chain_wins() {
    let ours = snapshot(12, 3, 40, 1000);
    let theirs = snapshot(11, 30, 400, 1);
    assert_eq!(determine_winner(&ours, &theirs), PartitionVerdict::Us);
    assert_eq!(determine_winner(&theirs, &ours), PartitionVerdict::Them);
}

#[test]
fn majority_side_of_a_four_validator_partition_wins_on_signatures() {
    // A 4-validator federation splits 3/1. Both sides kept building, so chain lengths tie,
    // but the 3-validator side accumulated three signatures per checkpoint against one.
    let majority = snapshot(12, 36, 10, 500);
    let minority = snapshot(12, 12, 10, 500);

    // Both sides run the comparison independently and reach complementary verdicts.
    assert_eq!(determine_winner(&majority, &minority), PartitionVerdict::Us);
    assert_eq!(determine_winner(&minority, &majority), PartitionVerdict::Them);
}

#[test]
fn transaction_count_breaks_signature_ties() {
    let ours = snapshot(12, 36, 50, 500);
    let theirs = snapshot(12, 36, 10, 500);
    assert_eq!(determine_winner(&ours, &theirs), PartitionVerdict::Us);
}

#[test]
fn earlier_snapshot_wins_the_timestamp_tiebreak() {
    let ours = snapshot(12, 36, 50, 400);
    let theirs = snapshot(12, 36, 50, 500);
    assert_eq!(determine_winner(&ours, &theirs), PartitionVerdict::Us);
    assert_eq!(determine_winner(&theirs, &ours), PartitionVerdict::Them);
}

#[test]
fn full_tie_is_a_merge() {
    let ours = snapshot(12, 36, 50, 500);
    let theirs = snapshot(12, 36, 50, 500);
    assert_eq!(determine_winner(&ours, &theirs), PartitionVerdict::Merge);
    assert_eq!(determine_winner(&theirs, &ours), PartitionVerdict::Merge);
}

#[test]
fn snapshot_chain_counts_signatures_and_transactions() {
    let keys = keypairs(4);
    let set = validator_set(&keys);
    let kv_store = MemDB::new();
    let mut store = BlockStore::new(kv_store.clone());
    store
        .initialize(&Checkpoint::genesis(founder(&keys[0]), &set))
        .unwrap();

    // Two epochs: 2 blocks then 1 block, each checkpoint signed by all 4 validators.
    for (epoch, block_count) in [(1u64, 2u64), (2, 1)] {
        for i in 0..block_count {
            let block = value_block(
                format!("e{}-{}", epoch, i).as_bytes(),
                i + 1,
                &keys[0],
                Vec::new(),
                epoch * 100 + i,
            );
            store.admit(&block).unwrap();
        }
        let build = build_checkpoint(
            &store,
            &LedgerFolder,
            &mut QuorumSigners(keys.clone()),
            founder(&keys[0]),
            &set,
            &HashSet::new(),
            Instant::now() + Duration::from_secs(1),
        )
        .unwrap();
        store
            .apply_checkpoint(&build.checkpoint, &build.block_ids, &build.entity_updates)
            .unwrap();
    }

    let camera = StoreCamera::new(kv_store);
    let snapshot = snapshot_chain(&camera.snapshot(), Timestamp::new(777))
        .unwrap()
        .unwrap();

    assert_eq!(snapshot.chain_length, 2);
    assert_eq!(snapshot.signature_count, 8);
    assert_eq!(snapshot.transaction_count, 3);
    assert_eq!(snapshot.timestamp, Timestamp::new(777));
    assert_eq!(snapshot.head, store.head_checkpoint().unwrap().id());
}
