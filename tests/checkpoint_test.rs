/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests for checkpoint building and validation: quorum boundaries, chain linkage, Merkle
//! proofs, and determinism.

mod common;

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};

use common::fixtures::{
    founder, keypairs, validator_set, value_block, LedgerFolder, QuorumSigners,
};
use common::mem_db::MemDB;
use fedsync_rs::checkpoint::builder::{build_checkpoint, BuildError, EpochBuild};
use fedsync_rs::checkpoint::validator::{validate, ValidateError};
use fedsync_rs::store::{BlockStore, BlockStoreError};
use fedsync_rs::types::basic::CryptoHash;
use fedsync_rs::types::checkpoint::{Checkpoint, CheckpointSignatures};
use fedsync_rs::types::validator_set::ValidatorSet;

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(1)
}

struct Harness {
    store: BlockStore<MemDB>,
    keys: Vec<ed25519_dalek::SigningKey>,
    set: ValidatorSet,
    genesis: Checkpoint,
}

fn harness(n: usize) -> Harness {
    let keys = keypairs(n);
    let set = validator_set(&keys);
    let genesis = Checkpoint::genesis(founder(&keys[0]), &set);
    let mut store = BlockStore::new(MemDB::new());
    store.initialize(&genesis).unwrap();
    Harness {
        store,
        keys,
        set,
        genesis,
    }
}

fn build_epoch_one(harness: &mut Harness, signer_count: usize) -> Result<EpochBuild, BuildError> {
    for (i, entity) in [b"alice".as_slice(), b"bob".as_slice()].iter().enumerate() {
        let block = value_block(entity, 10 + i as u64, &harness.keys[0], Vec::new(), 100 + i as u64);
        harness.store.admit(&block).unwrap();
    }
    let signers = harness.keys[..signer_count].to_vec();
    build_checkpoint(
        &harness.store,
        &LedgerFolder,
        &mut QuorumSigners(signers),
        founder(&harness.keys[0]),
        &harness.set,
        &HashSet::new(),
        deadline(),
    )
}

#[test]
fn built_checkpoint_validates_against_the_previous_set() {
    let mut harness = harness(4);
    let build = build_epoch_one(&mut harness, 4).unwrap();

    let result = validate(
        &build.checkpoint,
        &harness.genesis.id(),
        &harness.set,
        &HashSet::new(),
    );
    assert_eq!(result, Ok(()));

    // Applying advances the head; the pending list is drained.
    harness
        .store
        .apply_checkpoint(&build.checkpoint, &build.block_ids, &build.entity_updates)
        .unwrap();
    assert_eq!(harness.store.current_epoch().unwrap().int(), 1);
    assert!(harness.store.pending_blocks().unwrap().is_empty());
}

#[test]
fn builder_fails_below_quorum_and_succeeds_at_it() {
    // 4 validators: quorum is 2*4/3 + 1 = 3.
    let mut harness = harness(4);
    match build_epoch_one(&mut harness, 2) {
        Err(BuildError::QuorumNotReached { got: 2, needed: 3 }) => (),
        other => panic!("expected QuorumNotReached, got {:?}", other.map(|_| ()).err()),
    }

    // The same epoch retried with enough signers succeeds.
    let build = build_epoch_one(&mut harness, 3).unwrap();
    assert_eq!(build.checkpoint.signatures.len(), 3);
}

#[test]
fn quorum_boundary_at_validation() {
    let mut harness = harness(4);
    let build = build_epoch_one(&mut harness, 4).unwrap();

    // Exactly quorum - 1 = 2 valid signatures must fail.
    let mut short = build.checkpoint.clone();
    short.signatures = CheckpointSignatures::new();
    common::fixtures::sign_checkpoint(&mut short, &harness.keys[..2]);
    assert_eq!(
        validate(&short, &harness.genesis.id(), &harness.set, &HashSet::new()),
        Err(ValidateError::QuorumNotMet { got: 2, needed: 3 })
    );

    // Exactly quorum = 3 must succeed.
    let mut exact = build.checkpoint.clone();
    exact.signatures = CheckpointSignatures::new();
    common::fixtures::sign_checkpoint(&mut exact, &harness.keys[..3]);
    assert_eq!(
        validate(&exact, &harness.genesis.id(), &harness.set, &HashSet::new()),
        Ok(())
    );
}

#[test]
fn validation_is_deterministic() {
    let mut harness = harness(4);
    let build = build_epoch_one(&mut harness, 3).unwrap();

    let first = validate(
        &build.checkpoint,
        &harness.genesis.id(),
        &harness.set,
        &HashSet::new(),
    );
    let second = validate(
        &build.checkpoint,
        &harness.genesis.id(),
        &harness.set,
        &HashSet::new(),
    );
    assert_eq!(first, second);
}

#[test]
fn mismatched_previous_reference_is_a_chain_mismatch() {
    let mut harness = harness(4);
    let mut build = build_epoch_one(&mut harness, 4).unwrap();
    build.checkpoint.previous = CryptoHash::new([7; 32]);

    assert!(matches!(
        validate(
            &build.checkpoint,
            &harness.genesis.id(),
            &harness.set,
            &HashSet::new()
        ),
        Err(ValidateError::ChainMismatch { .. })
    ));

    // The store refuses to apply it, and local state stays untouched.
    let head_before = harness.store.head_checkpoint().unwrap().id();
    assert!(matches!(
        harness
            .store
            .apply_checkpoint(&build.checkpoint, &build.block_ids, &build.entity_updates),
        Err(BlockStoreError::ChainMismatch { .. })
    ));
    assert_eq!(harness.store.head_checkpoint().unwrap().id(), head_before);
    assert_eq!(harness.store.current_epoch().unwrap().int(), 0);
}

#[test]
fn corrupted_merkle_proof_fails_validation() {
    let mut harness = harness(4);
    let mut build = build_epoch_one(&mut harness, 4).unwrap();

    let mut proof = build.checkpoint.proofs.block_inclusion.clone().unwrap();
    proof.leaf = CryptoHash::new([0xEE; 32]);
    build.checkpoint.proofs.block_inclusion = Some(proof);

    assert!(matches!(
        validate(
            &build.checkpoint,
            &harness.genesis.id(),
            &harness.set,
            &HashSet::new()
        ),
        Err(ValidateError::ProofInvalid { .. })
    ));
}

#[test]
fn excluded_signers_do_not_count_towards_quorum() {
    let mut harness = harness(4);
    let build = build_epoch_one(&mut harness, 3).unwrap();

    let mut excluded = HashSet::new();
    excluded.insert(harness.keys[0].verifying_key().to_bytes());

    assert_eq!(
        validate(&build.checkpoint, &harness.genesis.id(), &harness.set, &excluded),
        Err(ValidateError::QuorumNotMet { got: 2, needed: 3 })
    );
}

#[test]
fn empty_epoch_builds_a_checkpoint_with_empty_roots() {
    let harness = harness(4);
    let build = build_checkpoint(
        &harness.store,
        &LedgerFolder,
        &mut QuorumSigners(harness.keys.clone()),
        founder(&harness.keys[0]),
        &harness.set,
        &HashSet::new(),
        deadline(),
    )
    .unwrap();

    assert!(build.block_ids.is_empty());
    assert!(build.checkpoint.block_root.is_zero());
    assert!(build.checkpoint.proofs.block_inclusion.is_none());
    assert_eq!(
        validate(
            &build.checkpoint,
            &harness.genesis.id(),
            &harness.set,
            &HashSet::new()
        ),
        Ok(())
    );
}

#[test]
fn checkpoint_round_trip_preserves_identifier() {
    let mut harness = harness(4);
    let build = build_epoch_one(&mut harness, 4).unwrap();

    let bytes = build.checkpoint.try_to_vec().unwrap();
    let decoded = Checkpoint::deserialize(&mut bytes.as_slice()).unwrap();

    assert_eq!(decoded, build.checkpoint);
    assert_eq!(decoded.id(), build.checkpoint.id());
}
