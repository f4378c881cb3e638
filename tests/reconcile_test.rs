/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests for the reconciler: conflict classification, severity, deterministic merging, and
//! equivocation detection.

mod common;

use std::collections::{BTreeMap, HashSet};

use common::fixtures::{
    decision_block, founder, identity_block, keypairs, manual_checkpoint, validator_set,
    value_block, LedgerFolder,
};
use fedsync_rs::app::{EntityKey, EntityKind};
use fedsync_rs::reconcile::{
    reconcile, Branch, ConflictKind, ConflictSeverity, ResolvedState,
};
use fedsync_rs::types::basic::Epoch;
use fedsync_rs::types::block::Block;
use fedsync_rs::types::checkpoint::Checkpoint;
use fedsync_rs::types::validator_set::ValidatorSet;

struct Divergence {
    ancestor: Checkpoint,
    keys: Vec<ed25519_dalek::SigningKey>,
    set: ValidatorSet,
}

/// A shared six-validator ancestor at epoch 10. Each side of a divergence signs its own
/// checkpoint with a disjoint half of the set, as two federations on either side of a
/// partition would.
fn divergence() -> Divergence {
    let keys = keypairs(6);
    let set = validator_set(&keys);
    let mut ancestor = Checkpoint::genesis(founder(&keys[0]), &set);
    ancestor.epoch = Epoch::new(10);
    Divergence {
        ancestor,
        keys,
        set,
    }
}

fn branch(divergence: &Divergence, signers: &[ed25519_dalek::SigningKey], blocks: Vec<Block>) -> Branch {
    let block_ids: Vec<_> = blocks.iter().map(|block| block.id).collect();
    let checkpoint = manual_checkpoint(
        founder(&signers[0]),
        Epoch::new(11),
        divergence.ancestor.id(),
        &block_ids,
        &divergence.set,
        signers,
    );
    Branch {
        checkpoints: vec![checkpoint],
        blocks,
    }
}

#[test]
fn disjoint_deltas_merge_without_conflicts() {
    let divergence = divergence();
    let keys = &divergence.keys;

    // Side A checkpointed {x, y}; side B, which never saw them, checkpointed {z}.
    let x = value_block(b"x", 7, &keys[0], Vec::new(), 100);
    let y = value_block(b"y", 8, &keys[0], Vec::new(), 101);
    let z = value_block(b"z", 9, &keys[3], Vec::new(), 102);

    let ours = branch(&divergence, &keys[..3], vec![x.clone(), y.clone()]);
    let theirs = branch(&divergence, &keys[3..], vec![z.clone()]);

    let outcome = reconcile(
        &LedgerFolder,
        &divergence.ancestor,
        &ours,
        &theirs,
        &BTreeMap::new(),
        &HashSet::new(),
    );

    assert_eq!(outcome.severity, ConflictSeverity::None);
    assert!(outcome.conflicts.is_empty());

    let merged = match outcome.resolved {
        ResolvedState::Merged(merged) => merged,
        other => panic!("expected Merged, got {:?}", other),
    };

    // The combined state contains all three effects.
    assert_eq!(
        merged.entities[&EntityKey::new(EntityKind::Value, b"x".to_vec())],
        7u64.to_le_bytes().to_vec()
    );
    assert_eq!(
        merged.entities[&EntityKey::new(EntityKind::Value, b"y".to_vec())],
        8u64.to_le_bytes().to_vec()
    );
    assert_eq!(
        merged.entities[&EntityKey::new(EntityKind::Value, b"z".to_vec())],
        9u64.to_le_bytes().to_vec()
    );
    assert_eq!(merged.blocks.len(), 3);
    assert!(merged.blocks.contains(&x.id));
    assert!(merged.blocks.contains(&y.id));
    assert!(merged.blocks.contains(&z.id));
    // Disjoint entities: nothing is excluded from folding.
    assert!(merged.excluded.is_empty());
}

#[test]
fn reconciliation_is_deterministic_and_symmetric() {
    let divergence = divergence();
    let keys = &divergence.keys;

    let x = value_block(b"x", 7, &keys[0], Vec::new(), 100);
    let z = value_block(b"z", 9, &keys[3], Vec::new(), 102);

    let side_a = branch(&divergence, &keys[..3], vec![x]);
    let side_b = branch(&divergence, &keys[3..], vec![z]);

    let from_a = reconcile(
        &LedgerFolder,
        &divergence.ancestor,
        &side_a,
        &side_b,
        &BTreeMap::new(),
        &HashSet::new(),
    );
    let repeat = reconcile(
        &LedgerFolder,
        &divergence.ancestor,
        &side_a,
        &side_b,
        &BTreeMap::new(),
        &HashSet::new(),
    );
    assert_eq!(from_a, repeat);

    // Run from the other side's perspective: the canonical head and merged entities must come
    // out identical, or the two sides would never converge.
    let from_b = reconcile(
        &LedgerFolder,
        &divergence.ancestor,
        &side_b,
        &side_a,
        &BTreeMap::new(),
        &HashSet::new(),
    );
    match (from_a.resolved, from_b.resolved) {
        (ResolvedState::Merged(a), ResolvedState::Merged(b)) => {
            assert_eq!(a.canonical_head, b.canonical_head);
            assert_eq!(a.entities, b.entities);
        }
        other => panic!("expected two merges, got {:?}", other),
    }
}

#[test]
fn value_clash_is_minor_and_resolved_by_signature_weight() {
    let divergence = divergence();
    let keys = &divergence.keys;

    // Both sides fold the same balance from the same prior, incompatibly. Our side carries
    // four signatures, theirs two: ours must win on both machines.
    let ancestor_states: BTreeMap<EntityKey, Vec<u8>> = [(
        EntityKey::new(EntityKind::Value, b"shared".to_vec()),
        100u64.to_le_bytes().to_vec(),
    )]
    .into_iter()
    .collect();

    let ours_block = value_block(b"shared", 10, &keys[0], Vec::new(), 100);
    let theirs_block = value_block(b"shared", 25, &keys[4], Vec::new(), 101);
    let theirs_block_id = theirs_block.id;

    let ours = branch(&divergence, &keys[..4], vec![ours_block]);
    let theirs = branch(&divergence, &keys[4..], vec![theirs_block]);

    let outcome = reconcile(
        &LedgerFolder,
        &divergence.ancestor,
        &ours,
        &theirs,
        &ancestor_states,
        &HashSet::new(),
    );

    assert_eq!(outcome.severity, ConflictSeverity::Minor);
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].kind, ConflictKind::ValueClash);

    match outcome.resolved {
        ResolvedState::Merged(merged) => {
            assert_eq!(
                merged.entities[&EntityKey::new(EntityKind::Value, b"shared".to_vec())],
                110u64.to_le_bytes().to_vec()
            );
            assert_eq!(merged.canonical_head, ours.checkpoints[0].id());
            // The losing side's update to the shared entity is excluded from folding.
            assert_eq!(merged.excluded, vec![theirs_block_id]);
        }
        other => panic!("expected Merged, got {:?}", other),
    }
}

#[test]
fn outcome_clash_is_major_and_goes_to_governance() {
    let divergence = divergence();
    let keys = &divergence.keys;

    // Two sides recorded different resolutions for the same decision record.
    let ours_block = decision_block(b"proposal-1", 1, &keys[0], 100);
    let theirs_block = decision_block(b"proposal-1", 2, &keys[3], 101);

    let ours = branch(&divergence, &keys[..3], vec![ours_block]);
    let theirs = branch(&divergence, &keys[3..], vec![theirs_block]);

    let outcome = reconcile(
        &LedgerFolder,
        &divergence.ancestor,
        &ours,
        &theirs,
        &BTreeMap::new(),
        &HashSet::new(),
    );

    assert_eq!(outcome.severity, ConflictSeverity::Major);
    assert_eq!(outcome.conflicts[0].kind, ConflictKind::OutcomeClash);
    match outcome.resolved {
        ResolvedState::PendingExternalDecision { ours: our_head, theirs: their_head } => {
            assert_eq!(our_head.id, ours.checkpoints[0].id());
            assert_eq!(their_head.id, theirs.checkpoints[0].id());
        }
        other => panic!("expected PendingExternalDecision, got {:?}", other),
    }
}

#[test]
fn identity_clash_is_major() {
    let divergence = divergence();
    let keys = &divergence.keys;

    let ours_block = identity_block(b"member-9", 1, &keys[0], 100);
    let theirs_block = identity_block(b"member-9", 2, &keys[3], 101);

    let ours = branch(&divergence, &keys[..3], vec![ours_block]);
    let theirs = branch(&divergence, &keys[3..], vec![theirs_block]);

    let outcome = reconcile(
        &LedgerFolder,
        &divergence.ancestor,
        &ours,
        &theirs,
        &BTreeMap::new(),
        &HashSet::new(),
    );

    assert_eq!(outcome.severity, ConflictSeverity::Major);
    assert_eq!(outcome.conflicts[0].kind, ConflictKind::IdentityClash);
}

#[test]
fn same_validator_on_both_branches_is_equivocation() {
    let divergence = divergence();
    let keys = &divergence.keys;

    let x = value_block(b"x", 7, &keys[0], Vec::new(), 100);
    let z = value_block(b"z", 9, &keys[3], Vec::new(), 102);

    // keys[0] and keys[5] sign both sides' differing epoch-11 checkpoints.
    let mut our_signers = keys[..3].to_vec();
    let mut their_signers = keys[3..].to_vec();
    their_signers.push(keys[0].clone());
    our_signers.push(keys[5].clone());

    let ours = branch(&divergence, &our_signers, vec![x]);
    let theirs = branch(&divergence, &their_signers, vec![z]);

    let outcome = reconcile(
        &LedgerFolder,
        &divergence.ancestor,
        &ours,
        &theirs,
        &BTreeMap::new(),
        &HashSet::new(),
    );

    assert_eq!(outcome.severity, ConflictSeverity::Critical);
    match outcome.resolved {
        ResolvedState::Equivocation(faults) => {
            let offenders: Vec<_> = faults.iter().map(|fault| fault.offender).collect();
            assert!(offenders.contains(&keys[0].verifying_key().to_bytes()));
            assert!(offenders.contains(&keys[5].verifying_key().to_bytes()));
            assert!(faults.iter().all(|fault| fault.epoch == Epoch::new(11)));
        }
        other => panic!("expected Equivocation, got {:?}", other),
    }
}
