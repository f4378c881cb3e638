/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests for federation identity proofs, the peer registry, and the trust ledger.

mod common;

use common::fixtures::keypairs;
use fedsync_rs::peers::registry::{shared, IdentityProof, PeerRegistry};
use fedsync_rs::trust::TrustLedger;
use fedsync_rs::types::basic::{Epoch, SignatureBytes};

#[test]
fn identity_proof_verifies_and_binds_key_to_federation() {
    let keys = keypairs(2);
    let proof = IdentityProof::create(&keys[0]);

    assert!(proof.is_correct());
    assert_eq!(proof.federation, IdentityProof::federation_id(&keys[0].verifying_key()));
    assert_eq!(proof.address().unwrap(), keys[0].verifying_key());
}

#[test]
fn identity_proof_rejects_forgeries() {
    let keys = keypairs(2);

    // A stolen identifier over a different key.
    let mut stolen = IdentityProof::create(&keys[0]);
    stolen.key = keys[1].verifying_key().to_bytes();
    assert!(!stolen.is_correct());

    // A corrupted signature.
    let mut corrupted = IdentityProof::create(&keys[0]);
    corrupted.signature = SignatureBytes::new([3; 64]);
    assert!(!corrupted.is_correct());
}

#[test]
fn registry_records_are_marked_unreachable_but_never_deleted() {
    let keys = keypairs(2);
    let mut registry = PeerRegistry::new();

    let proof = IdentityProof::create(&keys[1]);
    assert!(registry.insert_verified(&proof));
    assert!(!registry.insert_verified(&proof));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.reachable_count(), 1);

    registry.mark_unreachable(&proof.federation);
    assert_eq!(registry.reachable_count(), 0);
    assert_eq!(registry.len(), 1);
    assert!(!registry.get(&proof.federation).unwrap().reachable);

    registry.mark_reachable(&proof.federation, None);
    assert_eq!(registry.reachable_count(), 1);
}

#[test]
fn trust_moves_with_sync_outcomes() {
    let keys = keypairs(2);
    let registry = shared(PeerRegistry::new());
    let proof = IdentityProof::create(&keys[1]);
    registry.lock().unwrap().insert_verified(&proof);

    let ledger = TrustLedger::new(registry.clone(), None);
    let trust_of = |registry: &fedsync_rs::peers::registry::SharedRegistry| {
        registry
            .lock()
            .unwrap()
            .get(&proof.federation)
            .unwrap()
            .trust
            .value()
    };

    let initial = trust_of(&registry);
    ledger.record_success(&proof.federation);
    assert!(trust_of(&registry) > initial);

    let after_success = trust_of(&registry);
    ledger.record_validation_failure(&proof.federation);
    assert!(trust_of(&registry) < after_success);

    assert!(ledger.is_syncable(&proof.federation, 0.1));
}

#[test]
fn repeated_validation_failures_floor_a_peer() {
    let keys = keypairs(2);
    let registry = shared(PeerRegistry::new());
    let proof = IdentityProof::create(&keys[1]);
    registry.lock().unwrap().insert_verified(&proof);

    let ledger = TrustLedger::new(registry.clone(), None);
    for _ in 0..3 {
        ledger.record_validation_failure(&proof.federation);
    }

    assert_eq!(
        registry
            .lock()
            .unwrap()
            .get(&proof.federation)
            .unwrap()
            .trust
            .value(),
        0.0
    );
    assert!(!ledger.is_syncable(&proof.federation, 0.1));

    // A later success starts rebuilding trust from the floor.
    ledger.record_success(&proof.federation);
    assert!(ledger.is_syncable(&proof.federation, 0.01));
}

#[test]
fn equivocation_excludes_the_offender_from_quorum_counting() {
    let keys = keypairs(2);
    let registry = shared(PeerRegistry::new());
    let proof = IdentityProof::create(&keys[1]);
    registry.lock().unwrap().insert_verified(&proof);

    let ledger = TrustLedger::new(registry.clone(), None);
    let offender = keys[1].verifying_key().to_bytes();
    ledger.record_equivocation(offender, Epoch::new(11));

    let registry = registry.lock().unwrap();
    assert!(registry.is_excluded(&offender));
    assert!(registry.excluded_validators().contains(&offender));
    assert_eq!(registry.get(&proof.federation).unwrap().trust.value(), 0.0);
}
