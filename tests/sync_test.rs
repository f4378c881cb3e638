/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! End-to-end synchronization tests: nodes running on a mock network, discovering each other
//! through gossip and catching up through fast-forward.
//!
//! The nodes in this suite use a mock channel-based [network](common::network), an in-memory
//! [key-value store](common::mem_db), and the deterministic test collaborators from
//! [fixtures](common::fixtures). Periodic checkpoint building is effectively disabled (the
//! epoch interval is an hour); tests drive building explicitly through
//! [`Node::build_checkpoint_now`].

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ed25519_dalek::SigningKey;
use log::LevelFilter;

use common::fixtures::{
    founder, keypairs, validator_set, value_block, FixedValidators, LedgerFolder, NullArbiter,
    QuorumSigners,
};
use common::logging::setup_logger;
use common::mem_db::MemDB;
use common::network::{mock_network, partition, NetworkStub};
use fedsync_rs::node::{Configuration, Node, NodeSpec};
use fedsync_rs::store::pluggables::KVGet;
use fedsync_rs::types::basic::FederationId;
use fedsync_rs::types::validator_set::ValidatorSet;

fn configuration(me: SigningKey) -> Configuration {
    Configuration::builder()
        .me(me)
        .epoch_interval(Duration::from_secs(3600))
        .signature_deadline(Duration::from_secs(2))
        .deadline_extension(Duration::from_secs(1))
        .partition_cadence_multiplier(4)
        .header_window(16)
        .request_timeout(Duration::from_secs(2))
        .sync_request_limit(64)
        .max_concurrent_syncs(2)
        .sync_interval(Duration::from_millis(200))
        .min_sync_trust(0.1)
        .discovery_interval(Duration::from_millis(200))
        .monitor_interval(Duration::from_millis(500))
        .heal_alert_after(Duration::from_secs(60))
        .log_events(true)
        .build()
}

fn start_node(
    me: SigningKey,
    network: NetworkStub,
    kv_store: MemDB,
    ledger_founder: FederationId,
    initial_set: &ValidatorSet,
    signers: Vec<SigningKey>,
) -> Node<MemDB> {
    Node::initialize(kv_store.clone(), ledger_founder, initial_set).unwrap();
    NodeSpec::builder()
        .folder(LedgerFolder)
        .signature_service(QuorumSigners(signers))
        .validator_source(FixedValidators(initial_set.clone()))
        .arbiter(NullArbiter)
        .network(network)
        .kv_store(kv_store)
        .configuration(configuration(me))
        .build()
        .start()
}

fn wait_until(deadline_secs: u64, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(deadline_secs);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    false
}

#[test]
fn lagging_node_fast_forwards_to_the_head() {
    setup_logger(LevelFilter::Info);

    let keys = keypairs(2);
    let set = validator_set(&keys);
    let ledger_founder = founder(&keys[0]);
    let stubs = mock_network(keys.iter().map(|key| key.verifying_key()));

    let db_a = MemDB::new();
    let db_b = MemDB::new();
    let node_a = start_node(
        keys[0].clone(),
        stubs[0].clone(),
        db_a,
        ledger_founder,
        &set,
        keys.clone(),
    );
    let node_b = start_node(
        keys[1].clone(),
        stubs[1].clone(),
        db_b.clone(),
        ledger_founder,
        &set,
        keys.clone(),
    );

    // Node A admits two blocks and builds epoch 1.
    let x = value_block(b"x", 7, &keys[0], Vec::new(), 100);
    let y = value_block(b"y", 8, &keys[0], Vec::new(), 101);
    node_a.admit(x.clone()).unwrap();
    node_a.admit(y.clone()).unwrap();
    let header = node_a.build_checkpoint_now().unwrap();
    assert_eq!(header.epoch.int(), 1);

    // Node B discovers A through gossip and fast-forwards.
    assert!(wait_until(30, || {
        node_b.epoch().map(|epoch| epoch.int()) == Some(1)
    }));
    assert_eq!(
        node_b.current_checkpoint().unwrap().id(),
        node_a.current_checkpoint().unwrap().id()
    );

    // The fast-forwarded blocks are admitted on B, with identical content.
    let snapshot = node_b.camera().snapshot();
    assert!(snapshot.block_is_admitted(&x.id));
    assert!(snapshot.block_is_admitted(&y.id));
    assert_eq!(snapshot.block(&x.id).unwrap().unwrap(), x);
}

#[test]
fn late_joiner_catches_up_across_multiple_epochs() {
    setup_logger(LevelFilter::Info);

    let keys = keypairs(2);
    let set = validator_set(&keys);
    let ledger_founder = founder(&keys[0]);
    let stubs = mock_network(keys.iter().map(|key| key.verifying_key()));

    let node_a = start_node(
        keys[0].clone(),
        stubs[0].clone(),
        MemDB::new(),
        ledger_founder,
        &set,
        keys.clone(),
    );

    // A builds three epochs before B ever comes online.
    for epoch in 1..=3u64 {
        let block = value_block(
            format!("epoch-{}", epoch).as_bytes(),
            epoch,
            &keys[0],
            Vec::new(),
            epoch * 10,
        );
        node_a.admit(block).unwrap();
        let header = node_a.build_checkpoint_now().unwrap();
        assert_eq!(header.epoch.int(), epoch);
    }

    let node_b = start_node(
        keys[1].clone(),
        stubs[1].clone(),
        MemDB::new(),
        ledger_founder,
        &set,
        keys.clone(),
    );

    assert!(wait_until(30, || {
        node_b.epoch().map(|epoch| epoch.int()) == Some(3)
    }));
    assert_eq!(
        node_b.current_checkpoint().unwrap().id(),
        node_a.current_checkpoint().unwrap().id()
    );
}

#[test]
fn partition_is_suspected_and_heals() {
    setup_logger(LevelFilter::Info);

    let keys = keypairs(2);
    let set = validator_set(&keys);
    let ledger_founder = founder(&keys[0]);
    let stubs = mock_network(keys.iter().map(|key| key.verifying_key()));

    let discovered = Arc::new(AtomicBool::new(false));
    let suspected = Arc::new(AtomicBool::new(false));
    let healed = Arc::new(AtomicBool::new(false));

    let kv_store = MemDB::new();
    Node::initialize(kv_store.clone(), ledger_founder, &set).unwrap();
    let node_a = {
        let discovered = Arc::clone(&discovered);
        let suspected = Arc::clone(&suspected);
        let healed = Arc::clone(&healed);
        NodeSpec::builder()
            .folder(LedgerFolder)
            .signature_service(QuorumSigners(keys.clone()))
            .validator_source(FixedValidators(set.clone()))
            .arbiter(NullArbiter)
            .network(stubs[0].clone())
            .kv_store(kv_store)
            .configuration(configuration(keys[0].clone()))
            .on_peer_discovered(move |_| discovered.store(true, Ordering::SeqCst))
            .on_partition_suspected(move |_| suspected.store(true, Ordering::SeqCst))
            .on_partition_healed(move |_| healed.store(true, Ordering::SeqCst))
            .build()
            .start()
    };
    let node_b = start_node(
        keys[1].clone(),
        stubs[1].clone(),
        MemDB::new(),
        ledger_founder,
        &set,
        keys.clone(),
    );

    // Wait until A actually knows B, then cut the link between the two nodes.
    assert!(wait_until(30, || discovered.load(Ordering::SeqCst)));
    let assignment: HashMap<_, _> = [(keys[0].verifying_key(), 0u32), (keys[1].verifying_key(), 1)]
        .into_iter()
        .collect();
    partition(&stubs, assignment);

    // A can no longer reach its only known peer: below half of the known set.
    assert!(wait_until(30, || suspected.load(Ordering::SeqCst)));

    // Restore connectivity; the next gossip round marks the peer reachable again.
    partition(&stubs, HashMap::new());
    assert!(wait_until(30, || healed.load(Ordering::SeqCst)));

    drop(node_a);
    drop(node_b);
}

#[test]
fn nodes_with_no_common_history_never_adopt_each_other() {
    setup_logger(LevelFilter::Info);

    let keys = keypairs(2);
    let stubs = mock_network(keys.iter().map(|key| key.verifying_key()));

    // Two ledgers with different genesis checkpoints: different founders, different
    // single-validator sets.
    let set_a = validator_set(&keys[..1]);
    let set_b = validator_set(&keys[1..]);

    let node_a = start_node(
        keys[0].clone(),
        stubs[0].clone(),
        MemDB::new(),
        founder(&keys[0]),
        &set_a,
        keys[..1].to_vec(),
    );
    let node_b = start_node(
        keys[1].clone(),
        stubs[1].clone(),
        MemDB::new(),
        founder(&keys[1]),
        &set_b,
        keys[1..].to_vec(),
    );

    // A advances its own ledger.
    node_a
        .admit(value_block(b"x", 7, &keys[0], Vec::new(), 100))
        .unwrap();
    node_a.build_checkpoint_now().unwrap();

    // Give discovery and sync scheduling ample time to run; B must refuse to adopt anything.
    std::thread::sleep(Duration::from_secs(5));
    assert_eq!(node_b.epoch().map(|epoch| epoch.int()), Some(0));
    assert_ne!(
        node_b.current_checkpoint().unwrap().id(),
        node_a.current_checkpoint().unwrap().id()
    );
}
