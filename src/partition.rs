/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The partition monitor: detects loss of connectivity to a quorum of known peers, snapshots
//! the local chain when a partition is suspected, and on healing provides the deterministic
//! tie-break that decides which side's history prevails.
//!
//! Partition detection is a *mode*, not an error. While a partition is suspected the engine
//! stretches its checkpoint cadence (to bound divergence), and the monitor broadcasts the local
//! [PartitionSnapshot] so that the other side can run the same [determine_winner] comparison
//! and reach the same verdict independently. Failure to heal within the configured window
//! escalates to an operator-visible alert, repeated on every monitor tick until healed.

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crate::events::{Event, PartitionHealedEvent, PartitionSuspectedEvent};
use crate::networking::{Network, SenderHandle};
use crate::peers::registry::{IdentityProof, SharedRegistry};
use crate::store::{
    camera::StoreCamera,
    pluggables::{KVGet, KVGetError, KVStore},
};
use crate::sync::messages::PartitionNotice;
use crate::types::{
    basic::{CryptoHash, Timestamp},
    checkpoint::Checkpoint,
    keypair::Keypair,
    validator_set::ValidatorSet,
};

/// Which side's history prevails after a partition heals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionVerdict {
    Us,
    Them,
    /// Every criterion tied: the histories are handed to the reconciler to merge.
    Merge,
}

/// A summary of one side's chain, captured when a partition is suspected and compared on
/// healing.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PartitionSnapshot {
    pub head: CryptoHash,
    pub chain_length: u64,
    pub signature_count: u64,
    pub transaction_count: u64,
    pub timestamp: Timestamp,
}

/// Compare two partition snapshots, in order: checkpoint chain length, then cumulative
/// validator-signature count, then cumulative recorded transaction count, then snapshot
/// timestamp (earlier wins — that side detected the partition first and so has the longer
/// uncontested history). The first strict inequality decides; if every criterion ties, the
/// result is [PartitionVerdict::Merge].
///
/// The comparison is total and symmetric: both sides running it on the same pair of snapshots
/// reach complementary verdicts.
pub fn determine_winner(ours: &PartitionSnapshot, theirs: &PartitionSnapshot) -> PartitionVerdict {
    if ours.chain_length != theirs.chain_length {
        return side(ours.chain_length > theirs.chain_length);
    }
    if ours.signature_count != theirs.signature_count {
        return side(ours.signature_count > theirs.signature_count);
    }
    if ours.transaction_count != theirs.transaction_count {
        return side(ours.transaction_count > theirs.transaction_count);
    }
    if ours.timestamp != theirs.timestamp {
        return side(ours.timestamp < theirs.timestamp);
    }
    PartitionVerdict::Merge
}

fn side(we_win: bool) -> PartitionVerdict {
    if we_win {
        PartitionVerdict::Us
    } else {
        PartitionVerdict::Them
    }
}

/// Capture a [PartitionSnapshot] of the local chain: walk the canonical chain from the head to
/// genesis, counting valid signatures (each checkpoint against the set snapshotted in its
/// predecessor) and covered blocks.
pub fn snapshot_chain<S: KVGet>(
    snapshot: &S,
    now: Timestamp,
) -> Result<Option<PartitionSnapshot>, KVGetError> {
    let head = match snapshot.head_checkpoint()? {
        Some(head) => head,
        None => return Ok(None),
    };

    let mut chain: Vec<Checkpoint> = Vec::new();
    let mut cursor = head.clone();
    loop {
        let genesis = cursor.is_genesis();
        let previous = cursor.previous;
        chain.push(cursor);
        if genesis {
            break;
        }
        cursor = match snapshot.checkpoint(&previous)? {
            Some(checkpoint) => checkpoint,
            None => break,
        };
    }
    chain.reverse();

    let mut signature_count: u64 = 0;
    let mut transaction_count: u64 = 0;
    let mut validator_set = ValidatorSet::new();
    let excluded = HashSet::new();
    for checkpoint in &chain {
        if !checkpoint.is_genesis() {
            signature_count +=
                checkpoint
                    .signatures
                    .count_valid(&checkpoint.id(), &validator_set, &excluded) as u64;
        }
        if let Some(block_ids) = snapshot.checkpoint_block_ids(&checkpoint.id())? {
            transaction_count += block_ids.len() as u64;
        }
        validator_set = ValidatorSet::try_from(&checkpoint.validator_set).unwrap_or(validator_set);
    }

    Ok(Some(PartitionSnapshot {
        head: head.id(),
        chain_length: head.epoch.int(),
        signature_count,
        transaction_count,
        timestamp: now,
    }))
}

/// The monitor's current assessment, shared with the engine (which stretches its checkpoint
/// cadence while a partition is suspected) and with sync sessions (which consult the peer
/// snapshots when deciding how to treat a post-heal divergence).
#[derive(Default)]
pub struct PartitionState {
    pub suspected: bool,
    pub our_snapshot: Option<PartitionSnapshot>,
    pub peer_snapshots: HashMap<CryptoHash, PartitionSnapshot>,
}

impl PartitionState {
    /// Look up a peer snapshot by the head identifier it reported.
    pub fn peer_snapshot_for_head(&self, head: &CryptoHash) -> Option<&PartitionSnapshot> {
        self.peer_snapshots.get(head)
    }
}

pub type SharedPartitionState = Arc<Mutex<PartitionState>>;

pub fn shared_state() -> SharedPartitionState {
    Arc::new(Mutex::new(PartitionState::default()))
}

/// Immutable parameters that define the behaviour of the [PartitionMonitor].
pub(crate) struct PartitionMonitorConfiguration {
    pub(crate) keypair: Keypair,
    pub(crate) monitor_interval: Duration,
    pub(crate) heal_alert_after: Duration,
}

/// The partition monitor thread. Periodically estimates the reachable fraction of known peers
/// from the registry and drives the Normal → Suspected → Healed transitions.
pub(crate) struct PartitionMonitor<N: Network + 'static, K: KVStore> {
    config: PartitionMonitorConfiguration,
    camera: StoreCamera<K>,
    registry: SharedRegistry,
    state: SharedPartitionState,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
    suspected_since: Option<Instant>,
}

impl<N: Network + 'static, K: KVStore> PartitionMonitor<N, K> {
    pub(crate) fn new(
        config: PartitionMonitorConfiguration,
        camera: StoreCamera<K>,
        registry: SharedRegistry,
        state: SharedPartitionState,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            camera,
            registry,
            state,
            sender: SenderHandle::new(network),
            shutdown_signal,
            event_publisher,
            suspected_since: None,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut last_tick = Instant::now() - self.config.monitor_interval;
            loop {
                match self.shutdown_signal.try_recv() {
                    Ok(()) => return,
                    Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => {
                        panic!("Partition monitor thread disconnected from main thread")
                    }
                }

                if Instant::now() - last_tick >= self.config.monitor_interval {
                    self.tick();
                    last_tick = Instant::now();
                }

                thread::yield_now();
            }
        })
    }

    fn tick(&mut self) {
        let (reachable, known) = {
            let registry = self.registry.lock().unwrap();
            (registry.reachable_count() as u64, registry.len() as u64)
        };

        // Below one-half of the known peer set reachable => partition suspected. An empty
        // registry (no peers discovered yet) is not a partition.
        let suspected = known > 0 && reachable * 2 < known;

        match (self.suspected_since.is_some(), suspected) {
            (false, true) => self.enter_suspected(reachable, known),
            (true, false) => self.heal(),
            (true, true) => self.check_heal_alert(),
            (false, false) => (),
        }
    }

    fn enter_suspected(&mut self, reachable: u64, known: u64) {
        self.suspected_since = Some(Instant::now());

        let our_snapshot = snapshot_chain(&self.camera.snapshot(), Timestamp::now())
            .ok()
            .flatten();
        {
            let mut state = self.state.lock().unwrap();
            state.suspected = true;
            state.our_snapshot = our_snapshot.clone();
        }

        Event::publish(
            &self.event_publisher,
            Event::PartitionSuspected(PartitionSuspectedEvent {
                timestamp: SystemTime::now(),
                reachable,
                known,
            }),
        );

        // Tell whoever can still hear us which side we are, so that after healing both sides
        // hold both snapshots and reach the same verdict.
        if let Some(snapshot) = our_snapshot {
            self.sender.broadcast(PartitionNotice {
                proof: IdentityProof::create(&self.config.keypair.0),
                snapshot,
            });
        }
    }

    fn heal(&mut self) {
        self.suspected_since = None;

        let verdict = {
            let mut state = self.state.lock().unwrap();
            state.suspected = false;
            let verdict = match &state.our_snapshot {
                Some(ours) => {
                    // Against the strongest opposing snapshot: any loss is a loss, any exact
                    // tie a merge.
                    let mut verdict = PartitionVerdict::Us;
                    for theirs in state.peer_snapshots.values() {
                        match determine_winner(ours, theirs) {
                            PartitionVerdict::Them => {
                                verdict = PartitionVerdict::Them;
                                break;
                            }
                            PartitionVerdict::Merge => verdict = PartitionVerdict::Merge,
                            PartitionVerdict::Us => (),
                        }
                    }
                    verdict
                }
                None => PartitionVerdict::Merge,
            };
            verdict
        };

        Event::publish(
            &self.event_publisher,
            Event::PartitionHealed(PartitionHealedEvent {
                timestamp: SystemTime::now(),
                verdict,
            }),
        );

        // Re-announce our snapshot once more so late healers see it too.
        if let Some(snapshot) = self.state.lock().unwrap().our_snapshot.clone() {
            self.sender.broadcast(PartitionNotice {
                proof: IdentityProof::create(&self.config.keypair.0),
                snapshot,
            });
        }
    }

    fn check_heal_alert(&mut self) {
        if let Some(since) = self.suspected_since {
            if Instant::now() - since >= self.config.heal_alert_after {
                // Operator-visible escalation; repeated every tick until the partition heals.
                log::error!(
                    "partition suspected for {}s without healing; operator intervention may be required",
                    (Instant::now() - since).as_secs()
                );
            }
        }
    }
}
