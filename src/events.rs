/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of FedSync-rs events for event handling and logging.
//! Note: an event for a given action indicates that the action has been completed.
//!
//! No rejected or downgraded path in this crate is silent: every rejection, downgrade, or mode
//! transition emits its corresponding event here.

use ed25519_dalek::VerifyingKey;
use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::partition::PartitionVerdict;
use crate::reconcile::ConflictSeverity;
use crate::types::{
    basic::{CryptoHash, Epoch, FederationId, VerifyingKeyBytes},
    block::BlockType,
    checkpoint::CheckpointHeader,
};

pub enum Event {
    // Events that change persistent state.
    BlockAdmitted(BlockAdmittedEvent),
    BlockRejected(BlockRejectedEvent),
    CheckpointBuilt(CheckpointBuiltEvent),
    CheckpointValidated(CheckpointValidatedEvent),
    CheckpointRejected(CheckpointRejectedEvent),
    QuorumNotReached(QuorumNotReachedEvent),
    // Sync mode events.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
    ReceiveSyncRequest(ReceiveSyncRequestEvent),
    SendSyncResponse(SendSyncResponseEvent),
    // Reconciliation events.
    ConflictDetected(ConflictDetectedEvent),
    EquivocationDetected(EquivocationDetectedEvent),
    // Partition mode events.
    PartitionSuspected(PartitionSuspectedEvent),
    PartitionHealed(PartitionHealedEvent),
    // Peer directory and trust events.
    PeerDiscovered(PeerDiscoveredEvent),
    PeerUnreachable(PeerUnreachableEvent),
    TrustUpdated(TrustUpdatedEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(event);
        }
    }
}

pub struct BlockAdmittedEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub block_type: BlockType,
}

pub struct BlockRejectedEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub reason: String,
}

pub struct CheckpointBuiltEvent {
    pub timestamp: SystemTime,
    pub checkpoint: CheckpointHeader,
}

pub struct CheckpointValidatedEvent {
    pub timestamp: SystemTime,
    pub checkpoint: CryptoHash,
    pub epoch: Epoch,
}

pub struct CheckpointRejectedEvent {
    pub timestamp: SystemTime,
    pub checkpoint: CryptoHash,
    pub reason: String,
}

pub struct QuorumNotReachedEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub got: usize,
    pub needed: usize,
}

pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
}

pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub outcome: SyncOutcomeKind,
}

/// Compact label of how a sync session ended, carried on [EndSyncEvent].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcomeKind {
    /// The peer was ahead; this many checkpoints were validated and applied.
    FastForwarded(u64),
    /// The peer was behind; it was left to fetch from us.
    SharedOurs,
    /// The histories diverged and the reconciler ran.
    Reconciled,
    /// Identical heads; nothing to do.
    InSync,
    /// The session failed (timeout, invalid checkpoint, no common history).
    Failed,
}

pub struct ReceiveSyncRequestEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub request: SyncRequestKind,
}

/// Which kind of request a [ReceiveSyncRequestEvent] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncRequestKind {
    CheckpointHeaders,
    Checkpoint,
    Blocks,
    PeerList,
}

pub struct SendSyncResponseEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub items: u64,
}

pub struct ConflictDetectedEvent {
    pub timestamp: SystemTime,
    pub severity: ConflictSeverity,
    pub conflicts: u64,
}

pub struct EquivocationDetectedEvent {
    pub timestamp: SystemTime,
    pub offender: VerifyingKeyBytes,
    pub epoch: Epoch,
}

pub struct PartitionSuspectedEvent {
    pub timestamp: SystemTime,
    pub reachable: u64,
    pub known: u64,
}

pub struct PartitionHealedEvent {
    pub timestamp: SystemTime,
    pub verdict: PartitionVerdict,
}

pub struct PeerDiscoveredEvent {
    pub timestamp: SystemTime,
    pub federation: FederationId,
}

pub struct PeerUnreachableEvent {
    pub timestamp: SystemTime,
    pub federation: FederationId,
}

pub struct TrustUpdatedEvent {
    pub timestamp: SystemTime,
    pub federation: FederationId,
    pub score: f64,
}
