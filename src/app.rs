/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait definitions for the collaborator capabilities that users of this library provide.
//!
//! The engine treats block payloads as opaque bytes. Everything it needs to know about their
//! contents — which entities a payload touches, how an entity's state folds, what summary blobs
//! a checkpoint should carry — is supplied through the [`StateFolder`] capability. Signature
//! collection from the validator set is an out-of-process concern behind [`SignatureService`],
//! validator-set queries come from the identity subsystem behind [`ValidatorSetSource`], and
//! major-conflict votes come from the governance subsystem behind [`ConflictArbiter`].
//!
//! Besides implementing the functions specified in these traits, implementors of `StateFolder`
//! are additionally expected to be *deterministic*: every function should evaluate to the same
//! value every time it is called with the same arguments, on every node. Any two conforming
//! nodes must compute byte-identical state roots.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;
use std::time::Instant;

use crate::types::{
    basic::{CryptoHash, Epoch, SignatureBytes, VerifyingKeyBytes},
    block::{Block, CryptoHasher},
    checkpoint::{Checkpoint, CheckpointHeader, Summary},
    validator_set::ValidatorSet,
};

/// A keyed unit of application state, as seen by this crate: an opaque key plus the kind tag
/// that decides how conflicting updates to it are classified during reconciliation.
///
/// The derived ordering on `(kind, key)` is the canonical fold order: entities are folded and
/// hashed into the state root in this order on every node.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub key: Vec<u8>,
}

impl EntityKey {
    pub fn new(kind: EntityKind, key: Vec<u8>) -> Self {
        Self { kind, key }
    }

    /// The leaf committed into a checkpoint's state root for this entity: the digest of the
    /// entity key followed by its folded state bytes.
    pub fn state_leaf(&self, folded: &[u8]) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(self.try_to_vec().unwrap());
        hasher.update(folded);
        CryptoHash::new(hasher.finalize().into())
    }
}

/// What kind of state an entity holds. Determines the
/// [conflict classification](crate::reconcile::ConflictKind) when two divergent histories touch
/// the same entity.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub enum EntityKind {
    /// A keyed balance or other mergeable value.
    Value,
    /// A decision record with a recorded resolution.
    Decision,
    /// An identity record.
    Identity,
}

/// The declared folding capability: maps blocks to the entities they touch and folds an
/// entity's state from the blocks that touch it.
pub trait StateFolder: Send + 'static {
    /// The entities whose state `block`'s payload updates. An empty vector means the block
    /// carries no entity state (e.g., a checkpoint wrapper or bookkeeping record).
    fn entities(&self, block: &Block) -> Vec<EntityKey>;

    /// Fold `entity`'s new state from its previously committed state and the blocks of the
    /// current epoch that touch it, given in [topological order](crate::store::topological_order).
    fn fold_entity(&self, entity: &EntityKey, prior: Option<&[u8]>, blocks: &[&Block]) -> Vec<u8>;

    /// The summary blobs the next checkpoint should carry for the given epoch. Opaque to this
    /// crate; consumed by the collaborator subsystems on other nodes.
    fn summaries(&self, epoch: Epoch, blocks: &[Block]) -> Vec<Summary>;
}

/// Out-of-process signature collection from the federation's validator set.
pub trait SignatureService: Send + 'static {
    /// Request every validator's signature over `checkpoint.id()` and return whatever arrives
    /// before `deadline`. Implementations must not block past the deadline; the builder counts
    /// whatever came back and fails the attempt with `QuorumNotReached` if it is short.
    fn solicit(
        &mut self,
        checkpoint: &Checkpoint,
        deadline: Instant,
    ) -> Vec<(VerifyingKeyBytes, SignatureBytes)>;
}

/// Identity-subsystem query for the validator set in force at a given epoch. Consulted at
/// genesis and whenever the builder embeds the next epoch's set; validation of historical
/// checkpoints always uses the set snapshotted inside the preceding checkpoint, never this
/// mutable source.
pub trait ValidatorSetSource: Send + 'static {
    fn validator_set(&self, epoch: Epoch) -> ValidatorSet;
}

/// Governance-subsystem arbitration for Major conflicts: given the two divergent heads, returns
/// the identifier of the chosen branch head, or `None` while the vote is still pending.
pub trait ConflictArbiter: Send + 'static {
    fn decide(&mut self, ours: &CheckpointHeader, theirs: &CheckpointHeader) -> Option<CryptoHash>;
}
