/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The checkpoint builder: aggregates all blocks admitted since the last checkpoint into a
//! single attested snapshot, to be signed by a quorum of the federation's validators.
//!
//! Building is serialized per federation: only one checkpoint may be under construction at a
//! time, which the single-threaded [engine](crate::engine) guarantees by construction. A build
//! whose signature solicitation falls short of quorum fails with
//! [`BuildError::QuorumNotReached`]; the engine retries the same epoch on its next tick with an
//! extended deadline. This is not fatal to the node, only to that attempt.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Display;
use std::time::Instant;

use crate::app::{EntityKey, SignatureService, StateFolder};
use crate::store::{pluggables::KVStore, topological_order, BlockStore, BlockStoreError};
use crate::types::{
    basic::{CryptoHash, FederationId, VerifyingKeyBytes},
    block::Block,
    checkpoint::{Checkpoint, CheckpointProofs, CheckpointSignatures},
    merkle::MerkleTree,
    validator_set::ValidatorSet,
};

/// Everything the engine needs to apply a freshly built checkpoint: the checkpoint itself, the
/// identifiers committed under its block root in canonical order, and the folded entity states
/// its state root commits to.
pub struct EpochBuild {
    pub checkpoint: Checkpoint,
    pub block_ids: Vec<CryptoHash>,
    pub entity_updates: BTreeMap<EntityKey, Vec<u8>>,
}

/// Build the next checkpoint on top of the store's current head.
///
/// `next_validator_set` is the set to embed in the new checkpoint (the set whose quorum must
/// sign its *successor*); the set that must sign *this* checkpoint is the one embedded in the
/// current head. Signatures are solicited from the [SignatureService] until `deadline`.
pub fn build_checkpoint<K: KVStore, F: StateFolder, S: SignatureService>(
    store: &BlockStore<K>,
    folder: &F,
    signature_service: &mut S,
    federation: FederationId,
    next_validator_set: &ValidatorSet,
    excluded: &HashSet<VerifyingKeyBytes>,
    deadline: Instant,
) -> Result<EpochBuild, BuildError> {
    let head = store.head_checkpoint()?;
    let signing_set =
        ValidatorSet::try_from(&head.validator_set).map_err(|_| BuildError::NoValidatorSet)?;

    // Collect and canonically order the epoch's blocks.
    let pending = store.pending_blocks()?;
    let ordered = topological_order(pending)?;
    let block_ids: Vec<CryptoHash> = ordered.iter().map(|block| block.id).collect();
    let block_tree = MerkleTree::build(&block_ids);

    // Fold per-entity state. The store's committed entity state is exactly the state as of the
    // current head, which is the fold's starting point.
    let entity_updates = fold_entities(store, folder, &ordered)?;
    let (state_tree, state_leaves) = state_tree(store, &entity_updates)?;

    let mut checkpoint = Checkpoint {
        federation,
        epoch: head.epoch + 1,
        previous: head.id(),
        state_root: state_tree.root(),
        block_root: block_tree.root(),
        summaries: folder.summaries(head.epoch + 1, &ordered),
        validator_set: next_validator_set.into(),
        signatures: CheckpointSignatures::new(),
        proofs: CheckpointProofs::empty(),
    };

    // Derive the inclusion proofs: the newest block under the block root, the first entity
    // leaf under the state root.
    checkpoint.proofs = CheckpointProofs {
        block_inclusion: block_ids
            .last()
            .and_then(|newest| block_tree.prove(block_ids.len() - 1, *newest)),
        state_inclusion: state_leaves
            .first()
            .and_then(|first| state_tree.prove(0, *first)),
    };

    // Solicit signatures and embed every one that arrived before the deadline.
    for (signer, signature) in signature_service.solicit(&checkpoint, deadline) {
        checkpoint.signatures.add(signer, signature);
    }

    let got = checkpoint
        .signatures
        .count_valid(&checkpoint.id(), &signing_set, excluded);
    let needed = signing_set.quorum();
    if got < needed {
        return Err(BuildError::QuorumNotReached { got, needed });
    }

    Ok(EpochBuild {
        checkpoint,
        block_ids,
        entity_updates,
    })
}

/// Fold the given blocks (already in canonical order) into per-entity updates, starting each
/// entity from its currently committed state. Also used by the engine when applying a
/// checkpoint received from a peer.
pub(crate) fn fold_entities<K: KVStore, F: StateFolder>(
    store: &BlockStore<K>,
    folder: &F,
    ordered: &[Block],
) -> Result<BTreeMap<EntityKey, Vec<u8>>, BlockStoreError> {
    let mut touching: BTreeMap<EntityKey, Vec<&Block>> = BTreeMap::new();
    for block in ordered {
        for entity in folder.entities(block) {
            touching.entry(entity).or_default().push(block);
        }
    }

    let mut entity_updates = BTreeMap::new();
    for (entity, blocks) in touching {
        let prior = store.committed_entity_state(&entity)?;
        let folded = folder.fold_entity(&entity, prior.as_deref(), &blocks);
        entity_updates.insert(entity, folded);
    }
    Ok(entity_updates)
}

/// The Merkle tree over the full entity state — previously committed entities plus this
/// epoch's updates — in canonical entity order, and its leaves.
pub(crate) fn state_tree<K: KVStore>(
    store: &BlockStore<K>,
    entity_updates: &BTreeMap<EntityKey, Vec<u8>>,
) -> Result<(MerkleTree, Vec<CryptoHash>), BlockStoreError> {
    let mut all_entities: BTreeSet<EntityKey> = store.entity_index()?.into_iter().collect();
    all_entities.extend(entity_updates.keys().cloned());

    let mut state_leaves = Vec::with_capacity(all_entities.len());
    for entity in &all_entities {
        let state = match entity_updates.get(entity) {
            Some(updated) => Some(updated.clone()),
            None => store.committed_entity_state(entity)?,
        };
        if let Some(state) = state {
            state_leaves.push(entity.state_leaf(&state));
        }
    }
    Ok((MerkleTree::build(&state_leaves), state_leaves))
}

#[derive(Debug)]
pub enum BuildError {
    /// Fewer than two-thirds-plus-one of the signing validator set signed before the deadline.
    QuorumNotReached { got: usize, needed: usize },
    /// The head checkpoint's embedded validator set could not be decoded.
    NoValidatorSet,
    Store(BlockStoreError),
}

impl Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::QuorumNotReached { got, needed } => {
                write!(f, "quorum not reached: {} of {} required signatures", got, needed)
            }
            BuildError::NoValidatorSet => {
                write!(f, "head checkpoint carries an undecodable validator set")
            }
            BuildError::Store(err) => write!(f, "{}", err),
        }
    }
}

impl From<BlockStoreError> for BuildError {
    fn from(err: BlockStoreError) -> Self {
        BuildError::Store(err)
    }
}
