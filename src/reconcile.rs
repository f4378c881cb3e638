/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The reconciler: given two checkpoint histories that diverged from a common ancestor, compute
//! per-entity deltas on both sides, enumerate conflicts, classify their severity, and produce a
//! merged or chosen resulting state.
//!
//! Everything in this module is a pure function of its arguments. Run on any two nodes with the
//! same ancestor and the same two branches, [reconcile] produces byte-identical results — this
//! is what lets both sides of a divergence converge without further coordination. Locally
//! evolving values (trust scores in particular) are deliberately kept out of the tie-breaks;
//! only the equivocation exclusion set, which both sides derive from the same signed evidence,
//! participates.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::app::{EntityKey, EntityKind, StateFolder};
use crate::store::topological_order;
use crate::types::{
    basic::{CryptoHash, Epoch, VerifyingKeyBytes},
    block::Block,
    checkpoint::{Checkpoint, CheckpointHeader},
    validator_set::ValidatorSet,
};

/// One side of a divergence: the checkpoint suffix since (excluding) the common ancestor,
/// oldest first, and the blocks covered by those checkpoints together with any admitted but
/// not yet checkpointed blocks on that side.
#[derive(Clone)]
pub struct Branch {
    pub checkpoints: Vec<Checkpoint>,
    pub blocks: Vec<Block>,
}

impl Branch {
    pub fn head(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }
}

/// The change one side made to a single entity since the ancestor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityDelta {
    pub entity: EntityKey,
    pub folded: Vec<u8>,
    pub blocks: Vec<CryptoHash>,
}

/// A detected clash between the two sides' deltas for the same entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    pub entity: EntityKey,
    pub kind: ConflictKind,
    pub ours: EntityDelta,
    pub theirs: EntityDelta,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictKind {
    /// Two sides mutated the same keyed balance/state incompatibly.
    ValueClash,
    /// Two sides recorded different resolutions for the same decision record.
    OutcomeClash,
    /// Two sides issued incompatible updates to the same identity.
    IdentityClash,
}

impl ConflictKind {
    fn of(kind: EntityKind) -> ConflictKind {
        match kind {
            EntityKind::Value => ConflictKind::ValueClash,
            EntityKind::Decision => ConflictKind::OutcomeClash,
            EntityKind::Identity => ConflictKind::IdentityClash,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConflictSeverity {
    /// The deltas touch disjoint entities (or agree byte-for-byte): union them.
    None,
    /// Value clashes only: resolved by the deterministic branch tie-break.
    Minor,
    /// An outcome or identity clash: goes to governance, never guessed locally.
    Major,
    /// Deliberate conflicting checkpoints from the same validator.
    Critical,
}

/// Evidence that one validator signed two different checkpoints at the same epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EquivocationFault {
    pub offender: VerifyingKeyBytes,
    pub epoch: Epoch,
    pub ours: CryptoHash,
    pub theirs: CryptoHash,
}

/// The reconciler's verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedState {
    /// The branches merge locally (severity `None` or `Minor`).
    Merged(MergedState),
    /// A Major conflict: the two chains go to the governance collaborator for an explicit
    /// vote, and reconciliation blocks pending that outcome.
    PendingExternalDecision {
        ours: CheckpointHeader,
        theirs: CheckpointHeader,
    },
    /// A Critical conflict: the offending validators are reported to the trust ledger and
    /// excluded from quorum counting going forward.
    Equivocation(Vec<EquivocationFault>),
}

/// The result of a local merge.
///
/// The merge is applied *in-band*: the blocks whose effect is not yet committed under the
/// canonical chain re-enter the pending-epoch list and are folded by the next built
/// checkpoint, so that every node — including ones that fast-forward through the history much
/// later — computes the same state roots from blocks alone. `entities` is the resolution
/// record: what the state of each touched entity converges to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergedState {
    /// Resolved folded state for every entity either side touched.
    pub entities: BTreeMap<EntityKey, Vec<u8>>,
    /// Identifiers of the union of both sides' blocks, in replay order.
    pub blocks: Vec<CryptoHash>,
    /// Identifiers of the losing side's updates to entities both sides touched. These blocks
    /// are stored for audit but never folded: the winner's updates alone decide those
    /// entities' state.
    pub excluded: Vec<CryptoHash>,
    /// The head both sides adopt as canonical; the other head is recorded superseded.
    pub canonical_head: CryptoHash,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    pub severity: ConflictSeverity,
    pub conflicts: Vec<Conflict>,
    pub resolved: ResolvedState,
}

/// Reconcile two branches that diverged from `ancestor`.
///
/// `ancestor_states` must hold the committed state, as of the ancestor checkpoint, of every
/// entity either branch touches (entities with no state then are simply absent). `excluded` is
/// the equivocation exclusion set both sides share.
pub fn reconcile<F: StateFolder>(
    folder: &F,
    ancestor: &Checkpoint,
    ours: &Branch,
    theirs: &Branch,
    ancestor_states: &BTreeMap<EntityKey, Vec<u8>>,
    excluded: &HashSet<VerifyingKeyBytes>,
) -> Reconciliation {
    // Critical overrides everything: conflicting checkpoints signed by the same validator at
    // the same epoch are evidence of equivocation, not an honest divergence to merge.
    let faults = detect_equivocation(ancestor, ours, theirs, excluded);
    if !faults.is_empty() {
        return Reconciliation {
            severity: ConflictSeverity::Critical,
            conflicts: Vec::new(),
            resolved: ResolvedState::Equivocation(faults),
        };
    }

    let our_deltas = compute_deltas(folder, &ours.blocks, ancestor_states);
    let their_deltas = compute_deltas(folder, &theirs.blocks, ancestor_states);

    let mut conflicts = Vec::new();
    for (entity, our_delta) in &our_deltas {
        if let Some(their_delta) = their_deltas.get(entity) {
            if our_delta.folded != their_delta.folded {
                conflicts.push(Conflict {
                    entity: entity.clone(),
                    kind: ConflictKind::of(entity.kind),
                    ours: our_delta.clone(),
                    theirs: their_delta.clone(),
                });
            }
        }
    }

    let severity = if conflicts.is_empty() {
        ConflictSeverity::None
    } else if conflicts
        .iter()
        .all(|conflict| conflict.kind == ConflictKind::ValueClash)
    {
        ConflictSeverity::Minor
    } else {
        ConflictSeverity::Major
    };

    if severity == ConflictSeverity::Major {
        let ours_header = branch_header(ancestor, ours);
        let theirs_header = branch_header(ancestor, theirs);
        return Reconciliation {
            severity,
            conflicts,
            resolved: ResolvedState::PendingExternalDecision {
                ours: ours_header,
                theirs: theirs_header,
            },
        };
    }

    // The tie-break is branch-level and total: higher cumulative valid-signature weight across
    // the suffix wins, then the branch with the lexicographically smaller head identifier.
    let we_win = branch_wins(ancestor, ours, theirs, excluded);

    // Resolve every touched entity: disjoint entities take the touching side's fold, entities
    // both sides touched take the winner's. The losing side's updates to shared entities are
    // excluded from folding entirely — even when the folds happen to agree, only one side's
    // blocks may decide the entity, or replaying both would compound their effects.
    let mut entities: BTreeMap<EntityKey, Vec<u8>> = BTreeMap::new();
    let mut excluded_blocks: Vec<CryptoHash> = Vec::new();
    let mut seen_excluded: HashSet<CryptoHash> = HashSet::new();
    for (entity, our_delta) in &our_deltas {
        match their_deltas.get(entity) {
            None => {
                entities.insert(entity.clone(), our_delta.folded.clone());
            }
            Some(their_delta) => {
                let (winner, loser) = if we_win {
                    (our_delta, their_delta)
                } else {
                    (their_delta, our_delta)
                };
                entities.insert(entity.clone(), winner.folded.clone());
                for block_id in &loser.blocks {
                    if seen_excluded.insert(*block_id) {
                        excluded_blocks.push(*block_id);
                    }
                }
            }
        }
    }
    for (entity, their_delta) in &their_deltas {
        entities
            .entry(entity.clone())
            .or_insert_with(|| their_delta.folded.clone());
    }

    let blocks = union_block_order(ours, theirs);

    let canonical_head = if we_win {
        branch_header(ancestor, ours).id
    } else {
        branch_header(ancestor, theirs).id
    };

    Reconciliation {
        severity,
        conflicts,
        resolved: ResolvedState::Merged(MergedState {
            entities,
            blocks,
            excluded: excluded_blocks,
            canonical_head,
        }),
    }
}

/// Fold one side's blocks into per-entity deltas, starting each entity from its
/// ancestor-committed state.
fn compute_deltas<F: StateFolder>(
    folder: &F,
    blocks: &[Block],
    ancestor_states: &BTreeMap<EntityKey, Vec<u8>>,
) -> BTreeMap<EntityKey, EntityDelta> {
    // Replay order must be identical on every node: topologically sort the side's blocks.
    let ordered = match topological_order(blocks.to_vec()) {
        Ok(ordered) => ordered,
        // A cyclic input cannot be folded; treat it as touching nothing. The sync session has
        // already rejected blocks that fail admission, so this is unreachable for fetched data.
        Err(_) => return BTreeMap::new(),
    };

    let mut touching: BTreeMap<EntityKey, Vec<&Block>> = BTreeMap::new();
    for block in &ordered {
        for entity in folder.entities(block) {
            touching.entry(entity).or_default().push(block);
        }
    }

    touching
        .into_iter()
        .map(|(entity, blocks)| {
            let prior = ancestor_states.get(&entity).map(|state| state.as_slice());
            let folded = folder.fold_entity(&entity, prior, &blocks);
            let block_ids = blocks.iter().map(|block| block.id).collect();
            (
                entity.clone(),
                EntityDelta {
                    entity,
                    folded,
                    blocks: block_ids,
                },
            )
        })
        .collect()
}

/// Whether `ours` wins the deterministic branch tie-break against `theirs`.
fn branch_wins(
    ancestor: &Checkpoint,
    ours: &Branch,
    theirs: &Branch,
    excluded: &HashSet<VerifyingKeyBytes>,
) -> bool {
    let our_weight = branch_weight(ancestor, ours, excluded);
    let their_weight = branch_weight(ancestor, theirs, excluded);
    if our_weight != their_weight {
        return our_weight > their_weight;
    }
    branch_header(ancestor, ours).id <= branch_header(ancestor, theirs).id
}

/// Cumulative count of valid signatures across a branch's checkpoints, each verified against
/// the validator set snapshotted in its predecessor.
fn branch_weight(
    ancestor: &Checkpoint,
    branch: &Branch,
    excluded: &HashSet<VerifyingKeyBytes>,
) -> usize {
    let mut validator_set = decode_validator_set(ancestor);
    let mut weight = 0;
    for checkpoint in &branch.checkpoints {
        weight += checkpoint
            .signatures
            .count_valid(&checkpoint.id(), &validator_set, excluded);
        validator_set = decode_validator_set(checkpoint);
    }
    weight
}

/// The header of a branch's head, falling back to the ancestor for an empty suffix (a side
/// that only has uncheckpointed blocks past the ancestor).
fn branch_header(ancestor: &Checkpoint, branch: &Branch) -> CheckpointHeader {
    match branch.head() {
        Some(head) => head.header(),
        None => ancestor.header(),
    }
}

/// The union of both sides' blocks in a deterministic replay order.
fn union_block_order(ours: &Branch, theirs: &Branch) -> Vec<CryptoHash> {
    let mut union: Vec<Block> = Vec::new();
    let mut seen: HashSet<CryptoHash> = HashSet::new();
    for block in ours.blocks.iter().chain(theirs.blocks.iter()) {
        if seen.insert(block.id) {
            union.push(block.clone());
        }
    }
    match topological_order(union) {
        Ok(ordered) => ordered.into_iter().map(|block| block.id).collect(),
        Err(_) => Vec::new(),
    }
}

/// Find validators whose valid signatures appear on both sides' differing checkpoints at the
/// same epoch. During an honest partition a validator sits on exactly one side, so a signature
/// on both is deliberate.
fn detect_equivocation(
    ancestor: &Checkpoint,
    ours: &Branch,
    theirs: &Branch,
    excluded: &HashSet<VerifyingKeyBytes>,
) -> Vec<EquivocationFault> {
    let mut faults = Vec::new();

    let their_by_epoch: HashMap<Epoch, (&Checkpoint, ValidatorSet)> = {
        let mut map = HashMap::new();
        let mut validator_set = decode_validator_set(ancestor);
        for checkpoint in &theirs.checkpoints {
            map.insert(checkpoint.epoch, (checkpoint, validator_set.clone()));
            validator_set = decode_validator_set(checkpoint);
        }
        map
    };

    let mut our_validator_set = decode_validator_set(ancestor);
    for our_checkpoint in &ours.checkpoints {
        if let Some((their_checkpoint, their_validator_set)) =
            their_by_epoch.get(&our_checkpoint.epoch)
        {
            let our_id = our_checkpoint.id();
            let their_id = their_checkpoint.id();
            if our_id != their_id {
                let our_signers: HashSet<VerifyingKeyBytes> = our_checkpoint
                    .signatures
                    .valid_signers(&our_id, &our_validator_set, excluded)
                    .into_iter()
                    .collect();
                for signer in their_checkpoint.signatures.valid_signers(
                    &their_id,
                    their_validator_set,
                    excluded,
                ) {
                    if our_signers.contains(&signer) {
                        faults.push(EquivocationFault {
                            offender: signer,
                            epoch: our_checkpoint.epoch,
                            ours: our_id,
                            theirs: their_id,
                        });
                    }
                }
            }
        }
        our_validator_set = decode_validator_set(our_checkpoint);
    }

    // Deterministic report order regardless of map iteration order.
    faults.sort_by(|a, b| (a.epoch, a.offender).cmp(&(b.epoch, b.offender)));
    faults
}

fn decode_validator_set(checkpoint: &Checkpoint) -> ValidatorSet {
    // An undecodable embedded set yields an empty set, under which no signature counts.
    ValidatorSet::try_from(&checkpoint.validator_set).unwrap_or_default()
}
