/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The checkpoint validator: verifies a received checkpoint's chain linkage, signature quorum,
//! and Merkle proofs.
//!
//! Validation is a pure function: the same checkpoint validated against the same expected
//! previous reference, validator set, and exclusion set yields the same result every time.
//! Failures are reported, never silently accepted; what to do about a failure (discard, retry,
//! penalize the delivering peer) is the caller's policy.

use std::collections::HashSet;
use std::fmt::Display;

use crate::types::{
    basic::{CryptoHash, VerifyingKeyBytes},
    checkpoint::Checkpoint,
    merkle::MerkleProof,
    validator_set::ValidatorSet,
};

/// Validate `checkpoint` against local history and the validator set in force at its epoch.
///
/// `expected_previous` is the identifier of the local chain's checkpoint at the epoch before
/// `checkpoint.epoch` — during fast-forward application this is re-checked before *every*
/// apply, which is what makes out-of-order application impossible. `validator_set` is the set
/// snapshotted in the preceding checkpoint (never a mutable "current" set), and `excluded` is
/// the equivocation exclusion set.
///
/// Genesis checkpoints carry no quorum: every federation derives the identical genesis from
/// the initial validator set, so a genesis checkpoint is correct by construction.
pub fn validate(
    checkpoint: &Checkpoint,
    expected_previous: &CryptoHash,
    validator_set: &ValidatorSet,
    excluded: &HashSet<VerifyingKeyBytes>,
) -> Result<(), ValidateError> {
    if checkpoint.is_genesis() {
        return Ok(());
    }

    // A mismatched previous reference indicates either a missed checkpoint or a fork; the
    // caller routes it to the reconciler. It must never be silently overwritten.
    if checkpoint.previous != *expected_previous {
        return Err(ValidateError::ChainMismatch {
            expected: *expected_previous,
            got: checkpoint.previous,
        });
    }

    let id = checkpoint.id();
    let got = checkpoint.signatures.count_valid(&id, validator_set, excluded);
    let needed = validator_set.quorum();
    if got < needed {
        return Err(ValidateError::QuorumNotMet { got, needed });
    }

    check_proof(
        &checkpoint.proofs.block_inclusion,
        &checkpoint.block_root,
        ProofKind::BlockInclusion,
    )?;
    check_proof(
        &checkpoint.proofs.state_inclusion,
        &checkpoint.state_root,
        ProofKind::StateInclusion,
    )?;

    Ok(())
}

/// A proof may be absent only when its root is the empty-tree root; a present proof must
/// verify against the checkpoint's own root.
fn check_proof(
    proof: &Option<MerkleProof>,
    root: &CryptoHash,
    kind: ProofKind,
) -> Result<(), ValidateError> {
    match proof {
        None => {
            if root.is_zero() {
                Ok(())
            } else {
                Err(ValidateError::ProofInvalid { kind })
            }
        }
        Some(proof) => {
            if proof.verify(root) {
                Ok(())
            } else {
                Err(ValidateError::ProofInvalid { kind })
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofKind {
    BlockInclusion,
    StateInclusion,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidateError {
    /// The previous-checkpoint reference does not match local history: a missed checkpoint or
    /// a fork.
    ChainMismatch { expected: CryptoHash, got: CryptoHash },
    /// Fewer valid signatures than two-thirds-plus-one of the validator set.
    QuorumNotMet { got: usize, needed: usize },
    /// A Merkle proof is missing or does not verify against the checkpoint's own root.
    ProofInvalid { kind: ProofKind },
    /// The validator set snapshotted in the preceding checkpoint could not be decoded.
    MalformedValidatorSet,
    /// The block-identifier list delivered with the checkpoint does not hash to its block
    /// root.
    BlockRootMismatch { expected: CryptoHash, computed: CryptoHash },
    /// Folding the checkpoint's blocks locally produced a different state root than the
    /// checkpoint claims.
    StateRootMismatch { expected: CryptoHash, computed: CryptoHash },
}

impl Display for ValidateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidateError::ChainMismatch { expected, got } => write!(
                f,
                "chain mismatch: expected previous checkpoint {}, got {}",
                expected, got
            ),
            ValidateError::QuorumNotMet { got, needed } => {
                write!(f, "quorum not met: {} of {} required signatures", got, needed)
            }
            ValidateError::ProofInvalid { kind } => write!(f, "invalid {:?} proof", kind),
            ValidateError::MalformedValidatorSet => {
                write!(f, "preceding checkpoint carries an undecodable validator set")
            }
            ValidateError::BlockRootMismatch { expected, computed } => write!(
                f,
                "block root mismatch: checkpoint claims {}, block list hashes to {}",
                expected, computed
            ),
            ValidateError::StateRootMismatch { expected, computed } => write!(
                f,
                "state root mismatch: checkpoint claims {}, local fold produced {}",
                expected, computed
            ),
        }
    }
}
