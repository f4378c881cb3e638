/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'checkpoint' type: the periodically built, multi-signed snapshot of the
//! ledger at an epoch boundary.
//!
//! A checkpoint commits to everything that happened in its epoch: the Merkle root over the
//! identifiers of the blocks admitted since the previous checkpoint (`block_root`), the Merkle
//! root over the canonically ordered per-entity state (`state_root`), opaque summary blobs owned
//! by collaborator subsystems, and a snapshot of the validator set whose quorum must sign the
//! *next* checkpoint. Signatures are collected over the checkpoint's identifier, which is the
//! SHA-256 digest of its canonical encoding.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Verifier, VerifyingKey};
use sha2::Digest;
use std::collections::HashSet;

use super::{
    basic::{CryptoHash, Epoch, FederationId, SignatureBytes, VerifyingKeyBytes},
    block::CryptoHasher,
    merkle::MerkleProof,
    validator_set::{ValidatorSet, ValidatorSetBytes},
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Checkpoint {
    pub federation: FederationId,
    pub epoch: Epoch,
    pub previous: CryptoHash,
    pub state_root: CryptoHash,
    pub block_root: CryptoHash,
    pub summaries: Vec<Summary>,
    pub validator_set: ValidatorSetBytes,
    pub signatures: CheckpointSignatures,
    pub proofs: CheckpointProofs,
}

impl Checkpoint {
    /// The identifier of the checkpoint: the digest of the canonical encoding of every field
    /// except `signatures` and `proofs` (signatures sign the identifier; proofs are derived
    /// from the roots and re-derivable by anyone holding the epoch's blocks).
    pub fn id(&self) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(self.federation.try_to_vec().unwrap());
        hasher.update(self.epoch.try_to_vec().unwrap());
        hasher.update(self.previous.try_to_vec().unwrap());
        hasher.update(self.state_root.try_to_vec().unwrap());
        hasher.update(self.block_root.try_to_vec().unwrap());
        hasher.update(self.summaries.try_to_vec().unwrap());
        hasher.update(self.validator_set.try_to_vec().unwrap());
        CryptoHash::new(hasher.finalize().into())
    }

    /// The genesis checkpoint of a chain: epoch zero, empty roots, no signatures. Every
    /// federation sharing a ledger derives the identical genesis from the initial validator
    /// set, so genesis checkpoints are accepted without quorum.
    pub fn genesis(federation: FederationId, validator_set: &ValidatorSet) -> Checkpoint {
        Checkpoint {
            federation,
            epoch: Epoch::init(),
            previous: CryptoHash::zero(),
            state_root: CryptoHash::zero(),
            block_root: CryptoHash::zero(),
            summaries: Vec::new(),
            validator_set: validator_set.into(),
            signatures: CheckpointSignatures::new(),
            proofs: CheckpointProofs::empty(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.epoch == Epoch::init() && self.previous.is_zero()
    }

    /// The compact header exchanged during [sync sessions](crate::sync::session).
    pub fn header(&self) -> CheckpointHeader {
        CheckpointHeader {
            id: self.id(),
            federation: self.federation,
            epoch: self.epoch,
            previous: self.previous,
            state_root: self.state_root,
            block_root: self.block_root,
            signature_count: self.signatures.len() as u32,
        }
    }
}

/// The compact form of a checkpoint sent in header exchanges: enough to find a common ancestor
/// and classify the relationship between two chains, without shipping payload summaries or
/// signatures.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CheckpointHeader {
    pub id: CryptoHash,
    pub federation: FederationId,
    pub epoch: Epoch,
    pub previous: CryptoHash,
    pub state_root: CryptoHash,
    pub block_root: CryptoHash,
    pub signature_count: u32,
}

/// The set of `(validator, signature)` pairs attesting a checkpoint.
#[derive(Clone, Debug, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct CheckpointSignatures(Vec<CheckpointSignature>);

impl CheckpointSignatures {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Record `signature` from `signer`. A second signature from the same signer is ignored:
    /// one validator contributes at most one unit towards quorum.
    pub fn add(&mut self, signer: VerifyingKeyBytes, signature: SignatureBytes) {
        if !self.0.iter().any(|existing| existing.signer == signer) {
            self.0.push(CheckpointSignature { signer, signature });
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CheckpointSignature> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_signer(&self, signer: &VerifyingKeyBytes) -> bool {
        self.0.iter().any(|existing| existing.signer == *signer)
    }

    /// The distinct signers that (1) are members of `validator_set`, (2) are not in `excluded`,
    /// and (3) produced a signature that verifies over `id`. Returned in signature order.
    pub fn valid_signers(
        &self,
        id: &CryptoHash,
        validator_set: &ValidatorSet,
        excluded: &HashSet<VerifyingKeyBytes>,
    ) -> Vec<VerifyingKeyBytes> {
        let mut counted: HashSet<VerifyingKeyBytes> = HashSet::new();
        let mut signers = Vec::new();
        for entry in &self.0 {
            if excluded.contains(&entry.signer) || counted.contains(&entry.signer) {
                continue;
            }
            let verifying_key = match VerifyingKey::from_bytes(&entry.signer) {
                Ok(key) => key,
                Err(_) => continue,
            };
            if !validator_set.contains(&verifying_key) {
                continue;
            }
            let signature = ed25519_dalek::Signature::from_bytes(&entry.signature.bytes());
            if verifying_key.verify(&id.bytes(), &signature).is_ok() {
                counted.insert(entry.signer);
                signers.push(entry.signer);
            }
        }
        signers
    }

    /// Count the signatures that [`valid_signers`](Self::valid_signers) would return.
    pub fn count_valid(
        &self,
        id: &CryptoHash,
        validator_set: &ValidatorSet,
        excluded: &HashSet<VerifyingKeyBytes>,
    ) -> usize {
        self.valid_signers(id, validator_set, excluded).len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CheckpointSignature {
    pub signer: VerifyingKeyBytes,
    pub signature: SignatureBytes,
}

/// An opaque, versioned summary blob owned by a collaborator subsystem (economic totals,
/// governance tallies). This crate hashes summaries into the checkpoint identifier but never
/// interprets their bytes.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Summary {
    pub tag: SummaryTag,
    pub version: u16,
    pub bytes: Vec<u8>,
}

/// Identifies which collaborator a [`Summary`] belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct SummaryTag(u16);

impl SummaryTag {
    pub const fn new(int: u16) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u16 {
        self.0
    }
}

/// Inclusion proofs derived by the checkpoint builder: the newest block's identifier under
/// `block_root`, and the first entity leaf under `state_root`. `None` when the corresponding
/// tree is empty (an epoch with no blocks, or no entity state yet).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CheckpointProofs {
    pub block_inclusion: Option<MerkleProof>,
    pub state_inclusion: Option<MerkleProof>,
}

impl CheckpointProofs {
    pub fn empty() -> Self {
        Self {
            block_inclusion: None,
            state_inclusion: None,
        }
    }
}
