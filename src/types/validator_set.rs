/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store information about the validator set whose signatures attest checkpoints.

use borsh::{BorshDeserialize, BorshSerialize};
use std::slice;

pub use ed25519_dalek::{Signature, SigningKey, VerifyingKey};

use super::basic::VerifyingKeyBytes;

/// Stores the identities of the validators of a federation.
///
/// ## Ordering of validators
///
/// `ValidatorSet` internally maintains the list of validators in ascending order of their
/// `VerifyingKey` bytes, and avails the methods [`validators`](ValidatorSet::validators) and
/// [`position`](ValidatorSet::position) that users can use to get them in this order. The
/// ordering makes every iteration over the set deterministic, which quorum counting and
/// canonical encodings rely on.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ValidatorSet {
    // The verifying keys of validators are included here in ascending order.
    validators: Vec<VerifyingKey>,
}

impl ValidatorSet {
    /// Create an empty validator set.
    pub fn new() -> ValidatorSet {
        Self {
            validators: Vec::new(),
        }
    }

    /// Put `validator` into the validator set, placing it in the position that preserves the
    /// [ordering of validators](Self#ordering-of-validators). Putting a validator that is
    /// already in the set is a no-op.
    pub fn put(&mut self, validator: &VerifyingKey) {
        let validator_bytes = validator.to_bytes();
        if let Err(insert_pos) = self
            .validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
        {
            self.validators.insert(insert_pos, *validator);
        }
    }

    /// Remove `validator` from the validator set, if it actually is in the validator set.
    pub fn remove(&mut self, validator: &VerifyingKey) -> Option<VerifyingKey> {
        let validator_bytes = validator.to_bytes();
        match self
            .validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
        {
            Ok(pos) => Some(self.validators.remove(pos)),
            Err(_) => None,
        }
    }

    /// Check whether the validator set contains `validator`.
    pub fn contains(&self, validator: &VerifyingKey) -> bool {
        let validator_bytes = validator.to_bytes();
        self.validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
            .is_ok()
    }

    /// Get an iterator through validators' verifying keys which walks through them in ascending
    /// order.
    pub fn validators(&self) -> slice::Iter<VerifyingKey> {
        self.validators.iter()
    }

    /// Get the number of validators currently in the validator set.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check whether the validator set is empty (i.e., `self.len() == 0`).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the index of the given `validator` in the [sorted order](Self#ordering-of-validators)
    /// of `VerifyingKey`s in the validator set, if it is actually in the validator set.
    pub fn position(&self, validator: &VerifyingKey) -> Option<usize> {
        let validator_bytes = validator.to_bytes();
        self.validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
            .ok()
    }

    /// Compute the number of valid signatures a checkpoint must match or exceed (`>=`) in order
    /// to count as attested by a quorum of this validator set.
    ///
    /// For a set of size `n` this is `2n/3 + 1` (integer division), which is equal to
    /// ⌈(2n + 1)/3⌉ for every `n`.
    pub fn quorum(&self) -> usize {
        (self.len() * 2) / 3 + 1
    }
}

/// Intermediate representation of [`ValidatorSet`] for safe serialization and deserialization.
///
/// ## Rationale
///
/// This type exists because it is not straightforward to implement `BorshSerialize` and
/// `BorshDeserialize` on `ValidatorSet`, since the latter type internally contains
/// [`ed25519_dalek::VerifyingKey`], which does not implement the Borsh traits.
///
/// Instances of this type are not guaranteed to contain valid Ed25519 verifying keys, so
/// conversion from this type into `ValidatorSet` using `TryFrom` is fallible.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ValidatorSetBytes {
    validators: Vec<VerifyingKeyBytes>,
}

impl TryFrom<&ValidatorSetBytes> for ValidatorSet {
    type Error = ed25519_dalek::SignatureError;

    fn try_from(value: &ValidatorSetBytes) -> Result<Self, Self::Error> {
        let mut validator_set = ValidatorSet::new();
        for key_bytes in &value.validators {
            validator_set.put(&VerifyingKey::from_bytes(key_bytes)?);
        }
        Ok(validator_set)
    }
}

impl From<&ValidatorSet> for ValidatorSetBytes {
    fn from(value: &ValidatorSet) -> ValidatorSetBytes {
        ValidatorSetBytes {
            validators: value.validators().map(|v| v.to_bytes()).collect(),
        }
    }
}
