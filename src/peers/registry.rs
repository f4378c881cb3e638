/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The peer registry: one record per known peer federation, plus the equivocation exclusion
//! set.
//!
//! The registry is an explicit, owned value behind an `Arc<Mutex<..>>`, passed into the
//! subsystems that need it. Only the [peer directory](super::directory) and the
//! [trust ledger](crate::trust) write to it; sync sessions and the partition monitor read.
//! Records are never deleted, only marked unreachable.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sha2::Digest;
use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::types::{
    basic::{CryptoHash, Epoch, FederationId, SignatureBytes, TrustScore, VerifyingKeyBytes},
    block::CryptoHasher,
};

/// The registry shared between the directory, trust ledger, sync sessions, and partition
/// monitor.
pub type SharedRegistry = Arc<Mutex<PeerRegistry>>;

pub fn shared(registry: PeerRegistry) -> SharedRegistry {
    Arc::new(Mutex::new(registry))
}

/// Proof that a peer controls the federation identifier it announces: the identifier must be
/// the digest of the announcement key, and the signature over the identifier must verify under
/// that key.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct IdentityProof {
    pub federation: FederationId,
    pub key: VerifyingKeyBytes,
    pub signature: SignatureBytes,
}

impl IdentityProof {
    /// Derive the federation identifier for a verifying key.
    pub fn federation_id(key: &VerifyingKey) -> FederationId {
        let mut hasher = CryptoHasher::new();
        hasher.update(key.to_bytes());
        FederationId::new(hasher.finalize().into())
    }

    /// Create a proof for the federation identified by `signing_key`.
    pub fn create(signing_key: &SigningKey) -> IdentityProof {
        let key = signing_key.verifying_key();
        let federation = Self::federation_id(&key);
        let signature = signing_key.sign(&federation.bytes());
        IdentityProof {
            federation,
            key: key.to_bytes(),
            signature: SignatureBytes::new(signature.to_bytes()),
        }
    }

    /// Verify the key-to-identifier binding and the self-signature.
    pub fn is_correct(&self) -> bool {
        let key = match VerifyingKey::from_bytes(&self.key) {
            Ok(key) => key,
            Err(_) => return false,
        };
        if Self::federation_id(&key) != self.federation {
            return false;
        }
        let signature = ed25519_dalek::Signature::from_bytes(&self.signature.bytes());
        key.verify(&self.federation.bytes(), &signature).is_ok()
    }

    /// The peer's network address: its announcement verifying key.
    pub fn address(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.key).ok()
    }
}

/// Everything tracked about one known peer federation.
#[derive(Clone, Debug)]
pub struct PeerRecord {
    pub federation: FederationId,
    pub key: VerifyingKeyBytes,
    /// The verified identity proof the peer was admitted with; re-served to other peers
    /// during gossip.
    pub proof: IdentityProof,
    pub last_epoch: Epoch,
    pub last_checkpoint: CryptoHash,
    pub reachable: bool,
    pub latency: Option<Duration>,
    pub trust: TrustScore,
    pub consecutive_failures: u32,
}

impl PeerRecord {
    fn new(proof: &IdentityProof) -> PeerRecord {
        PeerRecord {
            federation: proof.federation,
            key: proof.key,
            proof: proof.clone(),
            last_epoch: Epoch::init(),
            last_checkpoint: CryptoHash::zero(),
            reachable: true,
            latency: None,
            trust: TrustScore::initial(),
            consecutive_failures: 0,
        }
    }
}

#[derive(Default)]
pub struct PeerRegistry {
    peers: BTreeMap<FederationId, PeerRecord>,
    excluded_validators: HashSet<VerifyingKeyBytes>,
}

impl PeerRegistry {
    pub fn new() -> PeerRegistry {
        PeerRegistry::default()
    }

    /// Add a record for a freshly discovered peer whose identity proof has already been
    /// verified. Returns `true` if the peer was new.
    pub fn insert_verified(&mut self, proof: &IdentityProof) -> bool {
        if self.peers.contains_key(&proof.federation) {
            return false;
        }
        self.peers
            .insert(proof.federation, PeerRecord::new(proof));
        true
    }

    pub fn contains(&self, federation: &FederationId) -> bool {
        self.peers.contains_key(federation)
    }

    pub fn get(&self, federation: &FederationId) -> Option<&PeerRecord> {
        self.peers.get(federation)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn reachable_count(&self) -> usize {
        self.peers.values().filter(|peer| peer.reachable).count()
    }

    /// Network addresses of all currently reachable peers.
    pub fn reachable_addresses(&self) -> Vec<VerifyingKey> {
        self.peers
            .values()
            .filter(|peer| peer.reachable)
            .filter_map(|peer| VerifyingKey::from_bytes(&peer.key).ok())
            .collect()
    }

    pub fn find_by_address(&self, address: &VerifyingKey) -> Option<&PeerRecord> {
        let key = address.to_bytes();
        self.peers.values().find(|peer| peer.key == key)
    }

    /* ↓↓↓ Mutation entry points (peer directory) ↓↓↓ */

    pub fn update_head(&mut self, federation: &FederationId, epoch: Epoch, checkpoint: CryptoHash) {
        if let Some(record) = self.peers.get_mut(federation) {
            if epoch >= record.last_epoch {
                record.last_epoch = epoch;
                record.last_checkpoint = checkpoint;
            }
        }
    }

    pub fn mark_reachable(&mut self, federation: &FederationId, latency: Option<Duration>) {
        if let Some(record) = self.peers.get_mut(federation) {
            record.reachable = true;
            if latency.is_some() {
                record.latency = latency;
            }
        }
    }

    pub fn mark_unreachable(&mut self, federation: &FederationId) {
        if let Some(record) = self.peers.get_mut(federation) {
            record.reachable = false;
        }
    }

    /* ↓↓↓ Mutation entry points (trust ledger) ↓↓↓ */

    pub(crate) fn with_record<F: FnOnce(&mut PeerRecord)>(
        &mut self,
        federation: &FederationId,
        f: F,
    ) {
        if let Some(record) = self.peers.get_mut(federation) {
            f(record)
        }
    }

    pub(crate) fn with_record_by_key<F: FnOnce(&mut PeerRecord)>(
        &mut self,
        key: &VerifyingKeyBytes,
        f: F,
    ) {
        if let Some(record) = self.peers.values_mut().find(|record| record.key == *key) {
            f(record)
        }
    }

    pub(crate) fn exclude_validator(&mut self, validator: VerifyingKeyBytes) {
        self.excluded_validators.insert(validator);
    }

    /* ↓↓↓ Exclusion set ↓↓↓ */

    pub fn excluded_validators(&self) -> HashSet<VerifyingKeyBytes> {
        self.excluded_validators.clone()
    }

    pub fn is_excluded(&self, validator: &VerifyingKeyBytes) -> bool {
        self.excluded_validators.contains(validator)
    }
}
