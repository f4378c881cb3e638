/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its associated methods.
//!
//! A block is the immutable unit of the ledger: content-addressed by the SHA-256 digest of its
//! canonical Borsh encoding, linked to its parents by their identifiers, and signed by the
//! collaborator subsystem that produced it.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
pub use sha2::Sha256 as CryptoHasher;
use sha2::Digest;

use super::basic::{
    CryptoHash, EncodingTag, LinkName, Payload, SignatureBytes, Timestamp, VerifyingKeyBytes,
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub id: CryptoHash,
    pub encoding: EncodingTag,
    pub payload: Payload,
    pub parents: ParentList,
    pub block_type: BlockType,
    pub timestamp: Timestamp,
    pub signatures: Vec<BlockSignature>,
}

impl Block {
    /// Create an unsigned block, computing its identifier from the other fields.
    pub fn new(
        encoding: EncodingTag,
        payload: Payload,
        parents: ParentList,
        block_type: BlockType,
        timestamp: Timestamp,
    ) -> Block {
        Block {
            id: Block::hash(&encoding, &payload, &parents, &block_type, &timestamp),
            encoding,
            payload,
            parents,
            block_type,
            timestamp,
            signatures: Vec::new(),
        }
    }

    /// The block identifier: the digest of the canonical encoding of every field except `id`
    /// itself and `signatures` (which sign the identifier, and so cannot be part of it).
    pub fn hash(
        encoding: &EncodingTag,
        payload: &Payload,
        parents: &ParentList,
        block_type: &BlockType,
        timestamp: &Timestamp,
    ) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(encoding.try_to_vec().unwrap());
        hasher.update(payload.try_to_vec().unwrap());
        hasher.update(parents.try_to_vec().unwrap());
        hasher.update(block_type.try_to_vec().unwrap());
        hasher.update(timestamp.try_to_vec().unwrap());
        CryptoHash::new(hasher.finalize().into())
    }

    /// Append a signature over this block's identifier.
    pub fn sign(&mut self, signing_key: &SigningKey) {
        let signature = signing_key.sign(&self.id.bytes());
        self.signatures.push(BlockSignature {
            signer: signing_key.verifying_key().to_bytes(),
            signature: SignatureBytes::new(signature.to_bytes()),
        });
    }

    /// Check whether the identifier matches the block's contents.
    pub fn id_is_correct(&self) -> bool {
        self.id
            == Block::hash(
                &self.encoding,
                &self.payload,
                &self.parents,
                &self.block_type,
                &self.timestamp,
            )
    }

    /// Check whether every attached signature verifies over the identifier, and that the block
    /// carries at least one signature if its type requires one.
    pub fn signatures_are_correct(&self) -> bool {
        if self.block_type.requires_signature() && self.signatures.is_empty() {
            return false;
        }
        self.signatures
            .iter()
            .all(|signature| signature.is_correct(&self.id))
    }

    /// Checks if the identifier and all signatures are cryptographically correct.
    pub fn is_correct(&self) -> bool {
        self.id_is_correct() && self.signatures_are_correct()
    }
}

/// Ordered list of a block's named parent links.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct ParentList(Vec<ParentLink>);

impl ParentList {
    pub fn new(links: Vec<ParentLink>) -> Self {
        Self(links)
    }

    pub const fn vec(&self) -> &Vec<ParentLink> {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ParentLink> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A named reference to a parent block, with an optional size hint that lets a fetching peer
/// budget its requests before it has the parent's bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct ParentLink {
    pub name: LinkName,
    pub id: CryptoHash,
    pub size_hint: Option<u64>,
}

impl ParentLink {
    pub fn new(name: LinkName, id: CryptoHash, size_hint: Option<u64>) -> Self {
        Self {
            name,
            id,
            size_hint,
        }
    }
}

/// The producing subsystem of a block, which determines its signature requirement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum BlockType {
    Economic,
    Governance,
    Identity,
    Execution,
    Federation,
    Checkpoint,
    Emergency,
}

impl BlockType {
    /// Whether blocks of this type must carry at least one valid signature to be admissible.
    ///
    /// `Federation` blocks are engine-internal bookkeeping records produced and admitted
    /// locally; every externally produced type arrives signed by its subsystem.
    pub fn requires_signature(&self) -> bool {
        !matches!(self, BlockType::Federation)
    }
}

/// A signature over a block's identifier together with the signer's verifying key bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct BlockSignature {
    pub signer: VerifyingKeyBytes,
    pub signature: SignatureBytes,
}

impl BlockSignature {
    /// Verify this signature over the given block identifier.
    pub fn is_correct(&self, id: &CryptoHash) -> bool {
        match VerifyingKey::from_bytes(&self.signer) {
            Ok(verifying_key) => {
                let signature = ed25519_dalek::Signature::from_bytes(&self.signature.bytes());
                verifying_key.verify(&id.bytes(), &signature).is_ok()
            }
            Err(_) => false,
        }
    }
}
