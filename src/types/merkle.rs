/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Binary Merkle trees over 32-byte leaves, used for the block root and state root of a
//! [checkpoint](crate::types::checkpoint::Checkpoint), and the inclusion proofs carried inside
//! checkpoints.
//!
//! Leaf and internal hashes are domain-separated with a one-byte prefix so that an internal node
//! can never be presented as a leaf. A node left unpaired at any level is promoted to the next
//! level unchanged.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use super::basic::CryptoHash;

const LEAF_PREFIX: [u8; 1] = [0];
const NODE_PREFIX: [u8; 1] = [1];

/// A fully materialized Merkle tree. The root of an empty tree is [`CryptoHash::zero`].
pub struct MerkleTree {
    // levels[0] holds the hashed leaves; the last level holds the root alone.
    levels: Vec<Vec<CryptoHash>>,
}

impl MerkleTree {
    /// Build a tree over `leaves`, in the order given. Order is part of the commitment: callers
    /// must canonicalize the leaf order before building.
    pub fn build(leaves: &[CryptoHash]) -> MerkleTree {
        if leaves.is_empty() {
            return MerkleTree { levels: Vec::new() };
        }

        let mut levels = vec![leaves.iter().map(hash_leaf).collect::<Vec<_>>()];
        while levels.last().unwrap().len() > 1 {
            let prev = levels.last().unwrap();
            let mut next = Vec::with_capacity((prev.len() + 1) / 2);
            for pair in prev.chunks(2) {
                match pair {
                    [left, right] => next.push(hash_node(left, right)),
                    [odd] => next.push(*odd),
                    _ => unreachable!(),
                }
            }
            levels.push(next);
        }

        MerkleTree { levels }
    }

    pub fn root(&self) -> CryptoHash {
        match self.levels.last() {
            Some(top) => top[0],
            None => CryptoHash::zero(),
        }
    }

    pub fn len(&self) -> usize {
        self.levels.first().map_or(0, |leaves| leaves.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produce an inclusion proof for the leaf originally at `index`, or `None` if the index is
    /// out of bounds.
    pub fn prove(&self, index: usize, leaf: CryptoHash) -> Option<MerkleProof> {
        if index >= self.len() {
            return None;
        }

        let mut siblings = Vec::new();
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = idx ^ 1;
            if let Some(sibling) = level.get(sibling_idx) {
                let side = if sibling_idx < idx {
                    Side::Left
                } else {
                    Side::Right
                };
                siblings.push(ProofStep {
                    hash: *sibling,
                    side,
                });
            }
            idx /= 2;
        }

        Some(MerkleProof { leaf, siblings })
    }
}

/// Proof that a leaf is included under a Merkle root.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MerkleProof {
    pub leaf: CryptoHash,
    pub siblings: Vec<ProofStep>,
}

impl MerkleProof {
    /// Check whether this proof's leaf hashes up to `root`.
    pub fn verify(&self, root: &CryptoHash) -> bool {
        let mut acc = hash_leaf(&self.leaf);
        for step in &self.siblings {
            acc = match step.side {
                Side::Left => hash_node(&step.hash, &acc),
                Side::Right => hash_node(&acc, &step.hash),
            };
        }
        acc == *root
    }
}

/// One step of a Merkle proof: the sibling's hash and which side of the pair it sits on.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProofStep {
    pub hash: CryptoHash,
    pub side: Side,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Side {
    Left,
    Right,
}

fn hash_leaf(leaf: &CryptoHash) -> CryptoHash {
    let mut hasher = Sha256::new();
    hasher.update(LEAF_PREFIX);
    hasher.update(leaf.bytes());
    CryptoHash::new(hasher.finalize().into())
}

fn hash_node(left: &CryptoHash, right: &CryptoHash) -> CryptoHash {
    let mut hasher = Sha256::new();
    hasher.update(NODE_PREFIX);
    hasher.update(left.bytes());
    hasher.update(right.bytes());
    CryptoHash::new(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<CryptoHash> {
        (0..n).map(|i| CryptoHash::new([i; 32])).collect()
    }

    #[test]
    fn empty_tree_has_zero_root() {
        assert_eq!(MerkleTree::build(&[]).root(), CryptoHash::zero());
    }

    #[test]
    fn proofs_verify_for_every_leaf() {
        for n in 1..=9 {
            let leaves = leaves(n);
            let tree = MerkleTree::build(&leaves);
            for (i, leaf) in leaves.iter().enumerate() {
                let proof = tree.prove(i, *leaf).unwrap();
                assert!(proof.verify(&tree.root()));
            }
        }
    }

    #[test]
    fn corrupted_proof_fails() {
        let leaves = leaves(5);
        let tree = MerkleTree::build(&leaves);
        let mut proof = tree.prove(2, leaves[2]).unwrap();
        proof.leaf = CryptoHash::new([0xFF; 32]);
        assert!(!proof.verify(&tree.root()));
    }

    #[test]
    fn leaf_order_changes_the_root() {
        let mut leaves = leaves(4);
        let root = MerkleTree::build(&leaves).root();
        leaves.swap(0, 3);
        assert_ne!(MerkleTree::build(&leaves).root(), root);
    }
}
