/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/
//! Byte-prefixes that specify where each block store variable is stored in the user-provided
//! key-value store.
//!
//! # Storage of state variables
//!
//! Each variable is stored as **Borsh-serialized values** in one or more **keys** in the
//! key-value store, formed by combining the constants defined in this module:
//!
//! - "Single values" (e.g., the head checkpoint identifier, the current epoch) are stored at
//!   one-byte constant keys sharing the variable's name.
//! - Mappings of the form "`A` -> `B`" (e.g., checkpoints) are stored at keys formed by
//!   concatenating the variable's one-byte prefix and the serialization of an instance of `A`.
//! - Blocks are stored field-by-field: each of a block's fields lives at
//!   [`BLOCKS`] + `block.id` + the field's own one-byte constant. A block is addressable iff
//!   all of its field keys were committed in one write batch, which is what
//!   [`BlockStore::put`](super::BlockStore::put) guarantees.

// State variables
pub const BLOCKS: [u8; 1] = [0];
pub const BLOCK_ADMITTED: [u8; 1] = [1];
pub const PENDING_EPOCH_BLOCKS: [u8; 1] = [2];
pub const CHECKPOINTS: [u8; 1] = [3];
pub const CHECKPOINT_AT_EPOCH: [u8; 1] = [4];
pub const HEAD_CHECKPOINT: [u8; 1] = [5];
pub const CURRENT_EPOCH: [u8; 1] = [6];
pub const COMMITTED_ENTITY_STATE: [u8; 1] = [7];
pub const ENTITY_INDEX: [u8; 1] = [8];
pub const SUPERSEDED_CHECKPOINTS: [u8; 1] = [9];
pub const CHECKPOINT_BLOCK_IDS: [u8; 1] = [10];
pub const CHECKPOINT_BLOCK: [u8; 1] = [11];
pub const CHECKPOINT_ENTITY_UPDATES: [u8; 1] = [12];

// Fields of Block
pub const BLOCK_ENCODING: [u8; 1] = [0];
pub const BLOCK_PAYLOAD: [u8; 1] = [1];
pub const BLOCK_PARENTS: [u8; 1] = [2];
pub const BLOCK_TYPE: [u8; 1] = [3];
pub const BLOCK_TIMESTAMP: [u8; 1] = [4];
pub const BLOCK_SIGNATURES: [u8; 1] = [5];

/// Concatenate two byteslices into one vector.
pub fn combine(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
