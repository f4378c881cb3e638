/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/
//! Defines the [KVStore], [KVGet], and [WriteBatch] traits, which specify the required
//! interface for the key-value store provided by the user.
//!
//! Given a method to obtain the value for a given key in bytes, [KVGet] also provides typed
//! methods to obtain each of the variables stored in the key-value store, as laid out in
//! [crate::store::paths].
//!
//! Write batches are applied atomically by the implementation: either every set/delete in the
//! batch becomes visible, or none does, including across a crash. This is the crate's
//! crash-consistency contract; the engine never makes a block addressable except through a
//! single batch containing all of its fields.

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::app::EntityKey;
use crate::types::{
    basic::{CryptoHash, Epoch, EncodingTag, Payload, Timestamp},
    block::{Block, BlockSignature, BlockType, ParentList},
    checkpoint::Checkpoint,
};

use super::paths;
use super::paths::combine;
use super::write_batch::WriteBatch;

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;
    type Snapshot<'a>: 'a + KVGet;

    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'_>;
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Block ↓↓↓ */

    fn block(&self, id: &CryptoHash) -> Result<Option<Block>, KVGetError> {
        // Safety: if the encoding field is Some, then put committed all of the block's fields
        // in the same batch, so the rest are Some too.
        let encoding = self.block_encoding(id)?;
        if encoding.is_none() {
            return Ok(None);
        }
        let payload = self
            .block_payload(id)?
            .ok_or(KVGetError::ValueNotFound {
                key: Key::BlockPayload { block: *id },
            })?;
        let parents = self
            .block_parents(id)?
            .ok_or(KVGetError::ValueNotFound {
                key: Key::BlockParents { block: *id },
            })?;
        let block_type = self.block_type(id)?.ok_or(KVGetError::ValueNotFound {
            key: Key::BlockType { block: *id },
        })?;
        let timestamp = self
            .block_timestamp(id)?
            .ok_or(KVGetError::ValueNotFound {
                key: Key::BlockTimestamp { block: *id },
            })?;
        let signatures = self
            .block_signatures(id)?
            .ok_or(KVGetError::ValueNotFound {
                key: Key::BlockSignatures { block: *id },
            })?;

        Ok(Some(Block {
            id: *id,
            encoding: encoding.unwrap(),
            payload,
            parents,
            block_type,
            timestamp,
            signatures,
        }))
    }

    fn block_encoding(&self, block: &CryptoHash) -> Result<Option<EncodingTag>, KVGetError> {
        self.get_optional(
            &block_field_key(block, &paths::BLOCK_ENCODING),
            Key::BlockEncoding { block: *block },
        )
    }

    fn block_payload(&self, block: &CryptoHash) -> Result<Option<Payload>, KVGetError> {
        self.get_optional(
            &block_field_key(block, &paths::BLOCK_PAYLOAD),
            Key::BlockPayload { block: *block },
        )
    }

    fn block_parents(&self, block: &CryptoHash) -> Result<Option<ParentList>, KVGetError> {
        self.get_optional(
            &block_field_key(block, &paths::BLOCK_PARENTS),
            Key::BlockParents { block: *block },
        )
    }

    fn block_type(&self, block: &CryptoHash) -> Result<Option<BlockType>, KVGetError> {
        self.get_optional(
            &block_field_key(block, &paths::BLOCK_TYPE),
            Key::BlockType { block: *block },
        )
    }

    fn block_timestamp(&self, block: &CryptoHash) -> Result<Option<Timestamp>, KVGetError> {
        self.get_optional(
            &block_field_key(block, &paths::BLOCK_TIMESTAMP),
            Key::BlockTimestamp { block: *block },
        )
    }

    fn block_signatures(
        &self,
        block: &CryptoHash,
    ) -> Result<Option<Vec<BlockSignature>>, KVGetError> {
        self.get_optional(
            &block_field_key(block, &paths::BLOCK_SIGNATURES),
            Key::BlockSignatures { block: *block },
        )
    }

    /* ↓↓↓ Admission marker ↓↓↓ */

    fn block_is_admitted(&self, block: &CryptoHash) -> bool {
        self.get(&combine(&paths::BLOCK_ADMITTED, &block.bytes()))
            .is_some()
    }

    /* ↓↓↓ Pending epoch blocks ↓↓↓ */

    fn pending_epoch_blocks(&self) -> Result<Vec<CryptoHash>, KVGetError> {
        Ok(self
            .get_optional(&paths::PENDING_EPOCH_BLOCKS, Key::PendingEpochBlocks)?
            .unwrap_or_default())
    }

    /* ↓↓↓ Checkpoints ↓↓↓ */

    fn checkpoint(&self, id: &CryptoHash) -> Result<Option<Checkpoint>, KVGetError> {
        self.get_optional(
            &combine(&paths::CHECKPOINTS, &id.bytes()),
            Key::Checkpoint { checkpoint: *id },
        )
    }

    fn checkpoint_at_epoch(&self, epoch: Epoch) -> Result<Option<CryptoHash>, KVGetError> {
        self.get_optional(
            &combine(&paths::CHECKPOINT_AT_EPOCH, &epoch.to_le_bytes()),
            Key::CheckpointAtEpoch { epoch },
        )
    }

    fn head_checkpoint_id(&self) -> Result<Option<CryptoHash>, KVGetError> {
        self.get_optional(&paths::HEAD_CHECKPOINT, Key::HeadCheckpoint)
    }

    fn head_checkpoint(&self) -> Result<Option<Checkpoint>, KVGetError> {
        match self.head_checkpoint_id()? {
            Some(id) => self.checkpoint(&id),
            None => Ok(None),
        }
    }

    fn current_epoch(&self) -> Result<Option<Epoch>, KVGetError> {
        self.get_optional(&paths::CURRENT_EPOCH, Key::CurrentEpoch)
    }

    fn checkpoint_is_superseded(&self, id: &CryptoHash) -> bool {
        self.get(&combine(&paths::SUPERSEDED_CHECKPOINTS, &id.bytes()))
            .is_some()
    }

    fn checkpoint_block_ids(&self, id: &CryptoHash) -> Result<Option<Vec<CryptoHash>>, KVGetError> {
        self.get_optional(
            &combine(&paths::CHECKPOINT_BLOCK_IDS, &id.bytes()),
            Key::CheckpointBlockIds { checkpoint: *id },
        )
    }

    fn checkpoint_block(&self, id: &CryptoHash) -> Result<Option<CryptoHash>, KVGetError> {
        self.get_optional(
            &combine(&paths::CHECKPOINT_BLOCK, &id.bytes()),
            Key::CheckpointBlock { checkpoint: *id },
        )
    }

    /// The folded entity states committed by the given checkpoint (not the full state, only
    /// the entities the checkpoint's epoch touched).
    fn checkpoint_entity_updates(
        &self,
        id: &CryptoHash,
    ) -> Result<Option<std::collections::BTreeMap<EntityKey, Vec<u8>>>, KVGetError> {
        self.get_optional(
            &combine(&paths::CHECKPOINT_ENTITY_UPDATES, &id.bytes()),
            Key::CheckpointEntityUpdates { checkpoint: *id },
        )
    }

    /// The state of `entity` as of the checkpoint identified by `checkpoint`: the most recent
    /// update to the entity at or before that checkpoint, found by walking the chain backwards.
    fn entity_state_at(
        &self,
        checkpoint: &CryptoHash,
        entity: &EntityKey,
    ) -> Result<Option<Vec<u8>>, KVGetError> {
        let mut cursor = *checkpoint;
        loop {
            if let Some(updates) = self.checkpoint_entity_updates(&cursor)? {
                if let Some(state) = updates.get(entity) {
                    return Ok(Some(state.clone()));
                }
            }
            match self.checkpoint(&cursor)? {
                Some(current) if !current.is_genesis() => cursor = current.previous,
                _ => return Ok(None),
            }
        }
    }

    /* ↓↓↓ Committed entity state ↓↓↓ */

    fn committed_entity_state(&self, entity: &EntityKey) -> Result<Option<Vec<u8>>, KVGetError> {
        let entity_bytes = borsh::BorshSerialize::try_to_vec(entity).map_err(|err| {
            KVGetError::SerializeKeyError {
                key: Key::CommittedEntityState {
                    entity: entity.clone(),
                },
                source: err,
            }
        })?;
        Ok(self.get(&combine(&paths::COMMITTED_ENTITY_STATE, &entity_bytes)))
    }

    fn entity_index(&self) -> Result<Vec<EntityKey>, KVGetError> {
        Ok(self
            .get_optional(&paths::ENTITY_INDEX, Key::EntityIndex)?
            .unwrap_or_default())
    }

    /* ↓↓↓ Shared plumbing ↓↓↓ */

    #[doc(hidden)]
    fn get_optional<T: BorshDeserialize>(
        &self,
        key_bytes: &[u8],
        key: Key,
    ) -> Result<Option<T>, KVGetError> {
        match self.get(key_bytes) {
            Some(bytes) => Ok(Some(T::deserialize(&mut bytes.as_slice()).map_err(
                |err| KVGetError::DeserializeValueError { key, source: err },
            )?)),
            None => Ok(None),
        }
    }
}

fn block_field_key(block: &CryptoHash, field: &[u8]) -> Vec<u8> {
    combine(&combine(&paths::BLOCKS, &block.bytes()), field)
}

/// Error when trying to read a value corresponding to a given key from the
/// [key value store][KVStore]. The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found even though a sibling key implies
///    it must exist,
/// 3. A composite key cannot be serialized.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    SerializeKeyError { key: Key, source: std::io::Error },
    ValueNotFound { key: Key },
}

impl Display for KVGetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KVGetError::DeserializeValueError { key, source } => {
                write!(f, "failed to deserialize value at {}: {}", key, source)
            }
            KVGetError::SerializeKeyError { key, source } => {
                write!(f, "failed to serialize key for {}: {}", key, source)
            }
            KVGetError::ValueNotFound { key } => write!(f, "value not found at {}", key),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Key {
    BlockEncoding { block: CryptoHash },
    BlockPayload { block: CryptoHash },
    BlockParents { block: CryptoHash },
    BlockType { block: CryptoHash },
    BlockTimestamp { block: CryptoHash },
    BlockSignatures { block: CryptoHash },
    PendingEpochBlocks,
    Checkpoint { checkpoint: CryptoHash },
    CheckpointAtEpoch { epoch: Epoch },
    HeadCheckpoint,
    CurrentEpoch,
    CommittedEntityState { entity: EntityKey },
    EntityIndex,
    SupersededCheckpoint { checkpoint: CryptoHash },
    CheckpointBlockIds { checkpoint: CryptoHash },
    CheckpointBlock { checkpoint: CryptoHash },
    CheckpointEntityUpdates { checkpoint: CryptoHash },
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            Key::BlockEncoding { block } => write!(f, "Block Encoding for block {}", block),
            Key::BlockPayload { block } => write!(f, "Block Payload for block {}", block),
            Key::BlockParents { block } => write!(f, "Block Parents for block {}", block),
            Key::BlockType { block } => write!(f, "Block Type for block {}", block),
            Key::BlockTimestamp { block } => write!(f, "Block Timestamp for block {}", block),
            Key::BlockSignatures { block } => write!(f, "Block Signatures for block {}", block),
            Key::PendingEpochBlocks => write!(f, "Pending Epoch Blocks"),
            Key::Checkpoint { checkpoint } => write!(f, "Checkpoint {}", checkpoint),
            Key::CheckpointAtEpoch { epoch } => write!(f, "Checkpoint at epoch {}", epoch),
            Key::HeadCheckpoint => write!(f, "Head Checkpoint"),
            Key::CurrentEpoch => write!(f, "Current Epoch"),
            Key::CommittedEntityState { entity } => {
                write!(f, "Committed Entity State for entity {:?}", entity)
            }
            Key::EntityIndex => write!(f, "Entity Index"),
            Key::SupersededCheckpoint { checkpoint } => {
                write!(f, "Superseded Checkpoint {}", checkpoint)
            }
            Key::CheckpointBlockIds { checkpoint } => {
                write!(f, "Checkpoint Block Ids for checkpoint {}", checkpoint)
            }
            Key::CheckpointBlock { checkpoint } => {
                write!(f, "Checkpoint Block for checkpoint {}", checkpoint)
            }
            Key::CheckpointEntityUpdates { checkpoint } => {
                write!(f, "Checkpoint Entity Updates for checkpoint {}", checkpoint)
            }
        }
    }
}
