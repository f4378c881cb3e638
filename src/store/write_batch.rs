/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/
//! The [WriteBatch] trait implemented by the user's key-value store, and
//! [BlockStoreWriteBatch], which abstracts the forming of keys over it.

use borsh::BorshSerialize;

use crate::app::EntityKey;
use crate::types::{
    basic::{CryptoHash, Epoch},
    block::Block,
    checkpoint::Checkpoint,
};

use super::paths;
use super::paths::combine;
use super::pluggables::Key;

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// A write batch with typed setters for every block store variable. Wraps the user's
/// [WriteBatch]; the wrapped batch is what ultimately gets written, atomically, by
/// [`KVStore::write`](super::pluggables::KVStore::write).
pub struct BlockStoreWriteBatch<W: WriteBatch>(pub(super) W);

impl<W: WriteBatch> BlockStoreWriteBatch<W> {
    pub(crate) fn new() -> BlockStoreWriteBatch<W> {
        BlockStoreWriteBatch(W::new())
    }

    /* ↓↓↓ Block ↓↓↓ */

    pub fn set_block(&mut self, block: &Block) -> Result<(), KVSetError> {
        let block_prefix = combine(&paths::BLOCKS, &block.id.bytes());

        self.set_serialized(
            &combine(&block_prefix, &paths::BLOCK_ENCODING),
            &block.encoding,
            Key::BlockEncoding { block: block.id },
        )?;
        self.set_serialized(
            &combine(&block_prefix, &paths::BLOCK_PAYLOAD),
            &block.payload,
            Key::BlockPayload { block: block.id },
        )?;
        self.set_serialized(
            &combine(&block_prefix, &paths::BLOCK_PARENTS),
            &block.parents,
            Key::BlockParents { block: block.id },
        )?;
        self.set_serialized(
            &combine(&block_prefix, &paths::BLOCK_TYPE),
            &block.block_type,
            Key::BlockType { block: block.id },
        )?;
        self.set_serialized(
            &combine(&block_prefix, &paths::BLOCK_TIMESTAMP),
            &block.timestamp,
            Key::BlockTimestamp { block: block.id },
        )?;
        self.set_serialized(
            &combine(&block_prefix, &paths::BLOCK_SIGNATURES),
            &block.signatures,
            Key::BlockSignatures { block: block.id },
        )?;

        Ok(())
    }

    pub fn set_block_admitted(&mut self, block: &CryptoHash) {
        self.0.set(
            &combine(&paths::BLOCK_ADMITTED, &block.bytes()),
            &[1u8],
        );
    }

    /* ↓↓↓ Pending epoch blocks ↓↓↓ */

    pub fn set_pending_epoch_blocks(&mut self, blocks: &Vec<CryptoHash>) -> Result<(), KVSetError> {
        self.set_serialized(&paths::PENDING_EPOCH_BLOCKS, blocks, Key::PendingEpochBlocks)
    }

    /* ↓↓↓ Checkpoints ↓↓↓ */

    pub fn set_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), KVSetError> {
        let id = checkpoint.id();
        self.set_serialized(
            &combine(&paths::CHECKPOINTS, &id.bytes()),
            checkpoint,
            Key::Checkpoint { checkpoint: id },
        )
    }

    pub fn set_checkpoint_at_epoch(
        &mut self,
        epoch: Epoch,
        checkpoint: &CryptoHash,
    ) -> Result<(), KVSetError> {
        self.set_serialized(
            &combine(&paths::CHECKPOINT_AT_EPOCH, &epoch.to_le_bytes()),
            checkpoint,
            Key::CheckpointAtEpoch { epoch },
        )
    }

    pub fn delete_checkpoint_at_epoch(&mut self, epoch: Epoch) {
        self.0
            .delete(&combine(&paths::CHECKPOINT_AT_EPOCH, &epoch.to_le_bytes()));
    }

    pub fn set_head_checkpoint(&mut self, checkpoint: &CryptoHash) -> Result<(), KVSetError> {
        self.set_serialized(&paths::HEAD_CHECKPOINT, checkpoint, Key::HeadCheckpoint)
    }

    pub fn set_current_epoch(&mut self, epoch: Epoch) -> Result<(), KVSetError> {
        self.set_serialized(&paths::CURRENT_EPOCH, &epoch, Key::CurrentEpoch)
    }

    pub fn set_checkpoint_superseded(&mut self, checkpoint: &CryptoHash) {
        self.0.set(
            &combine(&paths::SUPERSEDED_CHECKPOINTS, &checkpoint.bytes()),
            &[1u8],
        );
    }

    pub fn set_checkpoint_block_ids(
        &mut self,
        checkpoint: &CryptoHash,
        block_ids: &Vec<CryptoHash>,
    ) -> Result<(), KVSetError> {
        self.set_serialized(
            &combine(&paths::CHECKPOINT_BLOCK_IDS, &checkpoint.bytes()),
            block_ids,
            Key::CheckpointBlockIds {
                checkpoint: *checkpoint,
            },
        )
    }

    pub fn set_checkpoint_block(
        &mut self,
        checkpoint: &CryptoHash,
        block: &CryptoHash,
    ) -> Result<(), KVSetError> {
        self.set_serialized(
            &combine(&paths::CHECKPOINT_BLOCK, &checkpoint.bytes()),
            block,
            Key::CheckpointBlock {
                checkpoint: *checkpoint,
            },
        )
    }

    pub fn set_checkpoint_entity_updates(
        &mut self,
        checkpoint: &CryptoHash,
        entity_updates: &std::collections::BTreeMap<EntityKey, Vec<u8>>,
    ) -> Result<(), KVSetError> {
        self.set_serialized(
            &combine(&paths::CHECKPOINT_ENTITY_UPDATES, &checkpoint.bytes()),
            entity_updates,
            Key::CheckpointEntityUpdates {
                checkpoint: *checkpoint,
            },
        )
    }

    /* ↓↓↓ Committed entity state ↓↓↓ */

    pub fn set_committed_entity_state(
        &mut self,
        entity: &EntityKey,
        state: &[u8],
    ) -> Result<(), KVSetError> {
        let entity_bytes = entity.try_to_vec().map_err(|err| KVSetError::SerializeValueError {
            key: Key::CommittedEntityState {
                entity: entity.clone(),
            },
            source: err,
        })?;
        self.0
            .set(&combine(&paths::COMMITTED_ENTITY_STATE, &entity_bytes), state);
        Ok(())
    }

    pub fn delete_committed_entity_state(&mut self, entity: &EntityKey) -> Result<(), KVSetError> {
        let entity_bytes = entity.try_to_vec().map_err(|err| KVSetError::SerializeValueError {
            key: Key::CommittedEntityState {
                entity: entity.clone(),
            },
            source: err,
        })?;
        self.0
            .delete(&combine(&paths::COMMITTED_ENTITY_STATE, &entity_bytes));
        Ok(())
    }

    pub fn set_entity_index(&mut self, entities: &Vec<EntityKey>) -> Result<(), KVSetError> {
        self.set_serialized(&paths::ENTITY_INDEX, entities, Key::EntityIndex)
    }

    fn set_serialized<T: BorshSerialize>(
        &mut self,
        key_bytes: &[u8],
        value: &T,
        key: Key,
    ) -> Result<(), KVSetError> {
        self.0.set(
            key_bytes,
            &value
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError { key, source: err })?,
        );
        Ok(())
    }
}

#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError { key: Key, source: std::io::Error },
}

impl std::fmt::Display for KVSetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KVSetError::SerializeValueError { key, source } => {
                write!(f, "failed to serialize value for {}: {}", key, source)
            }
        }
    }
}
