/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The content-addressed block store and the causal validator that gates admission into it.
//!
//! The store holds two kinds of records: immutable [blocks](crate::types::block::Block), keyed
//! by content identifier, and the [checkpoint](crate::types::checkpoint::Checkpoint) chain
//! built over them. Admission is append-only: there is no update or delete operation on this
//! interface. A block is *admitted* (as opposed to merely *put*) once every one of its parent
//! links refers to a previously admitted block; only admitted blocks are folded into
//! checkpoints.
//!
//! The store is single-writer: all mutation goes through the [engine](crate::engine) thread.
//! Concurrent readers (the sync server, user queries) go through a [StoreCamera] snapshot.

pub mod camera;

pub mod paths;

pub mod pluggables;

pub mod write_batch;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;

use crate::app::EntityKey;
use crate::types::{
    basic::{CryptoHash, Epoch, Timestamp},
    block::Block,
    checkpoint::Checkpoint,
};

pub use camera::{StoreCamera, StoreSnapshot};
use pluggables::{KVGet, KVGetError, KVStore};
use write_batch::{BlockStoreWriteBatch, KVSetError};

/// The writer's handle to the block store. Exactly one `BlockStore` exists per node, owned by
/// the engine thread; everything else reads through a [StoreCamera].
pub struct BlockStore<K: KVStore>(K);

impl<K: KVStore> BlockStore<K> {
    pub fn new(kv_store: K) -> BlockStore<K> {
        BlockStore(kv_store)
    }

    /// Write the genesis checkpoint and the initial chain variables. A no-op if the store has
    /// already been initialized.
    pub fn initialize(&mut self, genesis: &Checkpoint) -> Result<(), BlockStoreError> {
        if self.0.head_checkpoint_id()?.is_some() {
            return Ok(());
        }

        let genesis_id = genesis.id();
        let mut wb = BlockStoreWriteBatch::<K::WriteBatch>::new();
        wb.set_checkpoint(genesis)?;
        wb.set_checkpoint_at_epoch(genesis.epoch, &genesis_id)?;
        wb.set_checkpoint_block_ids(&genesis_id, &Vec::new())?;
        wb.set_head_checkpoint(&genesis_id)?;
        wb.set_current_epoch(genesis.epoch)?;
        wb.set_pending_epoch_blocks(&Vec::new())?;
        self.0.write(wb.0);
        Ok(())
    }

    /// Store `block` without admitting it.
    ///
    /// Fails with `MalformedBlock` if the block's identifier does not match the hash of its
    /// contents, and with `SignatureInvalid` if a signature fails verification or a required
    /// signature is missing. Putting a block that is already stored is a no-op (identical
    /// content hashes to an identical identifier, so duplicate puts are idempotent).
    pub fn put(&mut self, block: &Block) -> Result<CryptoHash, BlockStoreError> {
        self.check_block(block)?;

        if self.0.block_encoding(&block.id)?.is_none() {
            let mut wb = BlockStoreWriteBatch::<K::WriteBatch>::new();
            wb.set_block(block)?;
            self.0.write(wb.0);
        }
        Ok(block.id)
    }

    /// Get a stored block. Fails with `NotFound` if the block is absent locally; the caller
    /// must fall back to fetching it from a peer through a sync session.
    pub fn get(&self, id: &CryptoHash) -> Result<Block, BlockStoreError> {
        self.0
            .block(id)?
            .ok_or(BlockStoreError::NotFound { id: *id })
    }

    pub fn contains(&self, id: &CryptoHash) -> bool {
        matches!(self.0.block_encoding(id), Ok(Some(_)))
    }

    pub fn is_admitted(&self, id: &CryptoHash) -> bool {
        self.0.block_is_admitted(id)
    }

    /// Admit `block`: store it, require every parent link to refer to an already admitted
    /// block (`MissingParent` otherwise), mark it admitted, and queue it for inclusion in the
    /// next checkpoint. Admitting an already admitted block is a no-op.
    pub fn admit(&mut self, block: &Block) -> Result<CryptoHash, BlockStoreError> {
        self.check_block(block)?;

        if self.0.block_is_admitted(&block.id) {
            return Ok(block.id);
        }

        for parent in block.parents.iter() {
            if !self.0.block_is_admitted(&parent.id) {
                return Err(BlockStoreError::MissingParent {
                    id: block.id,
                    parent: parent.id,
                });
            }
        }

        let mut pending = self.0.pending_epoch_blocks()?;
        pending.push(block.id);

        let mut wb = BlockStoreWriteBatch::<K::WriteBatch>::new();
        wb.set_block(block)?;
        wb.set_block_admitted(&block.id);
        wb.set_pending_epoch_blocks(&pending)?;
        self.0.write(wb.0);
        Ok(block.id)
    }

    /// Admit `block` outside the pending-epoch list. Used for blocks whose effect is already
    /// accounted for elsewhere: checkpoint wrappers, and peer blocks incorporated through a
    /// reconciliation merge (whose folds arrive via the merged entity state, not a future
    /// checkpoint of ours).
    pub(crate) fn admit_covered(&mut self, block: &Block) -> Result<CryptoHash, BlockStoreError> {
        self.check_block(block)?;

        if self.0.block_is_admitted(&block.id) {
            return Ok(block.id);
        }

        for parent in block.parents.iter() {
            if !self.0.block_is_admitted(&parent.id) {
                return Err(BlockStoreError::MissingParent {
                    id: block.id,
                    parent: parent.id,
                });
            }
        }

        let mut wb = BlockStoreWriteBatch::<K::WriteBatch>::new();
        wb.set_block(block)?;
        wb.set_block_admitted(&block.id);
        self.0.write(wb.0);
        Ok(block.id)
    }

    /// Admit the wrapper block that carries a checkpoint's encoding in the DAG. Wrapper blocks
    /// are admitted outside the pending-epoch list: they record the checkpoint itself and must
    /// not be folded into the next checkpoint's block root.
    pub(crate) fn admit_checkpoint_wrapper(
        &mut self,
        block: &Block,
        checkpoint_id: &CryptoHash,
    ) -> Result<CryptoHash, BlockStoreError> {
        self.check_block(block)?;

        let mut wb = BlockStoreWriteBatch::<K::WriteBatch>::new();
        wb.set_block(block)?;
        wb.set_block_admitted(&block.id);
        wb.set_checkpoint_block(checkpoint_id, &block.id)?;
        self.0.write(wb.0);
        Ok(block.id)
    }

    /// Drop the given identifiers from the pending-epoch list (their effect has been committed
    /// through a reconciliation resolution rather than a locally built checkpoint).
    pub(crate) fn remove_from_pending(
        &mut self,
        ids: &HashSet<CryptoHash>,
    ) -> Result<(), BlockStoreError> {
        let remaining: Vec<CryptoHash> = self
            .0
            .pending_epoch_blocks()?
            .into_iter()
            .filter(|id| !ids.contains(id))
            .collect();
        let mut wb = BlockStoreWriteBatch::<K::WriteBatch>::new();
        wb.set_pending_epoch_blocks(&remaining)?;
        self.0.write(wb.0);
        Ok(())
    }

    /// The blocks admitted since the last checkpoint, in admission order.
    pub fn pending_blocks(&self) -> Result<Vec<Block>, BlockStoreError> {
        let ids = self.0.pending_epoch_blocks()?;
        ids.iter().map(|id| self.get(id)).collect()
    }

    pub fn head_checkpoint(&self) -> Result<Checkpoint, BlockStoreError> {
        self.0
            .head_checkpoint()?
            .ok_or(BlockStoreError::NotInitialized)
    }

    pub fn current_epoch(&self) -> Result<Epoch, BlockStoreError> {
        self.0
            .current_epoch()?
            .ok_or(BlockStoreError::NotInitialized)
    }

    pub fn checkpoint(&self, id: &CryptoHash) -> Result<Option<Checkpoint>, BlockStoreError> {
        Ok(self.0.checkpoint(id)?)
    }

    pub fn checkpoint_at_epoch(&self, epoch: Epoch) -> Result<Option<CryptoHash>, BlockStoreError> {
        Ok(self.0.checkpoint_at_epoch(epoch)?)
    }

    pub fn checkpoint_block_ids(
        &self,
        id: &CryptoHash,
    ) -> Result<Option<Vec<CryptoHash>>, BlockStoreError> {
        Ok(self.0.checkpoint_block_ids(id)?)
    }

    pub fn entity_index(&self) -> Result<Vec<EntityKey>, BlockStoreError> {
        Ok(self.0.entity_index()?)
    }

    pub fn committed_entity_state(
        &self,
        entity: &EntityKey,
    ) -> Result<Option<Vec<u8>>, BlockStoreError> {
        Ok(self.0.committed_entity_state(entity)?)
    }

    /// The state of `entity` as of a historical checkpoint.
    pub fn entity_state_at(
        &self,
        checkpoint: &CryptoHash,
        entity: &EntityKey,
    ) -> Result<Option<Vec<u8>>, BlockStoreError> {
        Ok(self.0.entity_state_at(checkpoint, entity)?)
    }

    /// Advance the chain head to `checkpoint`.
    ///
    /// `block_ids` are the identifiers committed under the checkpoint's block root, in
    /// canonical (topological) order; `entity_updates` are the folded entity states the
    /// checkpoint's state root commits to. The checkpoint must extend the current head exactly
    /// (`ChainMismatch` otherwise): checkpoints are applied strictly sequentially by epoch,
    /// never out of order. Covered blocks leave the pending-epoch list; blocks admitted after
    /// the checkpoint's construction stay queued.
    pub fn apply_checkpoint(
        &mut self,
        checkpoint: &Checkpoint,
        block_ids: &[CryptoHash],
        entity_updates: &BTreeMap<EntityKey, Vec<u8>>,
    ) -> Result<CryptoHash, BlockStoreError> {
        let head = self.head_checkpoint()?;
        let head_id = head.id();
        if checkpoint.previous != head_id || checkpoint.epoch != head.epoch + 1 {
            return Err(BlockStoreError::ChainMismatch {
                expected: head_id,
                got: checkpoint.previous,
            });
        }

        let checkpoint_id = checkpoint.id();
        let covered: HashSet<CryptoHash> = block_ids.iter().copied().collect();
        let remaining: Vec<CryptoHash> = self
            .0
            .pending_epoch_blocks()?
            .into_iter()
            .filter(|id| !covered.contains(id))
            .collect();

        let mut wb = BlockStoreWriteBatch::<K::WriteBatch>::new();
        wb.set_checkpoint(checkpoint)?;
        wb.set_checkpoint_at_epoch(checkpoint.epoch, &checkpoint_id)?;
        wb.set_checkpoint_block_ids(&checkpoint_id, &block_ids.to_vec())?;
        wb.set_checkpoint_entity_updates(&checkpoint_id, entity_updates)?;
        wb.set_head_checkpoint(&checkpoint_id)?;
        wb.set_current_epoch(checkpoint.epoch)?;
        wb.set_pending_epoch_blocks(&remaining)?;
        self.write_entity_updates(&mut wb, entity_updates)?;
        self.0.write(wb.0);
        Ok(checkpoint_id)
    }

    /// Roll the chain head back to `ancestor`, marking every checkpoint after it superseded.
    /// Superseded checkpoints remain stored for audit; their epoch-index entries are removed
    /// so the canonical chain no longer includes them.
    ///
    /// Committed entity state for every entity the superseded checkpoints touched is reset to
    /// its ancestor-time value, restoring the invariant that the committed state equals the
    /// head checkpoint's state.
    ///
    /// With `requeue` set, the blocks the superseded checkpoints covered return to the
    /// pending-epoch list, oldest epoch first, so they are re-committed under whichever chain
    /// is adopted next. A reconciliation merge passes `requeue: false` instead: there the
    /// blocks' effect arrives through the merged entity state, and re-committing them would
    /// fold them twice.
    pub fn rollback_to(&mut self, ancestor: &CryptoHash, requeue: bool) -> Result<(), BlockStoreError> {
        let ancestor_checkpoint = self
            .0
            .checkpoint(ancestor)?
            .ok_or(BlockStoreError::NotFound { id: *ancestor })?;

        // Walk head -> ancestor, collecting the superseded suffix.
        let mut superseded = Vec::new();
        let mut cursor = self.head_checkpoint()?;
        while cursor.id() != *ancestor {
            if cursor.is_genesis() {
                return Err(BlockStoreError::NotFound { id: *ancestor });
            }
            let previous = cursor.previous;
            superseded.push(cursor);
            cursor = self
                .0
                .checkpoint(&previous)?
                .ok_or(BlockStoreError::NotFound { id: previous })?;
        }

        let mut pending: Vec<CryptoHash> = Vec::new();
        if requeue {
            for checkpoint in superseded.iter().rev() {
                if let Some(mut ids) = self.0.checkpoint_block_ids(&checkpoint.id())? {
                    pending.append(&mut ids);
                }
            }
        }
        for id in self.0.pending_epoch_blocks()? {
            if !pending.contains(&id) {
                pending.push(id);
            }
        }

        let mut wb = BlockStoreWriteBatch::<K::WriteBatch>::new();
        for checkpoint in &superseded {
            wb.set_checkpoint_superseded(&checkpoint.id());
            wb.delete_checkpoint_at_epoch(checkpoint.epoch);
        }

        // Reset the committed state of every touched entity to its ancestor-time value.
        let mut touched: std::collections::BTreeSet<EntityKey> = std::collections::BTreeSet::new();
        for checkpoint in &superseded {
            if let Some(updates) = self.0.checkpoint_entity_updates(&checkpoint.id())? {
                touched.extend(updates.into_keys());
            }
        }
        for entity in &touched {
            match self.0.entity_state_at(ancestor, entity)? {
                Some(state) => wb.set_committed_entity_state(entity, &state)?,
                None => wb.delete_committed_entity_state(entity)?,
            }
        }

        wb.set_head_checkpoint(ancestor)?;
        wb.set_current_epoch(ancestor_checkpoint.epoch)?;
        wb.set_pending_epoch_blocks(&pending)?;
        self.0.write(wb.0);
        Ok(())
    }

    pub fn checkpoint_block(&self, id: &CryptoHash) -> Result<Option<CryptoHash>, BlockStoreError> {
        Ok(self.0.checkpoint_block(id)?)
    }

    /// The checkpoint suffix from the head back to (and excluding) `ancestor`, oldest first.
    pub fn chain_suffix(&self, ancestor: &CryptoHash) -> Result<Vec<Checkpoint>, BlockStoreError> {
        let mut suffix = Vec::new();
        let mut cursor = self.head_checkpoint()?;
        while cursor.id() != *ancestor {
            if cursor.is_genesis() {
                return Err(BlockStoreError::NotFound { id: *ancestor });
            }
            let previous = cursor.previous;
            suffix.push(cursor);
            cursor = self
                .0
                .checkpoint(&previous)?
                .ok_or(BlockStoreError::NotFound { id: previous })?;
        }
        suffix.reverse();
        Ok(suffix)
    }

    fn write_entity_updates(
        &self,
        wb: &mut BlockStoreWriteBatch<K::WriteBatch>,
        entity_updates: &BTreeMap<EntityKey, Vec<u8>>,
    ) -> Result<(), BlockStoreError> {
        if entity_updates.is_empty() {
            return Ok(());
        }
        let mut index = self.0.entity_index()?;
        for (entity, state) in entity_updates {
            wb.set_committed_entity_state(entity, state)?;
            if let Err(insert_pos) = index.binary_search(entity) {
                index.insert(insert_pos, entity.clone());
            }
        }
        wb.set_entity_index(&index)?;
        Ok(())
    }

    fn check_block(&self, block: &Block) -> Result<(), BlockStoreError> {
        if !block.id_is_correct() {
            return Err(BlockStoreError::MalformedBlock { id: block.id });
        }
        if !block.signatures_are_correct() {
            return Err(BlockStoreError::SignatureInvalid { id: block.id });
        }
        Ok(())
    }
}

/// Produce a replay-safe ordering of `blocks`: parents strictly precede children, with ties
/// broken by creation timestamp and then identifier, so the ordering is total and identical on
/// every node.
///
/// Only parent edges *within* the given set constrain the ordering; links to blocks outside
/// the set (already committed under an earlier checkpoint) are ignored. Fails with
/// `CycleDetected` if the input contains a cycle, which cannot occur for honestly produced
/// hash-linked blocks but must be rejected for untrusted input.
pub fn topological_order(blocks: Vec<Block>) -> Result<Vec<Block>, BlockStoreError> {
    let mut by_id: HashMap<CryptoHash, Block> = HashMap::new();
    for block in blocks {
        by_id.insert(block.id, block);
    }

    // indegree counts only parents inside the set; children maps parent -> dependents.
    let mut indegree: HashMap<CryptoHash, usize> = HashMap::new();
    let mut children: HashMap<CryptoHash, Vec<CryptoHash>> = HashMap::new();
    for (id, block) in &by_id {
        let in_set_parents = block
            .parents
            .iter()
            .filter(|parent| by_id.contains_key(&parent.id))
            .count();
        indegree.insert(*id, in_set_parents);
        for parent in block.parents.iter() {
            if by_id.contains_key(&parent.id) {
                children.entry(parent.id).or_default().push(*id);
            }
        }
    }

    let mut ready: BTreeMap<(Timestamp, CryptoHash), CryptoHash> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| ((by_id[id].timestamp, *id), *id))
        .collect();

    let mut ordered = Vec::with_capacity(by_id.len());
    while let Some((key, id)) = ready.iter().next().map(|(k, v)| (*k, *v)) {
        ready.remove(&key);
        if let Some(dependents) = children.get(&id) {
            for dependent in dependents.clone() {
                let degree = indegree.get_mut(&dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.insert((by_id[&dependent].timestamp, dependent), dependent);
                }
            }
        }
        ordered.push(by_id.remove(&id).unwrap());
    }

    if !by_id.is_empty() {
        return Err(BlockStoreError::CycleDetected);
    }
    Ok(ordered)
}

#[derive(Debug)]
pub enum BlockStoreError {
    /// The block's identifier does not match the hash of its contents.
    MalformedBlock { id: CryptoHash },
    /// A signature failed verification, or a signature required by the block's type is missing.
    SignatureInvalid { id: CryptoHash },
    /// The block is not stored locally.
    NotFound { id: CryptoHash },
    /// A parent link refers to a block that has not been admitted.
    MissingParent { id: CryptoHash, parent: CryptoHash },
    /// The input to [`topological_order`] contains a cycle.
    CycleDetected,
    /// The checkpoint being applied does not extend the current head.
    ChainMismatch { expected: CryptoHash, got: CryptoHash },
    /// The store has no genesis checkpoint yet.
    NotInitialized,
    KVGetError(KVGetError),
    KVSetError(KVSetError),
}

impl Display for BlockStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockStoreError::MalformedBlock { id } => {
                write!(f, "malformed block: identifier {} does not match contents", id)
            }
            BlockStoreError::SignatureInvalid { id } => {
                write!(f, "invalid or missing required signature on block {}", id)
            }
            BlockStoreError::NotFound { id } => write!(f, "not found: {}", id),
            BlockStoreError::MissingParent { id, parent } => {
                write!(f, "block {} links to unadmitted parent {}", id, parent)
            }
            BlockStoreError::CycleDetected => write!(f, "cycle detected in block set"),
            BlockStoreError::ChainMismatch { expected, got } => write!(
                f,
                "chain mismatch: expected previous checkpoint {}, got {}",
                expected, got
            ),
            BlockStoreError::NotInitialized => write!(f, "block store is not initialized"),
            BlockStoreError::KVGetError(err) => write!(f, "{}", err),
            BlockStoreError::KVSetError(err) => write!(f, "{}", err),
        }
    }
}

impl From<KVGetError> for BlockStoreError {
    fn from(err: KVGetError) -> Self {
        BlockStoreError::KVGetError(err)
    }
}

impl From<KVSetError> for BlockStoreError {
    fn from(err: KVSetError) -> Self {
        BlockStoreError::KVSetError(err)
    }
}
