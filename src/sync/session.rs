/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The sync session state machine, which drives one pairwise synchronization with one peer:
//!
//! ```text
//! Idle → HeaderExchange → {FastForward | ShareOurs | Reconcile | InSync} → Idle
//! ```
//!
//! A session exchanges checkpoint headers for a bounded epoch window around the local current
//! epoch, finds the latest common-ancestor checkpoint by comparing both histories inside the
//! overlap, classifies the relationship, and drives the appropriate transfer:
//!
//! - **FastForward**: the peer is strictly ahead. Each missing checkpoint is requested,
//!   validated, and handed to the engine for application — in epoch order, each applied only
//!   after validation succeeds. The first failure halts the session with
//!   [`SyncError::InvalidCheckpoint`] and nothing from the failed checkpoint onwards is
//!   applied.
//! - **ShareOurs**: the peer is strictly behind. We announce our head; the peer fetches from
//!   our [sync server](super::server) at its own pace.
//! - **Reconcile**: both sides advanced past the common ancestor. The peer's suffix and blocks
//!   are fetched, sanity-checked, and handed to the engine, which runs the
//!   [reconciler](crate::reconcile).
//! - **InSync**: identical heads, nothing to do.
//!
//! Sessions validate and fetch on their own worker thread but never write: all application
//! goes through the single-writer engine. A session cancelled by timeout or shutdown before an
//! apply is acknowledged simply drops its fetched data — partially fetched, unvalidated data
//! is never admitted.

use std::fmt::Display;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use ed25519_dalek::VerifyingKey;

use crate::checkpoint::validator::ValidateError;
use crate::engine::{EngineError, EngineHandle};
use crate::networking::{recv_response_until, Network, SenderHandle};
use crate::store::{
    camera::StoreCamera,
    pluggables::{KVGet, KVStore},
    BlockStoreError,
};
use crate::types::{
    basic::{CryptoHash, EpochRange},
    block::Block,
    checkpoint::{Checkpoint, CheckpointHeader},
    merkle::MerkleTree,
};

use super::messages::{
    BlockRequest, CheckpointHeaderRequest, CheckpointRequest, SyncResponse,
};
use super::server::ledger_id;

/// The states of a sync session. A session value only exists between `Idle` states, so `Idle`
/// itself never appears on a live session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    HeaderExchange,
    FastForward,
    ShareOurs,
    Reconcile,
    InSync,
}

/// How a completed session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    FastForwarded { applied: u64 },
    SharedOurs,
    Reconciled,
    InSync,
}

#[derive(Debug)]
pub enum SyncError {
    /// The peer did not answer within the configured timeout.
    Timeout,
    /// No common-ancestor checkpoint exists within the header window. Requires operator
    /// intervention (the chains may not share a genesis); never retried automatically.
    NoCommonHistory,
    /// A fetched checkpoint failed validation. Nothing from it onwards was applied.
    InvalidCheckpoint { id: CryptoHash, source: ValidateError },
    /// A fetched checkpoint or block response contradicted itself (wrong identifier, block
    /// list not matching the block root).
    MalformedResponse,
    /// The engine rejected an apply.
    Engine(EngineError),
    /// The node is shutting down; fetched data was discarded.
    Cancelled,
    Store(BlockStoreError),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Timeout => write!(f, "peer did not respond before the deadline"),
            SyncError::NoCommonHistory => {
                write!(f, "no common ancestor checkpoint within the header window")
            }
            SyncError::InvalidCheckpoint { id, source } => {
                write!(f, "checkpoint {} failed validation: {}", id, source)
            }
            SyncError::MalformedResponse => write!(f, "peer sent a self-contradictory response"),
            SyncError::Engine(err) => write!(f, "{}", err),
            SyncError::Cancelled => write!(f, "session cancelled"),
            SyncError::Store(err) => write!(f, "{}", err),
        }
    }
}

impl From<BlockStoreError> for SyncError {
    fn from(err: BlockStoreError) -> Self {
        SyncError::Store(err)
    }
}

/// Immutable parameters that define the behaviour of a [SyncSession].
#[derive(Clone)]
pub(crate) struct SyncSessionConfiguration {
    /// How many epochs on each side of the local current epoch the header exchange covers.
    pub(crate) header_window: u64,
    pub(crate) request_timeout: Duration,
    pub(crate) block_request_limit: u32,
}

pub(crate) struct SyncSession<N: Network, K: KVStore> {
    config: SyncSessionConfiguration,
    camera: StoreCamera<K>,
    sender: SenderHandle<N>,
    responses: Receiver<SyncResponse>,
    engine: EngineHandle<K>,
}

impl<N: Network, K: KVStore> SyncSession<N, K> {
    pub(crate) fn new(
        config: SyncSessionConfiguration,
        camera: StoreCamera<K>,
        sender: SenderHandle<N>,
        responses: Receiver<SyncResponse>,
        engine: EngineHandle<K>,
    ) -> Self {
        Self {
            config,
            camera,
            sender,
            responses,
            engine,
        }
    }

    /// Drive a full sync with `peer`.
    pub(crate) fn sync_with(mut self, peer: VerifyingKey) -> Result<SyncOutcome, SyncError> {
        let (ancestor, their_headers) = self.header_exchange(peer)?;

        let our_head_id = {
            let snapshot = self.camera.snapshot();
            let our_head = snapshot
                .head_checkpoint()
                .map_err(BlockStoreError::KVGetError)?
                .ok_or(SyncError::Store(BlockStoreError::NotInitialized))?;
            our_head.id()
        };
        let their_head = their_headers
            .last()
            .cloned()
            .ok_or(SyncError::NoCommonHistory)?;

        match self.classify(&ancestor, &our_head_id, &their_head) {
            SyncPhase::InSync => Ok(SyncOutcome::InSync),
            SyncPhase::ShareOurs => self.share_ours(peer),
            SyncPhase::FastForward => self.fast_forward(peer, &their_headers, &ancestor),
            SyncPhase::Reconcile => self.reconcile(peer, &their_headers, &ancestor),
            SyncPhase::HeaderExchange => unreachable!("classification never yields HeaderExchange"),
        }
    }

    /// Exchange headers and find the latest common-ancestor checkpoint. Returns the ancestor's
    /// header and the peer's headers above the ancestor, ascending by epoch.
    fn header_exchange(
        &mut self,
        peer: VerifyingKey,
    ) -> Result<(CheckpointHeader, Vec<CheckpointHeader>), SyncError> {
        let (ledger, local_epoch) = {
            let snapshot = self.camera.snapshot();
            let ledger =
                ledger_id(&snapshot).ok_or(SyncError::Store(BlockStoreError::NotInitialized))?;
            let local_epoch = snapshot
                .current_epoch()
                .map_err(BlockStoreError::KVGetError)?
                .ok_or(SyncError::Store(BlockStoreError::NotInitialized))?;
            (ledger, local_epoch)
        };

        // The window reaches `header_window` epochs above the local epoch to cover the case
        // that the peer is ahead, and the same distance below to find an ancestor behind us.
        let epoch_range = EpochRange::new(
            local_epoch.saturating_sub(self.config.header_window),
            local_epoch + self.config.header_window,
        );
        self.sender.send(peer, CheckpointHeaderRequest {
            federation: ledger,
            epoch_range,
        });

        let mut their_headers = self.recv_headers()?;
        their_headers.sort_by_key(|header| header.epoch);

        // Walk both histories backward from the top of the overlap; the first epoch at which
        // the identifiers agree is the latest common ancestor.
        let snapshot = self.camera.snapshot();
        for their_header in their_headers.iter().rev() {
            if let Some(our_id) = snapshot
                .checkpoint_at_epoch(their_header.epoch)
                .map_err(BlockStoreError::KVGetError)?
            {
                if our_id == their_header.id {
                    let ancestor = their_header.clone();
                    let mut above: Vec<CheckpointHeader> = their_headers
                        .iter()
                        .filter(|header| header.epoch > ancestor.epoch)
                        .cloned()
                        .collect();
                    // A peer with nothing above the ancestor still reports a head: its own.
                    if above.is_empty() {
                        above.push(ancestor.clone());
                    }
                    return Ok((ancestor, above));
                }
            }
        }

        Err(SyncError::NoCommonHistory)
    }

    fn classify(
        &self,
        ancestor: &CheckpointHeader,
        our_head_id: &CryptoHash,
        their_head: &CheckpointHeader,
    ) -> SyncPhase {
        let we_advanced = *our_head_id != ancestor.id;
        let they_advanced = their_head.id != ancestor.id;
        match (we_advanced, they_advanced) {
            (false, false) => SyncPhase::InSync,
            (false, true) => SyncPhase::FastForward,
            (true, false) => SyncPhase::ShareOurs,
            (true, true) => SyncPhase::Reconcile,
        }
    }

    /// The peer is strictly ahead: request, validate, and apply each missing checkpoint in
    /// epoch order.
    fn fast_forward(
        &mut self,
        peer: VerifyingKey,
        their_headers: &[CheckpointHeader],
        ancestor: &CheckpointHeader,
    ) -> Result<SyncOutcome, SyncError> {
        let mut applied = 0u64;

        for header in their_headers.iter().filter(|h| h.epoch > ancestor.epoch) {
            let (checkpoint, block_ids) = self.fetch_checkpoint(peer, &header.id)?;
            let blocks = self.fetch_blocks(peer, &block_ids)?;

            // The engine re-validates chain linkage and quorum against its own head before
            // applying, so a concurrent head change cannot make us apply out of order.
            self.engine
                .apply_checkpoint(checkpoint, block_ids, blocks)
                .map_err(|err| match err {
                    EngineError::Shutdown => SyncError::Cancelled,
                    EngineError::Invalid { id, source } => {
                        SyncError::InvalidCheckpoint { id, source }
                    }
                    other => SyncError::Engine(other),
                })?;
            applied += 1;
        }

        Ok(SyncOutcome::FastForwarded { applied })
    }

    /// The peer is strictly behind: push our head announcement; the peer pulls checkpoint
    /// headers and blocks from our sync server.
    fn share_ours(&mut self, peer: VerifyingKey) -> Result<SyncOutcome, SyncError> {
        if let Some(announce) = self.engine.our_announce() {
            self.sender.send(peer, announce);
        }
        Ok(SyncOutcome::SharedOurs)
    }

    /// Both sides advanced past the ancestor with different checkpoints: fetch the peer's
    /// suffix and hand off to the reconciler (run by the engine).
    fn reconcile(
        &mut self,
        peer: VerifyingKey,
        their_headers: &[CheckpointHeader],
        ancestor: &CheckpointHeader,
    ) -> Result<SyncOutcome, SyncError> {
        let mut their_checkpoints: Vec<(Checkpoint, Vec<CryptoHash>)> = Vec::new();
        let mut their_blocks: Vec<Block> = Vec::new();

        for header in their_headers.iter().filter(|h| h.epoch > ancestor.epoch) {
            let (checkpoint, block_ids) = self.fetch_checkpoint(peer, &header.id)?;
            let mut blocks = self.fetch_blocks(peer, &block_ids)?;
            their_checkpoints.push((checkpoint, block_ids));
            their_blocks.append(&mut blocks);
        }

        self.engine
            .reconcile(ancestor.id, their_checkpoints, their_blocks)
            .map_err(|err| match err {
                EngineError::Shutdown => SyncError::Cancelled,
                other => SyncError::Engine(other),
            })?;

        Ok(SyncOutcome::Reconciled)
    }

    /// Fetch one checkpoint and its block-identifier list, checking that the peer's response
    /// is internally consistent: the checkpoint must hash to the requested identifier and the
    /// block list must hash to the checkpoint's own block root.
    fn fetch_checkpoint(
        &mut self,
        peer: VerifyingKey,
        id: &CryptoHash,
    ) -> Result<(Checkpoint, Vec<CryptoHash>), SyncError> {
        self.sender.send(peer, CheckpointRequest { id: *id });
        let (checkpoint, block_ids) = self.recv_checkpoint()?;
        let checkpoint = checkpoint.ok_or(SyncError::MalformedResponse)?;

        if checkpoint.id() != *id {
            return Err(SyncError::MalformedResponse);
        }
        if MerkleTree::build(&block_ids).root() != checkpoint.block_root {
            return Err(SyncError::MalformedResponse);
        }
        Ok((checkpoint, block_ids))
    }

    /// Fetch the given blocks in request-limit-sized chunks. Blocks we already hold locally
    /// are not requested again.
    fn fetch_blocks(
        &mut self,
        peer: VerifyingKey,
        ids: &[CryptoHash],
    ) -> Result<Vec<Block>, SyncError> {
        let missing: Vec<CryptoHash> = {
            let snapshot = self.camera.snapshot();
            ids.iter()
                .filter(|id| !matches!(snapshot.block_encoding(id), Ok(Some(_))))
                .copied()
                .collect()
        };

        let mut blocks = Vec::with_capacity(missing.len());
        for chunk in missing.chunks(self.config.block_request_limit.max(1) as usize) {
            self.sender.send(peer, BlockRequest {
                ids: chunk.to_vec(),
            });
            let mut received = self.recv_blocks()?;
            // Each block must actually be one we asked for; identifiers are recomputed on
            // admission, so content spoofing is caught there.
            received.retain(|block| chunk.contains(&block.id));
            if received.len() != chunk.len() {
                return Err(SyncError::Timeout);
            }
            blocks.append(&mut received);
        }
        Ok(blocks)
    }

    /* ↓↓↓ Response receipt, bounded by the request timeout ↓↓↓ */

    fn recv_headers(&mut self) -> Result<Vec<CheckpointHeader>, SyncError> {
        let deadline = Instant::now() + self.config.request_timeout;
        while let Some(response) = recv_response_until(&self.responses, deadline) {
            if let SyncResponse::CheckpointHeaderResponse(response) = response {
                return Ok(response.headers);
            }
        }
        Err(SyncError::Timeout)
    }

    fn recv_checkpoint(&mut self) -> Result<(Option<Checkpoint>, Vec<CryptoHash>), SyncError> {
        let deadline = Instant::now() + self.config.request_timeout;
        while let Some(response) = recv_response_until(&self.responses, deadline) {
            if let SyncResponse::CheckpointResponse(response) = response {
                return Ok((response.checkpoint, response.block_ids));
            }
        }
        Err(SyncError::Timeout)
    }

    fn recv_blocks(&mut self) -> Result<Vec<Block>, SyncError> {
        let deadline = Instant::now() + self.config.request_timeout;
        while let Some(response) = recv_response_until(&self.responses, deadline) {
            if let SyncResponse::BlockResponse(response) = response {
                return Ok(response.blocks);
            }
        }
        Err(SyncError::Timeout)
    }
}
