/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The engine thread: the single writer to the block store and checkpoint chain.
//!
//! Every mutation — block admission from collaborators, checkpoint building on the epoch
//! cadence, application of checkpoints fetched by sync sessions, reconciliation of divergent
//! histories — happens on this one thread, reached by message passing over an [EngineHandle].
//! This makes admission linearizable, checkpoint application strictly sequential by epoch, and
//! reconciliation free of cross-call state, with no locks on the write path at all.
//!
//! The engine stretches its checkpoint cadence while the [partition
//! monitor](crate::partition) suspects a partition, bounding divergence until healing.

use borsh::BorshSerialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crate::app::{ConflictArbiter, EntityKey, SignatureService, StateFolder, ValidatorSetSource};
use crate::checkpoint::builder::{build_checkpoint, fold_entities, state_tree, BuildError};
use crate::checkpoint::validator::{validate, ValidateError};
use crate::events::{
    BlockAdmittedEvent, BlockRejectedEvent, CheckpointBuiltEvent, CheckpointRejectedEvent,
    CheckpointValidatedEvent, ConflictDetectedEvent, Event, QuorumNotReachedEvent,
};
use crate::networking::{Network, SenderHandle};
use crate::partition::SharedPartitionState;
use crate::partition::{determine_winner, PartitionVerdict};
use crate::peers::registry::{IdentityProof, SharedRegistry};
use crate::reconcile::{reconcile, Branch, ConflictSeverity, ResolvedState};
use crate::store::{camera::StoreCamera, pluggables::{KVGet, KVStore}, BlockStore, BlockStoreError};
use crate::sync::messages::Announce;
use crate::trust::TrustLedger;
use crate::types::{
    basic::{CryptoHash, EncodingTag, FederationId, LinkName, Payload, Timestamp},
    block::{Block, BlockType, ParentLink, ParentList},
    checkpoint::{Checkpoint, CheckpointHeader},
    keypair::Keypair,
    merkle::MerkleTree,
    validator_set::ValidatorSet,
};

pub(crate) enum EngineCommand {
    Put {
        block: Block,
        reply: Sender<Result<CryptoHash, BlockStoreError>>,
    },
    Admit {
        block: Block,
        reply: Sender<Result<CryptoHash, BlockStoreError>>,
    },
    ApplyCheckpoint {
        checkpoint: Checkpoint,
        block_ids: Vec<CryptoHash>,
        blocks: Vec<Block>,
        reply: Sender<Result<(), EngineError>>,
    },
    Reconcile {
        ancestor: CryptoHash,
        their_checkpoints: Vec<(Checkpoint, Vec<CryptoHash>)>,
        their_blocks: Vec<Block>,
        reply: Sender<Result<ConflictSeverity, EngineError>>,
    },
    Build {
        reply: Sender<Result<CheckpointHeader, EngineError>>,
    },
}

#[derive(Debug)]
pub enum EngineError {
    /// The engine has shut down; the command was discarded.
    Shutdown,
    /// A checkpoint failed validation.
    Invalid { id: CryptoHash, source: ValidateError },
    /// Fewer than quorum signatures arrived before the build deadline.
    QuorumNotReached { got: usize, needed: usize },
    Store(BlockStoreError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Shutdown => write!(f, "engine has shut down"),
            EngineError::Invalid { id, source } => {
                write!(f, "checkpoint {} failed validation: {}", id, source)
            }
            EngineError::QuorumNotReached { got, needed } => {
                write!(f, "quorum not reached: {} of {} required signatures", got, needed)
            }
            EngineError::Store(err) => write!(f, "{}", err),
        }
    }
}

impl From<BlockStoreError> for EngineError {
    fn from(err: BlockStoreError) -> Self {
        EngineError::Store(err)
    }
}

/// A cloneable handle to the engine thread. Writes are forwarded as commands; reads go through
/// the embedded store camera without touching the engine at all.
pub(crate) struct EngineHandle<K: KVStore> {
    commands: Sender<EngineCommand>,
    camera: StoreCamera<K>,
    proof: IdentityProof,
}

impl<K: KVStore> Clone for EngineHandle<K> {
    fn clone(&self) -> Self {
        EngineHandle {
            commands: self.commands.clone(),
            camera: self.camera.clone(),
            proof: self.proof.clone(),
        }
    }
}

impl<K: KVStore> EngineHandle<K> {
    pub(crate) fn put(&self, block: Block) -> Result<CryptoHash, BlockStoreError> {
        let (reply, receiver) = mpsc::channel();
        if self.commands.send(EngineCommand::Put { block, reply }).is_err() {
            return Err(BlockStoreError::NotInitialized);
        }
        receiver.recv().unwrap_or(Err(BlockStoreError::NotInitialized))
    }

    pub(crate) fn admit(&self, block: Block) -> Result<CryptoHash, BlockStoreError> {
        let (reply, receiver) = mpsc::channel();
        if self.commands.send(EngineCommand::Admit { block, reply }).is_err() {
            return Err(BlockStoreError::NotInitialized);
        }
        receiver.recv().unwrap_or(Err(BlockStoreError::NotInitialized))
    }

    pub(crate) fn apply_checkpoint(
        &self,
        checkpoint: Checkpoint,
        block_ids: Vec<CryptoHash>,
        blocks: Vec<Block>,
    ) -> Result<(), EngineError> {
        let (reply, receiver) = mpsc::channel();
        self.commands
            .send(EngineCommand::ApplyCheckpoint {
                checkpoint,
                block_ids,
                blocks,
                reply,
            })
            .map_err(|_| EngineError::Shutdown)?;
        receiver.recv().map_err(|_| EngineError::Shutdown)?
    }

    pub(crate) fn reconcile(
        &self,
        ancestor: CryptoHash,
        their_checkpoints: Vec<(Checkpoint, Vec<CryptoHash>)>,
        their_blocks: Vec<Block>,
    ) -> Result<ConflictSeverity, EngineError> {
        let (reply, receiver) = mpsc::channel();
        self.commands
            .send(EngineCommand::Reconcile {
                ancestor,
                their_checkpoints,
                their_blocks,
                reply,
            })
            .map_err(|_| EngineError::Shutdown)?;
        receiver.recv().map_err(|_| EngineError::Shutdown)?
    }

    pub(crate) fn build_now(&self) -> Result<CheckpointHeader, EngineError> {
        let (reply, receiver) = mpsc::channel();
        self.commands
            .send(EngineCommand::Build { reply })
            .map_err(|_| EngineError::Shutdown)?;
        receiver.recv().map_err(|_| EngineError::Shutdown)?
    }

    /// The local federation's announcement of its current head, if the store is initialized.
    pub(crate) fn our_announce(&self) -> Option<Announce> {
        let head = self.camera.snapshot().head_checkpoint().ok().flatten()?;
        Some(Announce {
            proof: self.proof.clone(),
            head: head.header(),
        })
    }
}

/// Immutable parameters that define the behaviour of the [Engine].
pub(crate) struct EngineConfiguration {
    pub(crate) federation: FederationId,
    pub(crate) keypair: Keypair,
    pub(crate) epoch_interval: Duration,
    pub(crate) signature_deadline: Duration,
    pub(crate) deadline_extension: Duration,
    /// Factor by which the checkpoint cadence is stretched while a partition is suspected.
    pub(crate) partition_cadence_multiplier: u32,
}

pub(crate) struct Engine<K, N, F, S, V, A>
where
    K: KVStore,
    N: Network + 'static,
    F: StateFolder,
    S: SignatureService,
    V: ValidatorSetSource,
    A: ConflictArbiter,
{
    config: EngineConfiguration,
    store: BlockStore<K>,
    folder: F,
    signature_service: S,
    validator_source: V,
    arbiter: A,
    registry: SharedRegistry,
    trust: TrustLedger,
    partition_state: SharedPartitionState,
    sender: SenderHandle<N>,
    commands: Receiver<EngineCommand>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
    last_build: Instant,
    build_attempts: u32,
}

impl<K, N, F, S, V, A> Engine<K, N, F, S, V, A>
where
    K: KVStore,
    N: Network + 'static,
    F: StateFolder,
    S: SignatureService,
    V: ValidatorSetSource,
    A: ConflictArbiter,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: EngineConfiguration,
        store: BlockStore<K>,
        folder: F,
        signature_service: S,
        validator_source: V,
        arbiter: A,
        registry: SharedRegistry,
        trust: TrustLedger,
        partition_state: SharedPartitionState,
        network: N,
        commands: Receiver<EngineCommand>,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            store,
            folder,
            signature_service,
            validator_source,
            arbiter,
            registry,
            trust,
            partition_state,
            sender: SenderHandle::new(network),
            commands,
            shutdown_signal,
            event_publisher,
            last_build: Instant::now(),
            build_attempts: 0,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Engine thread disconnected from main thread")
                }
            }

            loop {
                match self.commands.try_recv() {
                    Ok(command) => self.handle(command),
                    Err(TryRecvError::Empty) => break,
                    // All handles dropped: the node is tearing down.
                    Err(TryRecvError::Disconnected) => return,
                }
            }

            if Instant::now() - self.last_build >= self.build_interval() {
                self.periodic_build();
                self.last_build = Instant::now();
            }

            thread::yield_now();
        })
    }

    fn build_interval(&self) -> Duration {
        let suspected = self.partition_state.lock().unwrap().suspected;
        if suspected {
            self.config.epoch_interval * self.config.partition_cadence_multiplier.max(1)
        } else {
            self.config.epoch_interval
        }
    }

    fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Put { block, reply } => {
                let result = self.store.put(&block);
                if let Err(err) = &result {
                    self.publish_block_rejected(block.id, err.to_string());
                }
                let _ = reply.send(result);
            }
            EngineCommand::Admit { block, reply } => {
                let block_type = block.block_type;
                let result = self.store.admit(&block);
                match &result {
                    Ok(id) => self.publish_block_admitted(*id, block_type),
                    Err(err) => self.publish_block_rejected(block.id, err.to_string()),
                }
                let _ = reply.send(result);
            }
            EngineCommand::ApplyCheckpoint {
                checkpoint,
                block_ids,
                blocks,
                reply,
            } => {
                let _ = reply.send(self.apply_external(checkpoint, &block_ids, &blocks));
            }
            EngineCommand::Reconcile {
                ancestor,
                their_checkpoints,
                their_blocks,
                reply,
            } => {
                let _ = reply.send(self.handle_reconcile(ancestor, their_checkpoints, their_blocks));
            }
            EngineCommand::Build { reply } => {
                let _ = reply.send(self.build(true));
            }
        }
    }

    /* ↓↓↓ Checkpoint building ↓↓↓ */

    fn periodic_build(&mut self) {
        // An epoch with nothing admitted produces no checkpoint; an explicit Build command
        // (via the node handle) can still force an empty one.
        match self.store.pending_blocks() {
            Ok(pending) if pending.is_empty() => return,
            Err(err) => {
                log::warn!("skipping checkpoint build: {}", err);
                return;
            }
            _ => (),
        }
        if let Err(err) = self.build(false) {
            log::warn!("checkpoint build failed: {}", err);
        }
    }

    fn build(&mut self, forced: bool) -> Result<CheckpointHeader, EngineError> {
        let head = self.store.head_checkpoint()?;
        let next_validator_set = self.validator_source.validator_set(head.epoch + 1);
        let excluded = self.registry.lock().unwrap().excluded_validators();
        let deadline = Instant::now()
            + self.config.signature_deadline
            + self.config.deadline_extension * self.build_attempts;

        match build_checkpoint(
            &self.store,
            &self.folder,
            &mut self.signature_service,
            self.config.federation,
            &next_validator_set,
            &excluded,
            deadline,
        ) {
            Ok(build) => {
                self.build_attempts = 0;
                let header = build.checkpoint.header();
                self.store
                    .apply_checkpoint(&build.checkpoint, &build.block_ids, &build.entity_updates)?;
                self.admit_wrapper(&build.checkpoint)?;

                Event::publish(
                    &self.event_publisher,
                    Event::CheckpointBuilt(CheckpointBuiltEvent {
                        timestamp: SystemTime::now(),
                        checkpoint: header.clone(),
                    }),
                );
                self.sender.broadcast(Announce {
                    proof: IdentityProof::create(&self.config.keypair.0),
                    head: header.clone(),
                });
                Ok(header)
            }
            Err(BuildError::QuorumNotReached { got, needed }) => {
                // Not fatal to the node, only to this attempt: the next tick retries the
                // epoch with an extended deadline.
                self.build_attempts += 1;
                Event::publish(
                    &self.event_publisher,
                    Event::QuorumNotReached(QuorumNotReachedEvent {
                        timestamp: SystemTime::now(),
                        epoch: head.epoch + 1,
                        got,
                        needed,
                    }),
                );
                if forced {
                    log::warn!(
                        "forced checkpoint build fell short of quorum ({} of {})",
                        got,
                        needed
                    );
                }
                Err(EngineError::QuorumNotReached { got, needed })
            }
            Err(BuildError::NoValidatorSet) => Err(EngineError::Invalid {
                id: head.id(),
                source: ValidateError::MalformedValidatorSet,
            }),
            Err(BuildError::Store(err)) => Err(EngineError::Store(err)),
        }
    }

    /* ↓↓↓ Applying checkpoints received from peers ↓↓↓ */

    /// Validate and apply one checkpoint fetched by a sync session. Validation happens against
    /// the engine's own head at apply time, so checkpoints can never be applied out of order
    /// no matter how sessions interleave.
    fn apply_external(
        &mut self,
        checkpoint: Checkpoint,
        block_ids: &[CryptoHash],
        blocks: &[Block],
    ) -> Result<(), EngineError> {
        let id = checkpoint.id();
        let head = self.store.head_checkpoint()?;
        let validator_set = match ValidatorSet::try_from(&head.validator_set) {
            Ok(set) => set,
            Err(_) => {
                return Err(self.reject(id, ValidateError::MalformedValidatorSet));
            }
        };
        let excluded = self.registry.lock().unwrap().excluded_validators();

        if let Err(source) = validate(&checkpoint, &head.id(), &validator_set, &excluded) {
            return Err(self.reject(id, source));
        }

        let computed_block_root = MerkleTree::build(&block_ids.to_vec()).root();
        if computed_block_root != checkpoint.block_root {
            return Err(self.reject(
                id,
                ValidateError::BlockRootMismatch {
                    expected: checkpoint.block_root,
                    computed: computed_block_root,
                },
            ));
        }

        // Assemble the epoch's blocks in canonical order before touching any state.
        let provided: HashMap<CryptoHash, &Block> =
            blocks.iter().map(|block| (block.id, block)).collect();
        let mut ordered: Vec<Block> = Vec::with_capacity(block_ids.len());
        for block_id in block_ids {
            match provided.get(block_id) {
                Some(block) => ordered.push((*block).clone()),
                None => ordered.push(self.store.get(block_id)?),
            }
        }

        // Fold locally and require byte-identical state before admitting anything.
        let entity_updates = fold_entities(&self.store, &self.folder, &ordered)?;
        let (tree, _) = state_tree(&self.store, &entity_updates)?;
        if tree.root() != checkpoint.state_root {
            return Err(self.reject(
                id,
                ValidateError::StateRootMismatch {
                    expected: checkpoint.state_root,
                    computed: tree.root(),
                },
            ));
        }

        for block in &ordered {
            if !self.store.is_admitted(&block.id) {
                let block_type = block.block_type;
                match self.store.admit(block) {
                    Ok(admitted) => self.publish_block_admitted(admitted, block_type),
                    Err(err) => {
                        self.publish_block_rejected(block.id, err.to_string());
                        return Err(EngineError::Store(err));
                    }
                }
            }
        }

        let epoch = checkpoint.epoch;
        self.store
            .apply_checkpoint(&checkpoint, block_ids, &entity_updates)?;
        self.admit_wrapper(&checkpoint)?;

        Event::publish(
            &self.event_publisher,
            Event::CheckpointValidated(CheckpointValidatedEvent {
                timestamp: SystemTime::now(),
                checkpoint: id,
                epoch,
            }),
        );
        Ok(())
    }

    fn reject(&self, id: CryptoHash, source: ValidateError) -> EngineError {
        Event::publish(
            &self.event_publisher,
            Event::CheckpointRejected(CheckpointRejectedEvent {
                timestamp: SystemTime::now(),
                checkpoint: id,
                reason: source.to_string(),
            }),
        );
        EngineError::Invalid { id, source }
    }

    /// Record the checkpoint in the DAG as a `BlockType::Checkpoint` block linking back to the
    /// previous checkpoint's wrapper.
    fn admit_wrapper(&mut self, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        let checkpoint_id = checkpoint.id();
        let parents = match self.store.checkpoint_block(&checkpoint.previous)? {
            Some(previous) => ParentList::new(vec![ParentLink::new(
                LinkName::new("previous".to_string()),
                previous,
                None,
            )]),
            None => ParentList::default(),
        };
        let mut wrapper = Block::new(
            EncodingTag::BORSH,
            Payload::new(checkpoint.try_to_vec().unwrap()),
            parents,
            BlockType::Checkpoint,
            Timestamp::now(),
        );
        wrapper.sign(&self.config.keypair.0);
        self.store.admit_checkpoint_wrapper(&wrapper, &checkpoint_id)?;
        Ok(())
    }

    /* ↓↓↓ Reconciliation ↓↓↓ */

    fn handle_reconcile(
        &mut self,
        ancestor_id: CryptoHash,
        their_checkpoints: Vec<(Checkpoint, Vec<CryptoHash>)>,
        their_blocks: Vec<Block>,
    ) -> Result<ConflictSeverity, EngineError> {
        let ancestor = self
            .store
            .checkpoint(&ancestor_id)?
            .ok_or(BlockStoreError::NotFound { id: ancestor_id })?;

        // Assemble our branch: checkpointed blocks past the ancestor plus the still-pending
        // ones.
        let our_checkpoints = self.store.chain_suffix(&ancestor_id)?;
        let mut our_blocks: Vec<Block> = Vec::new();
        for checkpoint in &our_checkpoints {
            if let Some(ids) = self.store.checkpoint_block_ids(&checkpoint.id())? {
                for block_id in ids {
                    our_blocks.push(self.store.get(&block_id)?);
                }
            }
        }
        our_blocks.append(&mut self.store.pending_blocks()?);

        let ours = Branch {
            checkpoints: our_checkpoints,
            blocks: our_blocks,
        };
        let theirs = Branch {
            checkpoints: their_checkpoints.iter().map(|(c, _)| c.clone()).collect(),
            blocks: their_blocks.clone(),
        };

        // A divergence discovered right after a partition heals is decided by the snapshot
        // comparison first; only an exact tie falls through to the merge path.
        if let Some(their_head) = theirs.head() {
            let verdict = {
                let state = self.partition_state.lock().unwrap();
                match (&state.our_snapshot, state.peer_snapshot_for_head(&their_head.id())) {
                    (Some(ours_snapshot), Some(theirs_snapshot)) => {
                        Some(determine_winner(ours_snapshot, theirs_snapshot))
                    }
                    _ => None,
                }
            };
            match verdict {
                Some(PartitionVerdict::Us) => return Ok(ConflictSeverity::None),
                Some(PartitionVerdict::Them) => {
                    self.adopt_branch(&ancestor_id, &their_checkpoints, &their_blocks, true)?;
                    return Ok(ConflictSeverity::None);
                }
                Some(PartitionVerdict::Merge) | None => (),
            }
        }

        // Ancestor-time state for every entity either side touches.
        let mut ancestor_states: BTreeMap<EntityKey, Vec<u8>> = BTreeMap::new();
        for block in ours.blocks.iter().chain(theirs.blocks.iter()) {
            for entity in self.folder.entities(block) {
                if !ancestor_states.contains_key(&entity) {
                    if let Some(state) = self.store.entity_state_at(&ancestor_id, &entity)? {
                        ancestor_states.insert(entity, state);
                    }
                }
            }
        }

        let excluded = self.registry.lock().unwrap().excluded_validators();
        let outcome = reconcile(
            &self.folder,
            &ancestor,
            &ours,
            &theirs,
            &ancestor_states,
            &excluded,
        );

        if !outcome.conflicts.is_empty() || outcome.severity == ConflictSeverity::Critical {
            Event::publish(
                &self.event_publisher,
                Event::ConflictDetected(ConflictDetectedEvent {
                    timestamp: SystemTime::now(),
                    severity: outcome.severity,
                    conflicts: outcome.conflicts.len() as u64,
                }),
            );
        }

        match outcome.resolved {
            ResolvedState::Merged(merged) => {
                let excluded_blocks: HashSet<CryptoHash> =
                    merged.excluded.iter().copied().collect();
                let our_head_id = self.store.head_checkpoint()?.id();

                if merged.canonical_head != our_head_id {
                    // The peer's branch is canonical: discard ours, requeueing our blocks so
                    // the next checkpoint re-commits them on top of the adopted chain.
                    self.adopt_branch(&ancestor_id, &their_checkpoints, &their_blocks, true)?;
                } else {
                    // Our branch is canonical: take the peer's blocks in, queueing the ones
                    // whose effect still needs committing. Losing-side updates to shared
                    // entities are stored for audit but never folded.
                    let provided: HashMap<CryptoHash, &Block> =
                        their_blocks.iter().map(|block| (block.id, block)).collect();
                    for block_id in &merged.blocks {
                        if self.store.is_admitted(block_id) {
                            continue;
                        }
                        if let Some(block) = provided.get(block_id) {
                            let block_type = block.block_type;
                            if excluded_blocks.contains(block_id) {
                                self.store.admit_covered(block)?;
                            } else {
                                self.store.admit(block)?;
                            }
                            self.publish_block_admitted(*block_id, block_type);
                        }
                    }
                }

                // Whichever side's suffix was discarded, its updates to shared entities never
                // re-enter the pending list.
                self.store.remove_from_pending(&excluded_blocks)?;
                Ok(outcome.severity)
            }
            ResolvedState::PendingExternalDecision { ours, theirs } => {
                // Governance decides; we only act when the vote lands on the other branch.
                if let Some(choice) = self.arbiter.decide(&ours, &theirs) {
                    if choice == theirs.id {
                        self.adopt_branch(&ancestor_id, &their_checkpoints, &their_blocks, true)?;
                    }
                }
                Ok(ConflictSeverity::Major)
            }
            ResolvedState::Equivocation(faults) => {
                for fault in faults {
                    self.trust.record_equivocation(fault.offender, fault.epoch);
                }
                Ok(ConflictSeverity::Critical)
            }
        }
    }

    /// Discard our divergent suffix and adopt the peer's: roll back to the ancestor (requeueing
    /// our blocks so they are re-committed under the adopted chain) and apply the peer's
    /// checkpoints sequentially.
    fn adopt_branch(
        &mut self,
        ancestor_id: &CryptoHash,
        their_checkpoints: &[(Checkpoint, Vec<CryptoHash>)],
        their_blocks: &[Block],
        requeue: bool,
    ) -> Result<(), EngineError> {
        self.store.rollback_to(ancestor_id, requeue)?;
        for (checkpoint, block_ids) in their_checkpoints {
            self.apply_external(checkpoint.clone(), block_ids, their_blocks)?;
        }
        Ok(())
    }

    /* ↓↓↓ Event plumbing ↓↓↓ */

    fn publish_block_admitted(&self, block: CryptoHash, block_type: BlockType) {
        Event::publish(
            &self.event_publisher,
            Event::BlockAdmitted(BlockAdmittedEvent {
                timestamp: SystemTime::now(),
                block,
                block_type,
            }),
        );
    }

    fn publish_block_rejected(&self, block: CryptoHash, reason: String) {
        Event::publish(
            &self.event_publisher,
            Event::BlockRejected(BlockRejectedEvent {
                timestamp: SystemTime::now(),
                block,
                reason,
            }),
        );
    }
}

/// Create the command channel and handle for a new engine.
pub(crate) fn engine_channel<K: KVStore>(
    kv_store: K,
    keypair: &Keypair,
) -> (Receiver<EngineCommand>, EngineHandle<K>) {
    let (sender, receiver) = mpsc::channel();
    let handle = EngineHandle {
        commands: sender,
        camera: StoreCamera::new(kv_store),
        proof: IdentityProof::create(&keypair.0),
    };
    (receiver, handle)
}
