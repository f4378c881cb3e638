/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and initialize the storage of a federation node.
//!
//! A node is one process participating in a federated ledger. It is uniquely identified by an
//! [Ed25519 keypair](ed25519_dalek::SigningKey); the SHA-256 digest of its verifying key is its
//! [federation identifier](crate::types::basic::FederationId).
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the node](NodeSpec) with:
//!   1. `NodeSpec::builder` to construct a `NodeSpecBuilder`,
//!   2. The setters of the `NodeSpecBuilder`, and
//!   3. The `NodeSpecBuilder::build` method to construct a [NodeSpec],
//! - The function to [start](NodeSpec::start) a [Node] given its specification,
//! - The function to [initialize](Node::initialize) the node's [block store](crate::store),
//! - [The type](Node) which keeps the node alive.
//!
//! ## Starting a node
//!
//! ```ignore
//! Node::initialize(kv_store.clone(), founder, &initial_validator_set);
//! let node = NodeSpec::builder()
//!     .folder(folder)
//!     .signature_service(signature_service)
//!     .validator_source(validator_source)
//!     .arbiter(arbiter)
//!     .network(network)
//!     .kv_store(kv_store)
//!     .configuration(configuration)
//!     .build()
//!     .start();
//! ```
//!
//! The node's [configuration](Configuration) can also be defined using the builder pattern:
//!
//! ```ignore
//! let configuration = Configuration::builder()
//!     .me(keypair)
//!     .epoch_interval(Duration::from_secs(60))
//!     .signature_deadline(Duration::from_secs(5))
//!     .deadline_extension(Duration::from_secs(5))
//!     .partition_cadence_multiplier(4)
//!     .header_window(16)
//!     .request_timeout(Duration::from_secs(5))
//!     .sync_request_limit(64)
//!     .max_concurrent_syncs(3)
//!     .sync_interval(Duration::from_secs(10))
//!     .min_sync_trust(0.1)
//!     .discovery_interval(Duration::from_secs(30))
//!     .monitor_interval(Duration::from_secs(5))
//!     .heal_alert_after(Duration::from_secs(600))
//!     .log_events(true)
//!     .build();
//! ```

use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use ed25519_dalek::{SigningKey, VerifyingKey};
use typed_builder::TypedBuilder;

use crate::app::{ConflictArbiter, SignatureService, StateFolder, ValidatorSetSource};
use crate::engine::{engine_channel, Engine, EngineConfiguration, EngineHandle};
pub use crate::engine::EngineError;
use crate::event_bus::*;
use crate::events::*;
use crate::networking::{start_polling, start_response_router, Network};
use crate::partition::{
    shared_state, PartitionMonitor, PartitionMonitorConfiguration, SharedPartitionState,
};
use crate::peers::directory::{PeerDirectory, PeerDirectoryConfiguration};
use crate::peers::registry::{shared, IdentityProof, PeerRegistry, SharedRegistry};
use crate::store::{
    camera::StoreCamera,
    pluggables::{KVGet, KVStore},
    BlockStore, BlockStoreError,
};
use crate::sync::manager::{SyncManager, SyncManagerConfiguration};
use crate::sync::server::{SyncServer, SyncServerConfiguration};
use crate::sync::session::SyncSessionConfiguration;
use crate::trust::TrustLedger;
use crate::types::{
    basic::{CryptoHash, Epoch, FederationId},
    block::Block,
    checkpoint::{Checkpoint, CheckpointHeader},
    keypair::Keypair,
    validator_set::ValidatorSet,
};

/// Stores the user-defined parameters required to start the node.
///
/// ## Epoch interval and partition cadence
///
/// A checkpoint is attempted every `epoch_interval` (provided any blocks were admitted since
/// the last one). While the partition monitor suspects a partition, the interval is stretched
/// by `partition_cadence_multiplier` to bound divergence until the partition heals.
///
/// ## Timeouts
///
/// Every network wait in the node — signature solicitation, sync responses, discovery — is
/// bounded by the corresponding configured duration, so a single unresponsive peer can never
/// stall a thread indefinitely.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.epoch_interval(...)`
    - `.signature_deadline(...)`
    - `.deadline_extension(...)`
    - `.partition_cadence_multiplier(...)`
    - `.header_window(...)`
    - `.request_timeout(...)`
    - `.sync_request_limit(...)`
    - `.max_concurrent_syncs(...)`
    - `.sync_interval(...)`
    - `.min_sync_trust(...)`
    - `.discovery_interval(...)`
    - `.monitor_interval(...)`
    - `.heal_alert_after(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the node's keypair, used to sign announcements and engine-produced records. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set how often a checkpoint is attempted. Required."))]
    pub epoch_interval: Duration,
    #[builder(setter(doc = "Set the deadline for collecting validator signatures on a checkpoint. Required."))]
    pub signature_deadline: Duration,
    #[builder(setter(doc = "Set how much the signature deadline grows on each quorum-not-reached retry. Required."))]
    pub deadline_extension: Duration,
    #[builder(setter(doc = "Set the factor by which the checkpoint cadence is stretched while a partition is suspected. Required."))]
    pub partition_cadence_multiplier: u32,
    #[builder(setter(doc = "Set how many epochs around the local head a header exchange covers. Required."))]
    pub header_window: u64,
    #[builder(setter(doc = "Set the timeout for receiving any single response from a peer. Required."))]
    pub request_timeout: Duration,
    #[builder(setter(doc = "Set the limit for the number of blocks served or requested in one message. Required."))]
    pub sync_request_limit: u32,
    #[builder(setter(doc = "Set the maximum number of concurrently running sync sessions. Required."))]
    pub max_concurrent_syncs: usize,
    #[builder(setter(doc = "Set how often the sync manager schedules new sessions. Required."))]
    pub sync_interval: Duration,
    #[builder(setter(doc = "Set the trust floor below which a peer is not synced with. Required."))]
    pub min_sync_trust: f64,
    #[builder(setter(doc = "Set how often the peer directory runs a discovery round. Required."))]
    pub discovery_interval: Duration,
    #[builder(setter(doc = "Set how often the partition monitor re-estimates peer reachability. Required."))]
    pub monitor_interval: Duration,
    #[builder(setter(doc = "Set how long a suspected partition may persist before an operator-visible alert is raised. Required."))]
    pub heal_alert_after: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

type SubConfigurations = (
    EngineConfiguration,
    SyncServerConfiguration,
    SyncManagerConfiguration,
    PeerDirectoryConfiguration,
    PartitionMonitorConfiguration,
);

impl Configuration {
    fn split(self, bootstrap: Vec<VerifyingKey>) -> SubConfigurations {
        let keypair = Keypair::new(self.me);
        let federation = IdentityProof::federation_id(&keypair.public());
        let engine_config = EngineConfiguration {
            federation,
            keypair: keypair.clone(),
            epoch_interval: self.epoch_interval,
            signature_deadline: self.signature_deadline,
            deadline_extension: self.deadline_extension,
            partition_cadence_multiplier: self.partition_cadence_multiplier,
        };
        let server_config = SyncServerConfiguration {
            request_limit: self.sync_request_limit,
        };
        let manager_config = SyncManagerConfiguration {
            sync_interval: self.sync_interval,
            max_concurrent_syncs: self.max_concurrent_syncs,
            min_trust: self.min_sync_trust,
            session: SyncSessionConfiguration {
                header_window: self.header_window,
                request_timeout: self.request_timeout,
                block_request_limit: self.sync_request_limit,
            },
        };
        let directory_config = PeerDirectoryConfiguration {
            keypair: keypair.clone(),
            bootstrap,
            discovery_interval: self.discovery_interval,
            request_timeout: self.request_timeout,
        };
        let monitor_config = PartitionMonitorConfiguration {
            keypair,
            monitor_interval: self.monitor_interval,
            heal_alert_after: self.heal_alert_after,
        };
        (
            engine_config,
            server_config,
            manager_config,
            directory_config,
            monitor_config,
        )
    }
}

/// Stores all necessary parameters and trait implementations required to run a [Node].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec]. On the builder call the following methods to construct a valid [NodeSpec].

    Required:
    - `.folder(...)`
    - `.signature_service(...)`
    - `.validator_source(...)`
    - `.arbiter(...)`
    - `.network(...)`
    - `.kv_store(...)`
    - `.configuration(...)`

    Optional:
    - `.bootstrap(...)`
    - `.on_block_admitted(...)`
    - `.on_block_rejected(...)`
    - `.on_checkpoint_built(...)`
    - `.on_checkpoint_validated(...)`
    - `.on_checkpoint_rejected(...)`
    - `.on_quorum_not_reached(...)`
    - `.on_start_sync(...)`
    - `.on_end_sync(...)`
    - `.on_receive_sync_request(...)`
    - `.on_send_sync_response(...)`
    - `.on_conflict_detected(...)`
    - `.on_equivocation_detected(...)`
    - `.on_partition_suspected(...)`
    - `.on_partition_healed(...)`
    - `.on_peer_discovered(...)`
    - `.on_peer_unreachable(...)`
    - `.on_trust_updated(...)`
"))]
pub struct NodeSpec<
    K: KVStore,
    F: StateFolder,
    S: SignatureService,
    V: ValidatorSetSource,
    A: ConflictArbiter,
    N: Network + 'static,
> {
    // Required parameters
    #[builder(setter(doc = "Set the state-folding capability. The argument must implement [StateFolder](crate::app::StateFolder). Required."))]
    folder: F,
    #[builder(setter(doc = "Set the validator signature collection capability. The argument must implement [SignatureService](crate::app::SignatureService). Required."))]
    signature_service: S,
    #[builder(setter(doc = "Set the identity-subsystem validator set query. The argument must implement [ValidatorSetSource](crate::app::ValidatorSetSource). Required."))]
    validator_source: V,
    #[builder(setter(doc = "Set the governance conflict arbitration capability. The argument must implement [ConflictArbiter](crate::app::ConflictArbiter). Required."))]
    arbiter: A,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the implementation of the node's key-value store. The argument must implement the [KVStore](crate::store::pluggables::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a node. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(doc = "Set the bootstrap peers queried at the start of every discovery round. Optional."))]
    bootstrap: Vec<VerifyingKey>,
    #[builder(default, setter(transform = |handler: impl Fn(&BlockAdmittedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BlockAdmittedEvent>),
    doc = "Register a handler closure to be invoked after a block is admitted into the node's block store. Optional."))]
    on_block_admitted: Option<HandlerPtr<BlockAdmittedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BlockRejectedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BlockRejectedEvent>),
    doc = "Register a handler closure to be invoked after a block is rejected at admission. Optional."))]
    on_block_rejected: Option<HandlerPtr<BlockRejectedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CheckpointBuiltEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CheckpointBuiltEvent>),
    doc = "Register a handler closure to be invoked after the node builds a checkpoint. Optional."))]
    on_checkpoint_built: Option<HandlerPtr<CheckpointBuiltEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CheckpointValidatedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CheckpointValidatedEvent>),
    doc = "Register a handler closure to be invoked after the node validates and applies a peer's checkpoint. Optional."))]
    on_checkpoint_validated: Option<HandlerPtr<CheckpointValidatedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CheckpointRejectedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CheckpointRejectedEvent>),
    doc = "Register a handler closure to be invoked after the node rejects a peer's checkpoint. Optional."))]
    on_checkpoint_rejected: Option<HandlerPtr<CheckpointRejectedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&QuorumNotReachedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<QuorumNotReachedEvent>),
    doc = "Register a handler closure to be invoked after a checkpoint build falls short of quorum. Optional."))]
    on_quorum_not_reached: Option<HandlerPtr<QuorumNotReachedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartSyncEvent>),
    doc = "Register a handler closure to be invoked after a sync session starts. Optional."))]
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndSyncEvent>),
    doc = "Register a handler closure to be invoked after a sync session ends. Optional."))]
    on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveSyncRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveSyncRequestEvent>),
    doc = "Register a handler closure to be invoked after the node receives a sync request from a peer. Optional."))]
    on_receive_sync_request: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendSyncResponseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendSyncResponseEvent>),
    doc = "Register a handler closure to be invoked after the node sends a sync response to a peer. Optional."))]
    on_send_sync_response: Option<HandlerPtr<SendSyncResponseEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ConflictDetectedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ConflictDetectedEvent>),
    doc = "Register a handler closure to be invoked after the reconciler detects conflicts. Optional."))]
    on_conflict_detected: Option<HandlerPtr<ConflictDetectedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EquivocationDetectedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EquivocationDetectedEvent>),
    doc = "Register a handler closure to be invoked after equivocation evidence is recorded. Optional."))]
    on_equivocation_detected: Option<HandlerPtr<EquivocationDetectedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PartitionSuspectedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PartitionSuspectedEvent>),
    doc = "Register a handler closure to be invoked after the partition monitor suspects a partition. Optional."))]
    on_partition_suspected: Option<HandlerPtr<PartitionSuspectedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PartitionHealedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PartitionHealedEvent>),
    doc = "Register a handler closure to be invoked after a suspected partition heals. Optional."))]
    on_partition_healed: Option<HandlerPtr<PartitionHealedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PeerDiscoveredEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PeerDiscoveredEvent>),
    doc = "Register a handler closure to be invoked after a new peer federation is verified and added. Optional."))]
    on_peer_discovered: Option<HandlerPtr<PeerDiscoveredEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PeerUnreachableEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PeerUnreachableEvent>),
    doc = "Register a handler closure to be invoked after a peer federation is marked unreachable. Optional."))]
    on_peer_unreachable: Option<HandlerPtr<PeerUnreachableEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TrustUpdatedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TrustUpdatedEvent>),
    doc = "Register a handler closure to be invoked after a peer's trust score changes. Optional."))]
    on_trust_updated: Option<HandlerPtr<TrustUpdatedEvent>>,
}

impl<K, F, S, V, A, N> NodeSpec<K, F, S, V, A, N>
where
    K: KVStore,
    F: StateFolder,
    S: SignatureService,
    V: ValidatorSetSource,
    A: ConflictArbiter,
    N: Network + 'static,
{
    /// Starts all threads and channels associated with running a node, and returns the handles
    /// to them in a [Node] struct.
    ///
    /// The node's block store must have been [initialized](Node::initialize) beforehand.
    pub fn start(mut self) -> Node<K> {
        let log_events = self.configuration.log_events;
        let (engine_config, server_config, manager_config, directory_config, monitor_config) =
            self.configuration.split(self.bootstrap.clone());

        self.network.init_peers(&self.bootstrap);

        let event_handlers = EventHandlers::new(
            log_events,
            self.on_block_admitted,
            self.on_block_rejected,
            self.on_checkpoint_built,
            self.on_checkpoint_validated,
            self.on_checkpoint_rejected,
            self.on_quorum_not_reached,
            self.on_start_sync,
            self.on_end_sync,
            self.on_receive_sync_request,
            self.on_send_sync_response,
            self.on_conflict_detected,
            self.on_equivocation_detected,
            self.on_partition_suspected,
            self.on_partition_healed,
            self.on_peer_discovered,
            self.on_peer_unreachable,
            self.on_trust_updated,
        );
        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let registry: SharedRegistry = shared(PeerRegistry::new());
        let partition_state: SharedPartitionState = shared_state();
        let trust = TrustLedger::new(registry.clone(), event_publisher.clone());

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, sync_requests, sync_responses, gossip) =
            start_polling(self.network.clone(), poller_shutdown_receiver);

        let (router_shutdown, router_shutdown_receiver) = mpsc::channel();
        let (router_thread, router) = start_response_router(sync_responses, router_shutdown_receiver);

        let (engine_receiver, engine_handle) =
            engine_channel(self.kv_store.clone(), &engine_config.keypair);

        let (engine_shutdown, engine_shutdown_receiver) = mpsc::channel();
        let engine = Engine::new(
            engine_config,
            BlockStore::new(self.kv_store.clone()),
            self.folder,
            self.signature_service,
            self.validator_source,
            self.arbiter,
            registry.clone(),
            trust.clone(),
            partition_state.clone(),
            self.network.clone(),
            engine_receiver,
            engine_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let (server_shutdown, server_shutdown_receiver) = mpsc::channel();
        let server = SyncServer::new(
            server_config,
            StoreCamera::new(self.kv_store.clone()),
            sync_requests,
            self.network.clone(),
            server_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let (directory_shutdown, directory_shutdown_receiver) = mpsc::channel();
        let directory = PeerDirectory::new(
            directory_config,
            StoreCamera::new(self.kv_store.clone()),
            registry.clone(),
            partition_state.clone(),
            gossip,
            self.network.clone(),
            directory_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let (monitor_shutdown, monitor_shutdown_receiver) = mpsc::channel();
        let monitor = PartitionMonitor::new(
            monitor_config,
            StoreCamera::new(self.kv_store.clone()),
            registry.clone(),
            partition_state.clone(),
            self.network.clone(),
            monitor_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let (manager_shutdown, manager_shutdown_receiver) = mpsc::channel();
        let sync_manager = SyncManager::new(
            manager_config,
            StoreCamera::new(self.kv_store.clone()),
            registry.clone(),
            trust,
            router,
            self.network,
            engine_handle.clone(),
            manager_shutdown_receiver,
            event_publisher,
        )
        .start();

        let (event_bus_shutdown, event_bus_shutdown_receiver) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };
        let event_bus = if !event_handlers.is_empty() {
            Some(start_event_bus(
                event_handlers,
                event_subscriber.unwrap(), // Safety: should be Some(...).
                event_bus_shutdown_receiver.unwrap(), // Safety: should be Some(...).
            ))
        } else {
            None
        };

        Node {
            camera: StoreCamera::new(self.kv_store),
            engine_handle,
            sync_manager: Some(sync_manager),
            manager_shutdown,
            directory: Some(directory),
            directory_shutdown,
            monitor: Some(monitor),
            monitor_shutdown,
            server: Some(server),
            server_shutdown,
            engine: Some(engine),
            engine_shutdown,
            router_thread: Some(router_thread),
            router_shutdown,
            poller: Some(poller),
            poller_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a FedSync-rs node. When this value is dropped, all
/// background threads are gracefully shut down.
pub struct Node<K: KVStore> {
    camera: StoreCamera<K>,
    engine_handle: EngineHandle<K>,
    sync_manager: Option<JoinHandle<()>>,
    manager_shutdown: Sender<()>,
    directory: Option<JoinHandle<()>>,
    directory_shutdown: Sender<()>,
    monitor: Option<JoinHandle<()>>,
    monitor_shutdown: Sender<()>,
    server: Option<JoinHandle<()>>,
    server_shutdown: Sender<()>,
    engine: Option<JoinHandle<()>>,
    engine_shutdown: Sender<()>,
    router_thread: Option<JoinHandle<()>>,
    router_shutdown: Sender<()>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore> Node<K> {
    /// Initializes the node's [block store](crate::store) with the ledger's genesis
    /// checkpoint, derived from the founding federation's identifier and the initial validator
    /// set. Every node of a shared ledger must initialize with the same arguments; a node that
    /// is already initialized is left untouched.
    pub fn initialize(
        kv_store: K,
        founder: FederationId,
        initial_validator_set: &ValidatorSet,
    ) -> Result<(), BlockStoreError> {
        let mut store = BlockStore::new(kv_store);
        store.initialize(&Checkpoint::genesis(founder, initial_validator_set))
    }

    /// Store a block without admitting it.
    pub fn put(&self, block: Block) -> Result<CryptoHash, BlockStoreError> {
        self.engine_handle.put(block)
    }

    /// Admit a block produced by a collaborator subsystem.
    pub fn admit(&self, block: Block) -> Result<CryptoHash, BlockStoreError> {
        self.engine_handle.admit(block)
    }

    /// Force a checkpoint build now, without waiting for the epoch interval.
    pub fn build_checkpoint_now(&self) -> Result<CheckpointHeader, EngineError> {
        self.engine_handle.build_now()
    }

    /// The chain's current head checkpoint.
    pub fn current_checkpoint(&self) -> Option<Checkpoint> {
        self.camera.snapshot().head_checkpoint().ok().flatten()
    }

    /// The chain's current epoch.
    pub fn epoch(&self) -> Option<Epoch> {
        self.camera.snapshot().current_epoch().ok().flatten()
    }

    /// Returns a [store camera](crate::store::camera::StoreCamera) which can be used to peek
    /// into the node's block store.
    pub fn camera(&self) -> &StoreCamera<K> {
        &self.camera
    }
}

impl<K: KVStore> Drop for Node<K> {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown in this function is important, as the threads
        // make assumptions about the validity of their channels based on it. The sync manager
        // joins its sessions, whose in-flight engine calls assume the engine outlives them;
        // the server, directory, and monitor receive messages from the poller and assume the
        // poller outlives them; the event bus drains everyone else's events last.

        let _ = self.manager_shutdown.send(());
        let _ = self.sync_manager.take().unwrap().join();

        let _ = self.directory_shutdown.send(());
        let _ = self.directory.take().unwrap().join();

        let _ = self.monitor_shutdown.send(());
        let _ = self.monitor.take().unwrap().join();

        let _ = self.server_shutdown.send(());
        let _ = self.server.take().unwrap().join();

        let _ = self.engine_shutdown.send(());
        let _ = self.engine.take().unwrap().join();

        let _ = self.router_shutdown.send(());
        let _ = self.router_thread.take().unwrap().join();

        let _ = self.poller_shutdown.send(());
        let _ = self.poller.take().unwrap().join();

        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| shutdown.send(()).unwrap_or(()));
        if self.event_bus.is_some() {
            let _ = self.event_bus.take().unwrap().join();
        }
    }
}
