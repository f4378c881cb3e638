/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The peer directory thread: discovers peer federations and keeps their registry records
//! current.
//!
//! Discovery runs continuously: each round, the directory sends peer-list requests to the
//! configured bootstrap peers and to every already-known reachable peer, and broadcasts an
//! announcement of the local federation and its chain head. Every request is sent before any
//! response is processed, and responses are drained without blocking, so one unreachable peer
//! can never stall discovery of the others. A newly learned peer is added to the registry only
//! after its federation identity proof verifies.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use ed25519_dalek::VerifyingKey;

use crate::events::{
    Event, PeerDiscoveredEvent, PeerUnreachableEvent, ReceiveSyncRequestEvent,
    SendSyncResponseEvent, SyncRequestKind,
};
use crate::networking::{GossipStub, Network, SenderHandle};
use crate::partition::SharedPartitionState;
use crate::store::{
    camera::StoreCamera,
    pluggables::{KVGet, KVStore},
};
use crate::sync::messages::{Announce, GossipMessage, PeerListRequest, PeerListResponse};
use crate::types::{basic::FederationId, keypair::Keypair};

use super::registry::{IdentityProof, SharedRegistry};

/// Immutable parameters that define the behaviour of the [PeerDirectory].
pub(crate) struct PeerDirectoryConfiguration {
    pub(crate) keypair: Keypair,
    pub(crate) bootstrap: Vec<VerifyingKey>,
    pub(crate) discovery_interval: Duration,
    pub(crate) request_timeout: Duration,
}

pub(crate) struct PeerDirectory<N: Network + 'static, K: KVStore> {
    config: PeerDirectoryConfiguration,
    camera: StoreCamera<K>,
    registry: SharedRegistry,
    partition_state: SharedPartitionState,
    receiver: GossipStub,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
    last_round: Option<Instant>,
    last_seen: HashMap<FederationId, Instant>,
}

impl<N: Network + 'static, K: KVStore> PeerDirectory<N, K> {
    pub(crate) fn new(
        config: PeerDirectoryConfiguration,
        camera: StoreCamera<K>,
        registry: SharedRegistry,
        partition_state: SharedPartitionState,
        gossip: Receiver<(VerifyingKey, GossipMessage)>,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            camera,
            registry,
            partition_state,
            receiver: GossipStub::new(gossip),
            sender: SenderHandle::new(network),
            shutdown_signal,
            event_publisher,
            last_round: None,
            last_seen: HashMap::new(),
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Peer directory thread disconnected from main thread")
                }
            }

            // 1. Drain and handle incoming gossip.
            while let Some((origin, message)) = self.receiver.recv() {
                self.on_gossip(origin, message);
            }

            // 2. Run a discovery round if it is time for one.
            let due = match self.last_round {
                Some(last) => Instant::now() - last >= self.config.discovery_interval,
                None => true,
            };
            if due {
                self.discovery_round();
                self.last_round = Some(Instant::now());
            }

            thread::yield_now();
        })
    }

    fn on_gossip(&mut self, origin: VerifyingKey, message: GossipMessage) {
        match message {
            GossipMessage::PeerListRequest(PeerListRequest {}) => {
                Event::publish(
                    &self.event_publisher,
                    Event::ReceiveSyncRequest(ReceiveSyncRequestEvent {
                        timestamp: SystemTime::now(),
                        peer: origin,
                        request: SyncRequestKind::PeerList,
                    }),
                );

                let mut peers: Vec<IdentityProof> = {
                    let registry = self.registry.lock().unwrap();
                    registry.peers().map(|record| record.proof.clone()).collect()
                };
                peers.push(IdentityProof::create(&self.config.keypair.0));
                let items = peers.len() as u64;
                self.sender.send(origin, PeerListResponse { peers });

                Event::publish(
                    &self.event_publisher,
                    Event::SendSyncResponse(SendSyncResponseEvent {
                        timestamp: SystemTime::now(),
                        peer: origin,
                        items,
                    }),
                );
            }
            GossipMessage::PeerListResponse(PeerListResponse { peers }) => {
                self.saw_peer_by_address(&origin);
                for proof in peers {
                    self.learn_peer(proof);
                }
            }
            GossipMessage::Announce(Announce { proof, head }) => {
                if !proof.is_correct() {
                    return;
                }
                let federation = proof.federation;
                self.learn_peer(proof);
                self.saw_peer(&federation);
                let mut registry = self.registry.lock().unwrap();
                registry.update_head(&federation, head.epoch, head.id);
            }
            GossipMessage::PartitionNotice(notice) => {
                if !notice.proof.is_correct() {
                    return;
                }
                self.saw_peer(&notice.proof.federation);
                let mut state = self.partition_state.lock().unwrap();
                state
                    .peer_snapshots
                    .insert(notice.snapshot.head, notice.snapshot);
            }
        }
    }

    /// Add a verified, previously unknown peer to the registry, inform the network provider,
    /// and announce ourselves to it.
    fn learn_peer(&mut self, proof: IdentityProof) {
        if !proof.is_correct() {
            return;
        }
        if proof.key == self.config.keypair.public().to_bytes() {
            return;
        }
        let address = match proof.address() {
            Some(address) => address,
            None => return,
        };

        let is_new = {
            let mut registry = self.registry.lock().unwrap();
            registry.insert_verified(&proof)
        };
        if !is_new {
            return;
        }

        self.sender.add_peer(address);
        self.last_seen.insert(proof.federation, Instant::now());
        Event::publish(
            &self.event_publisher,
            Event::PeerDiscovered(PeerDiscoveredEvent {
                timestamp: SystemTime::now(),
                federation: proof.federation,
            }),
        );

        if let Some(announce) = self.our_announce() {
            self.sender.send(address, announce);
        }
    }

    fn discovery_round(&mut self) {
        // Send every request up front; replies are collected by later loop iterations, so a
        // peer that never answers costs nothing but its own record's staleness.
        for bootstrap in self.config.bootstrap.clone() {
            self.sender.send(bootstrap, PeerListRequest {});
        }
        let reachable = {
            let registry = self.registry.lock().unwrap();
            registry.reachable_addresses()
        };
        for peer in reachable {
            self.sender.send(peer, PeerListRequest {});
        }

        if let Some(announce) = self.our_announce() {
            self.sender.broadcast(announce);
        }

        // Peers that have been silent for a full round plus the request timeout are marked
        // unreachable (never deleted).
        let cutoff = self.config.discovery_interval + self.config.request_timeout;
        let stale: Vec<FederationId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| Instant::now() - **seen >= cutoff)
            .map(|(federation, _)| *federation)
            .collect();
        for federation in stale {
            let was_reachable = {
                let mut registry = self.registry.lock().unwrap();
                let was = registry
                    .get(&federation)
                    .map(|record| record.reachable)
                    .unwrap_or(false);
                registry.mark_unreachable(&federation);
                was
            };
            if was_reachable {
                Event::publish(
                    &self.event_publisher,
                    Event::PeerUnreachable(PeerUnreachableEvent {
                        timestamp: SystemTime::now(),
                        federation,
                    }),
                );
            }
        }
    }

    fn our_announce(&self) -> Option<Announce> {
        let head = self.camera.snapshot().head_checkpoint().ok().flatten()?;
        Some(Announce {
            proof: IdentityProof::create(&self.config.keypair.0),
            head: head.header(),
        })
    }

    /// Record a sign of life from a peer identified by federation.
    fn saw_peer(&mut self, federation: &FederationId) {
        let latency = self
            .last_round
            .map(|round| Instant::now().saturating_duration_since(round))
            .filter(|latency| *latency < self.config.request_timeout);
        self.last_seen.insert(*federation, Instant::now());
        let mut registry = self.registry.lock().unwrap();
        registry.mark_reachable(federation, latency);
    }

    /// Record a sign of life from a peer identified by network address.
    fn saw_peer_by_address(&mut self, address: &VerifyingKey) {
        let federation = {
            let registry = self.registry.lock().unwrap();
            registry.find_by_address(address).map(|record| record.federation)
        };
        if let Some(federation) = federation {
            self.saw_peer(&federation);
        }
    }
}
