/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The sync manager thread: decides which peers to synchronize with and runs a bounded pool of
//! concurrent [sync sessions](super::session) — one active session per peer, at most
//! `max_concurrent_syncs` at a time, so sync work cannot monopolize bandwidth or CPU.
//!
//! Peer selection is trust-gated: peers whose trust score has fallen below the configured
//! floor are skipped. Session outcomes feed straight back into the [trust
//! ledger](crate::trust::TrustLedger).

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use ed25519_dalek::VerifyingKey;

use crate::engine::EngineHandle;
use crate::events::{EndSyncEvent, Event, StartSyncEvent, SyncOutcomeKind};
use crate::networking::{Network, ResponseRouter, SenderHandle};
use crate::peers::registry::SharedRegistry;
use crate::store::{camera::StoreCamera, pluggables::KVStore};
use crate::trust::TrustLedger;
use crate::types::basic::FederationId;

use super::session::{SyncError, SyncOutcome, SyncSession, SyncSessionConfiguration};

/// Immutable parameters that define the behaviour of the [SyncManager].
pub(crate) struct SyncManagerConfiguration {
    pub(crate) sync_interval: Duration,
    pub(crate) max_concurrent_syncs: usize,
    pub(crate) min_trust: f64,
    pub(crate) session: SyncSessionConfiguration,
}

pub(crate) struct SyncManager<N: Network + 'static, K: KVStore> {
    config: SyncManagerConfiguration,
    camera: StoreCamera<K>,
    registry: SharedRegistry,
    trust: TrustLedger,
    router: ResponseRouter,
    sender: SenderHandle<N>,
    engine: EngineHandle<K>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
    active: HashMap<FederationId, JoinHandle<()>>,
    last_round: Option<Instant>,
}

impl<N: Network + 'static, K: KVStore> SyncManager<N, K> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: SyncManagerConfiguration,
        camera: StoreCamera<K>,
        registry: SharedRegistry,
        trust: TrustLedger,
        router: ResponseRouter,
        network: N,
        engine: EngineHandle<K>,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            camera,
            registry,
            trust,
            router,
            sender: SenderHandle::new(network),
            engine,
            shutdown_signal,
            event_publisher,
            active: HashMap::new(),
            last_round: None,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => {
                    // Let in-flight sessions run down; they abort quickly once the engine
                    // stops answering.
                    for (_, session) in self.active.drain() {
                        let _ = session.join();
                    }
                    return;
                }
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Sync manager thread disconnected from main thread")
                }
            }

            self.active.retain(|_, session| !session.is_finished());

            let due = match self.last_round {
                Some(last) => Instant::now() - last >= self.config.sync_interval,
                None => true,
            };
            if due {
                self.schedule_round();
                self.last_round = Some(Instant::now());
            }

            thread::yield_now();
        })
    }

    fn schedule_round(&mut self) {
        let mut ranked = {
            let registry = self.registry.lock().unwrap();
            registry
                .peers()
                .filter(|record| record.reachable)
                .filter(|record| !self.active.contains_key(&record.federation))
                .filter(|record| record.trust.value() >= self.config.min_trust)
                .filter_map(|record| {
                    VerifyingKey::from_bytes(&record.key)
                        .ok()
                        .map(|key| (record.federation, key, record.last_epoch))
                })
                .collect::<Vec<_>>()
        };
        // Peers that have advertised the highest epochs first: they are the most likely to
        // have something we lack.
        ranked.sort_by(|a, b| b.2.cmp(&a.2));

        let mut candidates: Vec<(FederationId, VerifyingKey)> = ranked
            .into_iter()
            .map(|(federation, key, _)| (federation, key))
            .collect();
        candidates.truncate(
            self.config
                .max_concurrent_syncs
                .saturating_sub(self.active.len()),
        );

        for (federation, address) in candidates {
            self.spawn_session(federation, address);
        }
    }

    fn spawn_session(&mut self, federation: FederationId, address: VerifyingKey) {
        let responses = self.router.register(&address);
        let session = SyncSession::new(
            self.config.session.clone(),
            self.camera.clone(),
            self.sender.clone(),
            responses,
            self.engine.clone(),
        );

        let trust = self.trust.clone();
        let router = self.router.clone();
        let event_publisher = self.event_publisher.clone();

        let handle = thread::spawn(move || {
            Event::publish(
                &event_publisher,
                Event::StartSync(StartSyncEvent {
                    timestamp: SystemTime::now(),
                    peer: address,
                }),
            );

            let result = session.sync_with(address);
            let outcome = match &result {
                Ok(SyncOutcome::FastForwarded { applied }) => {
                    SyncOutcomeKind::FastForwarded(*applied)
                }
                Ok(SyncOutcome::SharedOurs) => SyncOutcomeKind::SharedOurs,
                Ok(SyncOutcome::Reconciled) => SyncOutcomeKind::Reconciled,
                Ok(SyncOutcome::InSync) => SyncOutcomeKind::InSync,
                Err(_) => SyncOutcomeKind::Failed,
            };

            match &result {
                Ok(_) => trust.record_success(&federation),
                Err(SyncError::Timeout) => trust.record_unreachable(&federation),
                Err(SyncError::InvalidCheckpoint { .. }) | Err(SyncError::MalformedResponse) => {
                    trust.record_validation_failure(&federation)
                }
                Err(SyncError::NoCommonHistory) => {
                    // Not retried automatically: the chains may not share a genesis at all.
                    // Operator or administrative intervention is required.
                    log::error!(
                        "no common history with peer federation; administrative intervention required"
                    );
                }
                Err(SyncError::Cancelled) => (),
                Err(err) => log::warn!("sync session failed: {}", err),
            }

            Event::publish(
                &event_publisher,
                Event::EndSync(EndSyncEvent {
                    timestamp: SystemTime::now(),
                    peer: address,
                    outcome,
                }),
            );

            router.deregister(&address);
        });

        self.active.insert(federation, handle);
    }
}
