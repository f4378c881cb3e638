/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The serving side of the sync protocol: answers checkpoint header, checkpoint, and block
//! requests from peers out of read-only store snapshots, so serving never contends with the
//! engine's writes.
//!
//! The number of blocks returned for a single request is bounded by a configurable limit; a
//! client wanting more asks again.

use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use ed25519_dalek::VerifyingKey;

use crate::events::{
    Event, ReceiveSyncRequestEvent, SendSyncResponseEvent, SyncRequestKind,
};
use crate::networking::{Network, SenderHandle, ServerStub};
use crate::store::{
    camera::StoreCamera,
    pluggables::{KVGet, KVStore},
};
use crate::types::basic::{Epoch, FederationId};
use crate::types::checkpoint::CheckpointHeader;

use super::messages::{
    BlockRequest, BlockResponse, CheckpointHeaderRequest, CheckpointHeaderResponse,
    CheckpointRequest, CheckpointResponse, SyncRequest,
};

/// Immutable parameters that define the behaviour of the [SyncServer].
pub(crate) struct SyncServerConfiguration {
    pub(crate) request_limit: u32,
}

pub(crate) struct SyncServer<N: Network + 'static, K: KVStore> {
    config: SyncServerConfiguration,
    camera: StoreCamera<K>,
    receiver: ServerStub,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, K: KVStore> SyncServer<N, K> {
    pub(crate) fn new(
        config: SyncServerConfiguration,
        camera: StoreCamera<K>,
        requests: Receiver<(VerifyingKey, SyncRequest)>,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            camera,
            receiver: ServerStub::new(requests),
            sender: SenderHandle::new(network),
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Sync server thread disconnected from main thread")
                }
            }

            if let Some((origin, request)) = self.receiver.recv_request() {
                match request {
                    SyncRequest::CheckpointHeaderRequest(request) => {
                        self.serve_headers(origin, request)
                    }
                    SyncRequest::CheckpointRequest(request) => {
                        self.serve_checkpoint(origin, request)
                    }
                    SyncRequest::BlockRequest(request) => self.serve_blocks(origin, request),
                }
            }

            thread::yield_now();
        })
    }

    fn serve_headers(&mut self, origin: VerifyingKey, request: CheckpointHeaderRequest) {
        self.publish_receive(origin, SyncRequestKind::CheckpointHeaders);

        let snapshot = self.camera.snapshot();

        // Requests for a foreign ledger are ignored; the ledger is identified by the
        // federation that proposed its genesis checkpoint.
        match ledger_id(&snapshot) {
            Some(ledger) if ledger == request.federation => (),
            _ => return,
        }

        let mut headers: Vec<CheckpointHeader> = Vec::new();
        for epoch in request.epoch_range.iter() {
            if let Ok(Some(id)) = snapshot.checkpoint_at_epoch(epoch) {
                if let Ok(Some(checkpoint)) = snapshot.checkpoint(&id) {
                    headers.push(checkpoint.header());
                }
            }
        }

        let items = headers.len() as u64;
        self.sender.send(origin, CheckpointHeaderResponse { headers });
        self.publish_send(origin, items);
    }

    fn serve_checkpoint(&mut self, origin: VerifyingKey, request: CheckpointRequest) {
        self.publish_receive(origin, SyncRequestKind::Checkpoint);

        let snapshot = self.camera.snapshot();
        let checkpoint = snapshot.checkpoint(&request.id).ok().flatten();
        let block_ids = snapshot
            .checkpoint_block_ids(&request.id)
            .ok()
            .flatten()
            .unwrap_or_default();

        let items = checkpoint.is_some() as u64;
        self.sender.send(
            origin,
            CheckpointResponse {
                checkpoint,
                block_ids,
            },
        );
        self.publish_send(origin, items);
    }

    fn serve_blocks(&mut self, origin: VerifyingKey, request: BlockRequest) {
        self.publish_receive(origin, SyncRequestKind::Blocks);

        let snapshot = self.camera.snapshot();
        let blocks: Vec<_> = request
            .ids
            .iter()
            .take(self.config.request_limit as usize)
            .filter_map(|id| snapshot.block(id).ok().flatten())
            .collect();

        let items = blocks.len() as u64;
        self.sender.send(origin, BlockResponse { blocks });
        self.publish_send(origin, items);
    }

    fn publish_receive(&self, peer: VerifyingKey, request: SyncRequestKind) {
        Event::publish(
            &self.event_publisher,
            Event::ReceiveSyncRequest(ReceiveSyncRequestEvent {
                timestamp: SystemTime::now(),
                peer,
                request,
            }),
        );
    }

    fn publish_send(&self, peer: VerifyingKey, items: u64) {
        Event::publish(
            &self.event_publisher,
            Event::SendSyncResponse(SendSyncResponseEvent {
                timestamp: SystemTime::now(),
                peer,
                items,
            }),
        );
    }
}

/// The identity of the ledger a store holds: the federation that proposed its genesis
/// checkpoint.
pub(crate) fn ledger_id<S: KVGet>(snapshot: &S) -> Option<FederationId> {
    let genesis_id = snapshot.checkpoint_at_epoch(Epoch::init()).ok().flatten()?;
    let genesis = snapshot.checkpoint(&genesis_id).ok().flatten()?;
    Some(genesis.federation)
}
