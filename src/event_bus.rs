/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) published by the other threads
//! and dispatches them to the default loggers and user-registered handler closures.

use std::sync::mpsc::Receiver;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) block_admitted_handlers: Vec<HandlerPtr<BlockAdmittedEvent>>,
    pub(crate) block_rejected_handlers: Vec<HandlerPtr<BlockRejectedEvent>>,
    pub(crate) checkpoint_built_handlers: Vec<HandlerPtr<CheckpointBuiltEvent>>,
    pub(crate) checkpoint_validated_handlers: Vec<HandlerPtr<CheckpointValidatedEvent>>,
    pub(crate) checkpoint_rejected_handlers: Vec<HandlerPtr<CheckpointRejectedEvent>>,
    pub(crate) quorum_not_reached_handlers: Vec<HandlerPtr<QuorumNotReachedEvent>>,
    pub(crate) start_sync_handlers: Vec<HandlerPtr<StartSyncEvent>>,
    pub(crate) end_sync_handlers: Vec<HandlerPtr<EndSyncEvent>>,
    pub(crate) receive_sync_request_handlers: Vec<HandlerPtr<ReceiveSyncRequestEvent>>,
    pub(crate) send_sync_response_handlers: Vec<HandlerPtr<SendSyncResponseEvent>>,
    pub(crate) conflict_detected_handlers: Vec<HandlerPtr<ConflictDetectedEvent>>,
    pub(crate) equivocation_detected_handlers: Vec<HandlerPtr<EquivocationDetectedEvent>>,
    pub(crate) partition_suspected_handlers: Vec<HandlerPtr<PartitionSuspectedEvent>>,
    pub(crate) partition_healed_handlers: Vec<HandlerPtr<PartitionHealedEvent>>,
    pub(crate) peer_discovered_handlers: Vec<HandlerPtr<PeerDiscoveredEvent>>,
    pub(crate) peer_unreachable_handlers: Vec<HandlerPtr<PeerUnreachableEvent>>,
    pub(crate) trust_updated_handlers: Vec<HandlerPtr<TrustUpdatedEvent>>,
}

fn handlers<T: Logger>(log_events: bool, user: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut all = Vec::new();
    if log_events {
        all.push(T::get_logger());
    }
    if let Some(handler) = user {
        all.push(handler);
    }
    all
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        on_block_admitted: Option<HandlerPtr<BlockAdmittedEvent>>,
        on_block_rejected: Option<HandlerPtr<BlockRejectedEvent>>,
        on_checkpoint_built: Option<HandlerPtr<CheckpointBuiltEvent>>,
        on_checkpoint_validated: Option<HandlerPtr<CheckpointValidatedEvent>>,
        on_checkpoint_rejected: Option<HandlerPtr<CheckpointRejectedEvent>>,
        on_quorum_not_reached: Option<HandlerPtr<QuorumNotReachedEvent>>,
        on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
        on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
        on_receive_sync_request: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
        on_send_sync_response: Option<HandlerPtr<SendSyncResponseEvent>>,
        on_conflict_detected: Option<HandlerPtr<ConflictDetectedEvent>>,
        on_equivocation_detected: Option<HandlerPtr<EquivocationDetectedEvent>>,
        on_partition_suspected: Option<HandlerPtr<PartitionSuspectedEvent>>,
        on_partition_healed: Option<HandlerPtr<PartitionHealedEvent>>,
        on_peer_discovered: Option<HandlerPtr<PeerDiscoveredEvent>>,
        on_peer_unreachable: Option<HandlerPtr<PeerUnreachableEvent>>,
        on_trust_updated: Option<HandlerPtr<TrustUpdatedEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            block_admitted_handlers: handlers(log_events, on_block_admitted),
            block_rejected_handlers: handlers(log_events, on_block_rejected),
            checkpoint_built_handlers: handlers(log_events, on_checkpoint_built),
            checkpoint_validated_handlers: handlers(log_events, on_checkpoint_validated),
            checkpoint_rejected_handlers: handlers(log_events, on_checkpoint_rejected),
            quorum_not_reached_handlers: handlers(log_events, on_quorum_not_reached),
            start_sync_handlers: handlers(log_events, on_start_sync),
            end_sync_handlers: handlers(log_events, on_end_sync),
            receive_sync_request_handlers: handlers(log_events, on_receive_sync_request),
            send_sync_response_handlers: handlers(log_events, on_send_sync_response),
            conflict_detected_handlers: handlers(log_events, on_conflict_detected),
            equivocation_detected_handlers: handlers(log_events, on_equivocation_detected),
            partition_suspected_handlers: handlers(log_events, on_partition_suspected),
            partition_healed_handlers: handlers(log_events, on_partition_healed),
            peer_discovered_handlers: handlers(log_events, on_peer_discovered),
            peer_unreachable_handlers: handlers(log_events, on_peer_unreachable),
            trust_updated_handlers: handlers(log_events, on_trust_updated),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.block_admitted_handlers.is_empty()
            && self.block_rejected_handlers.is_empty()
            && self.checkpoint_built_handlers.is_empty()
            && self.checkpoint_validated_handlers.is_empty()
            && self.checkpoint_rejected_handlers.is_empty()
            && self.quorum_not_reached_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
            && self.receive_sync_request_handlers.is_empty()
            && self.send_sync_response_handlers.is_empty()
            && self.conflict_detected_handlers.is_empty()
            && self.equivocation_detected_handlers.is_empty()
            && self.partition_suspected_handlers.is_empty()
            && self.partition_healed_handlers.is_empty()
            && self.peer_discovered_handlers.is_empty()
            && self.peer_unreachable_handlers.is_empty()
            && self.trust_updated_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::BlockAdmitted(event) => self
                .block_admitted_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::BlockRejected(event) => self
                .block_rejected_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::CheckpointBuilt(event) => self
                .checkpoint_built_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::CheckpointValidated(event) => self
                .checkpoint_validated_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::CheckpointRejected(event) => self
                .checkpoint_rejected_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::QuorumNotReached(event) => self
                .quorum_not_reached_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::StartSync(event) => self
                .start_sync_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::EndSync(event) => self
                .end_sync_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::ReceiveSyncRequest(event) => self
                .receive_sync_request_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::SendSyncResponse(event) => self
                .send_sync_response_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::ConflictDetected(event) => self
                .conflict_detected_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::EquivocationDetected(event) => self
                .equivocation_detected_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::PartitionSuspected(event) => self
                .partition_suspected_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::PartitionHealed(event) => self
                .partition_healed_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::PeerDiscovered(event) => self
                .peer_discovered_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::PeerUnreachable(event) => self
                .peer_unreachable_handlers
                .iter()
                .for_each(|handler| handler(&event)),
            Event::TrustUpdated(event) => self
                .trust_updated_handlers
                .iter()
                .for_each(|handler| handler(&event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // The publishers have all shut down; drain whatever remains and wait for our own
            // shutdown signal.
            Err(TryRecvError::Disconnected) => thread::yield_now(),
        }
    })
}
