/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [config](crate::node::Configuration).
//!
//! FedSync-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. Hashes, federation identifiers,
//! and verifying keys are printed as the first seven characters of their Base64 encoding.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const BLOCK_ADMITTED: &str = "BlockAdmitted";
pub const BLOCK_REJECTED: &str = "BlockRejected";
pub const CHECKPOINT_BUILT: &str = "CheckpointBuilt";
pub const CHECKPOINT_VALIDATED: &str = "CheckpointValidated";
pub const CHECKPOINT_REJECTED: &str = "CheckpointRejected";
pub const QUORUM_NOT_REACHED: &str = "QuorumNotReached";

pub const START_SYNC: &str = "StartSync";
pub const END_SYNC: &str = "EndSync";
pub const RECEIVE_SYNC_REQUEST: &str = "ReceiveSyncRequest";
pub const SEND_SYNC_RESPONSE: &str = "SendSyncResponse";

pub const CONFLICT_DETECTED: &str = "ConflictDetected";
pub const EQUIVOCATION_DETECTED: &str = "EquivocationDetected";

pub const PARTITION_SUSPECTED: &str = "PartitionSuspected";
pub const PARTITION_HEALED: &str = "PartitionHealed";

pub const PEER_DISCOVERED: &str = "PeerDiscovered";
pub const PEER_UNREACHABLE: &str = "PeerUnreachable";
pub const TRUST_UPDATED: &str = "TrustUpdated";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for BlockAdmittedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &BlockAdmittedEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                BLOCK_ADMITTED,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block.bytes()),
                event.block_type
            )
        })
    }
}

impl Logger for BlockRejectedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &BlockRejectedEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                BLOCK_REJECTED,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block.bytes()),
                event.reason
            )
        })
    }
}

impl Logger for CheckpointBuiltEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CheckpointBuiltEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                CHECKPOINT_BUILT,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.checkpoint.id.bytes()),
                event.checkpoint.epoch,
                event.checkpoint.signature_count
            )
        })
    }
}

impl Logger for CheckpointValidatedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CheckpointValidatedEvent| {
            log::info!(
                "{}, {}, {}, {}",
                CHECKPOINT_VALIDATED,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.checkpoint.bytes()),
                event.epoch
            )
        })
    }
}

impl Logger for CheckpointRejectedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CheckpointRejectedEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                CHECKPOINT_REJECTED,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.checkpoint.bytes()),
                event.reason
            )
        })
    }
}

impl Logger for QuorumNotReachedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &QuorumNotReachedEvent| {
            log::warn!(
                "{}, {}, {}, {}, {}",
                QUORUM_NOT_REACHED,
                secs_since_unix_epoch(event.timestamp),
                event.epoch,
                event.got,
                event.needed
            )
        })
    }
}

impl Logger for StartSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &StartSyncEvent| {
            log::info!(
                "{}, {}, {}",
                START_SYNC,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes())
            )
        })
    }
}

impl Logger for EndSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &EndSyncEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                END_SYNC,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                event.outcome
            )
        })
    }
}

impl Logger for ReceiveSyncRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ReceiveSyncRequestEvent| {
            log::debug!(
                "{}, {}, {}, {:?}",
                RECEIVE_SYNC_REQUEST,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                event.request
            )
        })
    }
}

impl Logger for SendSyncResponseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &SendSyncResponseEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                SEND_SYNC_RESPONSE,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                event.items
            )
        })
    }
}

impl Logger for ConflictDetectedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ConflictDetectedEvent| {
            log::warn!(
                "{}, {}, {:?}, {}",
                CONFLICT_DETECTED,
                secs_since_unix_epoch(event.timestamp),
                event.severity,
                event.conflicts
            )
        })
    }
}

impl Logger for EquivocationDetectedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &EquivocationDetectedEvent| {
            log::error!(
                "{}, {}, {}, {}",
                EQUIVOCATION_DETECTED,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.offender),
                event.epoch
            )
        })
    }
}

impl Logger for PartitionSuspectedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &PartitionSuspectedEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                PARTITION_SUSPECTED,
                secs_since_unix_epoch(event.timestamp),
                event.reachable,
                event.known
            )
        })
    }
}

impl Logger for PartitionHealedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &PartitionHealedEvent| {
            log::info!(
                "{}, {}, {:?}",
                PARTITION_HEALED,
                secs_since_unix_epoch(event.timestamp),
                event.verdict
            )
        })
    }
}

impl Logger for PeerDiscoveredEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &PeerDiscoveredEvent| {
            log::info!(
                "{}, {}, {}",
                PEER_DISCOVERED,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.federation.bytes())
            )
        })
    }
}

impl Logger for PeerUnreachableEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &PeerUnreachableEvent| {
            log::warn!(
                "{}, {}, {}",
                PEER_UNREACHABLE,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.federation.bytes())
            )
        })
    }
}

impl Logger for TrustUpdatedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &TrustUpdatedEvent| {
            log::debug!(
                "{}, {}, {}, {:.3}",
                TRUST_UPDATED,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.federation.bytes()),
                event.score
            )
        })
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    encoded.chars().take(7).collect()
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
