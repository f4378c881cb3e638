/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the structured messages that are sent between peer federations.
//!
//! The sync protocol proper is made of request/response pairs; gossip messages carry peer
//! discovery and head announcements. Everything on the wire is Borsh-serialized.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::partition::PartitionSnapshot;
use crate::peers::registry::IdentityProof;
use crate::types::{
    basic::{CryptoHash, EpochRange, FederationId},
    block::Block,
    checkpoint::{Checkpoint, CheckpointHeader},
};

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum Message {
    SyncMessage(SyncMessage),
    GossipMessage(GossipMessage),
}

/// Messages exchanged as part of the checkpoint sync protocol.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum SyncMessage {
    SyncRequest(SyncRequest),
    SyncResponse(SyncResponse),
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum SyncRequest {
    CheckpointHeaderRequest(CheckpointHeaderRequest),
    CheckpointRequest(CheckpointRequest),
    BlockRequest(BlockRequest),
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum SyncResponse {
    CheckpointHeaderResponse(CheckpointHeaderResponse),
    CheckpointResponse(CheckpointResponse),
    BlockResponse(BlockResponse),
}

/// Ask a peer for the checkpoint headers it holds inside `epoch_range`.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct CheckpointHeaderRequest {
    pub federation: FederationId,
    pub epoch_range: EpochRange,
}

impl Into<Message> for CheckpointHeaderRequest {
    fn into(self) -> Message {
        Message::SyncMessage(SyncMessage::SyncRequest(SyncRequest::CheckpointHeaderRequest(
            self,
        )))
    }
}

/// Headers on the responder's canonical chain within the requested range, in ascending epoch
/// order.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct CheckpointHeaderResponse {
    pub headers: Vec<CheckpointHeader>,
}

impl Into<Message> for CheckpointHeaderResponse {
    fn into(self) -> Message {
        Message::SyncMessage(SyncMessage::SyncResponse(
            SyncResponse::CheckpointHeaderResponse(self),
        ))
    }
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct CheckpointRequest {
    pub id: CryptoHash,
}

impl Into<Message> for CheckpointRequest {
    fn into(self) -> Message {
        Message::SyncMessage(SyncMessage::SyncRequest(SyncRequest::CheckpointRequest(
            self,
        )))
    }
}

/// A full checkpoint plus the identifiers committed under its block root, in canonical order.
/// The receiver recomputes the Merkle root over `block_ids` and matches it against
/// `checkpoint.block_root` before trusting the list.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct CheckpointResponse {
    pub checkpoint: Option<Checkpoint>,
    pub block_ids: Vec<CryptoHash>,
}

impl Into<Message> for CheckpointResponse {
    fn into(self) -> Message {
        Message::SyncMessage(SyncMessage::SyncResponse(SyncResponse::CheckpointResponse(
            self,
        )))
    }
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct BlockRequest {
    pub ids: Vec<CryptoHash>,
}

impl Into<Message> for BlockRequest {
    fn into(self) -> Message {
        Message::SyncMessage(SyncMessage::SyncRequest(SyncRequest::BlockRequest(self)))
    }
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct BlockResponse {
    pub blocks: Vec<Block>,
}

impl Into<Message> for BlockResponse {
    fn into(self) -> Message {
        Message::SyncMessage(SyncMessage::SyncResponse(SyncResponse::BlockResponse(self)))
    }
}

/// Messages exchanged as part of peer discovery and head advertisement.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum GossipMessage {
    PeerListRequest(PeerListRequest),
    PeerListResponse(PeerListResponse),
    Announce(Announce),
    PartitionNotice(PartitionNotice),
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct PeerListRequest {}

impl Into<Message> for PeerListRequest {
    fn into(self) -> Message {
        Message::GossipMessage(GossipMessage::PeerListRequest(self))
    }
}

/// The identity proofs of every peer the responder knows. Each proof is re-verified by the
/// receiver before the peer is added to its registry.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct PeerListResponse {
    pub peers: Vec<IdentityProof>,
}

impl Into<Message> for PeerListResponse {
    fn into(self) -> Message {
        Message::GossipMessage(GossipMessage::PeerListResponse(self))
    }
}

/// A federation announcing itself and its current head to a peer.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct Announce {
    pub proof: IdentityProof,
    pub head: CheckpointHeader,
}

impl Into<Message> for Announce {
    fn into(self) -> Message {
        Message::GossipMessage(GossipMessage::Announce(self))
    }
}

/// A federation on one side of a suspected partition advertising its chain snapshot, so that
/// both sides hold both snapshots when the partition heals.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct PartitionNotice {
    pub proof: IdentityProof,
    pub snapshot: PartitionSnapshot,
}

impl Into<Message> for PartitionNotice {
    fn into(self) -> Message {
        Message::GossipMessage(GossipMessage::PartitionNotice(self))
    }
}
