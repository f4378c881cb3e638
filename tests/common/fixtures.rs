//! Deterministic collaborator implementations and block/checkpoint construction helpers shared
//! by the test suite.
//!
//! The test "application" tracks one number per entity. A block's payload names an entity and
//! an amount; folding a `Value` entity sums amounts onto the previously committed value, while
//! `Decision` and `Identity` entities record the last amount as their resolution. This is
//! enough to exercise disjoint merges, value clashes, and outcome/identity clashes.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use std::time::Instant;

use fedsync_rs::app::{
    ConflictArbiter, EntityKey, EntityKind, SignatureService, StateFolder, ValidatorSetSource,
};
use fedsync_rs::peers::registry::IdentityProof;
use fedsync_rs::types::basic::{
    CryptoHash, EncodingTag, Epoch, FederationId, LinkName, Payload, SignatureBytes, Timestamp,
    VerifyingKeyBytes,
};
use fedsync_rs::types::block::{Block, BlockType, ParentLink, ParentList};
use fedsync_rs::types::checkpoint::{
    Checkpoint, CheckpointProofs, CheckpointSignatures, Summary, SummaryTag,
};
use fedsync_rs::types::merkle::MerkleTree;
use fedsync_rs::types::validator_set::ValidatorSet;

/// Payload format used by the test suite: one entity update per block.
#[derive(BorshSerialize, BorshDeserialize)]
pub(crate) struct TestPayload {
    pub(crate) kind: u8,
    pub(crate) entity: Vec<u8>,
    pub(crate) amount: u64,
}

fn kind_of(tag: u8) -> EntityKind {
    match tag {
        0 => EntityKind::Value,
        1 => EntityKind::Decision,
        _ => EntityKind::Identity,
    }
}

/// The test suite's [StateFolder]: deterministic by construction.
pub(crate) struct LedgerFolder;

impl StateFolder for LedgerFolder {
    fn entities(&self, block: &Block) -> Vec<EntityKey> {
        match TestPayload::deserialize(&mut block.payload.bytes().as_slice()) {
            Ok(payload) => vec![EntityKey::new(kind_of(payload.kind), payload.entity)],
            Err(_) => Vec::new(),
        }
    }

    fn fold_entity(&self, entity: &EntityKey, prior: Option<&[u8]>, blocks: &[&Block]) -> Vec<u8> {
        let amounts: Vec<u64> = blocks
            .iter()
            .filter_map(|block| {
                TestPayload::deserialize(&mut block.payload.bytes().as_slice()).ok()
            })
            .map(|payload| payload.amount)
            .collect();

        let folded = match entity.kind {
            EntityKind::Value => {
                let start = prior
                    .and_then(|bytes| bytes.try_into().ok().map(u64::from_le_bytes))
                    .unwrap_or(0);
                amounts.iter().fold(start, |acc, amount| acc + amount)
            }
            // Decision and identity records keep the last written resolution.
            EntityKind::Decision | EntityKind::Identity => amounts.last().copied().unwrap_or(0),
        };
        folded.to_le_bytes().to_vec()
    }

    fn summaries(&self, _epoch: Epoch, blocks: &[Block]) -> Vec<Summary> {
        vec![Summary {
            tag: SummaryTag::new(1),
            version: 1,
            bytes: (blocks.len() as u32).to_le_bytes().to_vec(),
        }]
    }
}

/// A [SignatureService] holding the signing keys of some validators; every solicitation is
/// answered immediately with all of their signatures.
pub(crate) struct QuorumSigners(pub(crate) Vec<SigningKey>);

impl SignatureService for QuorumSigners {
    fn solicit(
        &mut self,
        checkpoint: &Checkpoint,
        _deadline: Instant,
    ) -> Vec<(VerifyingKeyBytes, SignatureBytes)> {
        let id = checkpoint.id();
        self.0
            .iter()
            .map(|key| {
                use ed25519_dalek::Signer;
                (
                    key.verifying_key().to_bytes(),
                    SignatureBytes::new(key.sign(&id.bytes()).to_bytes()),
                )
            })
            .collect()
    }
}

/// A [ValidatorSetSource] that always returns the same set.
pub(crate) struct FixedValidators(pub(crate) ValidatorSet);

impl ValidatorSetSource for FixedValidators {
    fn validator_set(&self, _epoch: Epoch) -> ValidatorSet {
        self.0.clone()
    }
}

/// A [ConflictArbiter] whose vote never arrives.
pub(crate) struct NullArbiter;

impl ConflictArbiter for NullArbiter {
    fn decide(
        &mut self,
        _ours: &fedsync_rs::types::checkpoint::CheckpointHeader,
        _theirs: &fedsync_rs::types::checkpoint::CheckpointHeader,
    ) -> Option<CryptoHash> {
        None
    }
}

pub(crate) fn keypairs(n: usize) -> Vec<SigningKey> {
    let mut csprg = OsRng {};
    (0..n).map(|_| SigningKey::generate(&mut csprg)).collect()
}

pub(crate) fn validator_set(keys: &[SigningKey]) -> ValidatorSet {
    let mut set = ValidatorSet::new();
    for key in keys {
        set.put(&key.verifying_key());
    }
    set
}

pub(crate) fn founder(key: &SigningKey) -> FederationId {
    IdentityProof::federation_id(&key.verifying_key())
}

fn payload(kind: u8, entity: &[u8], amount: u64) -> Payload {
    Payload::new(
        TestPayload {
            kind,
            entity: entity.to_vec(),
            amount,
        }
        .try_to_vec()
        .unwrap(),
    )
}

fn block(
    kind: u8,
    block_type: BlockType,
    entity: &[u8],
    amount: u64,
    signer: &SigningKey,
    parents: Vec<CryptoHash>,
    timestamp: u64,
) -> Block {
    let parents = ParentList::new(
        parents
            .into_iter()
            .map(|id| ParentLink::new(LinkName::new("parent".to_string()), id, None))
            .collect(),
    );
    let mut block = Block::new(
        EncodingTag::new(7),
        payload(kind, entity, amount),
        parents,
        block_type,
        Timestamp::new(timestamp),
    );
    block.sign(signer);
    block
}

/// A signed block updating a `Value` entity.
pub(crate) fn value_block(
    entity: &[u8],
    amount: u64,
    signer: &SigningKey,
    parents: Vec<CryptoHash>,
    timestamp: u64,
) -> Block {
    block(0, BlockType::Economic, entity, amount, signer, parents, timestamp)
}

/// A signed block recording a `Decision` resolution.
pub(crate) fn decision_block(
    entity: &[u8],
    resolution: u64,
    signer: &SigningKey,
    timestamp: u64,
) -> Block {
    block(1, BlockType::Governance, entity, resolution, signer, Vec::new(), timestamp)
}

/// A signed block updating an `Identity` record.
pub(crate) fn identity_block(
    entity: &[u8],
    value: u64,
    signer: &SigningKey,
    timestamp: u64,
) -> Block {
    block(2, BlockType::Identity, entity, value, signer, Vec::new(), timestamp)
}

/// Hand-build a checkpoint for reconciler-level tests, committing to the given block
/// identifiers and signed by `signers`. State root and proofs are left empty: the reconciler
/// does not consult them, and validator-level tests build through the real builder instead.
pub(crate) fn manual_checkpoint(
    federation: FederationId,
    epoch: Epoch,
    previous: CryptoHash,
    block_ids: &[CryptoHash],
    embedded_set: &ValidatorSet,
    signers: &[SigningKey],
) -> Checkpoint {
    let mut checkpoint = Checkpoint {
        federation,
        epoch,
        previous,
        state_root: CryptoHash::zero(),
        block_root: MerkleTree::build(block_ids).root(),
        summaries: Vec::new(),
        validator_set: embedded_set.into(),
        signatures: CheckpointSignatures::new(),
        proofs: CheckpointProofs::empty(),
    };
    sign_checkpoint(&mut checkpoint, signers);
    checkpoint
}

/// Append `signers`' signatures over the checkpoint's identifier.
pub(crate) fn sign_checkpoint(checkpoint: &mut Checkpoint, signers: &[SigningKey]) {
    use ed25519_dalek::Signer;
    let id = checkpoint.id();
    for signer in signers {
        checkpoint.signatures.add(
            signer.verifying_key().to_bytes(),
            SignatureBytes::new(signer.sign(&id.bytes()).to_bytes()),
        );
    }
}
