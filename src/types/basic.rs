/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types: those that are sent around and inspected, but have no active behavior. These
//! types follow the newtype pattern, and the API for using them is defined in this module.

use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, AddAssign, Sub},
    time::{SystemTime, UNIX_EPOCH},
};

/// Bytes of an Ed25519 verifying key. Kept as a plain array so that it can be Borsh-serialized;
/// conversion to [`ed25519_dalek::VerifyingKey`] is fallible and happens at verification sites.
pub type VerifyingKeyBytes = [u8; 32];

/// The content identifier of a block or checkpoint: the SHA-256 digest of its canonical Borsh
/// encoding.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zero hash, used as the `previous` reference of a genesis checkpoint and as the
    /// root of an empty Merkle tree.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a federation: the SHA-256 digest of the federation's announcement verifying
/// key. The binding between the two is checked by
/// [`IdentityProof::is_correct`](crate::peers::registry::IdentityProof::is_correct).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct FederationId([u8; 32]);

impl FederationId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for FederationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Debug for FederationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Epoch number of a checkpoint. Strictly increasing by one along a checkpoint chain.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Epoch(u64);

impl Epoch {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// The epoch before the first checkpoint is built.
    pub const fn init() -> Self {
        Self(0)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// The epoch `n` before this one, saturating at zero.
    pub fn saturating_sub(&self, n: u64) -> Epoch {
        Epoch(self.0.saturating_sub(n))
    }
}

impl Display for Epoch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Epoch {
    type Output = Epoch;

    fn add(self, rhs: u64) -> Self::Output {
        Epoch(self.0.add(rhs))
    }
}

impl AddAssign<u64> for Epoch {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Sub<Epoch> for Epoch {
    type Output = u64;

    fn sub(self, rhs: Epoch) -> Self::Output {
        self.0 - rhs.0
    }
}

/// An inclusive range of epochs, used in checkpoint header requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct EpochRange {
    pub start: Epoch,
    pub end: Epoch,
}

impl EpochRange {
    pub fn new(start: Epoch, end: Epoch) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, epoch: Epoch) -> bool {
        self.start <= epoch && epoch <= self.end
    }

    pub fn iter(&self) -> impl Iterator<Item = Epoch> {
        (self.start.int()..=self.end.int()).map(Epoch::new)
    }
}

/// Creation time of a block, in whole seconds since the Unix epoch.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    /// The current system time.
    pub fn now() -> Timestamp {
        // Safety: system clocks on all target platforms are later than the Unix epoch.
        Timestamp(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs(),
        )
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Tag describing how a block's payload bytes are encoded. Opaque to this crate; assigned and
/// interpreted by the collaborator subsystems that produce payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct EncodingTag(u16);

impl EncodingTag {
    /// The tag engine-produced records (checkpoint wrappers) carry: canonical Borsh.
    pub const BORSH: EncodingTag = EncodingTag::new(0);

    pub const fn new(int: u16) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u16 {
        self.0
    }
}

/// Raw payload bytes of a block. Opaque to this crate beyond hashing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &Vec<u8> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Name of a parent link, assigned by the producing collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct LinkName(String);

impl LinkName {
    pub fn new(name: String) -> Self {
        Self(name)
    }

    pub fn str(&self) -> &str {
        &self.0
    }
}

/// Signature represented in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

/// Trust score of a peer federation, a value in `[0.0, 1.0]`. All arithmetic on trust scores
/// clamps to this interval.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct TrustScore(f64);

impl TrustScore {
    /// Trust assigned to a freshly discovered peer.
    pub const fn initial() -> Self {
        Self(0.5)
    }

    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    pub const fn value(&self) -> f64 {
        self.0
    }

    pub fn increase(&mut self, delta: f64) {
        self.0 = (self.0 + delta).clamp(0.0, 1.0)
    }

    pub fn decrease(&mut self, delta: f64) {
        self.0 = (self.0 - delta).clamp(0.0, 1.0)
    }

    pub fn floor(&mut self) {
        self.0 = 0.0
    }
}
