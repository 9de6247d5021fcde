/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types that are sent around and inspected but have no active behavior. These types
//! follow the newtype pattern, and the API for using them is defined in this module.
//!
//! The central type here is the [`ExecutionId`]: the monotonically increasing integer that
//! identifies one consensus decision. The total order of the replicated log is the ascending
//! order of execution ids.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Debug, Display, Formatter};

/// Identifies one consensus instance, and therefore one decided batch. Defines the total order
/// of delivery: for execution ids `e1 < e2`, every request in `e1`'s batch is applied to the
/// application before any request in `e2`'s batch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct ExecutionId(u64);

impl ExecutionId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    /// The execution id immediately after this one.
    pub fn next(&self) -> ExecutionId {
        ExecutionId(self.0 + 1)
    }

    /// The execution id immediately before this one. Returns `None` for execution id 0.
    pub fn prev(&self) -> Option<ExecutionId> {
        self.0.checked_sub(1).map(ExecutionId)
    }

    /// Whether this execution id falls on a checkpoint boundary, i.e., whether it is a positive
    /// multiple of `period`.
    pub fn is_checkpoint_boundary(&self, period: u64) -> bool {
        self.0 > 0 && self.0 % period == 0
    }
}

impl Display for ExecutionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for ExecutionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Identifies the membership/configuration epoch a message or decision was produced under.
/// Replicas and clients reject (for purposes of progress) anything tagged with a view id older
/// than their own.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ViewId(u64);

impl ViewId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for ViewId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Identifies a client's session with the replica group. A request is uniquely identified by
/// (sender, sequence) within a session.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Per-client, monotonically increasing request sequence number.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub fn increment(&mut self) {
        self.0 += 1
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Identity of a replica or client: the bytes of its Ed25519 verifying key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct ReplicaId([u8; 32]);

impl ReplicaId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl From<&ed25519_dalek::VerifyingKey> for ReplicaId {
    fn from(vk: &ed25519_dalek::VerifyingKey) -> Self {
        Self(vk.to_bytes())
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Identities are printed as the first seven characters of their Base64 encoding.
        let encoded = STANDARD_NO_PAD.encode(self.0);
        f.write_str(&encoded[0..7])
    }
}

impl Debug for ReplicaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// The SHA256 hash of a byte sequence, used to authenticate transferred state and hashed replies.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Hash an arbitrary byte sequence.
    pub fn digest_of(bytes: &[u8]) -> CryptoHash {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        CryptoHash(hasher.finalize().into())
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        f.write_str(&encoded[0..7])
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// An Ed25519 signature in bytes. The delivery core carries this material but does not verify
/// it on the delivery path: request admission (and therefore signature checking) belongs to the
/// clients manager at the front door.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Default for SignatureBytes {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        f.write_str(&encoded[0..7])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_boundaries_are_positive_multiples_of_the_period() {
        assert!(!ExecutionId::new(0).is_checkpoint_boundary(3));
        assert!(!ExecutionId::new(2).is_checkpoint_boundary(3));
        assert!(ExecutionId::new(3).is_checkpoint_boundary(3));
        assert!(!ExecutionId::new(4).is_checkpoint_boundary(3));
        assert!(ExecutionId::new(9).is_checkpoint_boundary(3));
    }

    #[test]
    fn execution_id_neighbours() {
        assert_eq!(ExecutionId::new(0).prev(), None);
        assert_eq!(ExecutionId::new(5).prev(), Some(ExecutionId::new(4)));
        assert_eq!(ExecutionId::new(5).next(), ExecutionId::new(6));
    }
}
