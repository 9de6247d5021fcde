/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for [Checkpoint] and [TransferableState]: the units of state a replica ships to a
//! lagging peer.
//!
//! A checkpoint is always taken at the boundary of a fully delivered batch, never at a state "in
//! between" batches. A transferable state is a checkpoint plus the ordered batches from
//! `(checkpoint eid, last eid]`: exactly what a lagging replica needs to reconstruct itself up
//! to the group's decided frontier.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use super::basic::{CryptoHash, ExecutionId, ReplicaId};
use super::batch::DecidedBatch;

/// An application-state snapshot plus the execution id (and decision round/proposer) at which it
/// was taken.
#[derive(Clone, BorshDeserialize, BorshSerialize)]
pub struct Checkpoint {
    pub eid: ExecutionId,
    pub round: u32,
    pub proposer: ReplicaId,
    pub snapshot: Vec<u8>,
}

/// A checkpoint and the ordered set of decided batches needed to reconstruct a replica from the
/// checkpoint up to `last_eid`.
///
/// Invariants (enforced by [TransferableState::is_well_formed], which installation requires):
/// - the checkpoint's eid is at most `last_eid`;
/// - every execution id in `(checkpoint eid, last_eid]` has exactly one stored batch, no gaps.
#[derive(Clone, BorshDeserialize, BorshSerialize)]
pub struct TransferableState {
    pub checkpoint: Option<Checkpoint>,
    pub batches: BTreeMap<ExecutionId, DecidedBatch>,
    pub last_eid: ExecutionId,
}

impl TransferableState {
    /// Check the structural invariants above. A state that fails this check is never handed to
    /// the application, regardless of how many peers vouched for its hash.
    pub fn is_well_formed(&self) -> bool {
        let floor = match &self.checkpoint {
            Some(checkpoint) => {
                if checkpoint.eid > self.last_eid {
                    return false;
                }
                Some(checkpoint.eid)
            }
            None => None,
        };

        // The batches must cover exactly (floor, last_eid], in order, with no gaps.
        let mut expected = match floor {
            Some(eid) => eid.next(),
            None => ExecutionId::new(0),
        };
        if expected > self.last_eid && !self.batches.is_empty() {
            return false;
        }
        for eid in self.batches.keys() {
            if *eid != expected {
                return false;
            }
            expected = expected.next();
        }
        match self.batches.keys().next_back() {
            Some(last) => *last == self.last_eid,
            // A bare checkpoint is fine as long as it sits exactly at the frontier.
            None => floor == Some(self.last_eid),
        }
    }

    /// The content hash over which state-transfer replies are compared: the SHA256 digest of the
    /// state's borsh encoding. Pre-parsed request caches are excluded from the encoding, so the
    /// hash only covers wire-visible content.
    pub fn content_hash(&self) -> CryptoHash {
        let encoded = self.try_to_vec().unwrap();
        CryptoHash::digest_of(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> DecidedBatch {
        DecidedBatch::new(Vec::new(), 0, ReplicaId::new([0; 32]))
    }

    fn checkpoint(eid: u64) -> Checkpoint {
        Checkpoint {
            eid: ExecutionId::new(eid),
            round: 0,
            proposer: ReplicaId::new([0; 32]),
            snapshot: vec![42],
        }
    }

    #[test]
    fn contiguous_state_is_well_formed() {
        let state = TransferableState {
            checkpoint: Some(checkpoint(3)),
            batches: (4..=6)
                .map(|eid| (ExecutionId::new(eid), batch()))
                .collect(),
            last_eid: ExecutionId::new(6),
        };
        assert!(state.is_well_formed());
    }

    #[test]
    fn a_gap_in_the_batches_is_rejected() {
        let state = TransferableState {
            checkpoint: Some(checkpoint(3)),
            batches: [4, 6]
                .into_iter()
                .map(|eid| (ExecutionId::new(eid), batch()))
                .collect(),
            last_eid: ExecutionId::new(6),
        };
        assert!(!state.is_well_formed());
    }

    #[test]
    fn frontier_must_match_the_newest_batch() {
        let state = TransferableState {
            checkpoint: Some(checkpoint(3)),
            batches: (4..=5)
                .map(|eid| (ExecutionId::new(eid), batch()))
                .collect(),
            last_eid: ExecutionId::new(6),
        };
        assert!(!state.is_well_formed());
    }

    #[test]
    fn bare_checkpoint_at_the_frontier_is_well_formed() {
        let state = TransferableState {
            checkpoint: Some(checkpoint(6)),
            batches: BTreeMap::new(),
            last_eid: ExecutionId::new(6),
        };
        assert!(state.is_well_formed());
    }

    #[test]
    fn content_hash_ignores_the_parsed_cache() {
        let plain = TransferableState {
            checkpoint: Some(checkpoint(1)),
            batches: [(ExecutionId::new(2), batch())].into_iter().collect(),
            last_eid: ExecutionId::new(2),
        };
        let mut cached = plain.clone();
        let eid = ExecutionId::new(2);
        let with_cache = cached.batches.remove(&eid).unwrap().with_parsed_requests(Vec::new());
        cached.batches.insert(eid, with_cache);
        assert_eq!(plain.content_hash(), cached.content_hash());
    }
}
