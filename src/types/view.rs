/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [View] type: the membership/configuration epoch of the replica group,
//! together with the quorum arithmetic that every safety argument in this crate rests on.
//!
//! A view consists of a [view id](crate::types::basic::ViewId), the identities of the replicas
//! in the group, and the fault threshold `f`: the maximum number of replicas that may fail
//! (arbitrarily, under [`FaultModel::Byzantine`], or by crashing, under
//! [`FaultModel::CrashOnly`]) without compromising safety.
//!
//! ## Quorum sizes
//!
//! Four different "enough evidence" thresholds appear in the protocol, and they are deliberately
//! kept distinct (collapsing them could change fault tolerance):
//!
//! - [`View::certification_quorum`]: `⌈(n+f)/2⌉+1` (Byzantine) or `⌈n/2⌉+1` (crash-only) matching
//!   replies needed before the client releases a certified response. Any two quorums of this size
//!   intersect in at least one honest replica.
//! - [`View::lag_quorum`]: `f+1` distinct reports of a later execution id needed before a replica
//!   concludes it is behind. This is the minimum that guarantees at least one honest reporter.
//! - [`View::state_match_quorum`]: `f+1` matching content hashes (besides the source's own) needed
//!   to authenticate a transferred state.
//! - [`View::majority`]: `⌊n/2⌋+1` replies, after which a transfer attempt that still failed to
//!   validate a state is abandoned rather than waited on forever.

use borsh::{BorshDeserialize, BorshSerialize};

use super::basic::{ReplicaId, ViewId};

/// The failure assumption a client operates under, which determines the size of the reply quorum
/// it must collect before certifying a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum FaultModel {
    /// Up to `f` replicas may behave arbitrarily.
    Byzantine,
    /// Up to `f` replicas may crash or be silent, but none lies.
    CrashOnly,
}

/// The current replica set, fault threshold `f`, and view id. Every message and decision is
/// tagged with the view it was produced under.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct View {
    id: ViewId,
    replicas: Vec<ReplicaId>,
    faults: u64,
}

impl View {
    /// Create a view. `replicas` is deduplicated and sorted so that two views with the same
    /// membership compare equal regardless of construction order.
    pub fn new(id: ViewId, mut replicas: Vec<ReplicaId>, faults: u64) -> View {
        replicas.sort();
        replicas.dedup();
        View {
            id,
            replicas,
            faults,
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn replicas(&self) -> &[ReplicaId] {
        &self.replicas
    }

    /// The number of replicas in the view, `n`.
    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// The fault threshold, `f`.
    pub fn faults(&self) -> u64 {
        self.faults
    }

    pub fn contains(&self, replica: &ReplicaId) -> bool {
        self.replicas.binary_search(replica).is_ok()
    }

    /// The number of byte-identical replies a client must collect before certifying a response:
    /// `⌈(n+f)/2⌉+1` under Byzantine assumptions, `⌈n/2⌉+1` under crash-only assumptions.
    ///
    /// Note that the ceiling matters for small `n`: with `n = 4, f = 1` the Byzantine quorum is
    /// `⌈5/2⌉+1 = 4`, so three matching replies are not enough.
    pub fn certification_quorum(&self, fault_model: FaultModel) -> usize {
        let n = self.replicas.len() as u64;
        let quorum = match fault_model {
            FaultModel::Byzantine => ceil_div(n + self.faults, 2) + 1,
            FaultModel::CrashOnly => ceil_div(n, 2) + 1,
        };
        quorum as usize
    }

    /// The number of distinct senders that must report a later execution id before a replica
    /// concludes it is lagging: `f+1`, the minimum that cannot be fabricated by faulty replicas
    /// alone.
    pub fn lag_quorum(&self) -> usize {
        self.faults as usize + 1
    }

    /// The number of matching content hashes, besides the designated source's own, needed to
    /// authenticate a transferred state: `f+1`.
    pub fn state_match_quorum(&self) -> usize {
        self.faults as usize + 1
    }

    /// More than half the view: `⌊n/2⌋+1`. Once this many state-transfer replies have arrived
    /// without a validated state, the attempt is abandoned.
    pub fn majority(&self) -> usize {
        self.replicas.len() / 2 + 1
    }
}

fn ceil_div(dividend: u64, divisor: u64) -> u64 {
    (dividend + divisor - 1) / divisor
}
