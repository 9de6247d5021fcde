/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The shared transfer status: the one piece of state both the delivery pipeline and the state
//! transfer coordinator read and write.
//!
//! All of it lives behind a single mutex ([SharedStatus]) paired with a condvar. The delivery
//! worker parks on the condvar while a transfer is in progress and re-checks the delivery
//! frontier under the lock before applying anything, so a decision that was queued before a
//! snapshot install can never be applied out of order after it.
//!
//! Lock ordering: any thread that needs both the application lock and this status lock acquires
//! the application lock first.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::state_transfer::messages::StateReplyContent;
use crate::types::basic::{ExecutionId, ReplicaId};

/// Whether the replica is operating normally or is blocked retrieving state from its peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaPhase {
    Normal,
    RetrievingState,
}

pub(crate) struct TransferStatus {
    pub(crate) phase: ReplicaPhase,
    /// The newest execution id this replica has applied, None before the first delivery.
    pub(crate) last_delivered: Option<ExecutionId>,
    /// The target execution id of the in-progress transfer, if any.
    pub(crate) waiting: Option<ExecutionId>,
    /// The replica designated to ship the full state for the in-progress transfer.
    pub(crate) source: Option<ReplicaId>,
    /// Lag evidence: for each reported ahead-of-us execution id, the distinct replicas that
    /// reported it.
    pub(crate) lag_reports: BTreeMap<ExecutionId, HashSet<ReplicaId>>,
    /// State transfer replies received for the in-progress transfer, at most one per peer.
    pub(crate) replies: HashMap<ReplicaId, StateReplyContent>,
    /// Replicas that served a contradicted full state. Never picked as a source again within
    /// this view.
    pub(crate) ineligible: HashSet<ReplicaId>,
}

impl TransferStatus {
    fn new() -> TransferStatus {
        TransferStatus {
            phase: ReplicaPhase::Normal,
            last_delivered: None,
            waiting: None,
            source: None,
            lag_reports: BTreeMap::new(),
            replies: HashMap::new(),
            ineligible: HashSet::new(),
        }
    }

    /// The execution id this replica expects to deliver next.
    pub(crate) fn next_eid(&self) -> ExecutionId {
        match self.last_delivered {
            Some(eid) => eid.next(),
            None => ExecutionId::new(0),
        }
    }

    /// Reset the fields describing an in-progress transfer, keeping the frontier and the
    /// source blacklist.
    pub(crate) fn clear_transfer(&mut self) {
        self.phase = ReplicaPhase::Normal;
        self.waiting = None;
        self.source = None;
        self.lag_reports.clear();
        self.replies.clear();
    }
}

/// The [TransferStatus] mutex together with the condvar the delivery worker parks on while a
/// transfer is in progress.
pub(crate) struct SharedStatus {
    status: Mutex<TransferStatus>,
    resumed: Condvar,
}

impl SharedStatus {
    pub(crate) fn new() -> SharedStatus {
        SharedStatus {
            status: Mutex::new(TransferStatus::new()),
            resumed: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TransferStatus> {
        self.status.lock().unwrap()
    }

    /// If a transfer is in progress, wait until either it finishes (or is abandoned) or
    /// `timeout` elapses. Returns the phase observed on the way out, so callers can decide
    /// whether to go back to waiting.
    pub(crate) fn wait_while_retrieving(&self, timeout: Duration) -> ReplicaPhase {
        let guard = self.status.lock().unwrap();
        let (guard, _) = self
            .resumed
            .wait_timeout_while(guard, timeout, |status| {
                status.phase == ReplicaPhase::RetrievingState
            })
            .unwrap();
        guard.phase
    }

    /// Wake the delivery worker. Called after a transfer finishes or is abandoned.
    pub(crate) fn notify_resumed(&self) {
        self.resumed.notify_all();
    }

    pub(crate) fn is_retrieving(&self) -> bool {
        self.lock().phase == ReplicaPhase::RetrievingState
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn next_eid_starts_at_zero() {
        let status = SharedStatus::new();
        assert_eq!(status.lock().next_eid(), ExecutionId::new(0));
        status.lock().last_delivered = Some(ExecutionId::new(4));
        assert_eq!(status.lock().next_eid(), ExecutionId::new(5));
    }

    #[test]
    fn clearing_a_transfer_keeps_the_frontier_and_the_blacklist() {
        let status = SharedStatus::new();
        {
            let mut guard = status.lock();
            guard.phase = ReplicaPhase::RetrievingState;
            guard.last_delivered = Some(ExecutionId::new(2));
            guard.waiting = Some(ExecutionId::new(9));
            guard.source = Some(ReplicaId::new([1; 32]));
            guard.ineligible.insert(ReplicaId::new([1; 32]));
            guard.clear_transfer();
        }
        let guard = status.lock();
        assert_eq!(guard.phase, ReplicaPhase::Normal);
        assert_eq!(guard.last_delivered, Some(ExecutionId::new(2)));
        assert_eq!(guard.waiting, None);
        assert!(guard.ineligible.contains(&ReplicaId::new([1; 32])));
    }

    #[test]
    fn waiter_is_released_when_the_transfer_ends() {
        let status = Arc::new(SharedStatus::new());
        status.lock().phase = ReplicaPhase::RetrievingState;

        let waiter = {
            let status = Arc::clone(&status);
            thread::spawn(move || {
                let start = Instant::now();
                while status.wait_while_retrieving(Duration::from_millis(50))
                    == ReplicaPhase::RetrievingState
                {
                    if start.elapsed() > Duration::from_secs(5) {
                        panic!("delivery worker was never released");
                    }
                }
            })
        };

        thread::sleep(Duration::from_millis(100));
        status.lock().clear_transfer();
        status.notify_resumed();
        waiter.join().unwrap();
    }
}
