/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The in-memory decision log: the latest checkpoint plus the raw decided batches since it.
//!
//! The log is deliberately bounded: every `checkpoint_period` execution ids the delivery
//! pipeline replaces the accumulated batches with a fresh application snapshot, so the log never
//! holds more than one checkpoint interval's worth of batches. This is exactly the material a
//! replica needs to answer a state transfer request.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::basic::ExecutionId;
use crate::types::batch::DecidedBatch;
use crate::types::transfer::{Checkpoint, TransferableState};

pub(crate) struct DecisionLog {
    checkpoint: Option<Checkpoint>,
    batches: BTreeMap<ExecutionId, DecidedBatch>,
    last_eid: Option<ExecutionId>,
}

impl DecisionLog {
    pub(crate) fn new() -> DecisionLog {
        DecisionLog {
            checkpoint: None,
            batches: BTreeMap::new(),
            last_eid: None,
        }
    }

    /// Append the raw bytes of a delivered batch, keyed by its execution id.
    pub(crate) fn append(&mut self, eid: ExecutionId, batch: DecidedBatch) {
        self.batches.insert(eid, batch);
        self.advance_frontier(eid);
    }

    /// Record a checkpoint taken at `checkpoint.eid`, dropping every batch it covers.
    pub(crate) fn record_checkpoint(&mut self, checkpoint: Checkpoint) {
        let eid = checkpoint.eid;
        self.batches = self.batches.split_off(&eid.next());
        self.checkpoint = Some(checkpoint);
        self.advance_frontier(eid);
    }

    /// Replace the whole log with the contents of an installed transferable state.
    pub(crate) fn install(&mut self, state: &TransferableState) {
        self.checkpoint = state.checkpoint.clone();
        self.batches = state.batches.clone();
        self.last_eid = Some(state.last_eid);
    }

    /// The transferable state up to exactly `target`. Returns None if this replica cannot
    /// reconstruct the state at `target`: its frontier is below the target, or its checkpoint
    /// already covers execution ids past it.
    pub(crate) fn state_up_to(&self, target: ExecutionId) -> Option<TransferableState> {
        if self.last_eid? < target {
            return None;
        }
        let checkpoint = match &self.checkpoint {
            Some(checkpoint) if checkpoint.eid > target => return None,
            other => other.clone(),
        };
        let floor = checkpoint.as_ref().map(|c| c.eid);
        let batches: BTreeMap<ExecutionId, DecidedBatch> = self
            .batches
            .iter()
            .filter(|(eid, _)| **eid <= target && floor.map_or(true, |f| **eid > f))
            .map(|(eid, batch)| (*eid, batch.clone()))
            .collect();

        let state = TransferableState {
            checkpoint,
            batches,
            last_eid: target,
        };
        state.is_well_formed().then_some(state)
    }

    pub(crate) fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    pub(crate) fn batch_eids(&self) -> Vec<ExecutionId> {
        self.batches.keys().copied().collect()
    }

    pub(crate) fn last_eid(&self) -> Option<ExecutionId> {
        self.last_eid
    }

    fn advance_frontier(&mut self, eid: ExecutionId) {
        self.last_eid = Some(self.last_eid.map_or(eid, |last| last.max(eid)));
    }
}

/// A cloneable read handle on the decision log, used by the state transfer server thread and by
/// library users who want to peek at the log (e.g., in tests and tooling).
#[derive(Clone)]
pub struct DecisionLogCamera {
    inner: Arc<Mutex<DecisionLog>>,
}

impl DecisionLogCamera {
    pub(crate) fn new() -> DecisionLogCamera {
        DecisionLogCamera {
            inner: Arc::new(Mutex::new(DecisionLog::new())),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DecisionLog> {
        self.inner.lock().unwrap()
    }

    /// The transferable state at this replica's current frontier, if it has delivered anything.
    pub fn transferable_state(&self) -> Option<TransferableState> {
        let log = self.lock();
        log.last_eid().and_then(|last| log.state_up_to(last))
    }

    /// The execution id of the latest checkpoint, if any.
    pub fn checkpoint_eid(&self) -> Option<ExecutionId> {
        self.lock().checkpoint().map(|c| c.eid)
    }

    /// The execution ids of the batches currently held since the last checkpoint, ascending.
    pub fn logged_eids(&self) -> Vec<ExecutionId> {
        self.lock().batch_eids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::basic::ReplicaId;

    fn batch() -> DecidedBatch {
        DecidedBatch::new(Vec::new(), 0, ReplicaId::new([0; 32]))
    }

    fn checkpoint(eid: u64) -> Checkpoint {
        Checkpoint {
            eid: ExecutionId::new(eid),
            round: 0,
            proposer: ReplicaId::new([0; 32]),
            snapshot: vec![eid as u8],
        }
    }

    #[test]
    fn checkpoint_drops_covered_batches() {
        let mut log = DecisionLog::new();
        for eid in 0..=5 {
            log.append(ExecutionId::new(eid), batch());
        }
        log.record_checkpoint(checkpoint(3));
        assert_eq!(
            log.batch_eids(),
            vec![ExecutionId::new(4), ExecutionId::new(5)]
        );
        assert_eq!(log.last_eid(), Some(ExecutionId::new(5)));
    }

    #[test]
    fn state_up_to_truncates_at_the_target() {
        let mut log = DecisionLog::new();
        log.record_checkpoint(checkpoint(3));
        for eid in 4..=8 {
            log.append(ExecutionId::new(eid), batch());
        }
        let state = log.state_up_to(ExecutionId::new(6)).unwrap();
        assert_eq!(state.last_eid, ExecutionId::new(6));
        assert_eq!(state.batches.len(), 3);
        assert!(state.is_well_formed());
    }

    #[test]
    fn state_up_to_refuses_targets_it_cannot_serve() {
        let mut log = DecisionLog::new();
        log.record_checkpoint(checkpoint(6));
        // Frontier below target.
        assert!(log.state_up_to(ExecutionId::new(9)).is_none());
        // Checkpoint past target.
        assert!(log.state_up_to(ExecutionId::new(4)).is_none());
        // Exactly at the checkpoint is fine.
        assert!(log.state_up_to(ExecutionId::new(6)).is_some());
    }
}
