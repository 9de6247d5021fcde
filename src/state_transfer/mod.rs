/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state transfer subsystem: detecting that this replica has fallen behind the group,
//! retrieving the missing state from peers, and answering the symmetric requests of other
//! lagging replicas (the [server]).
//!
//! Detection is evidence-based: the consensus layer reports every execution id it sees a peer
//! message reference ahead of our own progress, and only when more than `f` distinct peers have
//! given such evidence do we conclude we are behind (fewer could all be lying). Retrieval then
//! asks one randomly chosen reporting peer for the full
//! [TransferableState](crate::types::transfer::TransferableState) and everyone else for its
//! content hash; the state is installed only once `f+1` peers besides the source vouch for the
//! hash of the full state we were shipped.

pub mod messages;
pub(crate) mod server;
pub mod status;

use std::collections::{BTreeMap, HashSet};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use rand::seq::SliceRandom;

use crate::app::{App, ClientsManager};
use crate::delivery::deliver_decided_batch;
use crate::delivery::log::DecisionLogCamera;
use crate::events::{AbandonTransferEvent, EndTransferEvent, Event, StartTransferEvent};
use crate::networking::{Network, SenderHandle, TransferClientStub};
use crate::types::basic::{ExecutionId, ReplicaId};
use crate::types::transfer::TransferableState;
use crate::types::view::View;

use self::messages::{StateReplyContent, StateTransferReply, StateTransferRequest};
use self::status::{ReplicaPhase, SharedStatus};

pub(crate) struct StateTransferConfiguration {
    pub(crate) me: ReplicaId,
    pub(crate) view: View,
    pub(crate) poll_interval: Duration,
}

/// What [StateTransferCoordinator::on_reply] decided to do with the transfer after taking a new
/// reply into account. Computed under the status lock, acted on outside it (installation needs
/// the application lock, which is always taken first).
enum Verdict {
    Wait,
    Install(TransferableState),
    Abandon { source_faulty: bool },
}

/// The thread-side of state transfer on the lagging replica: consumes lag reports from the
/// consensus layer and transfer replies from peers, and drives the transfer state machine in
/// [SharedStatus].
pub(crate) struct StateTransferCoordinator<A: App, C: ClientsManager, N: Network + 'static> {
    config: StateTransferConfiguration,
    app: Arc<Mutex<A>>,
    clients_manager: Arc<Mutex<C>>,
    log: DecisionLogCamera,
    status: Arc<SharedStatus>,
    reports: Receiver<(ReplicaId, ExecutionId)>,
    replies: TransferClientStub,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<A: App, C: ClientsManager, N: Network + 'static> StateTransferCoordinator<A, C, N> {
    pub(crate) fn new(
        config: StateTransferConfiguration,
        app: Arc<Mutex<A>>,
        clients_manager: Arc<Mutex<C>>,
        log: DecisionLogCamera,
        status: Arc<SharedStatus>,
        reports: Receiver<(ReplicaId, ExecutionId)>,
        replies: TransferClientStub,
        sender: SenderHandle<N>,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> StateTransferCoordinator<A, C, N> {
        StateTransferCoordinator {
            config,
            app,
            clients_manager,
            log,
            status,
            reports,
            replies,
            sender,
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("State transfer thread disconnected from main thread")
                }
            }

            while let Ok((origin, seen)) = self.reports.try_recv() {
                self.on_report_ahead(origin, seen);
            }

            let deadline = Instant::now() + self.config.poll_interval;
            if let Some((origin, reply)) = self.replies.recv_reply(deadline) {
                self.on_reply(origin, reply);
            }
        })
    }

    /// Take note that a message from `origin` referenced the execution id `seen`, which is
    /// ahead of what this replica has delivered. Once more than `f` distinct peers have
    /// referenced execution ids ahead of ours, start a transfer: the target is one before the
    /// highest such id (the group is still deciding `seen` itself), and the source is one of
    /// the replicas that gave evidence of being ahead.
    fn on_report_ahead(&mut self, origin: ReplicaId, seen: ExecutionId) {
        if origin == self.config.me || !self.config.view.contains(&origin) {
            return;
        }

        let (target, source) = {
            let mut status = self.status.lock();
            if status.phase == ReplicaPhase::RetrievingState {
                return;
            }

            let next = status.next_eid();
            // Only ids whose predecessor we have not delivered are evidence of lag.
            match seen.prev() {
                Some(target) if target >= next => (),
                _ => return,
            }
            // Drop evidence our own progress has overtaken.
            status.lag_reports = status.lag_reports.split_off(&next.next());
            status.lag_reports.entry(seen).or_default().insert(origin);

            // Walk the reported ids from the highest down, pooling reporters: a peer that
            // referenced a higher id also vouches for every lower one.
            let mut vouchers: HashSet<ReplicaId> = HashSet::new();
            let mut vouched = None;
            for (seen, reporters) in status.lag_reports.iter().rev() {
                vouchers.extend(reporters.iter().copied());
                if vouchers.len() >= self.config.view.lag_quorum() {
                    vouched = Some(*seen);
                    break;
                }
            }
            let Some(vouched) = vouched else { return };
            let Some(target) = vouched.prev() else { return };

            let candidates = eligible_sources(&status.lag_reports, vouched, &status.ineligible);
            let Some(source) = candidates.choose(&mut rand::thread_rng()).copied() else {
                return;
            };

            status.phase = ReplicaPhase::RetrievingState;
            status.waiting = Some(target);
            status.source = Some(source);
            status.replies.clear();
            (target, source)
        };

        self.sender.broadcast_transfer_request(StateTransferRequest {
            target,
            requester: self.config.me,
            source,
            view: self.config.view.id(),
        });

        Event::publish(
            &self.event_publisher,
            Event::StartTransfer(StartTransferEvent {
                timestamp: SystemTime::now(),
                target,
                source,
            }),
        );
    }

    fn on_reply(&mut self, origin: ReplicaId, reply: StateTransferReply) {
        let verdict = {
            let mut status = self.status.lock();
            if status.phase != ReplicaPhase::RetrievingState {
                return;
            }
            let (Some(target), Some(source)) = (status.waiting, status.source) else {
                return;
            };
            if reply.target != target
                || reply.sender != origin
                || !self.config.view.contains(&origin)
            {
                return;
            }
            // Only the designated source ships a full state; a full state from anyone else is
            // discarded outright.
            if matches!(reply.content, StateReplyContent::Full(_)) && origin != source {
                return;
            }
            status.replies.entry(origin).or_insert(reply.content);

            Self::judge(&status.replies, source, target, &self.config.view)
        };

        match verdict {
            Verdict::Wait => (),
            Verdict::Install(state) => self.install(state),
            Verdict::Abandon { source_faulty } => self.abandon(source_faulty),
        }
    }

    /// Decide, from the replies collected so far, whether the transfer can complete, must be
    /// abandoned, or needs more replies.
    fn judge(
        replies: &std::collections::HashMap<ReplicaId, StateReplyContent>,
        source: ReplicaId,
        target: ExecutionId,
        view: &View,
    ) -> Verdict {
        let match_quorum = view.state_match_quorum();

        if let Some(StateReplyContent::Full(state)) = replies.get(&source) {
            let vouched = state.content_hash();
            let matching = replies
                .iter()
                .filter(|(peer, content)| **peer != source && content.hash() == vouched)
                .count();
            if matching >= match_quorum {
                if state.is_well_formed() && state.last_eid == target {
                    return Verdict::Install(state.clone());
                }
                // Hash-vouched but structurally unusable. The source shipped it; hold the
                // source responsible.
                return Verdict::Abandon {
                    source_faulty: true,
                };
            }
            // Contradiction: f+1 peers agree on a hash that is not the one the source shipped.
            let contradicted = replies
                .iter()
                .filter(|(peer, _)| **peer != source)
                .fold(
                    std::collections::HashMap::new(),
                    |mut counts, (_, content)| {
                        *counts.entry(content.hash()).or_insert(0usize) += 1;
                        counts
                    },
                )
                .into_iter()
                .any(|(hash, count)| hash != vouched && count >= match_quorum);
            if contradicted {
                return Verdict::Abandon {
                    source_faulty: true,
                };
            }
        }

        // More than half the view has answered and nothing validated: stop waiting. The next
        // round of lag reports will retry with a fresh source.
        if replies.len() >= view.majority() {
            return Verdict::Abandon {
                source_faulty: false,
            };
        }

        Verdict::Wait
    }

    /// Install a validated state: hand the checkpoint snapshot to the application, replay the
    /// batches after it through the ordinary delivery path, and move the frontier to the target.
    /// The delivery worker is parked on the status condvar throughout and re-reads the frontier
    /// when it wakes.
    fn install(&mut self, state: TransferableState) {
        let target = state.last_eid;
        let mut app = self.app.lock().unwrap();
        let mut clients_manager = self.clients_manager.lock().unwrap();
        let floor = {
            let status = self.status.lock();
            // The transfer could have been torn down between computing the verdict and taking
            // the application lock.
            if status.waiting != Some(target) {
                return;
            }
            // Re-read under the application lock: a delivery that was mid-flight when the
            // transfer started may have advanced the frontier since.
            status.last_delivered
        };

        if let Some(checkpoint) = &state.checkpoint {
            app.install_snapshot(&checkpoint.snapshot);
        }

        let mut replayed = 0;
        for (eid, batch) in &state.batches {
            // Without a snapshot the application keeps its current state, so batches at or
            // below the local frontier have already been applied through the normal path.
            if state.checkpoint.is_none() && floor.map_or(false, |delivered| *eid <= delivered) {
                continue;
            }
            let delivered = deliver_decided_batch(
                *eid,
                batch,
                &mut *app,
                &mut *clients_manager,
                &mut self.sender,
                self.config.me,
                &self.config.view,
                &self.event_publisher,
            );
            if delivered.is_ok() {
                replayed += 1;
            }
        }

        self.log.lock().install(&state);

        {
            let mut status = self.status.lock();
            status.last_delivered = Some(target);
            status.clear_transfer();
        }
        self.status.notify_resumed();

        Event::publish(
            &self.event_publisher,
            Event::EndTransfer(EndTransferEvent {
                timestamp: SystemTime::now(),
                target,
                batches_replayed: replayed,
            }),
        );
    }

    fn abandon(&mut self, source_faulty: bool) {
        let target = {
            let mut status = self.status.lock();
            let Some(target) = status.waiting else { return };
            if source_faulty {
                if let Some(source) = status.source {
                    status.ineligible.insert(source);
                }
            }
            status.clear_transfer();
            target
        };
        self.status.notify_resumed();

        Event::publish(
            &self.event_publisher,
            Event::AbandonTransfer(AbandonTransferEvent {
                timestamp: SystemTime::now(),
                target,
                source_faulty,
            }),
        );
    }
}

/// The reporters eligible to serve a transfer towards `vouched - 1`: those whose referenced
/// execution id is at least `vouched` (a reporter of a lower id never claimed to know the
/// target) and who are not blacklisted.
fn eligible_sources(
    lag_reports: &BTreeMap<ExecutionId, HashSet<ReplicaId>>,
    vouched: ExecutionId,
    ineligible: &HashSet<ReplicaId>,
) -> Vec<ReplicaId> {
    lag_reports
        .range(vouched..)
        .flat_map(|(_, reporters)| reporters.iter())
        .filter(|peer| !ineligible.contains(*peer))
        .copied()
        .collect::<HashSet<ReplicaId>>()
        .into_iter()
        .collect()
}
