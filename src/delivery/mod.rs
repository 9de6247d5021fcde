/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The delivery pipeline: the thread that takes decided batches off the consensus layer and
//! applies them to the application in strict execution id order, exactly once.
//!
//! Decisions may arrive out of order (consensus instances can finish out of order); the pipeline
//! buffers them and only ever applies the next expected execution id. While the state transfer
//! coordinator is retrieving state, the pipeline parks on the shared status condvar, and after
//! waking it re-reads the delivery frontier under the status lock, so decisions that were made
//! redundant by an installed snapshot are discarded instead of re-applied.

pub mod log;

use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::app::{App, ClientsManager, ExecutionMode};
use crate::events::{CheckpointEvent, DeliverBatchEvent, DeliverFailureEvent, Event};
use crate::messages::{ReplyContent, ReplyMessage};
use crate::networking::{Network, SenderHandle};
use crate::state_transfer::status::{ReplicaPhase, SharedStatus};
use crate::types::basic::{ExecutionId, ReplicaId};
use crate::types::batch::{DecidedBatch, DeliveryContext, MalformedBatch};
use crate::types::transfer::Checkpoint;
use crate::types::view::View;

use self::log::DecisionLogCamera;

/// Returned by [crate::replica::Replica::submit_decision] when the replica has already shut
/// down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryShutDown;

/// The submitting end of the decision queue, held by the replica handle.
pub(crate) struct DeliveryHandle {
    decisions: Sender<(ExecutionId, DecidedBatch)>,
}

impl DeliveryHandle {
    pub(crate) fn new(decisions: Sender<(ExecutionId, DecidedBatch)>) -> DeliveryHandle {
        DeliveryHandle { decisions }
    }

    pub(crate) fn submit(
        &self,
        eid: ExecutionId,
        batch: DecidedBatch,
    ) -> Result<(), DeliveryShutDown> {
        self.decisions
            .send((eid, batch))
            .map_err(|_| DeliveryShutDown)
    }
}

pub(crate) struct DeliveryConfiguration {
    pub(crate) me: ReplicaId,
    pub(crate) view: View,
    pub(crate) checkpoint_period: u64,
    pub(crate) poll_interval: Duration,
}

pub(crate) struct DeliveryPipeline<A: App, C: ClientsManager, N: Network + 'static> {
    config: DeliveryConfiguration,
    app: Arc<Mutex<A>>,
    clients_manager: Arc<Mutex<C>>,
    log: DecisionLogCamera,
    status: Arc<SharedStatus>,
    decisions: Receiver<(ExecutionId, DecidedBatch)>,
    /// Decisions that arrived ahead of the next expected execution id, keyed by theirs.
    pending: BTreeMap<ExecutionId, DecidedBatch>,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<A: App, C: ClientsManager, N: Network + 'static> DeliveryPipeline<A, C, N> {
    pub(crate) fn new(
        config: DeliveryConfiguration,
        app: Arc<Mutex<A>>,
        clients_manager: Arc<Mutex<C>>,
        log: DecisionLogCamera,
        status: Arc<SharedStatus>,
        decisions: Receiver<(ExecutionId, DecidedBatch)>,
        sender: SenderHandle<N>,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> DeliveryPipeline<A, C, N> {
        DeliveryPipeline {
            config,
            app,
            clients_manager,
            log,
            status,
            decisions,
            pending: BTreeMap::new(),
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
                    panic!("Delivery thread disconnected from main thread")
                }
            }

            if self.status.wait_while_retrieving(self.config.poll_interval)
                == ReplicaPhase::RetrievingState
            {
                continue;
            }

            match self.decisions.recv_timeout(self.config.poll_interval) {
                Ok((eid, batch)) => {
                    // First submission for an execution id wins; consensus decides each id
                    // exactly once, so a duplicate here is a resend.
                    self.pending.entry(eid).or_insert(batch);
                }
                Err(RecvTimeoutError::Timeout) => (),
                // The replica handle (the sender side) outlives this thread.
                Err(RecvTimeoutError::Disconnected) => {
                    panic!("Delivery thread disconnected from main thread")
                }
            }

            self.deliver_ready();
        })
    }

    /// Apply every buffered decision that is next in line, advancing the frontier one execution
    /// id at a time. Stops at the first gap, or if a state transfer started in the meantime.
    fn deliver_ready(&mut self) {
        loop {
            let mut app = self.app.lock().unwrap();

            // Re-read the frontier with the application lock held: a snapshot install may have
            // moved it past some of the buffered decisions.
            let next = {
                let status = self.status.lock();
                if status.phase == ReplicaPhase::RetrievingState {
                    return;
                }
                status.next_eid()
            };
            while let Some(entry) = self.pending.first_entry() {
                if *entry.key() < next {
                    entry.remove();
                } else {
                    break;
                }
            }
            let Some(batch) = self.pending.remove(&next) else {
                return;
            };

            {
                let mut clients_manager = self.clients_manager.lock().unwrap();
                // A malformed batch is consumed (the frontier still advances); the failure has
                // already been published inside.
                let _ = deliver_decided_batch(
                    next,
                    &batch,
                    &mut *app,
                    &mut *clients_manager,
                    &mut self.sender,
                    self.config.me,
                    &self.config.view,
                    &self.event_publisher,
                );
            }

            self.status.lock().last_delivered = Some(next);

            let mut log = self.log.lock();
            if next.is_checkpoint_boundary(self.config.checkpoint_period) {
                let snapshot = app.snapshot();
                log.record_checkpoint(Checkpoint {
                    eid: next,
                    round: batch.round(),
                    proposer: batch.proposer(),
                    snapshot,
                });
                Event::publish(
                    &self.event_publisher,
                    Event::Checkpoint(CheckpointEvent {
                        timestamp: SystemTime::now(),
                        eid: next,
                    }),
                );
            } else {
                log.append(next, batch);
            }
        }
    }
}

/// Apply one decided batch to the application and send the resulting replies. Shared between the
/// delivery worker and the state transfer coordinator's replay-on-install path; the caller holds
/// the application lock through the references it passes in.
///
/// A request the application fails on is logged and skipped, never re-tried: skipping is
/// deterministic across honest replicas, stalling is not.
pub(crate) fn deliver_decided_batch<A: App, C: ClientsManager, N: Network>(
    eid: ExecutionId,
    batch: &DecidedBatch,
    app: &mut A,
    clients_manager: &mut C,
    sender: &mut SenderHandle<N>,
    me: ReplicaId,
    view: &View,
    event_publisher: &Option<Sender<Event>>,
) -> Result<usize, MalformedBatch> {
    let requests = match batch.requests() {
        Ok(requests) => requests,
        Err(malformed) => {
            Event::publish(
                event_publisher,
                Event::DeliverFailure(DeliverFailureEvent {
                    timestamp: SystemTime::now(),
                    eid,
                    reason: "batch payload does not deserialize into a request list".to_string(),
                }),
            );
            return Err(malformed);
        }
    };

    let context = DeliveryContext {
        eid,
        round: batch.round(),
        proposer: batch.proposer(),
    };

    for request in &requests {
        clients_manager.request_delivered(request);
    }

    let results = match app.execution_mode() {
        ExecutionMode::Single => requests
            .iter()
            .map(|request| app.execute_ordered(request, &context))
            .collect(),
        ExecutionMode::Batch => app.execute_batch(&requests, &context),
    };

    for (request, result) in requests.iter().zip(results) {
        match result {
            Ok(payload) => {
                let new_view = (view.id() > request.view).then(|| view.clone());
                sender.send_reply(
                    request.sender,
                    ReplyMessage {
                        sender: me,
                        session: request.session,
                        sequence: request.sequence,
                        request_type: request.request_type,
                        view: view.id(),
                        content: ReplyContent::Full(payload),
                        new_view,
                    },
                );
            }
            Err(error) => Event::publish(
                event_publisher,
                Event::DeliverFailure(DeliverFailureEvent {
                    timestamp: SystemTime::now(),
                    eid,
                    reason: format!(
                        "request {}/{} from {} failed: {:?}",
                        request.session, request.sequence, request.sender, error
                    ),
                }),
            ),
        }
    }

    Event::publish(
        event_publisher,
        Event::DeliverBatch(DeliverBatchEvent {
            timestamp: SystemTime::now(),
            eid,
            request_count: requests.len(),
        }),
    );

    Ok(requests.len())
}
