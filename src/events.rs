/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of delivery-core events for event handling and logging.
//! Note: an event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::types::basic::{ExecutionId, ReplicaId};

pub enum Event {
    // Events on the delivery path.
    DeliverBatch(DeliverBatchEvent),
    DeliverFailure(DeliverFailureEvent),
    Checkpoint(CheckpointEvent),
    // State transfer events on the lagging replica.
    StartTransfer(StartTransferEvent),
    EndTransfer(EndTransferEvent),
    AbandonTransfer(AbandonTransferEvent),
    // State transfer events on a responding replica.
    ReceiveTransferRequest(ReceiveTransferRequestEvent),
    SendTransferReply(SendTransferReplyEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus outlives every publisher, so a send failure means we are shutting
            // down and the event can be dropped.
            let _ = event_publisher.send(event);
        }
    }
}

pub struct DeliverBatchEvent {
    pub timestamp: SystemTime,
    pub eid: ExecutionId,
    pub request_count: usize,
}

pub struct DeliverFailureEvent {
    pub timestamp: SystemTime,
    pub eid: ExecutionId,
    pub reason: String,
}

pub struct CheckpointEvent {
    pub timestamp: SystemTime,
    pub eid: ExecutionId,
}

pub struct StartTransferEvent {
    pub timestamp: SystemTime,
    pub target: ExecutionId,
    pub source: ReplicaId,
}

pub struct EndTransferEvent {
    pub timestamp: SystemTime,
    pub target: ExecutionId,
    pub batches_replayed: usize,
}

pub struct AbandonTransferEvent {
    pub timestamp: SystemTime,
    pub target: ExecutionId,
    pub source_faulty: bool,
}

pub struct ReceiveTransferRequestEvent {
    pub timestamp: SystemTime,
    pub peer: ReplicaId,
    pub target: ExecutionId,
}

pub struct SendTransferReplyEvent {
    pub timestamp: SystemTime,
    pub peer: ReplicaId,
    pub target: ExecutionId,
    pub full: bool,
}
