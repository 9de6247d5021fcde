/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::replica::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. Peer identities are shortened
//! to the first seven characters of their Base64 encoding.

use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const DELIVER_BATCH: &str = "DeliverBatch";
pub const DELIVER_FAILURE: &str = "DeliverFailure";
pub const CHECKPOINT: &str = "Checkpoint";

pub const START_TRANSFER: &str = "StartTransfer";
pub const END_TRANSFER: &str = "EndTransfer";
pub const ABANDON_TRANSFER: &str = "AbandonTransfer";

pub const RECEIVE_TRANSFER_REQUEST: &str = "ReceiveTransferRequest";
pub const SEND_TRANSFER_REPLY: &str = "SendTransferReply";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for DeliverBatchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &DeliverBatchEvent| {
            log::info!(
                "{}, {}, {}, {}",
                DELIVER_BATCH,
                secs_since_unix_epoch(event.timestamp),
                event.eid,
                event.request_count
            )
        })
    }
}

impl Logger for DeliverFailureEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &DeliverFailureEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                DELIVER_FAILURE,
                secs_since_unix_epoch(event.timestamp),
                event.eid,
                event.reason
            )
        })
    }
}

impl Logger for CheckpointEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CheckpointEvent| {
            log::info!(
                "{}, {}, {}",
                CHECKPOINT,
                secs_since_unix_epoch(event.timestamp),
                event.eid
            )
        })
    }
}

impl Logger for StartTransferEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &StartTransferEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_TRANSFER,
                secs_since_unix_epoch(event.timestamp),
                event.target,
                event.source
            )
        })
    }
}

impl Logger for EndTransferEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &EndTransferEvent| {
            log::info!(
                "{}, {}, {}, {}",
                END_TRANSFER,
                secs_since_unix_epoch(event.timestamp),
                event.target,
                event.batches_replayed
            )
        })
    }
}

impl Logger for AbandonTransferEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &AbandonTransferEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                ABANDON_TRANSFER,
                secs_since_unix_epoch(event.timestamp),
                event.target,
                event.source_faulty
            )
        })
    }
}

impl Logger for ReceiveTransferRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ReceiveTransferRequestEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_TRANSFER_REQUEST,
                secs_since_unix_epoch(event.timestamp),
                event.peer,
                event.target
            )
        })
    }
}

impl Logger for SendTransferReplyEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &SendTransferReplyEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SEND_TRANSFER_REPLY,
                secs_since_unix_epoch(event.timestamp),
                event.peer,
                event.target,
                event.full
            )
        })
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occurred before the Unix Epoch.")
        .as_secs()
}
