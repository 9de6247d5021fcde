/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which takes events published by the replica's worker threads and fires
//! the registered handlers for them.

use std::sync::mpsc::Receiver;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) deliver_batch_handlers: Vec<HandlerPtr<DeliverBatchEvent>>,
    pub(crate) deliver_failure_handlers: Vec<HandlerPtr<DeliverFailureEvent>>,
    pub(crate) checkpoint_handlers: Vec<HandlerPtr<CheckpointEvent>>,
    pub(crate) start_transfer_handlers: Vec<HandlerPtr<StartTransferEvent>>,
    pub(crate) end_transfer_handlers: Vec<HandlerPtr<EndTransferEvent>>,
    pub(crate) abandon_transfer_handlers: Vec<HandlerPtr<AbandonTransferEvent>>,
    pub(crate) receive_transfer_request_handlers: Vec<HandlerPtr<ReceiveTransferRequestEvent>>,
    pub(crate) send_transfer_reply_handlers: Vec<HandlerPtr<SendTransferReplyEvent>>,
}

impl EventHandlers {
    /// Collect the registered handlers, prepending the default logging handlers if `log_events`
    /// is set.
    pub(crate) fn new(
        log_events: bool,
        on_deliver_batch: Option<HandlerPtr<DeliverBatchEvent>>,
        on_deliver_failure: Option<HandlerPtr<DeliverFailureEvent>>,
        on_checkpoint: Option<HandlerPtr<CheckpointEvent>>,
        on_start_transfer: Option<HandlerPtr<StartTransferEvent>>,
        on_end_transfer: Option<HandlerPtr<EndTransferEvent>>,
        on_abandon_transfer: Option<HandlerPtr<AbandonTransferEvent>>,
        on_receive_transfer_request: Option<HandlerPtr<ReceiveTransferRequestEvent>>,
        on_send_transfer_reply: Option<HandlerPtr<SendTransferReplyEvent>>,
    ) -> EventHandlers {
        fn collect<T: Logger>(log_events: bool, user: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
            let mut handlers = Vec::new();
            if log_events {
                handlers.push(T::get_logger());
            }
            handlers.extend(user);
            handlers
        }

        EventHandlers {
            deliver_batch_handlers: collect(log_events, on_deliver_batch),
            deliver_failure_handlers: collect(log_events, on_deliver_failure),
            checkpoint_handlers: collect(log_events, on_checkpoint),
            start_transfer_handlers: collect(log_events, on_start_transfer),
            end_transfer_handlers: collect(log_events, on_end_transfer),
            abandon_transfer_handlers: collect(log_events, on_abandon_transfer),
            receive_transfer_request_handlers: collect(log_events, on_receive_transfer_request),
            send_transfer_reply_handlers: collect(log_events, on_send_transfer_reply),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.deliver_batch_handlers.is_empty()
            && self.deliver_failure_handlers.is_empty()
            && self.checkpoint_handlers.is_empty()
            && self.start_transfer_handlers.is_empty()
            && self.end_transfer_handlers.is_empty()
            && self.abandon_transfer_handlers.is_empty()
            && self.receive_transfer_request_handlers.is_empty()
            && self.send_transfer_reply_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::DeliverBatch(event) => self
                .deliver_batch_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::DeliverFailure(event) => self
                .deliver_failure_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::Checkpoint(event) => self
                .checkpoint_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::StartTransfer(event) => self
                .start_transfer_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::EndTransfer(event) => self
                .end_transfer_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::AbandonTransfer(event) => self
                .abandon_transfer_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::ReceiveTransferRequest(event) => self
                .receive_transfer_request_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::SendTransferReply(event) => self
                .send_transfer_reply_handlers
                .iter()
                .for_each(|handler| handler(&event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // The publishers hang up when their threads shut down; drain nothing further.
            Err(TryRecvError::Disconnected) => thread::yield_now(),
        }
    })
}
