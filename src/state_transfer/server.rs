/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state transfer server: the thread that answers the transfer requests of lagging peers.
//!
//! The server replies with the full [TransferableState](crate::types::transfer::TransferableState)
//! only when this replica is the source the requester designated; otherwise it sends just the
//! state's content hash. A replica that is itself retrieving state, or whose log cannot
//! reconstruct the requested target, stays silent.

use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use crate::delivery::log::DecisionLogCamera;
use crate::events::{Event, ReceiveTransferRequestEvent, SendTransferReplyEvent};
use crate::networking::{Network, SenderHandle, TransferServerStub};
use crate::types::basic::ReplicaId;
use crate::types::view::View;

use super::messages::{StateReplyContent, StateTransferReply};
use super::status::SharedStatus;

pub(crate) fn start_transfer_server<N: Network + 'static>(
    me: ReplicaId,
    view: View,
    log: DecisionLogCamera,
    status: Arc<SharedStatus>,
    requests: TransferServerStub,
    mut sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Transfer server thread disconnected from main thread")
            }
        }

        let Some((origin, request)) = requests.recv_request() else {
            thread::yield_now();
            continue;
        };

        if origin == me || origin != request.requester || !view.contains(&origin) {
            continue;
        }

        Event::publish(
            &event_publisher,
            Event::ReceiveTransferRequest(ReceiveTransferRequestEvent {
                timestamp: SystemTime::now(),
                peer: origin,
                target: request.target,
            }),
        );

        // A replica that is itself behind has nothing trustworthy to serve.
        if status.is_retrieving() {
            continue;
        }

        let Some(state) = log.lock().state_up_to(request.target) else {
            continue;
        };

        let full = request.source == me;
        let content = if full {
            StateReplyContent::Full(state)
        } else {
            StateReplyContent::Digest(state.content_hash())
        };
        sender.send_transfer_reply(
            origin,
            StateTransferReply {
                target: request.target,
                sender: me,
                view: view.id(),
                content,
            },
        );

        Event::publish(
            &event_publisher,
            Event::SendTransferReply(SendTransferReplyEvent {
                timestamp: SystemTime::now(),
                peer: origin,
                target: request.target,
                full,
            }),
        );
    })
}
