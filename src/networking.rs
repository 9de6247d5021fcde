/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable peer-to-peer networking, as well as the internal
//! stubs that the replica's threads use to interact with the network.
//!
//! Networking is modular: each peer (replica or client) is reachable by its [ReplicaId], and
//! networking providers interact with the crate's threads through implementations of the
//! [Network] trait. The poller thread polls the provider for inbound messages and distributes
//! them into per-subsystem receivers.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::messages::{Message, ReplyMessage, RequestMessage};
use crate::state_transfer::messages::{
    StateTransferMessage, StateTransferReply, StateTransferRequest,
};
use crate::types::basic::ReplicaId;
use crate::types::view::View;

pub trait Network: Clone + Send {
    /// Informs the network provider of the membership of the initial view on wake-up.
    fn init_view(&mut self, view: &View);

    /// Informs the networking provider that the group has moved to a new view.
    fn update_view(&mut self, view: &View);

    /// Send a message to all peers in the current view without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: ReplicaId, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is
    /// available now.
    fn recv(&mut self) -> Option<(ReplicaId, Message)>;
}

/// Spawn the poller thread, which polls the [Network] for messages and distributes them into
/// receivers for client requests, state transfer requests, and state transfer replies.
///
/// Reply messages are dropped here: a replica never consumes replies, only clients do, and the
/// client side reads its network directly.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<(ReplicaId, RequestMessage)>,
    Receiver<(ReplicaId, StateTransferRequest)>,
    Receiver<(ReplicaId, StateTransferReply)>,
) {
    let (to_request_receiver, request_receiver) = mpsc::channel();
    let (to_transfer_request_receiver, transfer_request_receiver) = mpsc::channel();
    let (to_transfer_reply_receiver, transfer_reply_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::Request(request) => {
                    let _ = to_request_receiver.send((origin, request));
                }
                Message::Reply(_) => (),
                Message::StateTransfer(s_msg) => match s_msg {
                    StateTransferMessage::Request(s_req) => {
                        let _ = to_transfer_request_receiver.send((origin, s_req));
                    }
                    StateTransferMessage::Reply(s_res) => {
                        let _ = to_transfer_reply_receiver.send((origin, s_res));
                    }
                },
            }
        } else {
            thread::yield_now()
        }
    });
    (
        poller_thread,
        request_receiver,
        transfer_request_receiver,
        transfer_reply_receiver,
    )
}

/// A sending handle used by the delivery and state-transfer threads to push replies and protocol
/// messages back onto the wire.
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> SenderHandle<N> {
        SenderHandle { network }
    }

    pub(crate) fn send_reply(&mut self, peer: ReplicaId, reply: ReplyMessage) {
        self.network.send(peer, Message::Reply(reply))
    }

    pub(crate) fn send_transfer_reply(&mut self, peer: ReplicaId, reply: StateTransferReply) {
        self.network
            .send(peer, Message::StateTransfer(StateTransferMessage::Reply(reply)))
    }

    pub(crate) fn broadcast_transfer_request(&mut self, request: StateTransferRequest) {
        self.network
            .broadcast(Message::StateTransfer(StateTransferMessage::Request(request)))
    }
}

/// The receiving end the state transfer server uses to take requests off the poller.
pub(crate) struct TransferServerStub {
    requests: Receiver<(ReplicaId, StateTransferRequest)>,
}

impl TransferServerStub {
    pub(crate) fn new(requests: Receiver<(ReplicaId, StateTransferRequest)>) -> TransferServerStub {
        TransferServerStub { requests }
    }

    pub(crate) fn recv_request(&self) -> Option<(ReplicaId, StateTransferRequest)> {
        match self.requests.try_recv() {
            Ok((origin, request)) => Some((origin, request)),
            Err(TryRecvError::Empty) => None,
            // Safety: the transfer server thread shuts down before the poller thread (the sender
            // side of this channel), so we will never be disconnected at this point.
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

/// The receiving end the state transfer coordinator uses to take replies off the poller, with a
/// bounded wait so the coordinator can react to lag reports and shutdown between replies.
pub(crate) struct TransferClientStub {
    replies: Receiver<(ReplicaId, StateTransferReply)>,
}

impl TransferClientStub {
    pub(crate) fn new(replies: Receiver<(ReplicaId, StateTransferReply)>) -> TransferClientStub {
        TransferClientStub { replies }
    }

    pub(crate) fn recv_reply(&self, deadline: Instant) -> Option<(ReplicaId, StateTransferReply)> {
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        match self.replies.recv_timeout(deadline - now) {
            Ok((origin, reply)) => Some((origin, reply)),
            Err(RecvTimeoutError::Timeout) => None,
            // Safety: the coordinator thread shuts down before the poller thread.
            Err(RecvTimeoutError::Disconnected) => panic!(),
        }
    }
}
