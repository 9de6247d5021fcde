/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The client-side quorum certifier: issues requests to the replica group and releases a result
//! only once enough byte-identical replies have arrived that at least one of them is from an
//! honest replica.
//!
//! The certifier is synchronous: [QuorumCertifier::invoke_ordered] and its siblings block the
//! calling thread until the result is certified, the request provably failed to gather a quorum,
//! or the invocation timeout passes. One certifier drives one session; run several certifiers
//! for concurrent request streams.

pub(crate) mod collector;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use ed25519_dalek::SigningKey;
use rand::seq::SliceRandom;
use typed_builder::TypedBuilder;

use crate::messages::{Message, ReplyContent, ReplyMessage, RequestMessage};
use crate::networking::Network;
use crate::types::basic::{CryptoHash, ReplicaId, SequenceNumber, SessionId};
use crate::types::batch::RequestType;
use crate::types::keypair::Keypair;
use crate::types::view::{FaultModel, View};

use self::collector::ReplyCollector;

/// How an invocation that did not error ended.
#[derive(Debug, PartialEq, Eq)]
pub enum InvokeOutcome {
    /// A quorum of matching replies arrived; this is the certified result payload.
    Certified(Vec<u8>),
    /// The invocation timed out, or the flow-control handshake exhausted its retries, before a
    /// quorum could form. The request may or may not have executed.
    NoReply,
}

/// An invocation failure the caller must handle.
#[derive(Debug, PartialEq, Eq)]
pub enum InvokeError {
    /// Every replica in the view replied and no quorum-sized group of them matched. For an
    /// ordered request this is surfaced directly; unordered requests are transparently retried
    /// through consensus first.
    QuorumNotReached,
}

/// Compares the comparable bytes of two replies. The default is byte equality; applications
/// whose replies contain nondeterministic fields (timestamps and the like) install their own.
pub type Comparator = Box<dyn Fn(&[u8], &[u8]) -> bool + Send>;

/// Picks the result payload out of a certified group of replies. The default takes the first
/// full payload in the group.
pub type Extractor = Box<dyn Fn(&[&ReplyMessage]) -> Option<Vec<u8>> + Send>;

/// Configuration for a [QuorumCertifier].
#[derive(TypedBuilder)]
pub struct CertifierConfiguration {
    /// The signing key this client authenticates its requests with.
    pub me: SigningKey,
    pub session: SessionId,
    pub initial_view: View,
    /// Determines the certification quorum size; see
    /// [View::certification_quorum](crate::types::view::View::certification_quorum).
    pub fault_model: FaultModel,
    /// How long one invocation may take end to end before returning
    /// [InvokeOutcome::NoReply].
    pub invoke_timeout: Duration,
    /// Whether ordered requests go through the acknowledgment handshake before the client waits
    /// for execution replies.
    #[builder(default = false)]
    pub flow_control: bool,
    /// How long to wait for the acknowledgment quorum before re-multicasting the request.
    #[builder(default = Duration::from_millis(500))]
    pub ack_timeout: Duration,
    /// How many re-multicasts the acknowledgment handshake may spend before giving up.
    #[builder(default = 3)]
    pub ack_retry_budget: u32,
}

enum Collected {
    Certified {
        payload: Vec<u8>,
        newer_view: Option<View>,
    },
    NoQuorum,
    NoReply,
}

pub struct QuorumCertifier<N: Network> {
    keypair: Keypair,
    session: SessionId,
    view: View,
    fault_model: FaultModel,
    invoke_timeout: Duration,
    flow_control: bool,
    ack_timeout: Duration,
    ack_retry_budget: u32,
    network: N,
    sequence: SequenceNumber,
    comparator: Comparator,
    extractor: Extractor,
}

impl<N: Network> QuorumCertifier<N> {
    pub fn new(config: CertifierConfiguration, mut network: N) -> QuorumCertifier<N> {
        network.init_view(&config.initial_view);
        QuorumCertifier {
            keypair: Keypair::new(config.me),
            session: config.session,
            view: config.initial_view,
            fault_model: config.fault_model,
            invoke_timeout: config.invoke_timeout,
            flow_control: config.flow_control,
            ack_timeout: config.ack_timeout,
            ack_retry_budget: config.ack_retry_budget,
            network,
            sequence: SequenceNumber::new(0),
            comparator: Box::new(|left, right| left == right),
            extractor: Box::new(|group| {
                group.iter().find_map(|reply| match &reply.content {
                    ReplyContent::Full(payload) => Some(payload.clone()),
                    _ => None,
                })
            }),
        }
    }

    /// Replace the reply comparator.
    pub fn set_comparator(&mut self, comparator: Comparator) {
        self.comparator = comparator;
    }

    /// Replace the result extractor.
    pub fn set_extractor(&mut self, extractor: Extractor) {
        self.extractor = extractor;
    }

    /// The view this certifier currently addresses. Updated in place when a reply carries a
    /// newer one.
    pub fn view(&self) -> &View {
        &self.view
    }

    /// Issue a state-mutating request through consensus and certify its result.
    pub fn invoke_ordered(&mut self, payload: &[u8]) -> Result<InvokeOutcome, InvokeError> {
        self.invoke(payload, RequestType::Ordered)
    }

    /// Issue a read-only request answered from each replica's local state. If the replies
    /// diverge beyond hope of a quorum, the request is transparently re-issued through
    /// consensus.
    pub fn invoke_unordered(&mut self, payload: &[u8]) -> Result<InvokeOutcome, InvokeError> {
        self.invoke(payload, RequestType::Unordered)
    }

    /// Like [QuorumCertifier::invoke_unordered], but all replicas except one randomly chosen
    /// full responder reply with a digest of the payload, trading a round of hashing for most of
    /// the reply bandwidth.
    pub fn invoke_unordered_hashed(
        &mut self,
        payload: &[u8],
    ) -> Result<InvokeOutcome, InvokeError> {
        self.invoke(payload, RequestType::UnorderedHashed)
    }

    fn invoke(
        &mut self,
        payload: &[u8],
        mut request_type: RequestType,
    ) -> Result<InvokeOutcome, InvokeError> {
        let mut reconfigured = false;
        loop {
            self.sequence.increment();
            let full_responder = match request_type {
                RequestType::UnorderedHashed => self
                    .view
                    .replicas()
                    .choose(&mut rand::thread_rng())
                    .copied(),
                _ => None,
            };
            let message = RequestMessage::new(
                &self.keypair,
                self.session,
                self.sequence,
                request_type,
                self.view.id(),
                payload.to_vec(),
                full_responder,
            );
            self.network.broadcast(Message::Request(message.clone()));

            match self.collect(&message, request_type, full_responder) {
                Collected::Certified {
                    payload: _,
                    newer_view: Some(newer),
                } if !reconfigured => {
                    // The group has moved on since this request was signed. Adopt the new view
                    // and re-issue once, so the result is certified against the membership that
                    // is actually in charge.
                    self.view = newer;
                    self.network.update_view(&self.view);
                    reconfigured = true;
                }
                Collected::Certified { payload, .. } => {
                    return Ok(InvokeOutcome::Certified(payload))
                }
                Collected::NoQuorum => match request_type {
                    RequestType::Unordered | RequestType::UnorderedHashed => {
                        request_type = RequestType::Ordered;
                    }
                    _ => return Err(InvokeError::QuorumNotReached),
                },
                Collected::NoReply => return Ok(InvokeOutcome::NoReply),
            }
        }
    }

    fn collect(
        &mut self,
        message: &RequestMessage,
        request_type: RequestType,
        full_responder: Option<ReplicaId>,
    ) -> Collected {
        let quorum = self.view.certification_quorum(self.fault_model);
        let mut collector = ReplyCollector::new(self.view.len(), quorum);
        let deadline = Instant::now() + self.invoke_timeout;

        let flow_controlled = self.flow_control && request_type == RequestType::Ordered;
        let mut acks: HashSet<ReplicaId> = HashSet::new();
        let mut ack_deadline = Instant::now() + self.ack_timeout;
        let mut retries_left = self.ack_retry_budget;
        let mut retry_message = message.clone();

        while Instant::now() < deadline {
            // The handshake: until a quorum of replicas has acknowledged scheduling the
            // request, re-multicast it on every ack timeout, up to the retry budget.
            if flow_controlled && acks.len() < quorum && Instant::now() >= ack_deadline {
                if retries_left == 0 {
                    return Collected::NoReply;
                }
                retries_left -= 1;
                retry_message.retry += 1;
                self.network
                    .broadcast(Message::Request(retry_message.clone()));
                ack_deadline = Instant::now() + self.ack_timeout;
            }

            let Some((origin, inbound)) = self.network.recv() else {
                std::thread::yield_now();
                continue;
            };
            let Message::Reply(reply) = inbound else {
                continue;
            };
            // Replies from an older view are never authoritative, however many of them agree.
            if reply.session != self.session
                || reply.sequence != self.sequence
                || reply.sender != origin
                || reply.view < self.view.id()
                || !self.view.contains(&origin)
            {
                continue;
            }

            if reply.request_type == RequestType::Ack {
                if flow_controlled {
                    if let ReplyContent::Ack(_) = reply.content {
                        acks.insert(origin);
                    }
                }
                continue;
            }
            if reply.request_type != request_type {
                continue;
            }

            let Some(comparable) = comparable_bytes(&reply, request_type, origin, full_responder)
            else {
                continue;
            };

            if let Some(group) = collector.add(origin, reply, comparable, &*self.comparator) {
                let group_replies = collector.replies(&group);
                if let Some(payload) = (self.extractor)(&group_replies) {
                    let newer_view = group_replies
                        .iter()
                        .filter_map(|reply| reply.new_view.clone())
                        .find(|view| view.id() > self.view.id());
                    return Collected::Certified {
                        payload,
                        newer_view,
                    };
                }
                // A quorum of digests matched but the full payload they vouch for is not among
                // them. Keep collecting; the full responder may still answer.
            }

            if collector.is_full() {
                return Collected::NoQuorum;
            }
        }

        Collected::NoReply
    }
}

/// The bytes replies are compared over: the full payload in normal mode, the payload digest in
/// hashed mode. Returns None for replies whose content kind does not fit the mode, including
/// full payloads from anyone but the designated full responder.
fn comparable_bytes(
    reply: &ReplyMessage,
    request_type: RequestType,
    origin: ReplicaId,
    full_responder: Option<ReplicaId>,
) -> Option<Vec<u8>> {
    match (&reply.content, request_type) {
        (ReplyContent::Full(payload), RequestType::UnorderedHashed) => {
            if Some(origin) != full_responder {
                return None;
            }
            Some(CryptoHash::digest_of(payload).bytes().to_vec())
        }
        (ReplyContent::Digest(digest), RequestType::UnorderedHashed) => {
            Some(digest.bytes().to_vec())
        }
        (ReplyContent::Full(payload), _) => Some(payload.clone()),
        _ => None,
    }
}
