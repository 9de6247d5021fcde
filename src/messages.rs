/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas and clients.
//!
//! This includes the client-facing [request](RequestMessage) and [reply](ReplyMessage) messages
//! and the [state transfer messages](crate::state_transfer::messages::StateTransferMessage)
//! exchanged between replicas.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::state_transfer::messages::StateTransferMessage;
use crate::types::basic::{
    CryptoHash, ReplicaId, SequenceNumber, SessionId, SignatureBytes, ViewId,
};
use crate::types::batch::{OrderedRequest, RequestType};
use crate::types::keypair::Keypair;
use crate::types::view::View;

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum Message {
    Request(RequestMessage),
    Reply(ReplyMessage),
    StateTransfer(StateTransferMessage),
}

/// A client request in flight: the [OrderedRequest] itself plus the client-side retry counter
/// and, for hashed reads, the replica chosen to return the full payload.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct RequestMessage {
    pub request: OrderedRequest,
    /// Incremented each time the client re-multicasts this request during the flow-control
    /// handshake.
    pub retry: u32,
    /// For [RequestType::UnorderedHashed] requests: the replica expected to reply with the full
    /// payload while everyone else replies with a digest.
    pub full_responder: Option<ReplicaId>,
}

impl RequestMessage {
    /// Build and sign a request. The signature covers everything that identifies the request and
    /// its content, but not the retry counter (a re-multicast is the same request).
    pub fn new(
        keypair: &Keypair,
        session: SessionId,
        sequence: SequenceNumber,
        request_type: RequestType,
        view: ViewId,
        payload: Vec<u8>,
        full_responder: Option<ReplicaId>,
    ) -> RequestMessage {
        let mut request = OrderedRequest {
            sender: keypair.public(),
            session,
            sequence,
            request_type,
            view,
            payload,
            signature: SignatureBytes::default(),
        };
        request.signature = keypair.sign(&request_signing_bytes(&request));
        RequestMessage {
            request,
            retry: 0,
            full_responder,
        }
    }
}

/// The content a replica puts in a reply.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ReplyContent {
    /// The full application reply payload.
    Full(Vec<u8>),
    /// Only the SHA256 digest of the payload (hashed-reply mode).
    Digest(CryptoHash),
    /// A flow-control acknowledgment naming the leader this replica currently observes.
    Ack(ReplicaId),
}

/// A single replica's reply to a client request. The client-side certifier collects these into
/// one certified result.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct ReplyMessage {
    pub sender: ReplicaId,
    pub session: SessionId,
    pub sequence: SequenceNumber,
    pub request_type: RequestType,
    pub view: ViewId,
    pub content: ReplyContent,
    /// Attached when the replying replica's view is newer than the one the request was tagged
    /// with, so the client can reconfigure.
    pub new_view: Option<View>,
}

/// A signed message consists of:
/// 1. Message bytes [SignedMessage::message_bytes]: the values the signature is over, and
/// 2. Signature bytes [SignedMessage::signature_bytes]: the signature in bytes.
///
/// Given the two values and the signer's identity, the signature can be verified against the
/// message.
pub trait SignedMessage {
    fn message_bytes(&self) -> Vec<u8>;

    fn signature_bytes(&self) -> SignatureBytes;

    /// Verifies the correctness of the signature given the values that should be signed.
    fn is_correct(&self, signer: &ReplicaId) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(&signer.bytes()) else {
            return false;
        };
        let signature = Signature::from_bytes(&self.signature_bytes().bytes());
        vk.verify(&self.message_bytes(), &signature).is_ok()
    }
}

impl SignedMessage for RequestMessage {
    fn message_bytes(&self) -> Vec<u8> {
        request_signing_bytes(&self.request)
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.request.signature
    }
}

fn request_signing_bytes(request: &OrderedRequest) -> Vec<u8> {
    let fields = (
        request.sender,
        request.session,
        request.sequence,
        request.request_type,
        request.view,
        &request.payload,
    );
    fields.try_to_vec().unwrap()
}
