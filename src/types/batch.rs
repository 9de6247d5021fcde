/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for [OrderedRequest] and [DecidedBatch]: the client request as it travels through
//! the ordered log, and the opaque payload one consensus instance decides on.
//!
//! A decided batch's payload is the borsh encoding of a `Vec<OrderedRequest>`. The consensus
//! layer may attach a pre-parsed request list to the batch it hands over (it usually has one from
//! validating the proposal); the delivery pipeline then skips deserialization. The cache is
//! never sent over the wire.

use borsh::{BorshDeserialize, BorshSerialize};

use super::basic::{ExecutionId, ReplicaId, SequenceNumber, SessionId, SignatureBytes, ViewId};

/// The kind of a client request, which determines how it is routed and how its replies are
/// certified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub enum RequestType {
    /// A state-mutating request that must go through consensus.
    Ordered,
    /// A read-only request answerable directly from local replica state.
    Unordered,
    /// A read-only request for which all but one randomly chosen replica reply with a content
    /// hash instead of the full payload.
    UnorderedHashed,
    /// A flow-control acknowledgment that a replica has scheduled an ordered request.
    Ack,
    /// A membership/configuration change request.
    Reconfig,
}

/// A client request as it appears inside a decided batch. Uniquely identified by
/// `(sender, sequence)` within a session.
///
/// Idempotence of requests is the clients manager's concern (via its dedup at the front door),
/// not this core's.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct OrderedRequest {
    pub sender: ReplicaId,
    pub session: SessionId,
    pub sequence: SequenceNumber,
    pub request_type: RequestType,
    pub view: ViewId,
    pub payload: Vec<u8>,
    pub signature: SignatureBytes,
}

/// The value consensus decided for one execution id, handed to the delivery pipeline exactly
/// once. Ownership transfers to the pipeline at that point; the batch is discarded after
/// delivery unless it becomes part of the running decision log.
#[derive(Clone, BorshDeserialize, BorshSerialize)]
pub struct DecidedBatch {
    payload: Vec<u8>,
    round: u32,
    proposer: ReplicaId,
    #[borsh_skip]
    parsed: Option<Vec<OrderedRequest>>,
}

impl DecidedBatch {
    pub fn new(payload: Vec<u8>, round: u32, proposer: ReplicaId) -> DecidedBatch {
        DecidedBatch {
            payload,
            round,
            proposer,
            parsed: None,
        }
    }

    /// Build a batch from a request list, serializing the list into the payload and attaching it
    /// as the pre-parsed cache.
    pub fn from_requests(
        requests: Vec<OrderedRequest>,
        round: u32,
        proposer: ReplicaId,
    ) -> DecidedBatch {
        let payload = requests.try_to_vec().unwrap();
        DecidedBatch {
            payload,
            round,
            proposer,
            parsed: Some(requests),
        }
    }

    /// Attach a pre-parsed request list, e.g., one the consensus layer kept from proposal
    /// validation.
    pub fn with_parsed_requests(mut self, requests: Vec<OrderedRequest>) -> DecidedBatch {
        self.parsed = Some(requests);
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn proposer(&self) -> ReplicaId {
        self.proposer
    }

    /// The requests in this batch: the pre-parsed cache if one is attached, otherwise the result
    /// of deserializing the payload.
    pub fn requests(&self) -> Result<Vec<OrderedRequest>, MalformedBatch> {
        if let Some(parsed) = &self.parsed {
            return Ok(parsed.clone());
        }
        Vec::<OrderedRequest>::try_from_slice(&self.payload).map_err(|_| MalformedBatch)
    }
}

/// The payload of a decided batch could not be deserialized into a request list. Surfaced on the
/// operator-visible error channel by the delivery pipeline, which then continues with the next
/// decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedBatch;

/// The delivery-time context handed to the application alongside each ordered request.
#[derive(Clone, Copy, Debug)]
pub struct DeliveryContext {
    pub eid: ExecutionId,
    pub round: u32,
    pub proposer: ReplicaId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::basic::*;

    fn request(sequence: u64) -> OrderedRequest {
        OrderedRequest {
            sender: ReplicaId::new([9; 32]),
            session: SessionId::new(7),
            sequence: SequenceNumber::new(sequence),
            request_type: RequestType::Ordered,
            view: ViewId::new(0),
            payload: vec![1, 2, 3],
            signature: SignatureBytes::default(),
        }
    }

    #[test]
    fn parsed_cache_and_payload_agree() {
        let batch = DecidedBatch::from_requests(vec![request(1), request(2)], 0, ReplicaId::new([0; 32]));
        let from_cache = batch.requests().unwrap();

        let reparsed = DecidedBatch::new(batch.payload().to_vec(), 0, ReplicaId::new([0; 32]))
            .requests()
            .unwrap();
        assert_eq!(from_cache, reparsed);
    }

    #[test]
    fn garbage_payload_is_a_malformed_batch() {
        let batch = DecidedBatch::new(vec![0xff, 0xff, 0xff, 0xff, 0xff], 0, ReplicaId::new([0; 32]));
        assert_eq!(batch.requests(), Err(MalformedBatch));
    }
}
