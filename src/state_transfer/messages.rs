/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages exchanged between replicas as part of the state transfer protocol.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::basic::{CryptoHash, ExecutionId, ReplicaId, ViewId};
use crate::types::transfer::TransferableState;

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum StateTransferMessage {
    Request(StateTransferRequest),
    Reply(StateTransferReply),
}

/// Broadcast by a replica that has concluded it is lagging. Asks the group for the state up to
/// `target`, naming the one replica expected to ship the full state.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct StateTransferRequest {
    pub target: ExecutionId,
    pub requester: ReplicaId,
    /// The replica designated to reply with a full [TransferableState]; everyone else replies
    /// with a content hash only, keeping catch-up at one full-state transmission.
    pub source: ReplicaId,
    pub view: ViewId,
}

/// One replica's answer to a [StateTransferRequest].
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct StateTransferReply {
    pub target: ExecutionId,
    pub sender: ReplicaId,
    pub view: ViewId,
    pub content: StateReplyContent,
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum StateReplyContent {
    /// The full state; sent only by the designated source.
    Full(TransferableState),
    /// Just enough information to authenticate a state: its content hash.
    Digest(CryptoHash),
}

impl StateReplyContent {
    /// The content hash this reply vouches for.
    pub fn hash(&self) -> CryptoHash {
        match self {
            StateReplyContent::Full(state) => state.content_hash(),
            StateReplyContent::Digest(digest) => *digest,
        }
    }
}
