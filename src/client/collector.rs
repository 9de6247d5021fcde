/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The reply collector: one slot per replica in the view, filled as replies arrive, watched for
//! a matching group of quorum size.
//!
//! Replies are compared through the certifier's pluggable comparator over "comparable bytes"
//! that the certifier derives from each reply before insertion (the full payload in normal
//! mode, the payload digest in hashed mode). The collector itself knows nothing about reply
//! semantics.

use crate::messages::ReplyMessage;
use crate::types::basic::ReplicaId;

pub(crate) struct CollectedReply {
    origin: ReplicaId,
    reply: ReplyMessage,
    comparable: Vec<u8>,
}

pub(crate) struct ReplyCollector {
    slots: Vec<CollectedReply>,
    expected: usize,
    quorum: usize,
}

impl ReplyCollector {
    pub(crate) fn new(expected: usize, quorum: usize) -> ReplyCollector {
        ReplyCollector {
            slots: Vec::with_capacity(expected),
            expected,
            quorum,
        }
    }

    /// Insert a reply. At most one reply per origin is kept; later ones are dropped. Returns
    /// the indices of a matching group of at least quorum size if this insertion completed one.
    ///
    /// Only the group around the newest reply needs checking: the quorum was not reached before
    /// this call, so any group reaching it now must contain the newest reply.
    pub(crate) fn add(
        &mut self,
        origin: ReplicaId,
        reply: ReplyMessage,
        comparable: Vec<u8>,
        comparator: &dyn Fn(&[u8], &[u8]) -> bool,
    ) -> Option<Vec<usize>> {
        if self.slots.iter().any(|slot| slot.origin == origin) {
            return None;
        }
        self.slots.push(CollectedReply {
            origin,
            reply,
            comparable,
        });

        let newest = &self.slots[self.slots.len() - 1];
        let group: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| comparator(&newest.comparable, &slot.comparable))
            .map(|(index, _)| index)
            .collect();
        (group.len() >= self.quorum).then_some(group)
    }

    pub(crate) fn replies(&self, indices: &[usize]) -> Vec<&ReplyMessage> {
        indices.iter().map(|index| &self.slots[*index].reply).collect()
    }

    /// Whether every replica in the view has replied.
    pub(crate) fn is_full(&self) -> bool {
        self.slots.len() >= self.expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ReplyContent;
    use crate::types::basic::{SequenceNumber, SessionId, ViewId};
    use crate::types::batch::RequestType;

    fn reply(origin: u8, payload: &[u8]) -> (ReplicaId, ReplyMessage, Vec<u8>) {
        let origin = ReplicaId::new([origin; 32]);
        let reply = ReplyMessage {
            sender: origin,
            session: SessionId::new(1),
            sequence: SequenceNumber::new(1),
            request_type: RequestType::Ordered,
            view: ViewId::new(0),
            content: ReplyContent::Full(payload.to_vec()),
            new_view: None,
        };
        (origin, reply, payload.to_vec())
    }

    fn bytes_equal(left: &[u8], right: &[u8]) -> bool {
        left == right
    }

    #[test]
    fn quorum_completes_only_at_the_threshold() {
        let mut collector = ReplyCollector::new(4, 4);
        for origin in 0..3u8 {
            let (id, message, comparable) = reply(origin, b"ok");
            assert!(collector.add(id, message, comparable, &bytes_equal).is_none());
        }
        let (id, message, comparable) = reply(3, b"ok");
        let group = collector.add(id, message, comparable, &bytes_equal).unwrap();
        assert_eq!(group.len(), 4);
    }

    #[test]
    fn divergent_replies_never_form_a_group() {
        let mut collector = ReplyCollector::new(4, 3);
        for origin in 0..4u8 {
            let (id, message, _) = reply(origin, b"ignored");
            let comparable = vec![origin];
            assert!(collector.add(id, message, comparable, &bytes_equal).is_none());
        }
        assert!(collector.is_full());
    }

    #[test]
    fn duplicate_origins_are_dropped() {
        let mut collector = ReplyCollector::new(4, 2);
        let (id, message, comparable) = reply(0, b"ok");
        assert!(collector
            .add(id, message.clone(), comparable.clone(), &bytes_equal)
            .is_none());
        // The same replica again does not bring the group to two.
        assert!(collector.add(id, message, comparable, &bytes_equal).is_none());
        assert!(!collector.is_full());
    }
}
