//! Forwarding instructions attached to a write request.
//!
//! A coordinator that wants a replica to relay a write on its behalf lists
//! the extra targets, each paired with the message id the relayed copy must
//! carry. Locality decisions belong to the coordinator; this type only
//! records them.

use std::collections::HashSet;

use crate::errors::ForwardingError;
use crate::messaging::{Endpoint, MessageId};

/// Ordered `(id, target)` pairs naming the replicas a write is relayed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingInfo {
    message_ids: Vec<MessageId>,
    targets: Vec<Endpoint>,
}

impl ForwardingInfo {
    /// Pair up `message_ids` with `targets`.
    ///
    /// Both vectors must have the same length and targets must be distinct.
    pub fn new(
        message_ids: Vec<MessageId>,
        targets: Vec<Endpoint>,
    ) -> Result<Self, ForwardingError> {
        if message_ids.len() != targets.len() {
            return Err(ForwardingError::LengthMismatch {
                ids: message_ids.len(),
                targets: targets.len(),
            });
        }
        let mut seen = HashSet::with_capacity(targets.len());
        for target in &targets {
            if !seen.insert(*target) {
                return Err(ForwardingError::DuplicateTarget { target: *target });
            }
        }
        Ok(Self {
            message_ids,
            targets,
        })
    }

    /// Forward to every target under the single id `id`.
    pub fn with_shared_id(id: MessageId, targets: Vec<Endpoint>) -> Result<Self, ForwardingError> {
        let ids = vec![id; targets.len()];
        Self::new(ids, targets)
    }

    /// Build from raw pairs exactly as received, keeping order and duplicates.
    pub fn from_pairs_unchecked(pairs: impl IntoIterator<Item = (MessageId, Endpoint)>) -> Self {
        let (message_ids, targets) = pairs.into_iter().unzip();
        Self {
            message_ids,
            targets,
        }
    }

    /// Number of forward targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> &[Endpoint] {
        &self.targets
    }

    /// True iff every pair carries `id`, so one relayed message can serve
    /// all targets.
    pub fn use_same_message_id(&self, id: MessageId) -> bool {
        self.message_ids.iter().all(|m| *m == id)
    }

    /// Iterate pairs in the order the coordinator listed them.
    pub fn iter(&self) -> impl Iterator<Item = (MessageId, Endpoint)> + '_ {
        self.message_ids
            .iter()
            .copied()
            .zip(self.targets.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> Endpoint {
        Endpoint::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_same_id_detection() {
        let id = MessageId(7);
        let info = ForwardingInfo::with_shared_id(id, vec![ep(1), ep(2), ep(3)]).unwrap();
        assert!(info.use_same_message_id(id));
        assert!(!info.use_same_message_id(MessageId(8)));
    }

    #[test]
    fn test_mixed_ids_are_not_shared() {
        let info = ForwardingInfo::new(vec![MessageId(7), MessageId(9)], vec![ep(1), ep(2)]).unwrap();
        assert!(!info.use_same_message_id(MessageId(7)));
    }

    #[test]
    fn test_iteration_keeps_insertion_order() {
        let info = ForwardingInfo::new(
            vec![MessageId(3), MessageId(1), MessageId(2)],
            vec![ep(30), ep(10), ep(20)],
        )
        .unwrap();
        let pairs: Vec<_> = info.iter().collect();
        assert_eq!(
            pairs,
            vec![(MessageId(3), ep(30)), (MessageId(1), ep(10)), (MessageId(2), ep(20))]
        );
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = ForwardingInfo::new(vec![MessageId(1)], vec![ep(1), ep(2)]).unwrap_err();
        assert!(matches!(
            err,
            ForwardingError::LengthMismatch { ids: 1, targets: 2 }
        ));
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let err = ForwardingInfo::with_shared_id(MessageId(1), vec![ep(1), ep(1)]).unwrap_err();
        assert!(matches!(err, ForwardingError::DuplicateTarget { .. }));
    }

    #[test]
    fn test_unchecked_keeps_duplicates() {
        let info = ForwardingInfo::from_pairs_unchecked([(MessageId(1), ep(1)), (MessageId(1), ep(1))]);
        assert_eq!(info.len(), 2);
        assert_eq!(info.targets(), &[ep(1), ep(1)]);
    }
}
