//! Inter-node messaging primitives.
//!
//! A [`message::Message`] is the unit every node exchanges: a header carrying
//! routing metadata plus a payload that several derived messages may share.
//! Delivery goes through the [`transport::Transport`] trait, and inbound
//! messages are routed to handlers through a [`registry::VerbRegistry`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub mod callbacks;
pub mod forwarding;
pub mod local;
pub mod message;
pub mod registry;
pub mod transport;

/// Messaging protocol version before compact length encoding.
pub const VERSION_30: u32 = 10;
/// Messaging protocol version using unsigned vint length prefixes.
pub const VERSION_40: u32 = 12;
/// Version this node speaks.
pub const CURRENT_VERSION: u32 = VERSION_40;

/// Address of a node's messaging listener.
pub type Endpoint = SocketAddr;

/// Identifier of a request message; acknowledgments reuse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

impl MessageId {
    /// Allocate a fresh process-unique id.
    pub fn next() -> Self {
        MessageId(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Message kinds a node knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    /// A write request whose payload is a mutation.
    MutationReq,
    /// The empty acknowledgment of a successfully applied mutation.
    MutationRsp,
}

impl Verb {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::MutationReq => "MUTATION_REQ",
            Verb::MutationRsp => "MUTATION_RSP",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_are_unique() {
        let a = MessageId::next();
        let b = MessageId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_verb_labels() {
        assert_eq!(Verb::MutationReq.to_string(), "MUTATION_REQ");
        assert_eq!(Verb::MutationRsp.to_string(), "MUTATION_RSP");
    }
}
