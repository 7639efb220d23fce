//! Message envelopes and the builder used to derive new ones.
//!
//! The payload lives behind an [`Arc`], so messages derived from one another
//! (relayed copies, re-addressed copies) all read the same payload instance.

use std::sync::Arc;

use uuid::Uuid;

use crate::messaging::forwarding::ForwardingInfo;
use crate::messaging::{Endpoint, MessageId, Verb};
use crate::mutation::payload::Mutation;

/// Optional routing parameters carried in a message header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    /// Where the acknowledgment should go instead of the sender.
    pub respond_to: Option<Endpoint>,
    /// Replicas the receiver must relay this message to.
    pub forward_to: Option<ForwardingInfo>,
    /// Trace session the request belongs to, propagated to every hop.
    pub trace_session: Option<Uuid>,
}

/// Routing metadata of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub id: MessageId,
    pub verb: Verb,
    pub from: Endpoint,
    pub params: Params,
}

/// Message body.
#[derive(Debug, Clone)]
pub enum Payload {
    Mutation(Arc<Mutation>),
    Empty,
}

impl Payload {
    pub fn as_mutation(&self) -> Option<&Arc<Mutation>> {
        match self {
            Payload::Mutation(mutation) => Some(mutation),
            Payload::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

/// A routed unit: header plus shared payload.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub payload: Payload,
}

impl Message {
    /// A fresh outbound request from `from` with a newly allocated id.
    pub fn out(verb: Verb, from: Endpoint, payload: Payload) -> Self {
        MessageBuilder::new(verb, from, payload).build()
    }

    pub fn id(&self) -> MessageId {
        self.header.id
    }

    pub fn verb(&self) -> Verb {
        self.header.verb
    }

    pub fn from(&self) -> Endpoint {
        self.header.from
    }

    /// Acknowledgment target: the `respond_to` override, else the sender.
    pub fn respond_to(&self) -> Endpoint {
        self.header.params.respond_to.unwrap_or(self.header.from)
    }

    pub fn forward_to(&self) -> Option<&ForwardingInfo> {
        self.header.params.forward_to.as_ref()
    }

    pub fn trace_session(&self) -> Option<Uuid> {
        self.header.params.trace_session
    }

    /// Start a builder seeded with this message's header and payload.
    pub fn builder(&self) -> MessageBuilder {
        MessageBuilder {
            header: self.header.clone(),
            payload: self.payload.clone(),
        }
    }

    /// The empty acknowledgment for this request, sent from `from`.
    ///
    /// Keeps the request id so the receiver can match it to its callback.
    pub fn empty_response(&self, from: Endpoint) -> Message {
        Message {
            header: Header {
                id: self.header.id,
                verb: Verb::MutationRsp,
                from,
                params: Params {
                    trace_session: self.header.params.trace_session,
                    ..Params::default()
                },
            },
            payload: Payload::Empty,
        }
    }
}

/// Builds messages, possibly several from one template.
///
/// [`MessageBuilder::build`] borrows the builder, so a single template can
/// be re-targeted with [`MessageBuilder::with_id`] between builds. Every
/// built message shares the template's payload.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    header: Header,
    payload: Payload,
}

impl MessageBuilder {
    pub fn new(verb: Verb, from: Endpoint, payload: Payload) -> Self {
        Self {
            header: Header {
                id: MessageId::next(),
                verb,
                from,
                params: Params::default(),
            },
            payload,
        }
    }

    pub fn with_id(&mut self, id: MessageId) -> &mut Self {
        self.header.id = id;
        self
    }

    pub fn with_respond_to(&mut self, respond_to: Endpoint) -> &mut Self {
        self.header.params.respond_to = Some(respond_to);
        self
    }

    pub fn with_forward_to(&mut self, forward_to: ForwardingInfo) -> &mut Self {
        self.header.params.forward_to = Some(forward_to);
        self
    }

    pub fn without_forward_to(&mut self) -> &mut Self {
        self.header.params.forward_to = None;
        self
    }

    pub fn with_trace_session(&mut self, session: Uuid) -> &mut Self {
        self.header.params.trace_session = Some(session);
        self
    }

    pub fn build(&self) -> Message {
        Message {
            header: self.header.clone(),
            payload: self.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::payload::MutationBuilder;

    fn ep(port: u16) -> Endpoint {
        Endpoint::from(([10, 0, 0, 1], port))
    }

    fn mutation() -> Arc<Mutation> {
        Arc::new(
            MutationBuilder::new("ks", "pk")
                .cell("users", "row", "name", "ada", 1)
                .build(),
        )
    }

    #[test]
    fn test_respond_to_defaults_to_sender() {
        let msg = Message::out(Verb::MutationReq, ep(1), Payload::Mutation(mutation()));
        assert_eq!(msg.respond_to(), ep(1));
    }

    #[test]
    fn test_respond_to_override() {
        let msg = MessageBuilder::new(Verb::MutationReq, ep(1), Payload::Mutation(mutation()))
            .with_respond_to(ep(2))
            .build();
        assert_eq!(msg.from(), ep(1));
        assert_eq!(msg.respond_to(), ep(2));
    }

    #[test]
    fn test_builder_shares_payload() {
        let payload = mutation();
        let original = Message::out(Verb::MutationReq, ep(1), Payload::Mutation(payload.clone()));
        let mut builder = original.builder();
        let a = builder.with_id(MessageId(100)).build();
        let b = builder.with_id(MessageId(200)).build();
        assert_eq!(a.id(), MessageId(100));
        assert_eq!(b.id(), MessageId(200));
        assert!(Arc::ptr_eq(a.payload.as_mutation().unwrap(), &payload));
        assert!(Arc::ptr_eq(b.payload.as_mutation().unwrap(), &payload));
    }

    #[test]
    fn test_without_forward_to_clears_param() {
        let info = ForwardingInfo::with_shared_id(MessageId(5), vec![ep(3)]).unwrap();
        let msg = MessageBuilder::new(Verb::MutationReq, ep(1), Payload::Mutation(mutation()))
            .with_forward_to(info)
            .build();
        assert!(msg.forward_to().is_some());
        let derived = msg.builder().without_forward_to().build();
        assert!(derived.forward_to().is_none());
    }

    #[test]
    fn test_empty_response_keeps_id_and_trace() {
        let session = Uuid::new_v4();
        let msg = MessageBuilder::new(Verb::MutationReq, ep(1), Payload::Mutation(mutation()))
            .with_trace_session(session)
            .with_respond_to(ep(9))
            .build();
        let rsp = msg.empty_response(ep(2));
        assert_eq!(rsp.id(), msg.id());
        assert_eq!(rsp.verb(), Verb::MutationRsp);
        assert_eq!(rsp.from(), ep(2));
        assert!(rsp.payload.is_empty());
        assert_eq!(rsp.trace_session(), Some(session));
        assert!(rsp.header.params.respond_to.is_none());
    }
}
