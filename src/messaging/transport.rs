//! The outbound side of messaging.

use std::sync::Arc;

use crate::messaging::message::Message;
use crate::messaging::Endpoint;

/// Best-effort, fire-and-forget delivery of messages to other nodes.
///
/// `send` never reports failure. Callers that need to know whether a
/// message arrived must wait for a response and time out on their own.
pub trait Transport: Send + Sync + 'static {
    /// Address this node sends from.
    fn local_endpoint(&self) -> Endpoint;

    /// Queue `message` for delivery to `to`.
    fn send(&self, message: Arc<Message>, to: Endpoint);

    /// Zero-payload acknowledgment for `request`, keeping its id.
    fn empty_response(&self, request: &Message) -> Message {
        request.empty_response(self.local_endpoint())
    }
}
