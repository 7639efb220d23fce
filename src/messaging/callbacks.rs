//! Matching inbound acknowledgments to the requests awaiting them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::VerbError;
use crate::messaging::message::Message;
use crate::messaging::registry::VerbHandler;
use crate::messaging::{Endpoint, MessageId};

/// Outstanding requests, keyed by the id their acknowledgments carry.
///
/// Each registration yields a stream of the endpoints that acknowledged.
/// Several replicas may acknowledge under the same id.
#[derive(Default)]
pub struct Callbacks {
    pending: Mutex<HashMap<MessageId, mpsc::UnboundedSender<Endpoint>>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: MessageId) -> mpsc::UnboundedReceiver<Endpoint> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        rx
    }

    pub fn remove(&self, id: MessageId) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Route an acknowledgment. Returns false if nobody waits for `id`.
    pub fn deliver(&self, id: MessageId, from: Endpoint) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.get(&id) {
            Some(tx) => tx.send(from).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handles `MutationRsp` by completing the matching callback.
pub struct ResponseVerbHandler {
    callbacks: Arc<Callbacks>,
}

impl ResponseVerbHandler {
    pub fn new(callbacks: Arc<Callbacks>) -> Self {
        Self { callbacks }
    }
}

impl VerbHandler for ResponseVerbHandler {
    fn do_verb(&self, message: Arc<Message>) -> Result<(), VerbError> {
        if !self.callbacks.deliver(message.id(), message.from()) {
            debug!(
                "Callback already removed for {} (from {})",
                message.id(),
                message.from()
            );
        }
        Ok(())
    }
}
