//! Routing of inbound messages to their verb handlers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::VerbError;
use crate::messaging::message::Message;
use crate::messaging::Verb;

/// Handles every inbound message of one verb.
pub trait VerbHandler: Send + Sync + 'static {
    fn do_verb(&self, message: Arc<Message>) -> Result<(), VerbError>;
}

/// Maps each verb to the handler responsible for it.
#[derive(Clone, Default)]
pub struct VerbRegistry {
    handlers: HashMap<Verb, Arc<dyn VerbHandler>>,
}

impl VerbRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `verb`, replacing any earlier registration.
    pub fn register(&mut self, verb: Verb, handler: Arc<dyn VerbHandler>) -> &mut Self {
        self.handlers.insert(verb, handler);
        self
    }

    /// Hand `message` to the handler registered for its verb.
    pub fn dispatch(&self, message: Arc<Message>) -> Result<(), VerbError> {
        let verb = message.verb();
        match self.handlers.get(&verb) {
            Some(handler) => handler.do_verb(message),
            None => Err(VerbError::NoHandler { verb }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::Payload;
    use crate::messaging::Endpoint;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl VerbHandler for Counting {
        fn do_verb(&self, _message: Arc<Message>) -> Result<(), VerbError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_dispatch_by_verb() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let mut registry = VerbRegistry::new();
        registry.register(Verb::MutationRsp, counter.clone());

        let from = Endpoint::from(([127, 0, 0, 1], 7000));
        let rsp = Arc::new(Message::out(Verb::MutationRsp, from, Payload::Empty));
        registry.dispatch(rsp).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        let req = Arc::new(Message::out(Verb::MutationReq, from, Payload::Empty));
        let err = registry.dispatch(req).unwrap_err();
        assert!(matches!(
            err,
            VerbError::NoHandler {
                verb: Verb::MutationReq
            }
        ));
    }
}
