//! A single storage node.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::cluster::coordinator::Coordinator;
use crate::errors::VerbError;
use crate::messaging::callbacks::{Callbacks, ResponseVerbHandler};
use crate::messaging::local::Inbox;
use crate::messaging::message::Message;
use crate::messaging::registry::VerbRegistry;
use crate::messaging::transport::Transport;
use crate::messaging::{Endpoint, Verb};
use crate::mutation::verb_handler::{MutationLimits, MutationVerbHandler};
use crate::storage::memory::MemoryApplier;

/// A replica: transport, verb handlers and local storage.
pub struct Node {
    name: String,
    datacenter: String,
    transport: Arc<dyn Transport>,
    registry: Arc<VerbRegistry>,
    callbacks: Arc<Callbacks>,
    applier: MemoryApplier,
}

impl Node {
    /// Wire the mutation and response handlers for a node.
    pub fn new(
        name: impl Into<String>,
        datacenter: impl Into<String>,
        transport: Arc<dyn Transport>,
        applier: MemoryApplier,
        limits: MutationLimits,
    ) -> Arc<Self> {
        let callbacks = Arc::new(Callbacks::new());
        let mut registry = VerbRegistry::new();
        registry
            .register(
                Verb::MutationReq,
                Arc::new(MutationVerbHandler::new(
                    transport.clone(),
                    Arc::new(applier.clone()),
                    limits,
                )),
            )
            .register(
                Verb::MutationRsp,
                Arc::new(ResponseVerbHandler::new(callbacks.clone())),
            );

        Arc::new(Self {
            name: name.into(),
            datacenter: datacenter.into(),
            transport,
            registry: Arc::new(registry),
            callbacks,
            applier,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    pub fn endpoint(&self) -> Endpoint {
        self.transport.local_endpoint()
    }

    pub fn applier(&self) -> &MemoryApplier {
        &self.applier
    }

    /// A coordinator sending from this node.
    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(
            self.transport.clone(),
            self.callbacks.clone(),
            self.datacenter.clone(),
        )
    }

    /// Drain `inbox`, handling each message on its own task.
    pub fn start(self: &Arc<Self>, mut inbox: Inbox) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                let node = node.clone();
                tokio::spawn(async move { node.dispatch(message) });
            }
            debug!("Inbox of {} closed", node.name);
        })
    }

    /// Run the handler for `message`. Failures are logged and never
    /// answered.
    pub fn dispatch(&self, message: Arc<Message>) {
        let id = message.id();
        let verb = message.verb();
        let from = message.from();
        if let Err(err) = self.registry.dispatch(message) {
            match &err {
                VerbError::MutationTooLarge { .. } => {
                    warn!("{}: dropping {} {} from {}: {}", self.name, verb, id, from, err)
                }
                VerbError::Apply(_) => {
                    error!("{}: {} {} from {} failed: {}", self.name, verb, id, from, err)
                }
                VerbError::UnexpectedPayload { .. } | VerbError::NoHandler { .. } => {
                    warn!("{}: cannot handle {} {} from {}: {}", self.name, verb, id, from, err)
                }
            }
        }
    }
}
