//! In-process transport for running several nodes inside one process.
//!
//! Every bound endpoint owns an unbounded tokio channel. Delivery is
//! best-effort exactly like a real network: messages to an unbound or
//! isolated endpoint are dropped without telling the sender.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::messaging::message::Message;
use crate::messaging::transport::Transport;
use crate::messaging::Endpoint;

/// Receiving half of a bound endpoint.
pub type Inbox = mpsc::UnboundedReceiver<Arc<Message>>;

/// Shared switchboard connecting local transports.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    inboxes: RwLock<HashMap<Endpoint, mpsc::UnboundedSender<Arc<Message>>>>,
    isolated: RwLock<HashSet<Endpoint>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `endpoint`, returning its transport and inbox.
    ///
    /// Rebinding an endpoint replaces the previous inbox.
    pub fn bind(&self, endpoint: Endpoint) -> (LocalTransport, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint, tx);
        let transport = LocalTransport {
            endpoint,
            network: self.clone(),
        };
        (transport, rx)
    }

    pub fn unbind(&self, endpoint: Endpoint) {
        self.inner
            .inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&endpoint);
    }

    /// Drop all traffic to and from `endpoint` until [`LocalNetwork::heal`].
    pub fn isolate(&self, endpoint: Endpoint) {
        self.inner
            .isolated
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint);
    }

    pub fn heal(&self, endpoint: Endpoint) {
        self.inner
            .isolated
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&endpoint);
    }

    pub fn is_isolated(&self, endpoint: Endpoint) -> bool {
        self.inner
            .isolated
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&endpoint)
    }

    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn deliver(&self, from: Endpoint, to: Endpoint, message: Arc<Message>) {
        if self.is_isolated(from) || self.is_isolated(to) {
            debug!("Dropping {} {} from {} to isolated {}", message.verb(), message.id(), from, to);
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let inboxes = self
            .inner
            .inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let sent = match inboxes.get(&to) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        };
        if sent {
            self.inner.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!("No live endpoint at {}, message from {} dropped", to, from);
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A node's handle onto a [`LocalNetwork`].
#[derive(Clone)]
pub struct LocalTransport {
    endpoint: Endpoint,
    network: LocalNetwork,
}

impl Transport for LocalTransport {
    fn local_endpoint(&self) -> Endpoint {
        self.endpoint
    }

    fn send(&self, message: Arc<Message>, to: Endpoint) {
        trace!("Sending {} {} to {}", message.verb(), message.id(), to);
        self.network.deliver(self.endpoint, to, message);
    }
}
