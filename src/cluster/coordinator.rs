//! Issuing writes to a replica set and counting acknowledgments.
//!
//! Replicas in the coordinator's own datacenter are contacted directly.
//! For every other datacenter one replica receives the write together with
//! forwarding info naming the rest, so only one copy crosses datacenters.
//! All copies share one message id; every replica acknowledges straight to
//! the coordinator under that id.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::messaging::callbacks::Callbacks;
use crate::messaging::forwarding::ForwardingInfo;
use crate::messaging::message::{MessageBuilder, Payload};
use crate::messaging::transport::Transport;
use crate::messaging::{Endpoint, MessageId, Verb};
use crate::metrics::COORDINATOR_WRITES_TOTAL;
use crate::mutation::payload::Mutation;

/// Acknowledgments a write needs before it counts as successful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    One,
    #[default]
    Quorum,
    All,
}

impl ConsistencyLevel {
    /// Acknowledgments required out of `replicas`.
    pub fn block_for(&self, replicas: usize) -> usize {
        match self {
            ConsistencyLevel::One => replicas.min(1),
            ConsistencyLevel::Quorum => replicas / 2 + 1,
            ConsistencyLevel::All => replicas,
        }
    }
}

/// A replica and the datacenter it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    pub endpoint: Endpoint,
    pub datacenter: String,
}

/// What happened to one coordinated write.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub id: MessageId,
    /// Replicas that acknowledged before the coordinator stopped waiting.
    pub acked: Vec<Endpoint>,
    pub required: usize,
    pub timed_out: bool,
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        self.acked.len() >= self.required
    }
}

/// Removes its callback when dropped, including when a write is cancelled.
struct Registration<'a> {
    callbacks: &'a Callbacks,
    id: MessageId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.callbacks.remove(self.id);
    }
}

/// Sends writes from one node and waits for their acknowledgments.
pub struct Coordinator {
    transport: Arc<dyn Transport>,
    callbacks: Arc<Callbacks>,
    datacenter: String,
}

impl Coordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        callbacks: Arc<Callbacks>,
        datacenter: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            callbacks,
            datacenter: datacenter.into(),
        }
    }

    /// Send `mutation` to `replicas` and wait up to `timeout` for `block_for`
    /// acknowledgments.
    pub async fn write(
        &self,
        mutation: Arc<Mutation>,
        replicas: &[Replica],
        block_for: usize,
        timeout: Duration,
    ) -> WriteOutcome {
        let local = self.transport.local_endpoint();
        let mut builder = MessageBuilder::new(Verb::MutationReq, local, Payload::Mutation(mutation));
        builder.with_trace_session(Uuid::new_v4());
        let direct = Arc::new(builder.build());
        let id = direct.id();

        let mut acks = self.callbacks.register(id);
        let registration = Registration {
            callbacks: &self.callbacks,
            id,
        };

        let mut remote: BTreeMap<&str, Vec<Endpoint>> = BTreeMap::new();
        for replica in replicas {
            if replica.datacenter == self.datacenter {
                self.transport.send(direct.clone(), replica.endpoint);
            } else {
                remote
                    .entry(replica.datacenter.as_str())
                    .or_default()
                    .push(replica.endpoint);
            }
        }

        for (dc, endpoints) in remote {
            let Some((relay, rest)) = endpoints.split_first() else {
                continue;
            };
            if rest.is_empty() {
                self.transport.send(direct.clone(), *relay);
                continue;
            }
            let forward_to = ForwardingInfo::from_pairs_unchecked(rest.iter().map(|ep| (id, *ep)));
            debug!(
                "Sending write {} to {} in {} for relay to {} replicas",
                id,
                relay,
                dc,
                rest.len()
            );
            let message = builder.with_forward_to(forward_to).build();
            self.transport.send(Arc::new(message), *relay);
        }

        let deadline = Instant::now() + timeout;
        let mut acked = Vec::new();
        let mut timed_out = false;
        while acked.len() < block_for {
            match tokio::time::timeout_at(deadline, acks.recv()).await {
                Ok(Some(from)) => acked.push(from),
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }
        drop(registration);

        let outcome = WriteOutcome {
            id,
            acked,
            required: block_for,
            timed_out,
        };
        let label = if outcome.is_success() { "success" } else { "timeout" };
        counter!(COORDINATOR_WRITES_TOTAL, "outcome" => label).increment(1);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::Message;
    use crate::mutation::payload::MutationBuilder;
    use std::sync::Mutex;

    struct RecordingTransport {
        local: Endpoint,
        sent: Mutex<Vec<(Arc<Message>, Endpoint)>>,
    }

    impl Transport for RecordingTransport {
        fn local_endpoint(&self) -> Endpoint {
            self.local
        }

        fn send(&self, message: Arc<Message>, to: Endpoint) {
            self.sent.lock().unwrap().push((message, to));
        }
    }

    fn ep(last: u8) -> Endpoint {
        Endpoint::from(([10, 0, 0, last], 7000))
    }

    fn replica(last: u8, dc: &str) -> Replica {
        Replica {
            endpoint: ep(last),
            datacenter: dc.to_string(),
        }
    }

    fn mutation() -> Arc<Mutation> {
        Arc::new(MutationBuilder::new("ks", "k").cell("t", "", "c", "v", 1).build())
    }

    #[test]
    fn test_block_for() {
        assert_eq!(ConsistencyLevel::One.block_for(3), 1);
        assert_eq!(ConsistencyLevel::Quorum.block_for(3), 2);
        assert_eq!(ConsistencyLevel::Quorum.block_for(6), 4);
        assert_eq!(ConsistencyLevel::All.block_for(5), 5);
        assert_eq!(ConsistencyLevel::One.block_for(0), 0);
    }

    #[tokio::test]
    async fn test_remote_dc_gets_one_copy_with_forwarding() {
        let transport = Arc::new(RecordingTransport {
            local: ep(1),
            sent: Mutex::new(Vec::new()),
        });
        let callbacks = Arc::new(Callbacks::new());
        let coordinator = Coordinator::new(transport.clone(), callbacks.clone(), "dc1");

        let replicas = vec![
            replica(1, "dc1"),
            replica(2, "dc1"),
            replica(3, "dc2"),
            replica(4, "dc2"),
            replica(5, "dc2"),
            replica(6, "dc3"),
        ];
        let outcome = coordinator
            .write(mutation(), &replicas, 0, Duration::from_millis(10))
            .await;
        assert!(outcome.is_success());
        assert!(callbacks.is_empty());

        let sent = transport.sent.lock().unwrap().clone();
        let targets: Vec<_> = sent.iter().map(|(_, to)| *to).collect();
        assert_eq!(targets, vec![ep(1), ep(2), ep(3), ep(6)]);

        let (relay, _) = &sent[2];
        let info = relay.forward_to().expect("relay carries forwarding info");
        assert_eq!(info.targets(), &[ep(4), ep(5)]);
        assert!(info.use_same_message_id(outcome.id));

        for (message, _) in &sent {
            assert_eq!(message.id(), outcome.id);
        }
        assert!(sent[0].0.forward_to().is_none());
        assert!(sent[3].0.forward_to().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_write_releases_callback() {
        let transport = Arc::new(RecordingTransport {
            local: ep(1),
            sent: Mutex::new(Vec::new()),
        });
        let callbacks = Arc::new(Callbacks::new());
        let coordinator = Coordinator::new(transport, callbacks.clone(), "dc1");

        let replicas = [replica(2, "dc1")];
        let write = coordinator.write(mutation(), &replicas, 1, Duration::from_secs(5));
        let result = tokio::time::timeout(Duration::from_millis(5), write).await;

        assert!(result.is_err());
        assert!(callbacks.is_empty());
    }

    #[tokio::test]
    async fn test_times_out_without_acks() {
        let transport = Arc::new(RecordingTransport {
            local: ep(1),
            sent: Mutex::new(Vec::new()),
        });
        let callbacks = Arc::new(Callbacks::new());
        let coordinator = Coordinator::new(transport, callbacks.clone(), "dc1");

        let outcome = coordinator
            .write(mutation(), &[replica(2, "dc1")], 1, Duration::from_millis(20))
            .await;
        assert!(outcome.timed_out);
        assert!(!outcome.is_success());
        assert!(callbacks.is_empty());
    }
}
