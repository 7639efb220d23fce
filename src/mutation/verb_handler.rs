//! Replica-side handling of `MutationReq`.
//!
//! For every inbound write the handler checks the payload size, relays the
//! write to any replicas named in the forwarding info, applies it locally
//! and, only if the local apply succeeds, acknowledges it. A failed write is
//! never answered: the coordinator learns about it by timing out.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, error, Instrument};

use crate::errors::{ApplyError, VerbError};
use crate::messaging::forwarding::ForwardingInfo;
use crate::messaging::message::Message;
use crate::messaging::registry::VerbHandler;
use crate::messaging::transport::Transport;
use crate::messaging::{Endpoint, CURRENT_VERSION};
use crate::metrics::{
    MUTATIONS_DROPPED_TOTAL, MUTATIONS_FORWARDED_TOTAL, MUTATIONS_RECEIVED_TOTAL,
    MUTATION_ACKS_SENT_TOTAL, MUTATION_APPLY_DURATION_SECONDS,
};
use crate::mutation::payload::{Mutation, COMMITLOG_ENTRY_OVERHEAD_SIZE};
use crate::storage::applier::Applier;

/// Size ceiling applied to inbound mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationLimits {
    /// Messaging version used to compute serialized size.
    pub version: u32,
    /// Fixed per-record overhead of the append log.
    pub entry_overhead: usize,
    /// Largest accepted `serialized size + overhead`.
    pub max_mutation_size: usize,
}

impl MutationLimits {
    pub fn new(max_mutation_size: usize) -> Self {
        Self {
            version: CURRENT_VERSION,
            entry_overhead: COMMITLOG_ENTRY_OVERHEAD_SIZE,
            max_mutation_size,
        }
    }
}

/// Handles write requests addressed to this replica.
pub struct MutationVerbHandler {
    transport: Arc<dyn Transport>,
    applier: Arc<dyn Applier>,
    limits: MutationLimits,
}

impl MutationVerbHandler {
    pub fn new(
        transport: Arc<dyn Transport>,
        applier: Arc<dyn Applier>,
        limits: MutationLimits,
    ) -> Self {
        Self {
            transport,
            applier,
            limits,
        }
    }

    /// Relay `original` to each forward target.
    ///
    /// Relayed copies acknowledge straight to the original sender and never
    /// relay further. When every target shares the original id one message
    /// is built and sent to all of them.
    fn forward_to_local_nodes(&self, original: &Message, forward_to: &ForwardingInfo) {
        let mut builder = original.builder();
        builder
            .with_respond_to(original.from())
            .without_forward_to();

        let use_same_message_id = forward_to.use_same_message_id(original.id());
        let shared = use_same_message_id.then(|| Arc::new(builder.build()));

        for (id, target) in forward_to.iter() {
            debug!("Enqueuing forwarded write to {}", target);
            let message = match &shared {
                Some(message) => message.clone(),
                None => Arc::new(builder.with_id(id).build()),
            };
            self.transport.send(message, target);
            counter!(MUTATIONS_FORWARDED_TOTAL).increment(1);
        }
    }
}

fn respond(transport: &dyn Transport, request: &Message, respond_to: Endpoint) {
    debug!("Enqueuing response to {}", respond_to);
    let ack = transport.empty_response(request);
    transport.send(Arc::new(ack), respond_to);
    counter!(MUTATION_ACKS_SENT_TOTAL).increment(1);
}

fn failed(mutation: &Mutation, err: &ApplyError) {
    debug!(
        "Payload application resulted in WriteTimeout, not replying ({}.{}: {})",
        mutation.keyspace(),
        mutation.key_display(),
        err
    );
    counter!(MUTATIONS_DROPPED_TOTAL, "reason" => err.code()).increment(1);
}

impl VerbHandler for MutationVerbHandler {
    fn do_verb(&self, message: Arc<Message>) -> Result<(), VerbError> {
        let mutation = message
            .payload
            .as_mutation()
            .cloned()
            .ok_or(VerbError::UnexpectedPayload {
                verb: message.verb(),
            })?;
        counter!(MUTATIONS_RECEIVED_TOTAL).increment(1);

        let limits = self.limits;
        if let Err(err) = mutation.validate_size(
            limits.version,
            limits.entry_overhead,
            limits.max_mutation_size,
        ) {
            counter!(MUTATIONS_DROPPED_TOTAL, "reason" => err.code()).increment(1);
            return Err(err);
        }

        if let Some(forward_to) = message.forward_to() {
            if !forward_to.is_empty() {
                self.forward_to_local_nodes(&message, forward_to);
            }
        }

        let respond_to = message.respond_to();
        let pending = match self.applier.apply_async(mutation.clone()) {
            Ok(pending) => pending,
            Err(err) if err.is_write_timeout() => {
                failed(&mutation, &err);
                return Ok(());
            }
            Err(err) => {
                counter!(MUTATIONS_DROPPED_TOTAL, "reason" => err.code()).increment(1);
                return Err(err.into());
            }
        };

        let transport = self.transport.clone();
        let span = tracing::debug_span!(
            "apply",
            id = %message.id(),
            session = ?message.trace_session()
        );
        let started = Instant::now();
        tokio::spawn(
            async move {
                match pending.await {
                    Ok(()) => {
                        histogram!(MUTATION_APPLY_DURATION_SECONDS)
                            .record(started.elapsed().as_secs_f64());
                        respond(transport.as_ref(), &message, respond_to);
                    }
                    Err(err) if err.is_write_timeout() => failed(&mutation, &err),
                    Err(err) => {
                        error!(
                            "Failed to apply mutation {} for {}.{}: {}",
                            message.id(),
                            mutation.keyspace(),
                            mutation.key_display(),
                            err
                        );
                        counter!(MUTATIONS_DROPPED_TOTAL, "reason" => err.code()).increment(1);
                    }
                }
            }
            .instrument(span),
        );
        Ok(())
    }
}
