//! Error types for inbound message handling and local application.
//!
//! None of these ever travel back to a coordinator. A failed write is
//! reported only by the absence of an acknowledgment; the variants here
//! exist for logging, metrics labels and control flow inside a node.

use std::time::Duration;

use thiserror::Error;

use crate::messaging::{Endpoint, Verb};

/// Why a verb handler did not complete its work.
#[derive(Debug, Error)]
pub enum VerbError {
    /// The payload would not fit in a single append-log record.
    #[error("Mutation of {size} bytes for {keyspace}.{key} exceeds maximum size of {max} bytes")]
    MutationTooLarge {
        keyspace: String,
        key: String,
        size: usize,
        max: usize,
    },

    /// The message body does not match what its verb requires.
    #[error("{verb} message carried an unexpected payload")]
    UnexpectedPayload { verb: Verb },

    /// Nothing is registered for this verb.
    #[error("No handler registered for verb {verb}")]
    NoHandler { verb: Verb },

    /// The local applier failed before returning a pending write.
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

impl VerbError {
    /// Short label for metrics and structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            VerbError::MutationTooLarge { .. } => "mutation_too_large",
            VerbError::UnexpectedPayload { .. } => "unexpected_payload",
            VerbError::NoHandler { .. } => "no_handler",
            VerbError::Apply(e) => e.code(),
        }
    }
}

/// Outcome of a failed local write.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The write did not complete within the storage layer's bound.
    #[error("Write to keyspace {keyspace} timed out after {timeout:?}")]
    WriteTimeout { keyspace: String, timeout: Duration },

    /// Any other storage failure.
    #[error("Write failed: {0}")]
    Fault(#[from] anyhow::Error),
}

impl ApplyError {
    pub fn is_write_timeout(&self) -> bool {
        matches!(self, ApplyError::WriteTimeout { .. })
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApplyError::WriteTimeout { .. } => "write_timeout",
            ApplyError::Fault(_) => "write_fault",
        }
    }
}

/// Invalid forwarding instructions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForwardingError {
    #[error("Forwarding info has {ids} message ids but {targets} targets")]
    LengthMismatch { ids: usize, targets: usize },

    #[error("Forwarding target {target} listed more than once")]
    DuplicateTarget { target: Endpoint },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_error_codes() {
        let err = VerbError::MutationTooLarge {
            keyspace: "ks".into(),
            key: "k".into(),
            size: 10,
            max: 5,
        };
        assert_eq!(err.code(), "mutation_too_large");
        assert_eq!(
            err.to_string(),
            "Mutation of 10 bytes for ks.k exceeds maximum size of 5 bytes"
        );
        assert_eq!(
            VerbError::NoHandler {
                verb: Verb::MutationRsp
            }
            .code(),
            "no_handler"
        );
    }

    #[test]
    fn test_apply_error_classification() {
        let timeout = ApplyError::WriteTimeout {
            keyspace: "ks".into(),
            timeout: Duration::from_millis(20),
        };
        assert!(timeout.is_write_timeout());
        assert_eq!(VerbError::from(timeout).code(), "write_timeout");

        let fault = ApplyError::from(anyhow::anyhow!("disk on fire"));
        assert!(!fault.is_write_timeout());
        assert_eq!(fault.to_string(), "Write failed: disk on fire");
    }
}
