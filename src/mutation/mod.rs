//! Write payloads and the verb handler that applies them on a replica.

pub mod payload;
pub mod verb_handler;
