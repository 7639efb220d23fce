//! Local application contract.
//!
//! A replica hands every admitted mutation to an [`Applier`]. The applier
//! may refuse outright (returning `Err` synchronously) or hand back a
//! pending write that later resolves to success or failure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::ApplyError;
use crate::mutation::payload::Mutation;

/// A pending local write.
pub type ApplyFuture = Pin<Box<dyn Future<Output = Result<(), ApplyError>> + Send + 'static>>;

/// Applies mutations to local storage.
pub trait Applier: Send + Sync + 'static {
    /// Start applying `mutation`.
    ///
    /// Must not block for an unbounded time, and the returned future must
    /// eventually resolve.
    fn apply_async(&self, mutation: Arc<Mutation>) -> Result<ApplyFuture, ApplyError>;
}
