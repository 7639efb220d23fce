//! Nodes, the write coordinator, and an in-process cluster to run them in.
//!
//! Each [`node::Node`] owns a verb registry wired to the mutation and
//! response handlers. A [`coordinator::Coordinator`] issues writes and
//! waits for acknowledgments; [`local::LocalCluster`] connects a set of
//! nodes over a [`crate::messaging::local::LocalNetwork`].

pub mod coordinator;
pub mod local;
pub mod node;
