//! mutation-relay -- replica-side write handling.
//!
//! A replica receiving a write checks the payload size, relays the write
//! to the replicas its coordinator asked it to, applies it locally and
//! acknowledges only on success. This crate provides that handler, the
//! messaging and storage seams it runs against, and an in-process cluster
//! with a coordinator for exercising it end to end.

use tokio::sync::RwLock;

pub mod cluster;
pub mod config;
pub mod errors;
pub mod messaging;
pub mod metrics;
pub mod mutation;
pub mod server;
pub mod simulation;
pub mod storage;

use crate::cluster::local::LocalCluster;
use crate::config::Config;
use crate::simulation::WorkloadReport;

/// Shared application state passed to admin handlers via `axum::extract::State`.
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// The running nodes.
    pub cluster: LocalCluster,
    /// Result of the most recent workload run, if any.
    pub last_report: RwLock<Option<WorkloadReport>>,
}
