//! Drives a batch of writes through one coordinator of a [`LocalCluster`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info};

use crate::cluster::local::LocalCluster;
use crate::config::SimulationConfig;
use crate::mutation::payload::MutationBuilder;

/// Keyspace every simulated write goes to.
pub const KEYSPACE: &str = "relay";
/// Table every simulated write goes to.
pub const TABLE: &str = "kv";

/// Totals for one workload run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkloadReport {
    pub writes: u64,
    pub succeeded: u64,
    pub timed_out: u64,
    pub acks_received: u64,
    pub elapsed_ms: u64,
}

/// Issue `config.mutations` writes, one after another, to every replica.
pub async fn run_workload(
    cluster: &LocalCluster,
    config: &SimulationConfig,
) -> anyhow::Result<WorkloadReport> {
    for name in &config.isolated {
        cluster.isolate(name)?;
    }

    let coordinator_node = match &config.coordinator {
        Some(name) => cluster
            .node(name)
            .with_context(|| format!("no node named '{name}'"))?,
        None => cluster
            .nodes()
            .first()
            .context("cluster has no nodes")?,
    };
    let coordinator = coordinator_node.coordinator();
    let replicas = cluster.replicas();
    let block_for = config.consistency.block_for(replicas.len());
    let timeout = Duration::from_millis(config.write_timeout_ms);

    info!(
        "Running {} writes from {} at {:?} ({} of {} replicas)",
        config.mutations,
        coordinator_node.name(),
        config.consistency,
        block_for,
        replicas.len()
    );

    let started = Instant::now();
    let mut report = WorkloadReport::default();
    for i in 0..config.mutations {
        let mut value = vec![0u8; config.value_size];
        rand::thread_rng().fill_bytes(&mut value);
        let mutation = MutationBuilder::new(KEYSPACE, format!("key-{i}"))
            .cell(TABLE, Bytes::new(), "value", value, i as i64)
            .build();

        let outcome = coordinator
            .write(Arc::new(mutation), &replicas, block_for, timeout)
            .await;
        report.writes += 1;
        report.acks_received += outcome.acked.len() as u64;
        if outcome.is_success() {
            report.succeeded += 1;
        } else {
            debug!(
                "Write {} got {}/{} acks",
                outcome.id,
                outcome.acked.len(),
                outcome.required
            );
            report.timed_out += 1;
        }
    }
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::coordinator::ConsistencyLevel;
    use crate::config::Config;

    #[tokio::test]
    async fn test_workload_on_healthy_cluster() {
        let config = Config::default();
        let cluster = LocalCluster::start(&config).unwrap();
        let sim = SimulationConfig {
            mutations: 10,
            consistency: ConsistencyLevel::All,
            ..SimulationConfig::default()
        };
        let report = run_workload(&cluster, &sim).await.unwrap();
        assert_eq!(report.writes, 10);
        assert_eq!(report.succeeded, 10);
        assert_eq!(report.timed_out, 0);
        assert_eq!(report.acks_received, 30);
    }

    #[tokio::test]
    async fn test_workload_with_isolated_node_fails_all() {
        let config = Config::default();
        let cluster = LocalCluster::start(&config).unwrap();
        let sim = SimulationConfig {
            mutations: 3,
            consistency: ConsistencyLevel::All,
            write_timeout_ms: 30,
            isolated: vec!["node3".into()],
            ..SimulationConfig::default()
        };
        let report = run_workload(&cluster, &sim).await.unwrap();
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.timed_out, 3);
    }

    #[tokio::test]
    async fn test_oversize_values_time_out() {
        let mut config = Config::default();
        config.messaging.max_mutation_size = 64;
        let cluster = LocalCluster::start(&config).unwrap();
        let sim = SimulationConfig {
            mutations: 2,
            value_size: 128,
            write_timeout_ms: 30,
            ..SimulationConfig::default()
        };
        let report = run_workload(&cluster, &sim).await.unwrap();
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.acks_received, 0);
    }
}
