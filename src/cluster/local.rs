//! Several nodes running in one process on a shared [`LocalNetwork`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cluster::coordinator::Replica;
use crate::cluster::node::Node;
use crate::config::Config;
use crate::messaging::local::LocalNetwork;
use crate::mutation::verb_handler::MutationLimits;
use crate::storage::memory::{MemoryApplier, MemoryApplierOptions};

/// The nodes listed in `cluster.nodes`, each with its dispatch loop running.
pub struct LocalCluster {
    network: LocalNetwork,
    nodes: Vec<Arc<Node>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LocalCluster {
    /// Bind and start every configured node. Must run inside a tokio runtime.
    pub fn start(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        let network = LocalNetwork::new();
        let limits = MutationLimits {
            version: config.messaging.version,
            ..MutationLimits::new(config.messaging.max_mutation_size)
        };
        let options = MemoryApplierOptions {
            write_timeout: Duration::from_millis(config.storage.write_timeout_ms),
            max_pending_writes: config.storage.max_pending_writes,
            simulated_latency: Duration::from_millis(config.storage.simulated_latency_ms),
        };

        let mut nodes = Vec::with_capacity(config.cluster.nodes.len());
        let mut tasks = Vec::with_capacity(config.cluster.nodes.len());
        for node_config in &config.cluster.nodes {
            let (transport, inbox) = network.bind(node_config.address);
            let node = Node::new(
                node_config.name.clone(),
                node_config.datacenter.clone(),
                Arc::new(transport),
                MemoryApplier::new(options.clone()),
                limits,
            );
            tasks.push(node.start(inbox));
            info!(
                "Node {} started at {} in {}",
                node_config.name, node_config.address, node_config.datacenter
            );
            nodes.push(node);
        }

        Ok(Self {
            network,
            nodes,
            tasks,
        })
    }

    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Arc<Node>> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    /// Cut `name` off from the network.
    pub fn isolate(&self, name: &str) -> anyhow::Result<()> {
        let node = self
            .node(name)
            .with_context(|| format!("no node named '{name}'"))?;
        self.network.isolate(node.endpoint());
        info!("Node {} isolated", name);
        Ok(())
    }

    /// Every node as a replica of the whole keyspace.
    pub fn replicas(&self) -> Vec<Replica> {
        self.nodes
            .iter()
            .map(|n| Replica {
                endpoint: n.endpoint(),
                datacenter: n.datacenter().to_string(),
            })
            .collect()
    }

    /// Stop every dispatch loop.
    pub fn shutdown(&self) {
        for node in &self.nodes {
            self.network.unbind(node.endpoint());
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
