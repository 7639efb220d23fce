//! mutation-relay -- runs a local cluster and drives writes through it.
//!
//! Every node in `cluster.nodes` is started in-process. One node then acts
//! as coordinator for `simulation.mutations` writes; replicas relay, apply
//! and acknowledge them. With `--serve` the admin router stays up after the
//! run until SIGTERM/SIGINT.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "mutation-relay",
    version,
    about = "Replica-side write relay and acknowledgment"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "mutation-relay.example.yaml")]
    config: String,

    /// Override the number of writes to issue.
    #[arg(short, long)]
    mutations: Option<u64>,

    /// Keep serving the admin endpoints after the run.
    #[arg(long)]
    serve: bool,

    /// Override the admin bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = mutation_relay::config::load_config(&cli.config)?;
    if let Some(mutations) = cli.mutations {
        config.simulation.mutations = mutations;
    }

    // Initialize tracing / logging.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    info!("Loaded configuration from {}", cli.config);

    if config.observability.metrics {
        mutation_relay::metrics::init_metrics();
        mutation_relay::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let cluster = mutation_relay::cluster::local::LocalCluster::start(&config)?;
    info!("Local cluster of {} nodes started", cluster.nodes().len());

    let report = mutation_relay::simulation::run_workload(&cluster, &config.simulation).await?;
    info!(
        "Workload finished: {} writes, {} succeeded, {} timed out, {} acks in {} ms",
        report.writes, report.succeeded, report.timed_out, report.acks_received, report.elapsed_ms
    );

    if !cli.serve {
        cluster.shutdown();
        return Ok(());
    }

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
    let state = Arc::new(mutation_relay::AppState {
        config,
        cluster,
        last_report: RwLock::new(Some(report)),
    });
    let app = mutation_relay::server::app(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Admin endpoints listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.cluster.shutdown();
    info!("mutation-relay shut down");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
