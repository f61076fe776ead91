//! Machine-set update operator.
//!
//! Drives the update reconciliation loop for a set of indexed control-plane
//! machines: replacements are created and outdated machines retired per the
//! configured update strategy.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mset_operator::config::Config;
use mset_operator::provider::{MachineProvider, MockMachineProvider, ObservationSource};
use mset_operator::status::{RecordingStatusWriter, StatusWriter};
use mset_operator::worker::UpdateWorker;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting machine-set update operator");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        namespace = %config.namespace,
        strategy = %config.strategy,
        replicas = config.replicas,
        "Configuration loaded"
    );

    // In dev mode the in-memory provider doubles as the observation source.
    // Cluster integrations plug in behind the MachineProvider and
    // ObservationSource traits.
    let (provider, source): (Arc<dyn MachineProvider>, Arc<dyn ObservationSource>) =
        if config.dev_mode {
            info!("Running against the in-memory machine provider (dev mode)");
            let machines = Arc::new(MockMachineProvider::new(&config.namespace));
            (machines.clone(), machines)
        } else {
            anyhow::bail!(
                "no machine provider integration is configured; set MSET_DEV=1 to run against the in-memory provider"
            );
        };
    let status: Arc<dyn StatusWriter> = Arc::new(RecordingStatusWriter::new());

    let worker = UpdateWorker::new(
        config.machine_set_spec(),
        provider,
        source,
        status,
        Duration::from_secs(config.reconcile_interval_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    shutdown_tx.send(true)?;

    worker_handle.await?;

    Ok(())
}
