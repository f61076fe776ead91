//! Update worker.
//!
//! Runs the machine update reconciliation on a periodic interval. Each tick
//! takes a fresh observation and hands it to the engine for at most one
//! decision; convergence emerges from repeated ticks.

use std::sync::Arc;
use std::time::Duration;

use mset_reconcile::{group_by_index, seed_desired_indices, MachineSetSpec};
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::provider::{MachineProvider, ObservationSource};
use crate::status::StatusWriter;
use crate::updates::reconcile_machine_updates;

/// Worker that drives the update engine.
pub struct UpdateWorker {
    spec: MachineSetSpec,
    provider: Arc<dyn MachineProvider>,
    source: Arc<dyn ObservationSource>,
    status: Arc<dyn StatusWriter>,
    interval: Duration,
}

impl UpdateWorker {
    /// Create a new update worker.
    pub fn new(
        spec: MachineSetSpec,
        provider: Arc<dyn MachineProvider>,
        source: Arc<dyn ObservationSource>,
        status: Arc<dyn StatusWriter>,
        interval: Duration,
    ) -> Self {
        Self {
            spec,
            provider,
            source,
            status,
            interval,
        }
    }

    /// Run the update worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            namespace = %self.spec.namespace,
            "Starting update worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_reconciliation().await {
                        error!(error = %e, "Machine update reconciliation failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Update worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single reconciliation pass.
    async fn run_reconciliation(&self) -> anyhow::Result<()> {
        let machines = self.source.observe().await?;

        let mut machine_infos = group_by_index(machines);
        if let Some(replicas) = self.spec.replicas {
            seed_desired_indices(&mut machine_infos, replicas);
        }

        reconcile_machine_updates(
            &self.spec,
            self.provider.as_ref(),
            self.status.as_ref(),
            &machine_infos,
        )
        .await?;

        Ok(())
    }
}
