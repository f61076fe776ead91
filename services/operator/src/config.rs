//! Configuration for the update operator.

use anyhow::Result;
use mset_reconcile::{MachineSetSpec, UpdateStrategy};

/// Update operator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace the machine set lives in.
    pub namespace: String,

    /// Desired number of machines. None surfaces as a configuration error
    /// at reconcile time rather than here, so the degraded path is uniform.
    pub replicas: Option<i32>,

    /// Update strategy.
    pub strategy: UpdateStrategy,

    /// Seconds between reconciliation passes.
    pub reconcile_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Whether we're in development mode, running against the in-memory
    /// machine provider.
    pub dev_mode: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let namespace =
            std::env::var("MSET_NAMESPACE").unwrap_or_else(|_| "mset-system".to_string());

        let replicas = match std::env::var("MSET_REPLICAS") {
            Ok(value) => Some(value.parse()?),
            Err(_) => Some(3),
        };

        let strategy = std::env::var("MSET_STRATEGY")
            .map(UpdateStrategy::from)
            .unwrap_or_default();

        let reconcile_interval_secs = std::env::var("MSET_RECONCILE_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let log_level = std::env::var("MSET_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("MSET_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            namespace,
            replicas,
            strategy,
            reconcile_interval_secs,
            log_level,
            dev_mode,
        })
    }

    /// The machine set spec declared by this configuration.
    pub fn machine_set_spec(&self) -> MachineSetSpec {
        MachineSetSpec {
            replicas: self.replicas,
            strategy: self.strategy.clone(),
            namespace: self.namespace.clone(),
        }
    }
}
