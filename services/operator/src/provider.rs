//! Machine provider interface and in-memory implementation.
//!
//! The provider interface abstracts the machine backend:
//! - Creating replacement machines at an index
//! - Requesting removal of existing machines
//!
//! An in-memory implementation is provided for testing and development. It
//! records every call and simulates machine readiness transitions so the
//! update worker can be exercised end-to-end without a real cluster.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use mset_reconcile::{MachineInfo, MachineRef};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Machine backend interface.
#[async_trait]
pub trait MachineProvider: Send + Sync {
    /// Create a new machine at the given index from the owner's template.
    /// Returns once the backing store has accepted the creation; readiness
    /// is observed separately.
    async fn create_machine(&self, index: i32) -> Result<()>;

    /// Request removal of the referenced machine. Deleting a machine that
    /// is already gone must not error.
    async fn delete_machine(&self, machine_ref: &MachineRef) -> Result<()>;
}

/// Produces the observed machine state for one engine invocation.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn observe(&self) -> Result<Vec<MachineInfo>>;
}

/// A single recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Create { index: i32 },
    Delete { namespace: String, name: String },
}

/// How long a simulated machine stays pending after creation.
const READINESS_DELAY: Duration = Duration::from_millis(200);

/// How long a simulated machine lingers after deletion was requested.
const REMOVAL_DELAY: Duration = Duration::from_millis(100);

struct MockMachine {
    info: MachineInfo,
    created_at: Instant,
    deleted_at: Option<Instant>,
}

#[derive(Default)]
struct MockState {
    machines: Vec<MockMachine>,
    calls: Vec<ProviderCall>,
}

/// In-memory machine provider for testing and development.
pub struct MockMachineProvider {
    state: Mutex<MockState>,

    /// Namespace stamped onto created machines.
    namespace: String,

    /// Counter for generating machine names.
    name_counter: AtomicU64,

    /// Whether operations should fail.
    fail_operations: bool,
}

impl MockMachineProvider {
    /// Create an empty mock provider.
    pub fn new(namespace: &str) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            namespace: namespace.to_string(),
            name_counter: AtomicU64::new(0),
            fail_operations: false,
        }
    }

    /// Create a mock provider that fails all operations.
    pub fn failing(namespace: &str) -> Self {
        Self {
            fail_operations: true,
            ..Self::new(namespace)
        }
    }

    /// All provider calls recorded so far, in order.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().await.calls.clone()
    }

    /// Mark the named machine as needing an update, simulating a template
    /// change observed by the collaborator.
    pub async fn mark_needs_update(&self, name: &str) {
        let mut state = self.state.lock().await;
        for machine in &mut state.machines {
            if machine.info.machine_ref.name == name {
                machine.info.needs_update = true;
            }
        }
    }

    fn next_machine_name(&self, index: i32) -> String {
        let counter = self.name_counter.fetch_add(1, Ordering::SeqCst);
        format!("machine-{index}-{counter}")
    }
}

#[async_trait]
impl MachineProvider for MockMachineProvider {
    async fn create_machine(&self, index: i32) -> Result<()> {
        if self.fail_operations {
            anyhow::bail!("mock machine provider configured to fail");
        }

        let name = self.next_machine_name(index);
        info!(index, name = %name, "Mock provider creating machine");

        let mut state = self.state.lock().await;
        state.calls.push(ProviderCall::Create { index });
        state.machines.push(MockMachine {
            info: MachineInfo {
                index,
                machine_ref: MachineRef {
                    name,
                    namespace: self.namespace.clone(),
                    deletion_timestamp: None,
                },
                ready: false,
                needs_update: false,
            },
            created_at: Instant::now(),
            deleted_at: None,
        });

        Ok(())
    }

    async fn delete_machine(&self, machine_ref: &MachineRef) -> Result<()> {
        if self.fail_operations {
            anyhow::bail!("mock machine provider configured to fail");
        }

        info!(
            name = %machine_ref.name,
            namespace = %machine_ref.namespace,
            "Mock provider deleting machine"
        );

        let mut state = self.state.lock().await;
        state.calls.push(ProviderCall::Delete {
            namespace: machine_ref.namespace.clone(),
            name: machine_ref.name.clone(),
        });

        // Idempotent: a machine that is already gone or already marked is
        // left as-is.
        for machine in &mut state.machines {
            if machine.info.machine_ref.name == machine_ref.name && machine.deleted_at.is_none() {
                machine.deleted_at = Some(Instant::now());
                machine.info.machine_ref.deletion_timestamp = Some(Utc::now());
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ObservationSource for MockMachineProvider {
    async fn observe(&self) -> Result<Vec<MachineInfo>> {
        let mut state = self.state.lock().await;

        // Deleted machines disappear once their removal delay has elapsed.
        state.machines.retain(|m| {
            m.deleted_at
                .map(|at| at.elapsed() < REMOVAL_DELAY)
                .unwrap_or(true)
        });

        // Live machines report ready after the simulated startup delay.
        for machine in &mut state.machines {
            if machine.deleted_at.is_none() && machine.created_at.elapsed() >= READINESS_DELAY {
                machine.info.ready = true;
            }
        }

        let infos: Vec<MachineInfo> = state.machines.iter().map(|m| m.info.clone()).collect();
        debug!(machine_count = infos.len(), "Observed machine state");

        Ok(infos)
    }
}
