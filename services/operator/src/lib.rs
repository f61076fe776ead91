//! Machine-set update operator library.
//!
//! The operator converges a fixed-size set of indexed control-plane
//! machines toward a declared spec. The update engine decides at most one
//! action per invocation - create a replacement machine, delete an outdated
//! machine, or wait - and relies on the worker to re-invoke it as observed
//! state changes.
//!
//! ## Modules
//!
//! - `updates`: the update engine (strategy dispatch, rolling update,
//!   on-delete update)
//! - `provider`: the machine backend interface and in-memory implementation
//! - `status`: status conditions and the status writer interface
//! - `worker`: the periodic reconciliation loop
//! - `config`: environment-based configuration

pub mod config;
pub mod provider;
pub mod status;
pub mod updates;
pub mod worker;

// Re-export commonly used types
pub use provider::{MachineProvider, MockMachineProvider, ObservationSource, ProviderCall};
pub use status::{Condition, ConditionStatus, RecordingStatusWriter, StatusWriter};
pub use updates::{reconcile_machine_updates, ReconcileResult, UpdateError};
pub use worker::UpdateWorker;
