//! Machine update reconciliation.
//!
//! Determines whether any machines are in need of an update and handles
//! those updates per the machine set's strategy. At most one state-changing
//! decision is taken per invocation: create a replacement machine, delete an
//! outdated machine, or wait. The worker re-invokes the engine once observed
//! state changes, so parallel progress across indexes emerges from repeated
//! invocations rather than from a single pass.

use std::collections::BTreeMap;

use mset_reconcile::{
    existing_surge, outdated_machines, pending_machines, ready_machines, updated_machines,
    MachineInfo, MachineSetSpec, UpdateStrategy, MAX_SURGE,
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace};

use crate::provider::MachineProvider;
use crate::status::{Condition, StatusWriter, REASON_INVALID_STRATEGY};

/// Log message used to inform the user that a new machine was created to
/// replace an existing machine.
const CREATED_REPLACEMENT: &str = "Created replacement machine";

/// Log message used when an error occurred while creating a replacement.
const ERROR_CREATING_MACHINE: &str = "Error creating machine";

/// Log message used when an error occurred while deleting a machine.
const ERROR_DELETING_MACHINE: &str = "Error deleting machine";

/// Message used to inform the user that they have provided an invalid value
/// for the update strategy.
const INVALID_STRATEGY_MESSAGE: &str = "invalid value for spec.strategy.type";

/// Log message used with the OnDelete strategy when a machine needs an
/// update but the user must delete it to trigger a replacement.
const MACHINE_REQUIRES_UPDATE: &str =
    "Machine requires an update, delete the machine to trigger a replacement";

/// Log message used when no updates are required in the current machine set.
const NO_UPDATES_REQUIRED: &str = "No updates required";

/// Log message used when an old machine is deleted as part of a rollout.
const REMOVING_OLD_MACHINE: &str = "Removing old machine";

/// Log message used when the rollout is waiting for a machine to become
/// ready. Used exclusively when adding a machine to a missing index.
const WAITING_FOR_READY: &str = "Waiting for machine to become ready";

/// Log message used when the rollout is waiting for a machine to be removed.
const WAITING_FOR_REMOVED: &str = "Waiting for machine to be removed";

/// Log message used when the rollout is waiting for a replacement machine
/// within an index to become ready.
const WAITING_FOR_REPLACEMENT: &str = "Waiting for replacement machine to become ready";

/// Errors surfaced by the update engine to the outer loop.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The machine set spec does not declare a replica count.
    #[error("spec.replicas is unset: replicas is required")]
    ReplicasRequired,

    /// The machine provider failed to create a replacement machine.
    #[error("error creating new Machine for index {index}: {source}")]
    CreateMachine { index: i32, source: anyhow::Error },

    /// The machine provider failed to delete a machine.
    #[error("error deleting Machine {namespace}/{name}: {source}")]
    DeleteMachine {
        namespace: String,
        name: String,
        source: anyhow::Error,
    },

    /// The status writer failed to persist a condition.
    #[error("error updating status condition: {0}")]
    Status(anyhow::Error),
}

/// Outcome of one engine invocation. Opaque to the engine; the outer loop
/// decides requeue behavior from the error channel instead.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileResult;

/// Determine if any machines are in need of an update and handle those
/// updates per the update strategy of the machine set.
///
/// Unsupported or unknown strategy values are absorbed into a Degraded
/// condition and return success: they require user intervention, so a retry
/// loop would only produce noise.
pub async fn reconcile_machine_updates(
    spec: &MachineSetSpec,
    provider: &dyn MachineProvider,
    status: &dyn StatusWriter,
    machine_infos: &BTreeMap<i32, Vec<MachineInfo>>,
) -> Result<ReconcileResult, UpdateError> {
    let replicas = spec.replicas.ok_or(UpdateError::ReplicasRequired)?;

    match &spec.strategy {
        UpdateStrategy::RollingUpdate => {
            reconcile_rolling_update(spec, replicas, provider, machine_infos).await
        }
        UpdateStrategy::OnDelete => {
            reconcile_on_delete_update(spec, replicas, provider, machine_infos).await
        }
        UpdateStrategy::Recreate => {
            let message = format!(
                "{INVALID_STRATEGY_MESSAGE}: update strategy \"{}\" is not supported",
                UpdateStrategy::Recreate
            );
            error!(strategy = %spec.strategy, "{}", INVALID_STRATEGY_MESSAGE);

            status
                .apply(
                    &spec.namespace,
                    Condition::degraded(REASON_INVALID_STRATEGY, message),
                )
                .await
                .map_err(UpdateError::Status)?;

            Ok(ReconcileResult)
        }
        UpdateStrategy::Other(value) => {
            let message =
                format!("{INVALID_STRATEGY_MESSAGE}: unknown update strategy: {value}");
            error!(strategy = %value, "{}", INVALID_STRATEGY_MESSAGE);

            status
                .apply(
                    &spec.namespace,
                    Condition::degraded(REASON_INVALID_STRATEGY, message),
                )
                .await
                .map_err(UpdateError::Status)?;

            Ok(ReconcileResult)
        }
    }
}

/// Rolling update: replacements are created proactively, one index at a
/// time, and outdated machines are deleted once their replacement is ready.
///
/// Indexes are considered in ascending numeric order so that operations of
/// the same importance always prioritize the lowest index first.
#[instrument(skip_all, fields(update_strategy = %spec.strategy, namespace = %spec.namespace))]
async fn reconcile_rolling_update(
    spec: &MachineSetSpec,
    replicas: i32,
    provider: &dyn MachineProvider,
    machine_infos: &BTreeMap<i32, Vec<MachineInfo>>,
) -> Result<ReconcileResult, UpdateError> {
    // Deletions must proceed even once the surge ceiling is reached, so the
    // counter is threaded through create decisions only.
    let mut surge_count = existing_surge(machine_infos, replicas);

    // Reconcile any index with no machines first: an empty index is a
    // capacity deficit and filling it dominates any rebalancing.
    for (&index, machines) in machine_infos {
        if machines.is_empty() {
            return create_machine(provider, index, &mut surge_count).await;
        }
    }

    // Reconcile any index with no ready machines but a replacement pending.
    for (&index, machines) in machine_infos {
        let machines_pending = pending_machines(machines);
        if ready_machines(machines).is_empty() && !machines_pending.is_empty() {
            // The first pending machine found is considered the replacement
            // for this index. Wait for it to become ready.
            let replacement = machines_pending[0];
            debug!(
                index,
                name = %replacement.machine_ref.name,
                "{}", WAITING_FOR_READY
            );
            return Ok(ReconcileResult);
        }
    }

    // Reconcile machines that need an update.
    for (&index, machines) in machine_infos {
        let outdated = outdated_machines(machines);
        let Some(outdated_machine) = outdated.first() else {
            continue;
        };

        if !updated_machines(machines).is_empty() {
            // An updated replacement exists for this index.
            if !outdated_machine.is_deleted() {
                // The outdated machine is still around. Now that a ready
                // replacement exists it is safe to trigger its deletion.
                return delete_machine(provider, outdated_machine, &spec.namespace, index).await;
            }

            // The outdated machine is already marked for deletion. Wait for
            // its removal.
            debug!(
                index,
                name = %outdated_machine.machine_ref.name,
                "{}", WAITING_FOR_REMOVED
            );
            return Ok(ReconcileResult);
        }

        let machines_pending = pending_machines(machines);
        if let Some(replacement) = machines_pending.first() {
            // A replacement is being built but is not yet ready.
            debug!(
                index,
                name = %outdated_machine.machine_ref.name,
                replacement_name = %replacement.machine_ref.name,
                "{}", WAITING_FOR_REPLACEMENT
            );
            return Ok(ReconcileResult);
        }

        // No ready or pending replacement exists for this index.
        return create_machine(provider, index, &mut surge_count).await;
    }

    trace!("{}", NO_UPDATES_REQUIRED);

    Ok(ReconcileResult)
}

/// OnDelete update: the engine never initiates deletion of a live outdated
/// machine. The user signals intent by deleting the machine themselves; a
/// replacement is only created once the outdated machine carries a deletion
/// timestamp, or for an index with no machines at all.
#[instrument(skip_all, fields(update_strategy = %spec.strategy, namespace = %spec.namespace))]
async fn reconcile_on_delete_update(
    spec: &MachineSetSpec,
    replicas: i32,
    provider: &dyn MachineProvider,
    machine_infos: &BTreeMap<i32, Vec<MachineInfo>>,
) -> Result<ReconcileResult, UpdateError> {
    let mut surge_count = existing_surge(machine_infos, replicas);

    // Indexes with no machines are filled regardless of strategy.
    for (&index, machines) in machine_infos {
        if machines.is_empty() {
            return create_machine(provider, index, &mut surge_count).await;
        }
    }

    // Wait on any index whose only machines are pending replacements.
    for (&index, machines) in machine_infos {
        let machines_pending = pending_machines(machines);
        if ready_machines(machines).is_empty() && !machines_pending.is_empty() {
            let replacement = machines_pending[0];
            debug!(
                index,
                name = %replacement.machine_ref.name,
                "{}", WAITING_FOR_READY
            );
            return Ok(ReconcileResult);
        }
    }

    // Replace outdated machines that the user has already deleted. A live
    // outdated machine only produces a log line; scanning continues so that
    // a deleted outdated machine at a higher index is still served within
    // this invocation.
    for (&index, machines) in machine_infos {
        let outdated = outdated_machines(machines);
        let Some(outdated_machine) = outdated.first() else {
            continue;
        };

        if !outdated_machine.is_deleted() {
            info!(
                index,
                name = %outdated_machine.machine_ref.name,
                "{}", MACHINE_REQUIRES_UPDATE
            );
            continue;
        }

        if !updated_machines(machines).is_empty() {
            // A ready replacement already exists. Wait for the deleted
            // machine to go away.
            debug!(
                index,
                name = %outdated_machine.machine_ref.name,
                "{}", WAITING_FOR_REMOVED
            );
            return Ok(ReconcileResult);
        }

        let machines_pending = pending_machines(machines);
        if let Some(replacement) = machines_pending.first() {
            debug!(
                index,
                name = %outdated_machine.machine_ref.name,
                replacement_name = %replacement.machine_ref.name,
                "{}", WAITING_FOR_REPLACEMENT
            );
            return Ok(ReconcileResult);
        }

        return create_machine(provider, index, &mut surge_count).await;
    }

    trace!("{}", NO_UPDATES_REQUIRED);

    Ok(ReconcileResult)
}

/// Create a replacement machine at the given index, subject to the surge
/// ceiling. Falls through as a no-op when the surge budget is spent; the
/// next invocation reconsiders once observed state catches up.
async fn create_machine(
    provider: &dyn MachineProvider,
    index: i32,
    surge_count: &mut i32,
) -> Result<ReconcileResult, UpdateError> {
    if *surge_count < MAX_SURGE {
        if let Err(source) = provider.create_machine(index).await {
            let err = UpdateError::CreateMachine { index, source };
            error!(index, error = %err, "{}", ERROR_CREATING_MACHINE);
            return Err(err);
        }

        info!(index, "{}", CREATED_REPLACEMENT);
        *surge_count += 1;
    }

    Ok(ReconcileResult)
}

/// Delete the given outdated machine.
async fn delete_machine(
    provider: &dyn MachineProvider,
    outdated_machine: &MachineInfo,
    namespace: &str,
    index: i32,
) -> Result<ReconcileResult, UpdateError> {
    if let Err(source) = provider.delete_machine(&outdated_machine.machine_ref).await {
        let err = UpdateError::DeleteMachine {
            namespace: namespace.to_string(),
            name: outdated_machine.machine_ref.name.clone(),
            source,
        };
        error!(
            index,
            name = %outdated_machine.machine_ref.name,
            error = %err,
            "{}", ERROR_DELETING_MACHINE
        );
        return Err(err);
    }

    info!(
        index,
        name = %outdated_machine.machine_ref.name,
        "{}", REMOVING_OLD_MACHINE
    );

    Ok(ReconcileResult)
}
