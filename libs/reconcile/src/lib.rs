//! Machine-set reconciliation primitives.
//!
//! This library provides the building blocks for the update reconciliation
//! engine that converges an indexed set of control-plane machines toward a
//! declared spec. Key concepts:
//!
//! - **Index**: an integer slot in the control-plane topology; each slot
//!   holds exactly one machine at steady state.
//! - **Surge**: the count of observed machines in excess of the desired
//!   replicas; positive during a rollout, zero at steady state.
//! - **Classification**: machines partition into updated, pending, and
//!   outdated based on their readiness and needs-update flags.
//!
//! # Invariants
//!
//! - Classifiers are pure and preserve input order
//! - Grouping places every machine under exactly its declared index
//! - Index iteration is always in ascending numeric order

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of machines that can exist above the desired replica
/// count while a rollout is in progress.
pub const MAX_SURGE: i32 = 1;

/// Update strategy for a machine set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UpdateStrategy {
    /// Replacements are created proactively; outdated machines are removed
    /// once their replacement is ready.
    RollingUpdate,

    /// Replacements are only created after the outdated machine has been
    /// deleted by an external actor.
    OnDelete,

    /// Destroy-then-create. Recognized but not supported.
    Recreate,

    /// Any unrecognized strategy value.
    Other(String),
}

impl Default for UpdateStrategy {
    fn default() -> Self {
        Self::RollingUpdate
    }
}

impl UpdateStrategy {
    /// The canonical string form used in logs and condition messages.
    pub fn as_str(&self) -> &str {
        match self {
            Self::RollingUpdate => "RollingUpdate",
            Self::OnDelete => "OnDelete",
            Self::Recreate => "Recreate",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for UpdateStrategy {
    fn from(s: String) -> Self {
        match s.as_str() {
            "RollingUpdate" => Self::RollingUpdate,
            "OnDelete" => Self::OnDelete,
            "Recreate" => Self::Recreate,
            _ => Self::Other(s),
        }
    }
}

impl From<UpdateStrategy> for String {
    fn from(strategy: UpdateStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

/// Declared state for a machine set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSetSpec {
    /// Desired number of machines. Unset is a configuration error that must
    /// be surfaced before the engine runs.
    pub replicas: Option<i32>,

    /// Update strategy.
    #[serde(default)]
    pub strategy: UpdateStrategy,

    /// Namespace the machines live in.
    pub namespace: String,
}

/// Identity of a machine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRef {
    /// Machine name.
    pub name: String,

    /// Machine namespace.
    pub namespace: String,

    /// Set once removal of the machine has been requested.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// Observed state of a single machine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    /// The index this machine occupies in the control-plane topology.
    pub index: i32,

    /// Identity of the underlying machine.
    pub machine_ref: MachineRef,

    /// Whether the machine has reported ready.
    pub ready: bool,

    /// Whether the machine's spec has diverged from the desired template.
    /// Supplied by the observation source; never computed here.
    pub needs_update: bool,
}

impl MachineInfo {
    /// Whether removal of this machine is already in progress.
    pub fn is_deleted(&self) -> bool {
        self.machine_ref.deletion_timestamp.is_some()
    }
}

/// Group a flat observation into per-index machine lists.
///
/// Every input machine appears exactly once under its declared index, in
/// input order. Indices present in the desired topology but observed with
/// no machines must be seeded by the caller; grouping never invents keys.
pub fn group_by_index(machines: Vec<MachineInfo>) -> BTreeMap<i32, Vec<MachineInfo>> {
    let mut indexed: BTreeMap<i32, Vec<MachineInfo>> = BTreeMap::new();

    for machine in machines {
        indexed.entry(machine.index).or_default().push(machine);
    }

    indexed
}

/// Machines that are ready and match the desired template.
///
/// The only class that counts as available capacity.
pub fn updated_machines(machines: &[MachineInfo]) -> Vec<&MachineInfo> {
    machines
        .iter()
        .filter(|m| m.ready && !m.needs_update)
        .collect()
}

/// Machines that match the desired template but have not reported ready.
pub fn pending_machines(machines: &[MachineInfo]) -> Vec<&MachineInfo> {
    machines
        .iter()
        .filter(|m| !m.ready && !m.needs_update)
        .collect()
}

/// Machines whose spec has diverged from the desired template.
pub fn outdated_machines(machines: &[MachineInfo]) -> Vec<&MachineInfo> {
    machines.iter().filter(|m| m.needs_update).collect()
}

/// Machines that have reported ready, regardless of template match.
pub fn ready_machines(machines: &[MachineInfo]) -> Vec<&MachineInfo> {
    machines.iter().filter(|m| m.ready).collect()
}

/// Seed the indices of the desired topology with empty machine lists.
///
/// The engine only iterates keys that exist, so the observation layer
/// inserts the desired indices up front; an index that stays empty is a
/// capacity deficit the engine will fill.
pub fn seed_desired_indices(
    machine_infos: &mut BTreeMap<i32, Vec<MachineInfo>>,
    desired_replicas: i32,
) {
    for index in 0..desired_replicas {
        machine_infos.entry(index).or_default();
    }
}

/// Compute the current surge: observed machines minus desired replicas.
///
/// Deletions only lower the surge once the observed state reflects the
/// removal, so a freshly issued delete does not free surge budget within
/// the same invocation.
pub fn existing_surge(
    machine_infos: &BTreeMap<i32, Vec<MachineInfo>>,
    desired_replicas: i32,
) -> i32 {
    let observed: i32 = machine_infos.values().map(|ms| ms.len() as i32).sum();

    observed - desired_replicas
}
