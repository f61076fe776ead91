//! Status conditions for the owning machine set.
//!
//! Conditions follow last-write-wins semantics: setting a condition replaces
//! any existing condition of the same type, and the transition time only
//! moves when the status actually changes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Condition type reporting that the machine set cannot make progress
/// without user intervention.
pub const CONDITION_DEGRADED: &str = "Degraded";

/// Condition reason for an invalid update strategy value.
pub const REASON_INVALID_STRATEGY: &str = "InvalidStrategy";

/// Status of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single status condition on the owning machine set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition type, unique within the owner's condition list.
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Current status of the condition.
    pub status: ConditionStatus,

    /// Machine-readable reason for the last transition.
    pub reason: String,

    /// Human-readable detail.
    pub message: String,

    /// When the condition last changed status.
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Build a Degraded=True condition with the given reason and message.
    pub fn degraded(reason: &str, message: String) -> Self {
        Self {
            condition_type: CONDITION_DEGRADED.to_string(),
            status: ConditionStatus::True,
            reason: reason.to_string(),
            message,
            last_transition_time: Utc::now(),
        }
    }
}

/// Set a condition, replacing any existing condition of the same type.
///
/// Last write wins; no history is kept. The existing transition time is
/// preserved when the status is unchanged.
pub fn set_status_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            if existing.status == condition.status {
                existing.reason = condition.reason;
                existing.message = condition.message;
            } else {
                *existing = condition;
            }
        }
        None => conditions.push(condition),
    }
}

/// Persists conditions onto the owning machine set.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Apply a condition to the machine set in the given namespace.
    async fn apply(&self, namespace: &str, condition: Condition) -> Result<()>;
}

/// In-memory status writer for testing and development.
#[derive(Default)]
pub struct RecordingStatusWriter {
    conditions: Mutex<Vec<Condition>>,

    /// Whether applies should fail.
    fail_applies: bool,
}

impl RecordingStatusWriter {
    /// Create an empty recording writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a recording writer that fails all applies.
    pub fn failing() -> Self {
        Self {
            fail_applies: true,
            ..Self::default()
        }
    }

    /// The conditions recorded so far.
    pub async fn conditions(&self) -> Vec<Condition> {
        self.conditions.lock().await.clone()
    }
}

#[async_trait]
impl StatusWriter for RecordingStatusWriter {
    async fn apply(&self, namespace: &str, condition: Condition) -> Result<()> {
        if self.fail_applies {
            anyhow::bail!("mock status writer configured to fail");
        }

        debug!(
            namespace,
            condition_type = %condition.condition_type,
            reason = %condition.reason,
            "Applying status condition"
        );

        let mut conditions = self.conditions.lock().await;
        set_status_condition(&mut conditions, condition);

        Ok(())
    }
}
