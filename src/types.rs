use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dsl::ParamValue;

/// The mutable string-keyed context threaded through one execution's steps.
/// BTreeMap so persisted snapshots are byte-stable.
pub type VarMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Waiting,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Executed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Success,
    Failed,
    Skipped,
}

/// A merchant-authored, triggerable automation definition. Read-only to the
/// engine; mutated only through the authoring operations on the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub merchant_id: i64,
    pub name: String,
    pub description: String,
    /// The serialized DSL document as authored.
    pub document: String,
    pub enabled: bool,
    /// Denormalized from the document's trigger for indexed lookup.
    pub trigger_kind: String,
    pub trigger_value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewScenario {
    pub merchant_id: i64,
    pub name: String,
    pub description: String,
    pub document: String,
    pub trigger_kind: String,
    pub trigger_value: String,
}

#[derive(Debug, Clone)]
pub struct ScenarioUpdate {
    pub name: String,
    pub description: String,
    pub document: String,
    pub trigger_kind: String,
    pub trigger_value: String,
}

/// One run instance of a scenario, from trigger to terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub merchant_id: i64,
    pub scenario_id: String,
    /// Snapshot of the payload that triggered the run.
    pub trigger_payload: ParamValue,
    pub status: ExecutionStatus,
    /// Identifier of the step currently being processed; empty when none.
    pub current_step: String,
    pub variables: VarMap,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct NewExecution {
    pub merchant_id: i64,
    pub scenario_id: String,
    pub trigger_payload: ParamValue,
    pub variables: VarMap,
}

/// Changes the engine applies to an execution row between steps.
#[derive(Debug, Clone, Default)]
pub struct ExecutionUpdate {
    pub status: Option<ExecutionStatus>,
    pub current_step: Option<String>,
    pub error: Option<String>,
    pub variables: Option<VarMap>,
}

impl ExecutionUpdate {
    pub fn running(step_id: &str, variables: &VarMap) -> Self {
        Self {
            status: Some(ExecutionStatus::Running),
            current_step: Some(step_id.to_string()),
            variables: Some(variables.clone()),
            ..Default::default()
        }
    }

    pub fn completed(step_id: &str, variables: &VarMap) -> Self {
        Self {
            status: Some(ExecutionStatus::Completed),
            current_step: Some(step_id.to_string()),
            variables: Some(variables.clone()),
            ..Default::default()
        }
    }

    pub fn failed(step_id: &str, error: &str, variables: &VarMap) -> Self {
        Self {
            status: Some(ExecutionStatus::Failed),
            current_step: Some(step_id.to_string()),
            error: Some(error.to_string()),
            variables: Some(variables.clone()),
            ..Default::default()
        }
    }
}

/// Append-only audit record: one row per attempted step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLog {
    pub id: String,
    pub execution_id: String,
    pub step_id: String,
    pub step_kind: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub outcome: StepOutcome,
    pub duration_ms: i64,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewStepLog {
    pub execution_id: String,
    pub step_id: String,
    pub step_kind: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub outcome: StepOutcome,
    pub duration_ms: i64,
    pub error: String,
}

/// The persisted state needed to resume a paused execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Continuation {
    pub execution_id: String,
    pub resume_step_id: String,
    pub variables: VarMap,
}

/// A pending continuation with a wake time, claimed at most once by the
/// scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedTask {
    pub id: String,
    pub merchant_id: i64,
    pub execution_id: String,
    pub resume_step_id: String,
    pub wake_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub scenario_id: Option<String>,
    pub page: u32,
    pub page_size: u32,
}
