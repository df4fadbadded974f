//! Persistence contract consumed by the engine, the scheduler and the
//! trigger dispatcher.
//!
//! The engine never talks to a database directly; it goes through
//! [`ScenarioStore`]. [`postgres::PgStore`] is the production
//! implementation, [`memory::MemoryStore`] backs tests and embedded use.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    Continuation, DelayedTask, Execution, ExecutionFilter, ExecutionUpdate, NewExecution,
    NewScenario, NewStepLog, Scenario, ScenarioUpdate, StepLog,
};

#[async_trait]
pub trait ScenarioStore: Send + Sync {
    // ── Scenarios ──

    async fn create_scenario(&self, scenario: NewScenario) -> Result<Scenario>;

    async fn update_scenario(
        &self,
        merchant_id: i64,
        scenario_id: &str,
        update: ScenarioUpdate,
    ) -> Result<()>;

    /// Soft delete: the row stays for audit, trigger matching skips it.
    async fn delete_scenario(&self, merchant_id: i64, scenario_id: &str) -> Result<()>;

    async fn set_scenario_enabled(
        &self,
        merchant_id: i64,
        scenario_id: &str,
        enabled: bool,
    ) -> Result<()>;

    async fn get_scenario(&self, merchant_id: i64, scenario_id: &str)
        -> Result<Option<Scenario>>;

    async fn list_scenarios(&self, merchant_id: i64) -> Result<Vec<Scenario>>;

    /// Enabled, non-deleted scenarios matching a trigger kind. A `None`
    /// value matches regardless of the scenario's trigger value (wildcard
    /// webhook dispatch).
    async fn scenarios_by_trigger(
        &self,
        merchant_id: i64,
        trigger_kind: &str,
        trigger_value: Option<&str>,
    ) -> Result<Vec<Scenario>>;

    // ── Executions ──

    async fn create_execution(&self, execution: NewExecution) -> Result<Execution>;

    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>>;

    /// Newest first, with the total count for pagination.
    async fn list_executions(
        &self,
        merchant_id: i64,
        filter: ExecutionFilter,
    ) -> Result<(Vec<Execution>, u64)>;

    async fn update_execution(&self, execution_id: &str, update: ExecutionUpdate) -> Result<()>;

    /// Persists the continuation and the transition to `waiting` atomically,
    /// creating exactly one pending delayed task for the wake time.
    async fn suspend_execution(
        &self,
        merchant_id: i64,
        continuation: &Continuation,
        wake_at: DateTime<Utc>,
    ) -> Result<DelayedTask>;

    // ── Delayed tasks ──

    /// Pending tasks with `wake_at <= now`, ordered by wake time ascending.
    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<DelayedTask>>;

    /// Transitions pending → executed. Returns `true` iff this call made
    /// the transition; a lost race or an already-claimed task returns
    /// `false`. This is the scheduler's at-most-once guard.
    async fn claim_task(&self, task_id: &str) -> Result<bool>;

    /// Transitions pending → cancelled. Returns `true` iff this call made
    /// the transition.
    async fn cancel_task(&self, task_id: &str) -> Result<bool>;

    // ── Step logs ──

    async fn append_step_log(&self, log: NewStepLog) -> Result<()>;

    /// All step logs for an execution, oldest first.
    async fn list_step_logs(&self, execution_id: &str) -> Result<Vec<StepLog>>;
}
