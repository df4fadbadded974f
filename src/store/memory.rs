//! In-process store backed by a single mutex.
//!
//! Used by the test suite and by embedded deployments that do not need
//! durability. Operations hold the lock for their whole body, which is what
//! makes `suspend_execution` and `claim_task` atomic here.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{
    Continuation, DelayedTask, Execution, ExecutionFilter, ExecutionStatus, ExecutionUpdate,
    NewExecution, NewScenario, NewStepLog, Scenario, ScenarioUpdate, StepLog, TaskStatus,
};

use super::ScenarioStore;

#[derive(Default)]
struct State {
    scenarios: HashMap<String, Scenario>,
    deleted_scenarios: HashSet<String>,
    executions: HashMap<String, Execution>,
    step_logs: Vec<StepLog>,
    tasks: HashMap<String, DelayedTask>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("store mutex poisoned")
    }
}

fn apply_update(execution: &mut Execution, update: ExecutionUpdate) {
    if let Some(status) = update.status {
        execution.status = status;
        if status.is_terminal() {
            execution.finished_at = Some(Utc::now());
        }
    }
    if let Some(step) = update.current_step {
        execution.current_step = step;
    }
    if let Some(error) = update.error {
        execution.error = error;
    }
    if let Some(variables) = update.variables {
        execution.variables = variables;
    }
}

#[async_trait]
impl ScenarioStore for MemoryStore {
    async fn create_scenario(&self, scenario: NewScenario) -> Result<Scenario> {
        let now = Utc::now();
        let row = Scenario {
            id: Uuid::new_v4().to_string(),
            merchant_id: scenario.merchant_id,
            name: scenario.name,
            description: scenario.description,
            document: scenario.document,
            enabled: false,
            trigger_kind: scenario.trigger_kind,
            trigger_value: scenario.trigger_value,
            created_at: now,
            updated_at: now,
        };
        self.lock().scenarios.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn update_scenario(
        &self,
        merchant_id: i64,
        scenario_id: &str,
        update: ScenarioUpdate,
    ) -> Result<()> {
        let mut state = self.lock();
        if state.deleted_scenarios.contains(scenario_id) {
            return Err(anyhow!("scenario {scenario_id} not found"));
        }
        let row = state
            .scenarios
            .get_mut(scenario_id)
            .filter(|s| s.merchant_id == merchant_id)
            .ok_or_else(|| anyhow!("scenario {scenario_id} not found"))?;
        row.name = update.name;
        row.description = update.description;
        row.document = update.document;
        row.trigger_kind = update.trigger_kind;
        row.trigger_value = update.trigger_value;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_scenario(&self, merchant_id: i64, scenario_id: &str) -> Result<()> {
        let mut state = self.lock();
        if state
            .scenarios
            .get(scenario_id)
            .is_some_and(|s| s.merchant_id == merchant_id)
        {
            state.deleted_scenarios.insert(scenario_id.to_string());
        }
        Ok(())
    }

    async fn set_scenario_enabled(
        &self,
        merchant_id: i64,
        scenario_id: &str,
        enabled: bool,
    ) -> Result<()> {
        let mut state = self.lock();
        if state.deleted_scenarios.contains(scenario_id) {
            return Ok(());
        }
        if let Some(row) = state
            .scenarios
            .get_mut(scenario_id)
            .filter(|s| s.merchant_id == merchant_id)
        {
            row.enabled = enabled;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_scenario(
        &self,
        merchant_id: i64,
        scenario_id: &str,
    ) -> Result<Option<Scenario>> {
        let state = self.lock();
        if state.deleted_scenarios.contains(scenario_id) {
            return Ok(None);
        }
        Ok(state
            .scenarios
            .get(scenario_id)
            .filter(|s| s.merchant_id == merchant_id)
            .cloned())
    }

    async fn list_scenarios(&self, merchant_id: i64) -> Result<Vec<Scenario>> {
        let state = self.lock();
        let mut rows: Vec<Scenario> = state
            .scenarios
            .values()
            .filter(|s| s.merchant_id == merchant_id && !state.deleted_scenarios.contains(&s.id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn scenarios_by_trigger(
        &self,
        merchant_id: i64,
        trigger_kind: &str,
        trigger_value: Option<&str>,
    ) -> Result<Vec<Scenario>> {
        let state = self.lock();
        Ok(state
            .scenarios
            .values()
            .filter(|s| {
                s.merchant_id == merchant_id
                    && s.enabled
                    && !state.deleted_scenarios.contains(&s.id)
                    && s.trigger_kind == trigger_kind
                    && trigger_value.map_or(true, |v| s.trigger_value == v)
            })
            .cloned()
            .collect())
    }

    async fn create_execution(&self, execution: NewExecution) -> Result<Execution> {
        let row = Execution {
            id: Uuid::new_v4().to_string(),
            merchant_id: execution.merchant_id,
            scenario_id: execution.scenario_id,
            trigger_payload: execution.trigger_payload,
            status: ExecutionStatus::Running,
            current_step: String::new(),
            variables: execution.variables,
            started_at: Utc::now(),
            finished_at: None,
            error: String::new(),
        };
        self.lock().executions.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>> {
        Ok(self.lock().executions.get(execution_id).cloned())
    }

    async fn list_executions(
        &self,
        merchant_id: i64,
        filter: ExecutionFilter,
    ) -> Result<(Vec<Execution>, u64)> {
        let state = self.lock();
        let mut rows: Vec<Execution> = state
            .executions
            .values()
            .filter(|e| {
                e.merchant_id == merchant_id
                    && filter
                        .scenario_id
                        .as_deref()
                        .map_or(true, |id| e.scenario_id == id)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let total = rows.len() as u64;
        let page_size = filter.page_size.max(1) as usize;
        let offset = (filter.page.max(1) as usize - 1) * page_size;
        let page: Vec<Execution> = rows.into_iter().skip(offset).take(page_size).collect();
        Ok((page, total))
    }

    async fn update_execution(&self, execution_id: &str, update: ExecutionUpdate) -> Result<()> {
        let mut state = self.lock();
        let execution = state
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| anyhow!("execution {execution_id} not found"))?;
        apply_update(execution, update);
        Ok(())
    }

    async fn suspend_execution(
        &self,
        merchant_id: i64,
        continuation: &Continuation,
        wake_at: DateTime<Utc>,
    ) -> Result<DelayedTask> {
        let mut state = self.lock();
        let execution = state
            .executions
            .get_mut(&continuation.execution_id)
            .ok_or_else(|| anyhow!("execution {} not found", continuation.execution_id))?;
        execution.status = ExecutionStatus::Waiting;
        execution.variables = continuation.variables.clone();

        let task = DelayedTask {
            id: Uuid::new_v4().to_string(),
            merchant_id,
            execution_id: continuation.execution_id.clone(),
            resume_step_id: continuation.resume_step_id.clone(),
            wake_at,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        };
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<DelayedTask>> {
        let state = self.lock();
        let mut due: Vec<DelayedTask> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.wake_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.wake_at.cmp(&b.wake_at));
        Ok(due)
    }

    async fn claim_task(&self, task_id: &str) -> Result<bool> {
        let mut state = self.lock();
        match state.tasks.get_mut(task_id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Executed;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(anyhow!("delayed task {task_id} not found")),
        }
    }

    async fn cancel_task(&self, task_id: &str) -> Result<bool> {
        let mut state = self.lock();
        match state.tasks.get_mut(task_id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Cancelled;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(anyhow!("delayed task {task_id} not found")),
        }
    }

    async fn append_step_log(&self, log: NewStepLog) -> Result<()> {
        let row = StepLog {
            id: Uuid::new_v4().to_string(),
            execution_id: log.execution_id,
            step_id: log.step_id,
            step_kind: log.step_kind,
            input: log.input,
            output: log.output,
            outcome: log.outcome,
            duration_ms: log.duration_ms,
            error: log.error,
            created_at: Utc::now(),
        };
        self.lock().step_logs.push(row);
        Ok(())
    }

    async fn list_step_logs(&self, execution_id: &str) -> Result<Vec<StepLog>> {
        Ok(self
            .lock()
            .step_logs
            .iter()
            .filter(|l| l.execution_id == execution_id)
            .cloned()
            .collect())
    }
}
