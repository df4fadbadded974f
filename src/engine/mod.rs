//! The step interpreter.
//!
//! One invocation runs a single execution from its start (or a resume
//! point) until it completes, fails, or suspends at a delay step. Steps
//! execute strictly in order within an execution; suspension terminates the
//! invocation after persisting a continuation, and the scheduler starts a
//! fresh invocation later.

mod duration;

pub use duration::parse_duration;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::actions::{ActionRegistry, ResolvedStep};
use crate::dsl::{step_kind, ParamValue, ScenarioDsl};
use crate::error::EngineError;
use crate::expr;
use crate::store::ScenarioStore;
use crate::trigger::flatten_payload;
use crate::types::{
    Continuation, ExecutionUpdate, NewExecution, NewStepLog, Scenario, StepOutcome, VarMap,
};
use crate::template::{self, RenderMode};

/// Runtime state for one interpreter invocation. Lives from start or resume
/// until suspend or a terminal status; never persisted as its own entity.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub merchant_id: i64,
    pub scenario_id: String,
    pub variables: VarMap,
    pub trigger_payload: ParamValue,
}

/// Where the interpreter goes after a step. Condition jumps return the
/// target index directly instead of nudging a loop counter.
enum Transition {
    Advance,
    Jump(usize),
    Complete,
    Suspend,
    Halt,
}

pub struct Engine {
    store: Arc<dyn ScenarioStore>,
    actions: Arc<ActionRegistry>,
}

impl Engine {
    pub fn new(store: Arc<dyn ScenarioStore>, actions: Arc<ActionRegistry>) -> Self {
        Self { store, actions }
    }

    /// Starts a fresh execution of a scenario against a trigger payload and
    /// runs it until it reaches a terminal status or suspends. Returns the
    /// execution id.
    pub async fn start(
        &self,
        scenario: &Scenario,
        payload: ParamValue,
    ) -> Result<String, EngineError> {
        let dsl = ScenarioDsl::parse(&scenario.document)?;

        // Payload-derived values seed the variables; declared defaults are
        // rendered against the flattened payload and merge in without
        // overwriting them.
        let flat = flatten_payload(&payload);
        let mut variables = flat.clone();
        for (name, template_str) in &dsl.variables {
            variables
                .entry(name.clone())
                .or_insert_with(|| template::render(template_str, &flat, RenderMode::KeepMissing));
        }

        let execution = self
            .store
            .create_execution(NewExecution {
                merchant_id: scenario.merchant_id,
                scenario_id: scenario.id.clone(),
                trigger_payload: payload.clone(),
                variables: variables.clone(),
            })
            .await?;

        let mut ctx = ExecutionContext {
            execution_id: execution.id.clone(),
            merchant_id: scenario.merchant_id,
            scenario_id: scenario.id.clone(),
            variables,
            trigger_payload: payload,
        };

        self.run(&mut ctx, &dsl, 0).await?;
        Ok(execution.id)
    }

    /// Resumes a suspended execution at the saved step. Called by the
    /// delayed-task scheduler after it has claimed the task.
    pub async fn resume(
        &self,
        execution_id: &str,
        resume_step_id: &str,
    ) -> Result<(), EngineError> {
        let execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;

        let scenario = self
            .store
            .get_scenario(execution.merchant_id, &execution.scenario_id)
            .await?
            .ok_or_else(|| EngineError::ScenarioNotFound(execution.scenario_id.clone()))?;

        let dsl = ScenarioDsl::parse(&scenario.document)?;

        let mut ctx = ExecutionContext {
            execution_id: execution.id.clone(),
            merchant_id: execution.merchant_id,
            scenario_id: execution.scenario_id.clone(),
            variables: execution.variables,
            trigger_payload: execution.trigger_payload,
        };

        let start_index = dsl.step_index(resume_step_id).unwrap_or(0);
        self.run(&mut ctx, &dsl, start_index).await
    }

    async fn run(
        &self,
        ctx: &mut ExecutionContext,
        dsl: &ScenarioDsl,
        start_index: usize,
    ) -> Result<(), EngineError> {
        let mut index = start_index;

        while index < dsl.steps.len() {
            let step = &dsl.steps[index];
            let started = Instant::now();

            self.store
                .update_execution(&ctx.execution_id, ExecutionUpdate::running(&step.id, &ctx.variables))
                .await?;

            let resolved = ResolvedStep::resolve(step, &ctx.variables);

            let transition = match step.kind.as_str() {
                step_kind::CONDITION => self.handle_condition(ctx, &resolved, dsl, started).await?,
                step_kind::DELAY => self.handle_delay(ctx, &resolved, dsl, index, started).await?,
                step_kind::SET_VARIABLE => {
                    self.handle_set_variable(ctx, &resolved, started).await?
                }
                step_kind::LOG => self.handle_log(ctx, &resolved, started).await?,
                _ => self.run_action(ctx, &resolved, started).await?,
            };

            match transition {
                Transition::Advance => index += 1,
                Transition::Jump(target) => index = target,
                Transition::Complete | Transition::Suspend | Transition::Halt => return Ok(()),
            }
        }

        // Ran off the end of the step array.
        self.store
            .update_execution(&ctx.execution_id, ExecutionUpdate::completed("", &ctx.variables))
            .await?;
        Ok(())
    }

    /// Evaluates `if` and redirects the cursor to the `then`/`else` target.
    /// A target of `end` (or none) completes the execution; a target id that
    /// matches no step falls through to the next sequential index.
    async fn handle_condition(
        &self,
        ctx: &mut ExecutionContext,
        step: &ResolvedStep,
        dsl: &ScenarioDsl,
        started: Instant,
    ) -> Result<Transition, EngineError> {
        let if_expr = step.params.str_of("if").unwrap_or_default();
        let then_target = step.params.str_of("then").unwrap_or_default();
        let else_target = step.params.str_of("else").unwrap_or_default();

        let result = expr::eval_condition(if_expr, &ctx.variables);
        let target = if result { then_target } else { else_target };

        let output = serde_json::json!({
            "condition_result": result,
            "target": target,
        });
        self.log_step(ctx, step, output, StepOutcome::Success, started, "").await?;

        if target == "end" || target.is_empty() {
            self.store
                .update_execution(
                    &ctx.execution_id,
                    ExecutionUpdate::completed(&step.id, &ctx.variables),
                )
                .await?;
            return Ok(Transition::Complete);
        }

        match dsl.step_index(target) {
            Some(index) => Ok(Transition::Jump(index)),
            None => Ok(Transition::Advance),
        }
    }

    /// Suspends the execution until the wake time, or skips the step when
    /// the duration is invalid. A delay with no following step completes the
    /// execution without creating a task.
    async fn handle_delay(
        &self,
        ctx: &mut ExecutionContext,
        step: &ResolvedStep,
        dsl: &ScenarioDsl,
        index: usize,
        started: Instant,
    ) -> Result<Transition, EngineError> {
        let duration_str = step.params.str_of("duration").unwrap_or_default();
        let Some(delay) = parse_duration(duration_str) else {
            self.log_step(
                ctx,
                step,
                serde_json::Value::Null,
                StepOutcome::Skipped,
                started,
                "invalid duration",
            )
            .await?;
            return Ok(Transition::Advance);
        };

        let wake_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(0));

        let Some(next_step_id) = dsl.steps.get(index + 1).map(|s| s.id.clone()) else {
            self.log_step(ctx, step, serde_json::Value::Null, StepOutcome::Success, started, "")
                .await?;
            self.store
                .update_execution(
                    &ctx.execution_id,
                    ExecutionUpdate::completed(&step.id, &ctx.variables),
                )
                .await?;
            return Ok(Transition::Complete);
        };

        let continuation = Continuation {
            execution_id: ctx.execution_id.clone(),
            resume_step_id: next_step_id.clone(),
            variables: ctx.variables.clone(),
        };

        match self
            .store
            .suspend_execution(ctx.merchant_id, &continuation, wake_at)
            .await
        {
            Ok(_) => {
                let output = serde_json::json!({
                    "wake_at": wake_at.to_rfc3339(),
                    "next_step": next_step_id,
                });
                self.log_step(ctx, step, output, StepOutcome::Success, started, "").await?;
                Ok(Transition::Suspend)
            }
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!(
                    execution_id = %ctx.execution_id,
                    "failed to create delayed task: {message}"
                );
                self.log_step(
                    ctx,
                    step,
                    serde_json::Value::Null,
                    StepOutcome::Failed,
                    started,
                    &message,
                )
                .await?;
                self.store
                    .update_execution(
                        &ctx.execution_id,
                        ExecutionUpdate::failed(&step.id, &message, &ctx.variables),
                    )
                    .await?;
                Ok(Transition::Halt)
            }
        }
    }

    async fn handle_set_variable(
        &self,
        ctx: &mut ExecutionContext,
        step: &ResolvedStep,
        started: Instant,
    ) -> Result<Transition, EngineError> {
        let name = step.params.str_of("name").unwrap_or_default();
        let value = step.params.str_of("value").unwrap_or_default();
        if !name.is_empty() {
            ctx.variables.insert(name.to_string(), value.to_string());
        }
        self.log_step(ctx, step, serde_json::Value::Null, StepOutcome::Success, started, "")
            .await?;
        Ok(Transition::Advance)
    }

    async fn handle_log(
        &self,
        ctx: &mut ExecutionContext,
        step: &ResolvedStep,
        started: Instant,
    ) -> Result<Transition, EngineError> {
        let message = step.params.str_of("message").unwrap_or_default();
        match step.params.str_of("level") {
            Some("error") => {
                tracing::error!(execution_id = %ctx.execution_id, "scenario log: {message}")
            }
            Some("warning") => {
                tracing::warn!(execution_id = %ctx.execution_id, "scenario log: {message}")
            }
            _ => tracing::info!(execution_id = %ctx.execution_id, "scenario log: {message}"),
        }
        self.log_step(ctx, step, serde_json::Value::Null, StepOutcome::Success, started, "")
            .await?;
        Ok(Transition::Advance)
    }

    /// Dispatches a step through the action registry; an unregistered type
    /// and an action failure both terminate the execution as failed.
    async fn run_action(
        &self,
        ctx: &mut ExecutionContext,
        step: &ResolvedStep,
        started: Instant,
    ) -> Result<Transition, EngineError> {
        let Some(action) = self.actions.get(&step.kind) else {
            let message = format!("unknown step type: {}", step.kind);
            tracing::error!(execution_id = %ctx.execution_id, step_id = %step.id, "{message}");
            self.log_step(
                ctx,
                step,
                serde_json::Value::Null,
                StepOutcome::Failed,
                started,
                &message,
            )
            .await?;
            self.store
                .update_execution(
                    &ctx.execution_id,
                    ExecutionUpdate::failed(&step.id, &message, &ctx.variables),
                )
                .await?;
            return Ok(Transition::Halt);
        };

        match action.execute(ctx, step).await {
            Ok(output) => {
                let output_json = serde_json::to_value(&output)?;
                self.log_step(ctx, step, output_json, StepOutcome::Success, started, "")
                    .await?;

                // String-valued output entries become variables.
                for (key, value) in &output {
                    if let Some(s) = value.as_str() {
                        ctx.variables.insert(key.clone(), s.to_string());
                    }
                }
                Ok(Transition::Advance)
            }
            Err(failure) => {
                tracing::error!(
                    execution_id = %ctx.execution_id,
                    step_id = %step.id,
                    "step failed: {}",
                    failure.message
                );
                let output_json = failure
                    .output
                    .as_ref()
                    .map(serde_json::to_value)
                    .transpose()?
                    .unwrap_or(serde_json::Value::Null);
                self.log_step(
                    ctx,
                    step,
                    output_json,
                    StepOutcome::Failed,
                    started,
                    &failure.message,
                )
                .await?;
                self.store
                    .update_execution(
                        &ctx.execution_id,
                        ExecutionUpdate::failed(&step.id, &failure.message, &ctx.variables),
                    )
                    .await?;
                Ok(Transition::Halt)
            }
        }
    }

    async fn log_step(
        &self,
        ctx: &ExecutionContext,
        step: &ResolvedStep,
        output: serde_json::Value,
        outcome: StepOutcome,
        started: Instant,
        error: &str,
    ) -> Result<(), EngineError> {
        self.store
            .append_step_log(NewStepLog {
                execution_id: ctx.execution_id.clone(),
                step_id: step.id.clone(),
                step_kind: step.kind.clone(),
                input: step.params.to_json(),
                output,
                outcome,
                duration_ms: started.elapsed().as_millis() as i64,
                error: error.to_string(),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
