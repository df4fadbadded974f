//! Postgres-backed store.
//!
//! Queries are runtime-checked (`sqlx::query` + `bind`), variables and
//! payloads live in JSONB columns, and the delayed-task claim is a guarded
//! UPDATE so concurrent scheduler ticks cannot both win.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::config::DatabaseSettings;
use crate::types::{
    Continuation, DelayedTask, Execution, ExecutionFilter, ExecutionStatus, ExecutionUpdate,
    NewExecution, NewScenario, NewStepLog, Scenario, ScenarioUpdate, StepLog,
};

use super::ScenarioStore;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        if settings.url.is_empty() {
            anyhow::bail!("SCENARIO__DATABASE__URL must be set");
        }

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.url)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn scenario_from_row(row: &PgRow) -> Scenario {
    Scenario {
        id: row.get("id"),
        merchant_id: row.get("merchant_id"),
        name: row.get("name"),
        description: row.get("description"),
        document: row.get("document"),
        enabled: row.get("enabled"),
        trigger_kind: row.get("trigger_kind"),
        trigger_value: row.get("trigger_value"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn execution_from_row(row: &PgRow) -> Result<Execution> {
    Ok(Execution {
        id: row.get("id"),
        merchant_id: row.get("merchant_id"),
        scenario_id: row.get("scenario_id"),
        trigger_payload: serde_json::from_value(row.get("trigger_payload"))
            .context("Invalid trigger payload snapshot")?,
        status: row.get("status"),
        current_step: row.get("current_step"),
        variables: serde_json::from_value(row.get("variables"))
            .context("Invalid variable snapshot")?,
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        error: row.get("error"),
    })
}

fn task_from_row(row: &PgRow) -> DelayedTask {
    DelayedTask {
        id: row.get("id"),
        merchant_id: row.get("merchant_id"),
        execution_id: row.get("execution_id"),
        resume_step_id: row.get("resume_step_id"),
        wake_at: row.get("wake_at"),
        status: row.get("status"),
        created_at: row.get("created_at"),
    }
}

fn step_log_from_row(row: &PgRow) -> StepLog {
    StepLog {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        step_id: row.get("step_id"),
        step_kind: row.get("step_kind"),
        input: row.get("input"),
        output: row.get("output"),
        outcome: row.get("outcome"),
        duration_ms: row.get("duration_ms"),
        error: row.get("error"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl ScenarioStore for PgStore {
    async fn create_scenario(&self, scenario: NewScenario) -> Result<Scenario> {
        let row = sqlx::query(
            r#"
            INSERT INTO scenarios (
                id, merchant_id, name, description, document,
                enabled, trigger_kind, trigger_value
            ) VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(scenario.merchant_id)
        .bind(&scenario.name)
        .bind(&scenario.description)
        .bind(&scenario.document)
        .bind(&scenario.trigger_kind)
        .bind(&scenario.trigger_value)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create scenario")?;

        Ok(scenario_from_row(&row))
    }

    async fn update_scenario(
        &self,
        merchant_id: i64,
        scenario_id: &str,
        update: ScenarioUpdate,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scenarios
            SET name = $1,
                description = $2,
                document = $3,
                trigger_kind = $4,
                trigger_value = $5,
                updated_at = NOW()
            WHERE id = $6
              AND merchant_id = $7
              AND NOT is_deleted
            "#,
        )
        .bind(&update.name)
        .bind(&update.description)
        .bind(&update.document)
        .bind(&update.trigger_kind)
        .bind(&update.trigger_value)
        .bind(scenario_id)
        .bind(merchant_id)
        .execute(&self.pool)
        .await
        .context("Failed to update scenario")?;

        Ok(())
    }

    async fn delete_scenario(&self, merchant_id: i64, scenario_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scenarios
            SET is_deleted = TRUE,
                updated_at = NOW()
            WHERE id = $1
              AND merchant_id = $2
            "#,
        )
        .bind(scenario_id)
        .bind(merchant_id)
        .execute(&self.pool)
        .await
        .context("Failed to delete scenario")?;

        Ok(())
    }

    async fn set_scenario_enabled(
        &self,
        merchant_id: i64,
        scenario_id: &str,
        enabled: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scenarios
            SET enabled = $1,
                updated_at = NOW()
            WHERE id = $2
              AND merchant_id = $3
              AND NOT is_deleted
            "#,
        )
        .bind(enabled)
        .bind(scenario_id)
        .bind(merchant_id)
        .execute(&self.pool)
        .await
        .context("Failed to toggle scenario")?;

        Ok(())
    }

    async fn get_scenario(
        &self,
        merchant_id: i64,
        scenario_id: &str,
    ) -> Result<Option<Scenario>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM scenarios
            WHERE id = $1
              AND merchant_id = $2
              AND NOT is_deleted
            "#,
        )
        .bind(scenario_id)
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get scenario")?;

        Ok(row.as_ref().map(scenario_from_row))
    }

    async fn list_scenarios(&self, merchant_id: i64) -> Result<Vec<Scenario>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM scenarios
            WHERE merchant_id = $1
              AND NOT is_deleted
            ORDER BY created_at DESC
            "#,
        )
        .bind(merchant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list scenarios")?;

        Ok(rows.iter().map(scenario_from_row).collect())
    }

    async fn scenarios_by_trigger(
        &self,
        merchant_id: i64,
        trigger_kind: &str,
        trigger_value: Option<&str>,
    ) -> Result<Vec<Scenario>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM scenarios
            WHERE merchant_id = $1
              AND enabled
              AND NOT is_deleted
              AND trigger_kind = $2
              AND ($3::text IS NULL OR trigger_value = $3)
            "#,
        )
        .bind(merchant_id)
        .bind(trigger_kind)
        .bind(trigger_value)
        .fetch_all(&self.pool)
        .await
        .context("Failed to find scenarios by trigger")?;

        Ok(rows.iter().map(scenario_from_row).collect())
    }

    async fn create_execution(&self, execution: NewExecution) -> Result<Execution> {
        let row = sqlx::query(
            r#"
            INSERT INTO executions (
                id, merchant_id, scenario_id, trigger_payload, status, variables
            ) VALUES ($1, $2, $3, $4, 'running', $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(execution.merchant_id)
        .bind(&execution.scenario_id)
        .bind(serde_json::to_value(&execution.trigger_payload)?)
        .bind(serde_json::to_value(&execution.variables)?)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create execution")?;

        execution_from_row(&row)
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = $1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get execution")?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn list_executions(
        &self,
        merchant_id: i64,
        filter: ExecutionFilter,
    ) -> Result<(Vec<Execution>, u64)> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM executions
            WHERE merchant_id = $1
              AND ($2::text IS NULL OR scenario_id = $2)
            "#,
        )
        .bind(merchant_id)
        .bind(filter.scenario_id.as_deref())
        .fetch_one(&self.pool)
        .await
        .context("Failed to count executions")?;

        let page_size = i64::from(filter.page_size.max(1));
        let offset = i64::from(filter.page.max(1) - 1) * page_size;

        let rows = sqlx::query(
            r#"
            SELECT * FROM executions
            WHERE merchant_id = $1
              AND ($2::text IS NULL OR scenario_id = $2)
            ORDER BY started_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(merchant_id)
        .bind(filter.scenario_id.as_deref())
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        let executions = rows
            .iter()
            .map(execution_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((executions, total as u64))
    }

    async fn update_execution(&self, execution_id: &str, update: ExecutionUpdate) -> Result<()> {
        let variables = update
            .variables
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let finished = update.status.map_or(false, ExecutionStatus::is_terminal);

        sqlx::query(
            r#"
            UPDATE executions
            SET status = COALESCE($1, status),
                current_step = COALESCE($2, current_step),
                error = COALESCE($3, error),
                variables = COALESCE($4, variables),
                finished_at = CASE WHEN $5 THEN NOW() ELSE finished_at END
            WHERE id = $6
            "#,
        )
        .bind(update.status)
        .bind(update.current_step)
        .bind(update.error)
        .bind(variables)
        .bind(finished)
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .context("Failed to update execution")?;

        Ok(())
    }

    async fn suspend_execution(
        &self,
        merchant_id: i64,
        continuation: &Continuation,
        wake_at: DateTime<Utc>,
    ) -> Result<DelayedTask> {
        let mut tx = self.pool.begin().await.context("Failed to begin suspend")?;

        sqlx::query(
            r#"
            UPDATE executions
            SET status = 'waiting',
                variables = $1
            WHERE id = $2
            "#,
        )
        .bind(serde_json::to_value(&continuation.variables)?)
        .bind(&continuation.execution_id)
        .execute(&mut *tx)
        .await
        .context("Failed to mark execution waiting")?;

        let row = sqlx::query(
            r#"
            INSERT INTO delayed_tasks (
                id, merchant_id, execution_id, resume_step_id, wake_at, status
            ) VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(merchant_id)
        .bind(&continuation.execution_id)
        .bind(&continuation.resume_step_id)
        .bind(wake_at)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to create delayed task")?;

        tx.commit().await.context("Failed to commit suspend")?;
        Ok(task_from_row(&row))
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<DelayedTask>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM delayed_tasks
            WHERE status = 'pending'
              AND wake_at <= $1
            ORDER BY wake_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch due tasks")?;

        Ok(rows.iter().map(task_from_row).collect())
    }

    async fn claim_task(&self, task_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE delayed_tasks
            SET status = 'executed'
            WHERE id = $1
              AND status = 'pending'
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .context("Failed to claim delayed task")?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel_task(&self, task_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE delayed_tasks
            SET status = 'cancelled'
            WHERE id = $1
              AND status = 'pending'
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .context("Failed to cancel delayed task")?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_step_log(&self, log: NewStepLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO step_logs (
                id, execution_id, step_id, step_kind,
                input, output, outcome, duration_ms, error
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&log.execution_id)
        .bind(&log.step_id)
        .bind(&log.step_kind)
        .bind(&log.input)
        .bind(&log.output)
        .bind(log.outcome)
        .bind(log.duration_ms)
        .bind(&log.error)
        .execute(&self.pool)
        .await
        .context("Failed to append step log")?;

        Ok(())
    }

    async fn list_step_logs(&self, execution_id: &str) -> Result<Vec<StepLog>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM step_logs
            WHERE execution_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list step logs")?;

        Ok(rows.iter().map(step_log_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires database to be running
    async fn test_connect_and_migrate() {
        let settings = DatabaseSettings {
            url: std::env::var("SCENARIO__DATABASE__URL").unwrap_or_default(),
            max_connections: 2,
        };
        let store = PgStore::connect(&settings).await.unwrap();
        store.migrate().await.unwrap();

        let result: (i32,) = sqlx::query_as("SELECT 1")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(result.0, 1);
    }
}
