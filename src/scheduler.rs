//! Background scheduler that resumes suspended executions.
//!
//! Every tick it fetches pending delayed tasks whose wake time has passed,
//! claims each one (pending -> executed), and only then dispatches the
//! resume. A crash after the claim but before the resume finishes leaves
//! the execution waiting; that is the accepted degraded outcome, never a
//! double resume.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerSettings;
use crate::engine::Engine;
use crate::store::ScenarioStore;

pub struct DelayedTaskScheduler {
    store: Arc<dyn ScenarioStore>,
    engine: Arc<Engine>,
    interval: Duration,
}

impl DelayedTaskScheduler {
    pub fn new(
        store: Arc<dyn ScenarioStore>,
        engine: Arc<Engine>,
        settings: &SchedulerSettings,
    ) -> Self {
        Self {
            store,
            engine,
            interval: Duration::from_secs(settings.interval_secs.max(1)),
        }
    }

    /// Runs the poll loop until the token is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(
                interval_secs = scheduler.interval.as_secs(),
                "delayed task scheduler started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("delayed task scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.process_due(Utc::now()).await {
                            // Skipped until the next tick; claimed tasks are unaffected.
                            tracing::error!("delayed task sweep failed: {e:#}");
                        }
                    }
                }
            }
        })
    }

    /// One sweep: claim everything due at `now` and dispatch resumes.
    /// Returns how many tasks this call claimed.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let tasks = self
            .store
            .due_tasks(now)
            .await
            .context("Failed to fetch due delayed tasks")?;
        if tasks.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = tasks.len(), "processing delayed tasks");

        let mut claimed = 0;
        for task in tasks {
            // Claim before resuming so a concurrent sweep cannot also win.
            match self.store.claim_task(&task.id).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::error!(task_id = %task.id, "failed to claim delayed task: {e:#}");
                    continue;
                }
            }

            claimed += 1;
            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move {
                if let Err(e) = engine
                    .resume(&task.execution_id, &task.resume_step_id)
                    .await
                {
                    tracing::error!(
                        execution_id = %task.execution_id,
                        "failed to resume execution: {e}"
                    );
                }
            });
        }

        Ok(claimed)
    }
}
