//! The Scheduler (C6): admits tasks onto a bounded pool of parallel workers,
//! one `tokio::task` per running task, and drives restart recovery (§5).
//!
//! Admission is priority-ordered and dependency-gated: every tick runs
//! [`dispatch::run_admission_sweep`] to promote/demote `pending`/`blocked`
//! tasks, then pulls `ready` candidates in priority order and claims a
//! worker slot for as many as the concurrency cap allows. Each admitted
//! task's entire lifecycle (hats, iterations, approvals, completion) runs
//! inside [`run_agent_lifecycle`] -- the scheduler's own job ends at
//! `start_task` and resumes only to notice the lifecycle finished.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use poindexter_db::models::Project;
use poindexter_db::queries::tasks as task_db;

use crate::eventbus::EventBus;
use crate::harness::HarnessRegistry;
use crate::isolation::Isolation;
use crate::lifecycle::{run_agent_lifecycle, LifecycleConfig, LifecycleOutcome};
use crate::state::dispatch;
use crate::token::TokenConfig;

/// Default concurrency cap (§5: "Worker count is bounded by the
/// concurrency cap K").
pub const DEFAULT_CONCURRENCY: usize = 25;

/// Configuration for one scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of tasks running at once.
    pub concurrency: usize,
    /// Per-iteration agent call timeout, forwarded to the Ralph loop.
    pub iteration_timeout: Duration,
    /// Harness to run every admitted task under.
    pub harness_name: String,
    /// How long to sleep between admission ticks when nothing is ready and
    /// nothing is in flight, to avoid busy-looping an idle project.
    pub poll_interval: Duration,
}

impl SchedulerConfig {
    pub fn new(harness_name: impl Into<String>) -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            iteration_timeout: Duration::from_secs(600),
            harness_name: harness_name.into(),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Outcome of running the scheduler to completion or interruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerOutcome {
    /// Every task in the project reached a terminal, non-blocked state.
    Completed,
    /// A cancellation was observed; in-flight tasks were drained and left
    /// in whatever non-terminal state their own lifecycle left them in.
    Interrupted,
}

struct LifecycleDone {
    task_id: Uuid,
    outcome: Result<LifecycleOutcome>,
}

/// Run the scheduler for one project until every task reaches a terminal
/// state or the cancellation token fires.
pub async fn run_scheduler(
    pool: &PgPool,
    project: &Project,
    registry: &Arc<HarnessRegistry>,
    isolation: &Arc<dyn Isolation>,
    token_config: &TokenConfig,
    config: &SchedulerConfig,
    events: &EventBus,
    cancel: CancellationToken,
) -> Result<SchedulerOutcome> {
    let project_id = project.id;

    // Restart recovery (§5, §8 property 8): a crashed scheduler leaves
    // `running` tasks with no session watching them, but their worktree
    // and latest checkpoint survive on disk, so they're re-admitted
    // rather than quarantined.
    let recovered = task_db::reset_orphaned_tasks(pool, project_id).await?;
    for task in &recovered {
        tracing::info!(task_id = %task.id, "resumed orphaned task after restart");
        events.publish(
            "task.recovered",
            Some(task.id),
            serde_json::json!({"title": task.title}),
        );
    }

    anyhow::ensure!(
        registry.get(&config.harness_name).is_some(),
        "harness '{}' not registered",
        config.harness_name
    );

    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let (tx, mut rx) = mpsc::channel::<LifecycleDone>(config.concurrency.max(1) * 2);
    let mut in_flight: usize = 0;

    loop {
        if cancel.is_cancelled() {
            tracing::info!(project_id = %project_id, "scheduler cancelled, draining in-flight tasks");
            while in_flight > 0 {
                match rx.recv().await {
                    Some(done) => {
                        in_flight -= 1;
                        log_lifecycle_done(&done);
                    }
                    None => break,
                }
            }
            return Ok(SchedulerOutcome::Interrupted);
        }

        while let Ok(done) = rx.try_recv() {
            in_flight -= 1;
            log_lifecycle_done(&done);
        }

        dispatch::run_admission_sweep(pool, project_id)
            .await
            .context("admission sweep failed")?;

        if in_flight == 0 && task_db::is_project_complete(pool, project_id).await? {
            return Ok(SchedulerOutcome::Completed);
        }

        let candidates = task_db::get_admission_candidates(pool, project_id).await?;
        let mut admitted_any = false;

        for task in candidates {
            let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                break; // at capacity this tick; remaining candidates wait for the next
            };

            if dispatch::start_task(pool, task.id).await.is_err() {
                // Lost a race with another scheduler instance (or the task
                // moved out of `ready` between the query and now); the
                // permit is simply dropped and this candidate retried next
                // tick.
                continue;
            }

            admitted_any = true;
            in_flight += 1;

            let task_id = task.id;
            events.publish(
                "task.started",
                Some(task_id),
                serde_json::json!({"title": task.title}),
            );

            let pool = pool.clone();
            let project_name = project.name.clone();
            let registry = Arc::clone(registry);
            let harness_name = config.harness_name.clone();
            let isolation = Arc::clone(isolation);
            let token_config = token_config.clone();
            let lifecycle_config = LifecycleConfig {
                iteration_timeout: config.iteration_timeout,
            };
            let events = events.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let outcome = match registry.get(&harness_name) {
                    Some(harness) => {
                        run_agent_lifecycle(
                            &pool,
                            &task,
                            &project_name,
                            harness,
                            isolation.as_ref(),
                            &token_config,
                            &lifecycle_config,
                            &events,
                            &cancel,
                        )
                        .await
                    }
                    None => Err(anyhow::anyhow!(
                        "harness '{harness_name}' disappeared from registry"
                    )),
                };

                drop(permit);
                let _ = tx.send(LifecycleDone { task_id, outcome }).await;
            });
        }

        if in_flight > 0 {
            tokio::select! {
                done = rx.recv() => {
                    if let Some(done) = done {
                        in_flight -= 1;
                        log_lifecycle_done(&done);
                    }
                }
                _ = cancel.cancelled() => continue,
            }
        } else if !admitted_any {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                _ = cancel.cancelled() => continue,
            }
        }
    }
}

fn log_lifecycle_done(done: &LifecycleDone) {
    match &done.outcome {
        Ok(outcome) => {
            tracing::info!(task_id = %done.task_id, outcome = ?outcome, "task lifecycle finished");
        }
        Err(e) => {
            tracing::error!(task_id = %done.task_id, error = %e, "task lifecycle returned an error");
        }
    }
}
