//! The task state machine (§4.1).
//!
//! ```text
//!                 ┌──────────┐
//!         ┌──────▶│ planning │──────┐
//!         │       └──────────┘      │
//!         │                         ▼
//!   (quest opens)              ┌─────────┐   deps satisfied   ┌───────┐
//!                     ┌───────▶│ pending │───────────────────▶│ ready │
//!                     │        └─────────┘                    └───┬───┘
//!              deps satisfied       │  deps unmet                 │ admitted
//!                     │             ▼                             ▼
//!                     │        ┌─────────┐                  ┌─────────┐
//!                     └────────│ blocked │                  │ running │◀──┐
//!                              └─────────┘                  └────┬────┘   │
//!                                                                 │        │ resume
//!                       ┌─────────────────────┬──────────────────┼────────┘
//!                       ▼                     ▼                  ▼
//!                 ┌───────────┐        ┌───────────┐       ┌───────────┐
//!                 │  paused   │        │ completed │       │quarantined│
//!                 └───────────┘        │ (_w_issues)│      └───────────┘
//!                                      └───────────┘
//! ```
//!
//! `pending`, `blocked`, `ready`, `running`, `paused` and `planning` are all
//! non-terminal. `completed`, `completed_with_issues`, `cancelled` and
//! `quarantined` are terminal: [`TaskStatus::is_terminal`] governs both
//! dependency-satisfaction checks and the scheduler's admission queue.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use poindexter_db::models::{Task, TaskStatus};
use poindexter_db::queries::tasks as db;
use sqlx::PgPool;
use uuid::Uuid;

pub mod dispatch;
pub mod queries;

/// Whether moving a task from `from` to `to` is a transition this state
/// machine recognizes. Used both to validate direct `transition` calls and
/// to document the graph above in one place.
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, Planning)
            | (Planning, Pending)
            | (Pending, Ready)
            | (Pending, Blocked)
            | (Blocked, Pending)
            | (Ready, Blocked)
            | (Ready, Running)
            | (Running, Paused)
            | (Running, Completed)
            | (Running, CompletedWithIssues)
            | (Running, Cancelled)
            | (Running, Quarantined)
            | (Running, Ready) // recoverable failure / restart demotion, no attempt bump
            | (Paused, Running) // resume
            | (Paused, Cancelled)
            | (Quarantined, Ready) // explicit reopen, attempt += 1
            | (Pending, Cancelled)
            | (Ready, Cancelled)
            | (Blocked, Cancelled)
    )
}

/// Drives a task's `status` column through the graph above, going through
/// the database's optimistic-locking queries so concurrent schedulers never
/// race each other onto the same task.
pub struct TaskStateMachine {
    pool: PgPool,
}

impl TaskStateMachine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attempt a direct status transition. Fails if the transition isn't in
    /// the graph, or if the task's current status no longer matches `from`
    /// (someone else moved it first -- the caller should refetch and
    /// decide whether to retry).
    pub async fn transition(&self, task_id: Uuid, from: TaskStatus, to: TaskStatus) -> Result<()> {
        if !is_valid_transition(from, to) {
            bail!("invalid task transition: {from} -> {to}");
        }

        let started_at = (to == TaskStatus::Running && from != TaskStatus::Paused)
            .then(Utc::now);
        let completed_at = to.is_terminal().then(Utc::now);

        let affected =
            db::transition_task_status(&self.pool, task_id, from, to, started_at, completed_at)
                .await
                .context("failed to transition task status")?;

        if affected == 0 {
            let current = db::get_task(&self.pool, task_id)
                .await?
                .with_context(|| format!("task {task_id} not found"))?;
            bail!(
                "task {task_id} is not in status {from} (actual: {}), cannot transition to {to}",
                current.status
            );
        }

        Ok(())
    }

    /// Promote a `pending` task to `ready` once its dependencies are
    /// satisfied. The scheduler calls this once per admission pass for
    /// every candidate returned by
    /// [`db::get_pending_tasks_with_satisfied_deps`].
    pub async fn mark_ready(&self, task_id: Uuid) -> Result<()> {
        self.transition(task_id, TaskStatus::Pending, TaskStatus::Ready)
            .await
    }

    /// Admit a `ready` task into a worker slot.
    pub async fn start(&self, task_id: Uuid) -> Result<()> {
        self.transition(task_id, TaskStatus::Ready, TaskStatus::Running)
            .await
    }

    /// Resume a `paused` task (approval granted, budget extended, infra
    /// retry approved) back into a worker slot.
    pub async fn resume(&self, task_id: Uuid) -> Result<()> {
        self.transition(task_id, TaskStatus::Paused, TaskStatus::Running)
            .await
    }

    /// Pause a running task pending an external decision: an approval gate,
    /// a budget-extension request, or an infra fault the operator must
    /// acknowledge before retrying. Does not touch the retry budget.
    pub async fn pause(&self, task_id: Uuid) -> Result<()> {
        self.transition(task_id, TaskStatus::Running, TaskStatus::Paused)
            .await
    }

    /// Mark a running task fully complete: every invariant passed.
    pub async fn complete(&self, task_id: Uuid) -> Result<()> {
        self.transition(task_id, TaskStatus::Running, TaskStatus::Completed)
            .await
    }

    /// Mark a running task complete with caveats: the agent's own
    /// completion promise was honored but one or more soft invariants
    /// failed, or autonomy allowed the verdict through without full sign-off.
    pub async fn complete_with_issues(&self, task_id: Uuid) -> Result<()> {
        self.transition(
            task_id,
            TaskStatus::Running,
            TaskStatus::CompletedWithIssues,
        )
        .await
    }

    /// Cancel a task regardless of which non-terminal state it's in.
    pub async fn cancel(&self, task_id: Uuid, from: TaskStatus) -> Result<()> {
        self.transition(task_id, from, TaskStatus::Cancelled).await
    }

    /// Send a task with an exhausted retry budget to `quarantined`. This is
    /// terminal from the scheduler's point of view; only an explicit
    /// operator reopen (`retry`) moves it again.
    pub async fn quarantine(&self, task_id: Uuid) -> Result<()> {
        self.transition(task_id, TaskStatus::Running, TaskStatus::Quarantined)
            .await
    }

    /// Retry a running task after a gate-check failure, consuming one unit
    /// of its retry budget. Callers should check `attempt < retry_max`
    /// first and quarantine instead once the budget is exhausted.
    pub async fn retry_in_place(&self, task_id: Uuid, current_attempt: i32) -> Result<()> {
        let affected = db::retry_running_to_ready(&self.pool, task_id, current_attempt)
            .await
            .context("failed to retry running task")?;
        if affected == 0 {
            bail!("task {task_id} is not running at attempt {current_attempt}");
        }
        Ok(())
    }

    /// Demote a running task back to `ready` after a recoverable infra
    /// fault, once the operator has approved the retry. Does not consume
    /// retry budget -- the fault wasn't the task's fault.
    pub async fn retry_after_infra_fault(&self, task_id: Uuid) -> Result<()> {
        let affected = db::retry_running_to_ready_no_budget(&self.pool, task_id)
            .await
            .context("failed to retry running task after infra fault")?;
        if affected == 0 {
            bail!("task {task_id} is not running, cannot retry after infra fault");
        }
        Ok(())
    }

    /// Reopen a `quarantined` task: bump `attempt`, clear worktree/branch
    /// metadata, send it back to `ready`. Optimistically locked on the
    /// attempt counter the caller observed.
    pub async fn reopen_quarantined(&self, task_id: Uuid, current_attempt: i32) -> Result<()> {
        let affected = db::retry_quarantined_to_ready(&self.pool, task_id, current_attempt)
            .await
            .context("failed to reopen quarantined task")?;
        if affected == 0 {
            bail!("task {task_id} is not quarantined at attempt {current_attempt}");
        }
        Ok(())
    }

    /// Block a task whose dependencies are no longer all satisfied (a
    /// sibling task regressed, or a new dependency was added after the
    /// fact).
    pub async fn block(&self, task_id: Uuid, from: TaskStatus) -> Result<()> {
        self.transition(task_id, from, TaskStatus::Blocked).await
    }

    /// Unblock a task once its dependencies clear.
    pub async fn unblock(&self, task_id: Uuid) -> Result<()> {
        self.transition(task_id, TaskStatus::Blocked, TaskStatus::Pending)
            .await
    }

    /// Check whether every dependency of `task_id` has reached a terminal,
    /// non-cancelled status.
    pub async fn dependencies_satisfied(&self, task_id: Uuid) -> Result<bool> {
        let dep_ids = db::get_task_dependencies(&self.pool, task_id).await?;
        for dep_id in dep_ids {
            let dep = db::get_task(&self.pool, dep_id)
                .await?
                .with_context(|| format!("dependency {dep_id} not found"))?;
            if !matches!(
                dep.status,
                TaskStatus::Completed | TaskStatus::CompletedWithIssues
            ) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fetch the current row for a task, for callers that need to inspect
    /// fields beyond the status (attempt, budgets, autonomy) before
    /// deciding which transition to make.
    pub async fn get(&self, task_id: Uuid) -> Result<Task> {
        db::get_task(&self.pool, task_id)
            .await?
            .with_context(|| format!("task {task_id} not found"))
    }
}
