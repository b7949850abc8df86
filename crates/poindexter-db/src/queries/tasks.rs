//! Database query functions for the `tasks` and `task_dependencies` tables.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Autonomy, Hat, Task, TaskStatus, TaskType};

/// Parameters for inserting a new task row.
#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    pub project_id: Uuid,
    pub quest_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub title: &'a str,
    pub description: &'a str,
    pub task_type: TaskType,
    pub priority: i16,
    pub autonomy: Autonomy,
    pub base_branch: &'a str,
    pub token_budget: Option<i64>,
    pub wall_seconds_budget: Option<i64>,
    pub dollar_cents_budget: Option<i64>,
    pub retry_max: i32,
}

/// Insert a new task row. Returns the inserted task with server-generated
/// defaults (id, created_at, status = pending, attempt = 0).
pub async fn insert_task(pool: &PgPool, new: &NewTask<'_>) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks \
         (id, project_id, quest_id, parent_id, title, description, task_type, priority, \
          autonomy, status, base_branch, token_budget, wall_seconds_budget, \
          dollar_cents_budget, retry_max) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(new.project_id)
    .bind(new.quest_id)
    .bind(new.parent_id)
    .bind(new.title)
    .bind(new.description)
    .bind(new.task_type)
    .bind(new.priority)
    .bind(new.autonomy)
    .bind(TaskStatus::Pending)
    .bind(new.base_branch)
    .bind(new.token_budget)
    .bind(new.wall_seconds_budget)
    .bind(new.dollar_cents_budget)
    .bind(new.retry_max)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Fetch the task a Sync Projector provider's remote issue id is linked
/// to, if any (used to resolve inbound webhook events).
pub async fn get_task_by_external_issue_id(
    pool: &PgPool,
    external_issue_id: &str,
) -> Result<Option<Task>> {
    let task =
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE external_issue_id = $1")
            .bind(external_issue_id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch task by external issue id")?;

    Ok(task)
}

/// List all tasks for a given project, ordered by creation time.
pub async fn list_tasks_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE project_id = $1 ORDER BY created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for project")?;

    Ok(tasks)
}

/// List all tasks belonging to a given quest, ordered by creation time.
pub async fn list_tasks_for_quest(pool: &PgPool, quest_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE quest_id = $1 ORDER BY created_at ASC",
    )
    .bind(quest_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for quest")?;

    Ok(tasks)
}

/// Insert a dependency edge: `task_id` depends on `depends_on`.
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn insert_task_dependency(
    pool: &PgPool,
    task_id: Uuid,
    depends_on: Uuid,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, depends_on) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(depends_on)
    .execute(pool)
    .await
    .context("failed to insert task dependency")?;

    Ok(())
}

/// Get the IDs of all tasks that a given task depends on.
pub async fn get_task_dependencies(pool: &PgPool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT depends_on FROM task_dependencies WHERE task_id = $1")
            .bind(task_id)
            .fetch_all(pool)
            .await
            .context("failed to get task dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Link a task to an invariant. Idempotent (`ON CONFLICT DO NOTHING`).
pub async fn link_task_invariant(pool: &PgPool, task_id: Uuid, invariant_id: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_invariants (task_id, invariant_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(invariant_id)
    .execute(pool)
    .await
    .context("failed to link task to invariant")?;

    Ok(())
}

// -----------------------------------------------------------------------
// State-machine queries
// -----------------------------------------------------------------------

/// Atomically transition a task from one status to another.
///
/// Uses optimistic locking: the UPDATE's WHERE clause includes
/// `status = $from`, so the row is only updated if the current status
/// matches the expected `from` value. Returns the number of rows
/// affected (0 means the status did not match, i.e. someone else moved
/// it first).
pub async fn transition_task_status(
    pool: &PgPool,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = $1, \
             started_at = COALESCE($2, started_at), \
             completed_at = COALESCE($3, completed_at) \
         WHERE id = $4 AND status = $5",
    )
    .bind(to)
    .bind(started_at)
    .bind(completed_at)
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

/// Set the hat currently driving a task, with optimistic locking on status
/// (the task must still be `running`).
pub async fn set_current_hat(pool: &PgPool, task_id: Uuid, hat: Hat) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET current_hat = $1 WHERE id = $2 AND status = 'running'",
    )
    .bind(hat)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to set current hat")?;

    Ok(result.rows_affected())
}

/// Atomically retry a `quarantined` task back to `ready`, incrementing the
/// attempt counter and clearing worktree/branch metadata. Uses optimistic
/// locking on both status and the current attempt value.
pub async fn retry_quarantined_to_ready(
    pool: &PgPool,
    task_id: Uuid,
    current_attempt: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'ready', \
             attempt = attempt + 1, \
             worktree_path = NULL, \
             branch_name = NULL, \
             started_at = NULL, \
             completed_at = NULL \
         WHERE id = $1 AND status = 'quarantined' AND attempt = $2",
    )
    .bind(task_id)
    .bind(current_attempt)
    .execute(pool)
    .await
    .context("failed to retry quarantined task")?;

    Ok(result.rows_affected())
}

/// Atomically retry a `running` task back to `ready` after a gate-check
/// failure with retry budget remaining, consuming one unit of that budget.
/// Optimistic locking on both status and the current attempt value, same
/// shape as [`retry_quarantined_to_ready`].
pub async fn retry_running_to_ready(
    pool: &PgPool,
    task_id: Uuid,
    current_attempt: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'ready', attempt = attempt + 1, started_at = NULL \
         WHERE id = $1 AND status = 'running' AND attempt = $2",
    )
    .bind(task_id)
    .bind(current_attempt)
    .execute(pool)
    .await
    .context("failed to retry running task to ready")?;

    Ok(result.rows_affected())
}

/// Atomically demote a `running` task back to `ready` after a recoverable
/// infra fault (once the operator has approved the retry via the approval
/// gate). Unlike [`retry_running_to_ready`] this does not consume retry
/// budget -- the fault wasn't the task's fault.
pub async fn retry_running_to_ready_no_budget(pool: &PgPool, task_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'ready', started_at = NULL \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to retry running task to ready without consuming budget")?;

    Ok(result.rows_affected())
}

/// Set the assigned worktree path and branch name on a task.
pub async fn assign_task_worktree(
    pool: &PgPool,
    task_id: Uuid,
    worktree_path: &str,
    branch_name: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET worktree_path = $1, branch_name = $2 WHERE id = $3",
    )
    .bind(worktree_path)
    .bind(branch_name)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to assign task worktree")?;

    Ok(result.rows_affected())
}

/// Record (or clear) the Sync Projector's remote issue id for a task.
pub async fn set_task_external_issue_id(
    pool: &PgPool,
    task_id: Uuid,
    external_issue_id: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query("UPDATE tasks SET external_issue_id = $1 WHERE id = $2")
        .bind(external_issue_id)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to set task external issue id")?;

    Ok(result.rows_affected())
}

/// Record the pull request number opened for a task's branch.
pub async fn set_task_pr_number(pool: &PgPool, task_id: Uuid, pr_number: i32) -> Result<u64> {
    let result = sqlx::query("UPDATE tasks SET pr_number = $1 WHERE id = $2")
        .bind(pr_number)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to set task pr number")?;

    Ok(result.rows_affected())
}

/// Record the usage deltas accrued by a task's latest session.
pub async fn accrue_task_usage(
    pool: &PgPool,
    task_id: Uuid,
    tokens: i64,
    wall_seconds: i64,
    dollar_cents: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE tasks \
         SET tokens_used = tokens_used + $1, \
             wall_seconds_used = wall_seconds_used + $2, \
             dollar_cents_used = dollar_cents_used + $3 \
         WHERE id = $4",
    )
    .bind(tokens)
    .bind(wall_seconds)
    .bind(dollar_cents)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to accrue task usage")?;

    Ok(())
}

/// Get all `pending` tasks in a project whose dependencies have all reached
/// a terminal, non-failing status -- candidates the scheduler should
/// promote to `ready` on its next admission pass. This does not itself
/// change any status; callers run each result through
/// [`transition_task_status`] (pending -> ready) so the optimistic lock
/// catches a task that moved between the select and the promotion.
pub async fn get_pending_tasks_with_satisfied_deps(
    pool: &PgPool,
    project_id: Uuid,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT t.* \
         FROM tasks t \
         WHERE t.project_id = $1 \
           AND t.status = 'pending' \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on \
               WHERE td.task_id = t.id \
                 AND dep.status NOT IN ('completed', 'completed_with_issues') \
           )",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to get pending tasks with satisfied dependencies")?;

    Ok(tasks)
}

/// Get every task in a project already in `ready`, ordered by the
/// scheduler's admission order (priority ascending, then creation time).
pub async fn get_admission_candidates(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE project_id = $1 AND status = 'ready' \
         ORDER BY priority ASC, created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to get admission candidates")?;

    Ok(tasks)
}

/// Find tasks in `pending` or `ready` whose dependencies include at least
/// one non-terminal task, and demote/hold them at `blocked`. Returns the
/// tasks moved into `blocked` this pass.
pub async fn block_tasks_with_unmet_dependencies(
    pool: &PgPool,
    project_id: Uuid,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks t \
         SET status = 'blocked' \
         WHERE t.project_id = $1 \
           AND t.status IN ('pending', 'ready') \
           AND EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on \
               WHERE td.task_id = t.id \
                 AND dep.status NOT IN ('completed', 'completed_with_issues', 'cancelled') \
           ) \
         RETURNING t.*",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to block tasks with unmet dependencies")?;

    Ok(tasks)
}

/// Move tasks out of `blocked` back to `pending` once every dependency has
/// reached a terminal status. Returns the tasks unblocked this pass.
pub async fn unblock_tasks_with_satisfied_dependencies(
    pool: &PgPool,
    project_id: Uuid,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks t \
         SET status = 'pending' \
         WHERE t.project_id = $1 \
           AND t.status = 'blocked' \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on \
               WHERE td.task_id = t.id \
                 AND dep.status NOT IN ('completed', 'completed_with_issues', 'cancelled') \
           ) \
         RETURNING t.*",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to unblock tasks with satisfied dependencies")?;

    Ok(tasks)
}

/// Status counts for a project's tasks.
#[derive(Debug, Clone, Default)]
pub struct ProjectProgress {
    pub pending: i64,
    pub planning: i64,
    pub blocked: i64,
    pub ready: i64,
    pub running: i64,
    pub paused: i64,
    pub completed: i64,
    pub completed_with_issues: i64,
    pub cancelled: i64,
    pub quarantined: i64,
    pub total: i64,
}

/// Get a summary of task counts by status for a given project.
pub async fn get_project_progress(pool: &PgPool, project_id: Uuid) -> Result<ProjectProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) as cnt \
         FROM tasks \
         WHERE project_id = $1 \
         GROUP BY status",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to get project progress")?;

    let mut progress = ProjectProgress::default();
    for (status, count) in &rows {
        match status.as_str() {
            "pending" => progress.pending = *count,
            "planning" => progress.planning = *count,
            "blocked" => progress.blocked = *count,
            "ready" => progress.ready = *count,
            "running" => progress.running = *count,
            "paused" => progress.paused = *count,
            "completed" => progress.completed = *count,
            "completed_with_issues" => progress.completed_with_issues = *count,
            "cancelled" => progress.cancelled = *count,
            "quarantined" => progress.quarantined = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}

/// Check whether every (non-cancelled) task in a project has reached a
/// terminal, successful status.
pub async fn is_project_complete(pool: &PgPool, project_id: Uuid) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks \
         WHERE project_id = $1 \
           AND status NOT IN ('completed', 'completed_with_issues', 'cancelled')",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await
    .context("failed to check project completion")?;

    Ok(row.0 == 0)
}

/// Demote every `running` task in a project back to `ready` so the
/// scheduler can resume it from its last checkpoint.
///
/// Used for restart recovery: if the scheduler process crashes mid-run, no
/// session is left watching the in-flight agent, but the worktree and the
/// latest checkpoint survive on disk, so the task is safe to re-admit
/// rather than quarantine. `paused` tasks are left untouched -- they are
/// already waiting on an explicit decision (approval, budget extension)
/// and restarting the scheduler doesn't change that. Returns the tasks
/// that were reset.
pub async fn reset_orphaned_tasks(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'ready', started_at = NULL \
         WHERE project_id = $1 \
           AND status = 'running' \
         RETURNING *",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to reset orphaned tasks")?;

    Ok(tasks)
}

/// A task with its project name (for cross-project views like an approval
/// queue or a dashboard).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskWithProjectName {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: i16,
    pub autonomy: Autonomy,
    pub status: TaskStatus,
    pub current_hat: Option<Hat>,
    pub worktree_path: Option<String>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub project_name: String,
}

/// List all tasks currently `paused` (awaiting approval) across all
/// projects, most recently created first.
pub async fn list_paused_tasks(pool: &PgPool) -> Result<Vec<TaskWithProjectName>> {
    let tasks = sqlx::query_as::<_, TaskWithProjectName>(
        "SELECT t.id, t.project_id, t.title, t.description, t.task_type, t.priority, \
                t.autonomy, t.status, t.current_hat, t.worktree_path, t.attempt, \
                t.created_at, t.started_at, t.completed_at, \
                p.name AS project_name \
         FROM tasks t \
         JOIN projects p ON p.id = t.project_id \
         WHERE t.status = 'paused' \
         ORDER BY t.created_at DESC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list paused tasks")?;

    Ok(tasks)
}
