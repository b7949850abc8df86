//! Convenience dispatch helpers that wrap [`super::TaskStateMachine`]
//! transitions with semantic names, plus the scheduler's admission sweep.

use anyhow::Result;
use poindexter_db::models::Task;
use poindexter_db::queries::tasks as db;
use sqlx::PgPool;
use uuid::Uuid;

use super::TaskStateMachine;

/// One admission pass over a project: promote dependency-satisfied
/// `pending` tasks to `ready`, demote tasks whose dependencies regressed to
/// `blocked`, and unblock tasks whose dependencies cleared. Called on
/// every scheduler tick, not just once at startup, since task statuses
/// change continuously underneath it.
pub async fn run_admission_sweep(pool: &PgPool, project_id: Uuid) -> Result<()> {
    let machine = TaskStateMachine::new(pool.clone());

    for candidate in db::get_pending_tasks_with_satisfied_deps(pool, project_id).await? {
        // Best-effort: if another scheduler instance already moved it, the
        // optimistic lock in `mark_ready` simply reports 0 rows affected
        // via an error we don't need to propagate.
        let _ = machine.mark_ready(candidate.id).await;
    }

    db::block_tasks_with_unmet_dependencies(pool, project_id).await?;
    db::unblock_tasks_with_satisfied_dependencies(pool, project_id).await?;

    Ok(())
}

/// Admit a `ready` task: claim a worker slot and move it to `running`.
pub async fn start_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::new(pool.clone()).start(task_id).await
}

/// Resume a `paused` task back into `running` once the blocking decision
/// (approval, budget extension, infra retry) has been made.
pub async fn resume_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::new(pool.clone()).resume(task_id).await
}

/// Pause a running task pending an external decision.
pub async fn pause_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::new(pool.clone()).pause(task_id).await
}

/// Mark a task fully complete.
pub async fn complete_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::new(pool.clone()).complete(task_id).await
}

/// Mark a task complete with caveats (soft invariant failures, or a verdict
/// autonomy allowed through without full sign-off).
pub async fn complete_task_with_issues(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::new(pool.clone())
        .complete_with_issues(task_id)
        .await
}

/// Retry a running task in place after a gate-check failure, consuming one
/// unit of its retry budget.
pub async fn retry_task_in_place(pool: &PgPool, task_id: Uuid, current_attempt: i32) -> Result<()> {
    TaskStateMachine::new(pool.clone())
        .retry_in_place(task_id, current_attempt)
        .await
}

/// Retry a running task after a recoverable infra fault, without consuming
/// retry budget.
pub async fn retry_task_after_infra_fault(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::new(pool.clone())
        .retry_after_infra_fault(task_id)
        .await
}

/// Send an unrecoverable task to quarantine.
pub async fn quarantine_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::new(pool.clone())
        .quarantine(task_id)
        .await
}

/// Reopen a quarantined task, consuming one unit of the retry budget.
pub async fn reopen_task(pool: &PgPool, task_id: Uuid, current_attempt: i32) -> Result<()> {
    TaskStateMachine::new(pool.clone())
        .reopen_quarantined(task_id, current_attempt)
        .await
}

/// Cancel a task, wherever it currently sits in the non-terminal states.
pub async fn cancel_task(pool: &PgPool, task: &Task) -> Result<()> {
    TaskStateMachine::new(pool.clone())
        .cancel(task.id, task.status)
        .await
}
