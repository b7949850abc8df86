//! Approval Gate (C7): materializes human-approval requirements based on
//! autonomy level and blocks progress until they resolve.
//!
//! The matrix in [`requires_approval`] is the single source of truth for
//! which (autonomy, event) combinations need a human in the loop; every
//! other component that opens an approval (the Ralph loop on commit/hat
//! transitions, the worktree manager on conflicts, the scheduler on budget
//! extensions) calls through here rather than re-deriving the rule.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use poindexter_db::models::{Approval, ApprovalKind, ApprovalStatus, Autonomy};
use poindexter_db::queries::approvals as db;
use poindexter_db::queries::tasks as task_db;
use sqlx::PgPool;
use uuid::Uuid;

use crate::state::TaskStateMachine;

/// The approval matrix from §4.3: whether an event of this `kind`, taken by
/// a task at this `autonomy` level, needs a human approval before its
/// effect becomes observable.
///
/// Conflict resolution is required at every autonomy level, even
/// `full_auto` -- the one row the matrix calls out as non-negotiable.
///
/// `Question` and `IterationLimit` sit outside the §4.3 table itself: there
/// is no autonomy level at which a direct question to the user, or a
/// session that burned through its iteration cap without a terminal
/// signal, auto-resolves. Both always require a human.
pub fn requires_approval(autonomy: Autonomy, kind: ApprovalKind) -> bool {
    use ApprovalKind::*;
    use Autonomy::*;

    if matches!(kind, ConflictResolution | Question | IterationLimit) {
        return true;
    }

    match (autonomy, kind) {
        (Supervised, _) => true,
        (SemiAuto, Commit) => false,
        (SemiAuto, _) => true,
        (Autonomous, Commit | HatTransition) => false,
        (Autonomous, _) => true,
        (FullAuto, Merge) => false, // auto-if-CI-green: caller checks CI status separately
        (FullAuto, BudgetExtension) => true,
        (FullAuto, _) => false,
    }
}

/// Outcome of routing an event through the approval gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// No approval needed; the caller may proceed immediately.
    Proceed,
    /// An approval was opened and the task was paused. The caller must stop
    /// and wait for [`resolve`] to be called (by the CLI, the API, or
    /// expiry) before the gated effect is allowed to happen.
    Paused { approval_id: Uuid },
}

/// Route an event through the approval gate for `task_id`.
///
/// If the task's autonomy level requires approval for `kind`, opens a
/// pending [`Approval`] row, pauses the task, and returns
/// [`GateOutcome::Paused`]. Otherwise returns [`GateOutcome::Proceed`]
/// without touching the database.
pub async fn gate(
    pool: &PgPool,
    task_id: Uuid,
    kind: ApprovalKind,
    title: &str,
    context: serde_json::Value,
    ttl: Option<Duration>,
) -> Result<GateOutcome> {
    let task = task_db::get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    if !requires_approval(task.autonomy, kind) {
        return Ok(GateOutcome::Proceed);
    }

    let expires_at: Option<DateTime<Utc>> = ttl.map(|d| Utc::now() + d);
    let approval = db::insert_approval(pool, task_id, kind, title, context, expires_at)
        .await
        .context("failed to open approval")?;

    TaskStateMachine::new(pool.clone())
        .pause(task_id)
        .await
        .context("failed to pause task pending approval")?;

    Ok(GateOutcome::Paused {
        approval_id: approval.id,
    })
}

/// Resolve a pending approval and resume (or cancel) the blocked task.
///
/// Approving resumes the task back to `running`; rejecting cancels it.
/// Expiration is treated as rejection by [`expire_overdue`], which calls
/// this same path.
pub async fn resolve(pool: &PgPool, approval_id: Uuid, approved: bool) -> Result<Approval> {
    let status = if approved {
        ApprovalStatus::Approved
    } else {
        ApprovalStatus::Rejected
    };

    let affected = db::resolve_approval(pool, approval_id, status)
        .await
        .context("failed to resolve approval")?;
    if affected == 0 {
        anyhow::bail!("approval {approval_id} is not pending (already resolved or expired)");
    }

    let approval = db::get_approval(pool, approval_id)
        .await?
        .with_context(|| format!("approval {approval_id} not found"))?;

    let machine = TaskStateMachine::new(pool.clone());
    if approved {
        machine.resume(approval.task_id).await?;
    } else {
        let task = machine.get(approval.task_id).await?;
        machine.cancel(task.id, task.status).await?;
    }

    Ok(approval)
}

/// Sweep every approval whose `expires_at` has passed and reject it,
/// cancelling the tasks they were blocking. An operator who never answers
/// does not get an implicit yes.
pub async fn expire_overdue(pool: &PgPool) -> Result<Vec<Approval>> {
    let expired = db::expire_overdue_approvals(pool)
        .await
        .context("failed to expire overdue approvals")?;

    let machine = TaskStateMachine::new(pool.clone());
    for approval in &expired {
        let task = machine.get(approval.task_id).await?;
        let _ = machine.cancel(task.id, task.status).await;
    }

    Ok(expired)
}
