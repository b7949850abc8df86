//! Gate verdict evaluator: translates a [`GateVerdict`] into a concrete
//! [`GateAction`] and the matching task status transition.
//!
//! Invariant verification itself is not one of the §4.3 approval-matrix
//! events (commit, hat transition, PR, merge, conflict resolution, budget
//! extension) -- it's the Ralph loop's own completion check. A verdict is
//! resolved purely from the outcome and the task's retry budget:
//!
//! - all invariants passed -> `completed`
//! - some failed, retries remain -> retried in place (`running` -> `ready`,
//!   `attempt` incremented -- see §9 open question decision in DESIGN.md)
//! - some failed, no retries remain -> `completed_with_issues`, per §4.2's
//!   "any non-zero result demotes the signal" rule, rather than a hard
//!   failure with no path forward.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use poindexter_db::queries::tasks as task_db;

use crate::state::dispatch;

use super::GateVerdict;

/// The action taken after evaluating a gate verdict, and the status
/// transition already applied to the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAction {
    /// Every invariant passed; the task is now `completed`.
    Completed,
    /// One or more invariants failed but the retry budget allows another
    /// attempt; the task is back in `ready`.
    RetriedInPlace { attempt: i32 },
    /// One or more invariants failed and the retry budget is exhausted;
    /// the task is `completed_with_issues`.
    CompletedWithIssues,
}

/// Evaluate a gate verdict for a task and apply the resulting transition.
pub async fn evaluate_verdict(
    pool: &PgPool,
    task_id: Uuid,
    verdict: &GateVerdict,
) -> Result<GateAction> {
    let task = task_db::get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {} not found", task_id))?;

    match verdict {
        GateVerdict::Passed => {
            dispatch::complete_task(pool, task_id).await?;
            Ok(GateAction::Completed)
        }
        GateVerdict::Failed { .. } => {
            if task.attempt < task.retry_max {
                dispatch::retry_task_in_place(pool, task_id, task.attempt).await?;
                Ok(GateAction::RetriedInPlace {
                    attempt: task.attempt + 1,
                })
            } else {
                dispatch::complete_task_with_issues(pool, task_id).await?;
                Ok(GateAction::CompletedWithIssues)
            }
        }
    }
}
