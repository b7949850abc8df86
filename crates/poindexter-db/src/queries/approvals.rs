//! Database query functions for the `approvals` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Approval, ApprovalKind, ApprovalStatus};

/// Open a new approval gate for a task.
pub async fn insert_approval(
    pool: &PgPool,
    task_id: Uuid,
    kind: ApprovalKind,
    title: &str,
    context: Value,
    expires_at: Option<DateTime<Utc>>,
) -> Result<Approval> {
    let approval = sqlx::query_as::<_, Approval>(
        "INSERT INTO approvals (id, task_id, kind, title, context, status, expires_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(task_id)
    .bind(kind)
    .bind(title)
    .bind(context)
    .bind(ApprovalStatus::Pending)
    .bind(expires_at)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert approval for task {task_id}"))?;

    Ok(approval)
}

/// Fetch an approval by its ID.
pub async fn get_approval(pool: &PgPool, id: Uuid) -> Result<Option<Approval>> {
    let approval = sqlx::query_as::<_, Approval>("SELECT * FROM approvals WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch approval")?;

    Ok(approval)
}

/// List all approvals still pending a decision, oldest first.
pub async fn list_pending_approvals(pool: &PgPool) -> Result<Vec<Approval>> {
    let approvals = sqlx::query_as::<_, Approval>(
        "SELECT * FROM approvals WHERE status = 'pending' ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list pending approvals")?;

    Ok(approvals)
}

/// List all approvals for a given task, newest first.
pub async fn list_approvals_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<Approval>> {
    let approvals = sqlx::query_as::<_, Approval>(
        "SELECT * FROM approvals WHERE task_id = $1 ORDER BY created_at DESC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list approvals for task {task_id}"))?;

    Ok(approvals)
}

/// Resolve a pending approval as approved or rejected. Optimistically
/// locked on `status = 'pending'`: resolving an already-resolved or
/// already-expired approval is a no-op (0 rows affected).
pub async fn resolve_approval(
    pool: &PgPool,
    id: Uuid,
    status: ApprovalStatus,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE approvals SET status = $1, resolved_at = now() \
         WHERE id = $2 AND status = 'pending'",
    )
    .bind(status)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to resolve approval")?;

    Ok(result.rows_affected())
}

/// Expire every pending approval whose `expires_at` has passed, treating
/// expiry as a rejection (the default per the approval-gate matrix: an
/// operator who never answers does not get an implicit yes). Returns the
/// approvals that were expired.
pub async fn expire_overdue_approvals(pool: &PgPool) -> Result<Vec<Approval>> {
    let approvals = sqlx::query_as::<_, Approval>(
        "UPDATE approvals \
         SET status = 'expired', resolved_at = now() \
         WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= now() \
         RETURNING *",
    )
    .fetch_all(pool)
    .await
    .context("failed to expire overdue approvals")?;

    Ok(approvals)
}
