//! Database query functions for the `activity_records` table.
//!
//! Activity records are the append-only per-task log the UI and Event Bus
//! read from; they are never updated or deleted.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::ActivityRecord;

/// Parameters for appending a new activity record.
#[derive(Debug, Clone)]
pub struct NewActivityRecord<'a> {
    pub task_id: Uuid,
    pub session_id: Option<Uuid>,
    pub kind: &'a str,
    pub content: &'a str,
    pub hat: Option<&'a str>,
    pub iteration: Option<i32>,
}

/// Append an activity record. Returns the inserted row with server-generated
/// defaults (id, created_at).
pub async fn insert_activity_record(
    pool: &PgPool,
    new: &NewActivityRecord<'_>,
) -> Result<ActivityRecord> {
    let record = sqlx::query_as::<_, ActivityRecord>(
        "INSERT INTO activity_records (task_id, session_id, kind, content, hat, iteration) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(new.task_id)
    .bind(new.session_id)
    .bind(new.kind)
    .bind(new.content)
    .bind(new.hat)
    .bind(new.iteration)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert activity record for task {}", new.task_id))?;

    Ok(record)
}

/// List activity for a task, oldest first.
pub async fn list_activity_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<ActivityRecord>> {
    let records = sqlx::query_as::<_, ActivityRecord>(
        "SELECT * FROM activity_records WHERE task_id = $1 ORDER BY created_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list activity for task {task_id}"))?;

    Ok(records)
}

/// List activity for a task recorded after a given record id, oldest first.
///
/// Used to resume a WebSocket event stream from a client-supplied
/// watermark without replaying the whole history.
pub async fn list_activity_since(
    pool: &PgPool,
    task_id: Uuid,
    since_id: i64,
) -> Result<Vec<ActivityRecord>> {
    let records = sqlx::query_as::<_, ActivityRecord>(
        "SELECT * FROM activity_records WHERE task_id = $1 AND id > $2 ORDER BY id ASC",
    )
    .bind(task_id)
    .bind(since_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list activity for task {task_id} since {since_id}"))?;

    Ok(records)
}
