//! Database query functions for the `sessions` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Hat, Session};

/// Start a new session: one execution attempt of a task under a hat.
pub async fn insert_session(pool: &PgPool, task_id: Uuid, hat: Hat) -> Result<Session> {
    let session = sqlx::query_as::<_, Session>(
        "INSERT INTO sessions (id, task_id, hat) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(task_id)
    .bind(hat)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert session for task {task_id}"))?;

    Ok(session)
}

/// Fetch a session by its ID.
pub async fn get_session(pool: &PgPool, id: Uuid) -> Result<Option<Session>> {
    let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch session")?;

    Ok(session)
}

/// List all sessions for a task, oldest first.
pub async fn list_sessions_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<Session>> {
    let sessions = sqlx::query_as::<_, Session>(
        "SELECT * FROM sessions WHERE task_id = $1 ORDER BY created_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list sessions for task {task_id}"))?;

    Ok(sessions)
}

/// Record the agent's own session handle (for `resume()`) and bump the
/// iteration counter.
pub async fn advance_session_iteration(
    pool: &PgPool,
    id: Uuid,
    agent_session_handle: Option<&str>,
    iteration: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE sessions SET agent_session_handle = COALESCE($1, agent_session_handle), \
         iteration = $2 WHERE id = $3",
    )
    .bind(agent_session_handle)
    .bind(iteration)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to advance session iteration")?;

    Ok(result.rows_affected())
}

/// Close out a session with a final usage tally and outcome.
pub async fn end_session(
    pool: &PgPool,
    id: Uuid,
    tokens_used: i64,
    wall_seconds_used: i64,
    dollar_cents_used: i64,
    outcome: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE sessions \
         SET tokens_used = $1, wall_seconds_used = $2, dollar_cents_used = $3, \
             outcome = $4, ended_at = now() \
         WHERE id = $5 AND ended_at IS NULL",
    )
    .bind(tokens_used)
    .bind(wall_seconds_used)
    .bind(dollar_cents_used)
    .bind(outcome)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to end session")?;

    Ok(result.rows_affected())
}
