//! Database query functions for the `checkpoints` table.
//!
//! The `UNIQUE (session_id, iteration)` constraint on the table is what
//! gives checkpoint writes their monotonicity guarantee: the Ralph loop
//! can only ever move an iteration counter forward, never overwrite or
//! skip one, because a re-send of the same iteration number is rejected
//! by the database rather than silently accepted.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Checkpoint;

/// Parameters for recording a new checkpoint.
#[derive(Debug, Clone)]
pub struct NewCheckpoint<'a> {
    pub session_id: Uuid,
    pub iteration: i32,
    pub agent_session_handle: Option<&'a str>,
    pub completion_promise: &'a str,
    pub tokens_used: i64,
    pub wall_seconds_used: i64,
    pub dollar_cents_used: i64,
}

/// Insert a checkpoint row. Fails (via the unique constraint) if this
/// `(session_id, iteration)` pair was already recorded.
pub async fn insert_checkpoint(pool: &PgPool, new: &NewCheckpoint<'_>) -> Result<Checkpoint> {
    let checkpoint = sqlx::query_as::<_, Checkpoint>(
        "INSERT INTO checkpoints \
         (session_id, iteration, agent_session_handle, completion_promise, \
          tokens_used, wall_seconds_used, dollar_cents_used) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(new.session_id)
    .bind(new.iteration)
    .bind(new.agent_session_handle)
    .bind(new.completion_promise)
    .bind(new.tokens_used)
    .bind(new.wall_seconds_used)
    .bind(new.dollar_cents_used)
    .fetch_one(pool)
    .await
    .with_context(|| {
        format!(
            "failed to insert checkpoint for session {} iteration {}",
            new.session_id, new.iteration
        )
    })?;

    Ok(checkpoint)
}

/// Fetch the most recent checkpoint recorded for a session, if any.
pub async fn get_latest_checkpoint(
    pool: &PgPool,
    session_id: Uuid,
) -> Result<Option<Checkpoint>> {
    let checkpoint = sqlx::query_as::<_, Checkpoint>(
        "SELECT * FROM checkpoints WHERE session_id = $1 ORDER BY iteration DESC LIMIT 1",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch latest checkpoint for session {session_id}"))?;

    Ok(checkpoint)
}

/// List all checkpoints for a session, in iteration order.
pub async fn list_checkpoints(pool: &PgPool, session_id: Uuid) -> Result<Vec<Checkpoint>> {
    let checkpoints = sqlx::query_as::<_, Checkpoint>(
        "SELECT * FROM checkpoints WHERE session_id = $1 ORDER BY iteration ASC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list checkpoints for session {session_id}"))?;

    Ok(checkpoints)
}
