//! Database query functions for the `provider_config` table (§4.8 Sync
//! Projector settings, one row per project per provider).

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::ProviderConfig;

/// Install or update a project's Sync Projector provider settings.
///
/// `(project_id, provider)` is unique, so calling this twice for the same
/// provider replaces its config rather than creating a second row.
pub async fn upsert_provider_config(
    pool: &PgPool,
    project_id: Uuid,
    provider: &str,
    config: Value,
) -> Result<ProviderConfig> {
    let row = sqlx::query_as::<_, ProviderConfig>(
        "INSERT INTO provider_config (id, project_id, provider, config) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (project_id, provider) DO UPDATE SET config = EXCLUDED.config \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(provider)
    .bind(config)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert provider config for project {project_id}"))?;

    Ok(row)
}

/// Fetch a project's config for a given provider, if installed.
pub async fn get_provider_config(
    pool: &PgPool,
    project_id: Uuid,
    provider: &str,
) -> Result<Option<ProviderConfig>> {
    let row = sqlx::query_as::<_, ProviderConfig>(
        "SELECT * FROM provider_config WHERE project_id = $1 AND provider = $2",
    )
    .bind(project_id)
    .bind(provider)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch provider config for project {project_id}"))?;

    Ok(row)
}

/// Remove a project's provider config, turning projection off.
pub async fn delete_provider_config(pool: &PgPool, project_id: Uuid, provider: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM provider_config WHERE project_id = $1 AND provider = $2")
        .bind(project_id)
        .bind(provider)
        .execute(pool)
        .await
        .with_context(|| format!("failed to delete provider config for project {project_id}"))?;

    Ok(result.rows_affected())
}
