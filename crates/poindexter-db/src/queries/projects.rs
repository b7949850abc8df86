//! Database query functions for the `projects` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Project;

/// Insert a new project row. Returns the inserted row with server-generated
/// defaults (id, created_at).
pub async fn insert_project(
    pool: &PgPool,
    name: &str,
    repo_path: &str,
    default_branch: &str,
    provider: Option<&str>,
) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (id, name, repo_path, default_branch, provider) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(repo_path)
    .bind(default_branch)
    .bind(provider)
    .fetch_one(pool)
    .await
    .context("failed to insert project")?;

    Ok(project)
}

/// Fetch a project by its ID.
pub async fn get_project(pool: &PgPool, id: Uuid) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch project")?;

    Ok(project)
}

/// Fetch a project by its repository path (a project is uniquely identified
/// by the repo it wraps in practice, even though the column has no UNIQUE
/// constraint of its own).
pub async fn get_project_by_repo_path(pool: &PgPool, repo_path: &str) -> Result<Option<Project>> {
    let project =
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE repo_path = $1")
            .bind(repo_path)
            .fetch_optional(pool)
            .await
            .context("failed to fetch project by repo path")?;

    Ok(project)
}

/// List all projects, ordered by creation time (newest first).
pub async fn list_projects(pool: &PgPool) -> Result<Vec<Project>> {
    let projects = sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
        .context("failed to list projects")?;

    Ok(projects)
}

/// Set or clear the Sync Projector provider backing a project.
pub async fn set_project_provider(
    pool: &PgPool,
    id: Uuid,
    provider: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query("UPDATE projects SET provider = $1 WHERE id = $2")
        .bind(provider)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to set project provider")?;

    Ok(result.rows_affected())
}
