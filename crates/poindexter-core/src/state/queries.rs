//! Query helpers for project/task progress tracking.
//!
//! These re-export and wrap the lower-level DB queries from
//! [`poindexter_db::queries::tasks`] for use in the scheduler.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use poindexter_db::models::Task;
pub use poindexter_db::queries::tasks::ProjectProgress;

/// Get all tasks in a project that are ready to be promoted to `ready`.
///
/// A task is promotable when:
/// - Its own status is `pending`.
/// - All of its dependencies have reached `completed` or
///   `completed_with_issues`.
pub async fn get_ready_tasks(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    poindexter_db::queries::tasks::get_pending_tasks_with_satisfied_deps(pool, project_id).await
}

/// Get a progress summary (counts by status) for a project.
pub async fn get_project_progress(pool: &PgPool, project_id: Uuid) -> Result<ProjectProgress> {
    poindexter_db::queries::tasks::get_project_progress(pool, project_id).await
}

/// Check whether every task in a project has reached a terminal, successful
/// status.
pub async fn is_project_complete(pool: &PgPool, project_id: Uuid) -> Result<bool> {
    poindexter_db::queries::tasks::is_project_complete(pool, project_id).await
}
