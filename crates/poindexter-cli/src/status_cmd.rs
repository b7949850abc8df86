//! `poindexter status` command: show project progress and per-task status.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use poindexter_db::queries::projects as project_db;
use poindexter_db::queries::tasks as task_db;

/// Run the status command.
///
/// When `project_id_str` is `Some`, shows detailed status for that project.
/// When `None`, lists all projects with a progress summary.
pub async fn run_status(pool: &PgPool, project_id_str: Option<&str>) -> Result<()> {
    match project_id_str {
        Some(id_str) => run_project_status(pool, id_str).await,
        None => run_fleet_status(pool).await,
    }
}

/// Show detailed status for a single project.
async fn run_project_status(pool: &PgPool, project_id_str: &str) -> Result<()> {
    let project_id = Uuid::parse_str(project_id_str)
        .with_context(|| format!("invalid project ID: {project_id_str}"))?;

    let project = project_db::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;

    println!("Project: {} ({})", project.name, project.id);
    println!("Repo: {}", project.repo_path);
    if let Some(provider) = &project.provider {
        println!("Provider: {provider}");
    }
    println!();

    let progress = task_db::get_project_progress(pool, project_id).await?;
    println!(
        "Progress: {}/{} completed",
        progress.completed, progress.total
    );
    println!(
        "  pending={} planning={} blocked={} ready={} running={} paused={} completed={} completed_with_issues={} cancelled={} quarantined={}",
        progress.pending,
        progress.planning,
        progress.blocked,
        progress.ready,
        progress.running,
        progress.paused,
        progress.completed,
        progress.completed_with_issues,
        progress.cancelled,
        progress.quarantined,
    );
    println!();

    let tasks = task_db::list_tasks_for_project(pool, project_id).await?;
    println!("Tasks:");
    for task in &tasks {
        let status_icon = match task.status.to_string().as_str() {
            "pending" => ".",
            "planning" => "~",
            "blocked" => "#",
            "ready" => ">",
            "running" => "*",
            "paused" => "|",
            "completed" => "+",
            "completed_with_issues" => "+!",
            "cancelled" => "x",
            "quarantined" => "X",
            _ => " ",
        };
        println!(
            "  [{}] {} (attempt {}, {})",
            status_icon, task.title, task.attempt, task.status
        );
    }

    Ok(())
}

/// List all projects with a progress summary.
async fn run_fleet_status(pool: &PgPool) -> Result<()> {
    let projects = project_db::list_projects(pool).await?;

    if projects.is_empty() {
        println!("No projects found.");
        return Ok(());
    }

    println!("{:<38} {:<30} {:>10}", "ID", "NAME", "PROGRESS");
    println!("{}", "-".repeat(82));

    for project in &projects {
        let progress = task_db::get_project_progress(pool, project.id).await?;
        let progress_str = if progress.total > 0 {
            format!("{}/{}", progress.completed, progress.total)
        } else {
            "0/0".to_string()
        };
        let name_display = if project.name.len() > 28 {
            format!("{}...", &project.name[..25])
        } else {
            project.name.clone()
        };
        println!(
            "{:<38} {:<30} {:>10}",
            project.id, name_display, progress_str
        );
    }

    Ok(())
}
