//! `poindexter report` command: show token usage and duration report for a project.

use anyhow::{Context, Result};
use sqlx::PgPool;

use poindexter_db::queries::projects as project_db;
use poindexter_db::queries::tasks as task_db;

/// Run the report command.
pub async fn run_report(pool: &PgPool, project_id_str: &str) -> Result<()> {
    let project_id = crate::resolve::resolve_project_id(project_id_str)?;

    let project = project_db::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;

    println!("Project: {} ({})", project.name, project.id);
    println!();

    let tasks = task_db::list_tasks_for_project(pool, project_id).await?;

    let total_tokens: i64 = tasks.iter().map(|t| t.tokens_used).sum();
    let total_wall_seconds: i64 = tasks.iter().map(|t| t.wall_seconds_used).sum();
    let total_cents: i64 = tasks.iter().map(|t| t.dollar_cents_used).sum();

    println!("Token usage:");
    println!("  Total tokens: {total_tokens}");
    println!("  Total wall time: {}s", total_wall_seconds);
    println!("  Total cost: ${:.2}", total_cents as f64 / 100.0);
    println!();

    let mut completed_count: usize = 0;
    let total_count = tasks.len();

    println!(
        "{:<30} {:<22} {:>8} {:>12} {:>12}",
        "TASK", "STATUS", "ATTEMPT", "TOKENS", "WALL TIME"
    );
    println!("{}", "-".repeat(88));

    for task in &tasks {
        if matches!(
            task.status,
            poindexter_db::models::TaskStatus::Completed
        ) {
            completed_count += 1;
        }

        let token_str = if task.tokens_used > 0 {
            format!("{}", task.tokens_used)
        } else {
            "-".to_string()
        };

        let wall_str = if task.wall_seconds_used > 0 {
            format!("{}s", task.wall_seconds_used)
        } else {
            "-".to_string()
        };

        let title_display = if task.title.len() > 28 {
            format!("{}...", &task.title[..25])
        } else {
            task.title.clone()
        };

        println!(
            "{:<30} {:<22} {:>8} {:>12} {:>12}",
            title_display, task.status, task.attempt, token_str, wall_str
        );
    }

    println!();
    println!(
        "Success rate: {}/{} ({:.0}%)",
        completed_count,
        total_count,
        if total_count > 0 {
            (completed_count as f64 / total_count as f64) * 100.0
        } else {
            0.0
        }
    );

    Ok(())
}
