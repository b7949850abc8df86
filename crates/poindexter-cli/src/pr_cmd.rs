//! `poindexter pr <project-id>` command: open pull requests for completed
//! tasks' branches against the project's GitHub repo.

use anyhow::{bail, Context, Result};
use sqlx::PgPool;

use poindexter_core::sync::github::{GitHubConfig, GitHubProvider};
use poindexter_core::sync::SyncProvider;
use poindexter_db::models::TaskStatus;
use poindexter_db::queries::projects as project_db;
use poindexter_db::queries::provider_config as provider_config_db;
use poindexter_db::queries::tasks as task_db;

pub struct PrOptions {
    pub draft: bool,
    pub base: Option<String>,
}

/// Run the pr command.
pub async fn run_pr(pool: &PgPool, project_id_str: &str, options: &PrOptions) -> Result<()> {
    let project_id = crate::resolve::resolve_project_id(project_id_str)?;

    let project = project_db::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;

    let provider_name = project.provider.as_deref().unwrap_or("github");
    if provider_name != "github" {
        bail!("provider '{provider_name}' is not supported by `poindexter pr` yet");
    }

    let config_row = provider_config_db::get_provider_config(pool, project_id, provider_name)
        .await?
        .with_context(|| {
            format!("no '{provider_name}' provider configured for project {project_id}")
        })?;
    let github_config = GitHubConfig::from_json(&config_row.config)?;
    let provider = GitHubProvider::new(github_config);

    let base = options.base.clone().unwrap_or(project.default_branch.clone());

    let tasks = task_db::list_tasks_for_project(pool, project_id).await?;
    let mut opened = 0;

    for task in &tasks {
        if task.status != TaskStatus::Completed {
            continue;
        }
        if task.pr_number.is_some() {
            continue;
        }
        let Some(branch) = &task.branch_name else {
            continue;
        };

        let title = if options.draft {
            format!("[Draft] {}", task.title)
        } else {
            task.title.clone()
        };

        print!("  Opening PR for {branch}...");
        let remote = provider
            .create_pr(&title, &task.description, branch, &base)
            .await
            .with_context(|| format!("failed to open PR for {branch}"))?;

        let pr_number: i32 = remote
            .external_id
            .parse()
            .with_context(|| format!("unexpected PR number from provider: {}", remote.external_id))?;
        task_db::set_task_pr_number(pool, task.id, pr_number).await?;

        println!(" #{pr_number} ({})", remote.url);
        opened += 1;
    }

    println!("\n{opened} pull request(s) opened.");

    Ok(())
}
