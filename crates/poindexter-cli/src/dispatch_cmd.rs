//! `poindexter dispatch` command: run a project to completion using the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use poindexter_core::eventbus::EventBus;
use poindexter_core::harness::{ClaudeCodeAdapter, HarnessRegistry};
use poindexter_core::isolation;
use poindexter_core::orchestrator::{run_scheduler, SchedulerConfig, SchedulerOutcome};
use poindexter_core::token::TokenConfig;
use poindexter_db::queries::projects as project_db;

/// Run the dispatch command.
pub async fn run_dispatch(
    pool: &PgPool,
    project_id_str: &str,
    max_agents: usize,
    timeout_secs: u64,
    isolation_mode: &str,
    token_config: &TokenConfig,
) -> Result<()> {
    let project_id = Uuid::parse_str(project_id_str)
        .with_context(|| format!("invalid project ID: {project_id_str}"))?;

    let project = project_db::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;

    println!("Dispatching project: {} ({})", project.name, project.id);
    println!("  Max agents: {max_agents}");
    println!("  Iteration timeout: {timeout_secs}s");

    let mut registry = HarnessRegistry::new();
    registry.register(ClaudeCodeAdapter::new());
    let registry = Arc::new(registry);

    let isolation =
        isolation::create_isolation(isolation_mode, std::path::Path::new(&project.repo_path))?;

    let mut config = SchedulerConfig::new("claude-code");
    config.concurrency = max_agents;
    config.iteration_timeout = Duration::from_secs(timeout_secs);

    let events = EventBus::new();

    // Graceful shutdown: first signal cancels, second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    let outcome = run_scheduler(
        pool,
        &project,
        &registry,
        &isolation,
        token_config,
        &config,
        &events,
        cancel,
    )
    .await?;

    match outcome {
        SchedulerOutcome::Completed => {
            println!("\nProject completed: all tasks reached a terminal state.");
        }
        SchedulerOutcome::Interrupted => {
            println!("\nDispatch interrupted by signal. In-flight tasks drained.");
            println!("Re-run `poindexter dispatch {project_id}` to resume.");
            std::process::exit(130);
        }
    }

    Ok(())
}
