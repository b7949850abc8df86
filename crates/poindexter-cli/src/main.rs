mod agent;
mod cleanup_cmd;
mod config;
mod dispatch_cmd;
mod export_cmd;
mod gate_cmd;
mod invariant_cmds;
mod log_cmd;
mod merge_cmd;
mod pr_cmd;
mod quest_cmds;
mod report_cmd;
mod resolve;
mod serve_cmd;
mod status_cmd;
mod tui;

use anyhow::Context;
use clap::{Parser, Subcommand};

use poindexter_core::token::guard;
use poindexter_db::pool;

use config::PoindexterConfig;

#[derive(Parser)]
#[command(name = "poindexter", about = "LLM coding agent fleet orchestrator")]
struct Cli {
    /// Database URL (overrides POINDEXTER_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a poindexter config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/poindexter")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the poindexter database (requires config file or env vars)
    DbInit,
    /// Quest Planner conversations
    Quest {
        #[command(subcommand)]
        command: QuestCommands,
    },
    /// Invariant management
    Invariant {
        #[command(subcommand)]
        command: InvariantCommands,
    },
    /// Dispatch a project's ready tasks for execution
    Dispatch {
        /// Project ID to dispatch
        project_id: String,
        /// Maximum number of concurrent agents
        #[arg(long, default_value_t = 4)]
        max_agents: usize,
        /// Iteration timeout per task in seconds
        #[arg(long, default_value_t = 1800)]
        timeout: u64,
        /// Isolation backend: worktree or container
        #[arg(long, default_value = "worktree")]
        isolation: String,
    },
    /// Show project status and task progress (omit project_id to list all projects)
    Status {
        /// Project ID to show status for (omit to list all projects)
        project_id: Option<String>,
    },
    /// Show agent event log for a task
    Log {
        /// Task ID to show events for
        task_id: String,
        /// Filter to a specific attempt number
        #[arg(long)]
        attempt: Option<i32>,
    },
    /// Approve a task awaiting human review
    Approve {
        /// Task ID to approve
        task_id: String,
    },
    /// Reject a task awaiting human review (sends to failed for retry/escalation)
    Reject {
        /// Task ID to reject
        task_id: String,
    },
    /// Retry a failed or escalated task
    Retry {
        /// Task ID to retry
        task_id: String,
        /// Override retry_max limit
        #[arg(long)]
        force: bool,
    },
    /// View gate results for a task
    Gate {
        /// Task ID to view gate results for
        task_id: String,
    },
    /// Show token usage and duration report for a project
    Report {
        /// Project ID to report on
        project_id: String,
    },
    /// Remove worktrees for completed tasks in a project
    Cleanup {
        /// Project ID to clean up
        project_id: String,
        /// Remove worktrees for all tasks (not just completed)
        #[arg(long)]
        all: bool,
    },
    /// Merge completed task branches into the base branch
    Merge {
        /// Project ID to merge
        project_id: String,
        /// Show what would be merged without doing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Open GitHub pull requests for completed tasks' branches
    Pr {
        /// Project ID to create PRs for
        project_id: String,
        /// Create as draft PRs
        #[arg(long)]
        draft: bool,
        /// Override the base branch
        #[arg(long)]
        base: Option<String>,
    },
    /// Export task data as CSV
    Export {
        /// Project ID to filter by (omit to export every project's tasks)
        project_id: Option<String>,
        /// Output file path (defaults to stdout)
        #[arg(long)]
        output: Option<String>,
    },
    /// Launch interactive TUI dashboard
    Dashboard,
    /// Run the HTTP Control API server
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 4780)]
        port: u16,
    },
    /// Read your assigned task (agent mode)
    Task,
    /// Run invariants for your task (agent mode)
    Check,
    /// Report progress (agent mode)
    Progress {
        /// Progress message to report
        message: String,
    },
    /// Signal task completion (agent mode)
    Done,
}

#[derive(Subcommand)]
pub enum QuestCommands {
    /// Start a planning conversation for a project
    Start {
        /// Project ID to plan within
        project_id: String,
        /// Optional human-readable title
        #[arg(long)]
        title: Option<String>,
    },
    /// Send a message to a quest's conversation
    Send {
        /// Quest ID to send to
        quest_id: String,
        /// Message text
        message: String,
    },
    /// Show quest details (or list all quests)
    Show {
        /// Quest ID to show (omit to list all)
        quest_id: Option<String>,
    },
    /// Accept an objective draft, creating its task
    Accept {
        /// Quest ID the draft belongs to
        quest_id: String,
        /// Draft ID to accept
        draft_id: String,
    },
    /// Mark a quest complete
    Complete {
        /// Quest ID to complete
        quest_id: String,
    },
}

#[derive(Subcommand)]
pub enum InvariantCommands {
    /// Add a new invariant definition
    Add {
        /// Unique invariant name (e.g. rust_build)
        name: String,
        /// Kind of invariant: test_suite, typecheck, lint, coverage, custom
        #[arg(long)]
        kind: String,
        /// Command to execute (e.g. "cargo")
        #[arg(long)]
        command: String,
        /// Comma-separated arguments (e.g. "build,--workspace")
        #[arg(long)]
        args: Option<String>,
        /// Human-readable description
        #[arg(long)]
        description: Option<String>,
        /// Expected exit code (default: 0)
        #[arg(long, default_value_t = 0)]
        expected_exit_code: i32,
        /// Numeric threshold (e.g. coverage percentage)
        #[arg(long)]
        threshold: Option<f32>,
        /// Scope: global or project (default: project)
        #[arg(long, default_value = "project")]
        scope: String,
    },
    /// List all invariants
    List {
        /// Show full details for each invariant
        #[arg(long)]
        verbose: bool,
    },
    /// Test-run an invariant in the current directory
    Test {
        /// Invariant name to test
        name: String,
    },
}

/// Execute the `poindexter init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let token_secret = config::generate_token_secret();

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        auth: config::AuthSection {
            token_secret: token_secret.clone(),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  auth.token_secret = {}...{}", &token_secret[..8], &token_secret[56..]);
    println!();
    println!("Next: run `poindexter db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `poindexter db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = PoindexterConfig::resolve(cli_db_url)?;

    println!("Initializing poindexter database...");

    // 1. Create the database if it does not exist.
    pool::ensure_database_exists(&resolved.db_config).await?;

    // 2. Connect to the target database.
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    // 3. Run migrations.
    pool::run_migrations(&db_pool).await?;

    // 4. Print success with table counts.
    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    // 5. Clean shutdown.
    db_pool.close().await;

    println!("poindexter db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // -----------------------------------------------------------------
    // Agent-mode detection: if POINDEXTER_AGENT_TOKEN is set, restrict the
    // command surface to the four agent-mode commands.
    // -----------------------------------------------------------------
    if guard::is_agent_mode() {
        // Resolve config for DB URL (best-effort).
        let db_config = PoindexterConfig::resolve(cli.database_url.as_deref())
            .map(|c| c.db_config)
            .unwrap_or_else(|_| poindexter_db::config::DbConfig::from_env());

        let pool_result = pool::create_pool(&db_config).await;
        let pool = pool_result.ok();

        let result = agent::run_agent_mode(cli.command, pool.as_ref()).await;

        // Clean shutdown if we have a pool.
        if let Some(p) = pool {
            p.close().await;
        }

        if let Err(e) = result {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
        return Ok(());
    }

    // -----------------------------------------------------------------
    // Operator mode (default): full command surface.
    // -----------------------------------------------------------------
    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Quest { command } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = quest_cmds::run_quest_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Invariant { command } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = invariant_cmds::run_invariant_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Dispatch {
            project_id,
            max_agents,
            timeout,
            isolation,
        } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = dispatch_cmd::run_dispatch(
                &db_pool,
                &project_id,
                max_agents,
                timeout,
                &isolation,
                &resolved.token_config,
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { project_id } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, project_id.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Log { task_id, attempt } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = log_cmd::run_log(&db_pool, &task_id, attempt).await;
            db_pool.close().await;
            result?;
        }
        Commands::Approve { task_id } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = uuid::Uuid::parse_str(&task_id)
                .with_context(|| format!("invalid task ID: {task_id}"))?;
            let result = resolve_pending_approval(&db_pool, id, true).await;
            db_pool.close().await;
            result?;
            println!("Task {task_id} approved.");
        }
        Commands::Reject { task_id } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = uuid::Uuid::parse_str(&task_id)
                .with_context(|| format!("invalid task ID: {task_id}"))?;
            let result = resolve_pending_approval(&db_pool, id, false).await;
            db_pool.close().await;
            result?;
            println!("Task {task_id} rejected.");
        }
        Commands::Retry { task_id, force } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = uuid::Uuid::parse_str(&task_id)
                .with_context(|| format!("invalid task ID: {task_id}"))?;
            let result = retry_task(&db_pool, id, force).await;
            db_pool.close().await;
            result?;
            println!("Task {task_id} reset to pending for retry.");
        }
        Commands::Gate { task_id } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = gate_cmd::run_gate(&db_pool, &task_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Report { project_id } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = report_cmd::run_report(&db_pool, &project_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Cleanup { project_id, all } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = cleanup_cmd::run_cleanup(&db_pool, &project_id, all).await;
            db_pool.close().await;
            result?;
        }
        Commands::Merge { project_id, dry_run } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = merge_cmd::run_merge(&db_pool, &project_id, dry_run).await;
            db_pool.close().await;
            result?;
        }
        Commands::Pr {
            project_id,
            draft,
            base,
        } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let options = pr_cmd::PrOptions { draft, base };
            let result = pr_cmd::run_pr(&db_pool, &project_id, &options).await;
            db_pool.close().await;
            result?;
        }
        Commands::Export { project_id, output } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result =
                export_cmd::run_export_csv(&db_pool, project_id.as_deref(), output.as_deref())
                    .await;
            db_pool.close().await;
            result?;
        }
        Commands::Dashboard => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = tui::run_dashboard(db_pool.clone()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let resolved = PoindexterConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = serve_cmd::run_serve(db_pool.clone(), &bind, port).await;
            db_pool.close().await;
            result?;
        }
        Commands::Task => {
            println!("poindexter task: not available in operator mode (set POINDEXTER_AGENT_TOKEN)");
        }
        Commands::Check => {
            println!("poindexter check: not available in operator mode (set POINDEXTER_AGENT_TOKEN)");
        }
        Commands::Progress { message } => {
            println!("poindexter progress: not available in operator mode (set POINDEXTER_AGENT_TOKEN)");
            let _ = message;
        }
        Commands::Done => {
            println!("poindexter done: not available in operator mode (set POINDEXTER_AGENT_TOKEN)");
        }
    }

    Ok(())
}

/// Resolve the most recent pending approval on `task_id` as approved or
/// rejected. Operator commands address approvals by their task, not the
/// approval's own id, so this looks the pending row up first.
async fn resolve_pending_approval(
    pool: &sqlx::PgPool,
    task_id: uuid::Uuid,
    approved: bool,
) -> anyhow::Result<()> {
    use poindexter_db::models::ApprovalStatus;
    use poindexter_db::queries::approvals as approval_db;

    let pending = approval_db::list_approvals_for_task(pool, task_id)
        .await?
        .into_iter()
        .find(|a| a.status == ApprovalStatus::Pending)
        .with_context(|| format!("task {task_id} has no pending approval"))?;

    poindexter_core::approval::resolve(pool, pending.id, approved).await?;
    Ok(())
}

/// Retry a task per the operator `retry` command. A quarantined task is
/// reopened (bumping its attempt count); a running task is demoted back to
/// `ready` -- with its retry budget charged unless `force` asks to retry
/// without consuming it, mirroring an infra-fault retry.
async fn retry_task(pool: &sqlx::PgPool, task_id: uuid::Uuid, force: bool) -> anyhow::Result<()> {
    use poindexter_db::models::TaskStatus;
    use poindexter_core::state::TaskStateMachine;

    let machine = TaskStateMachine::new(pool.clone());
    let task = machine.get(task_id).await?;

    match task.status {
        TaskStatus::Quarantined => machine.reopen_quarantined(task_id, task.attempt).await,
        _ if force => machine.retry_after_infra_fault(task_id).await,
        _ => machine.retry_in_place(task_id, task.attempt).await,
    }
}
