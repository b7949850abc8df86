//! Agent-mode CLI command implementations.
//!
//! When `POINDEXTER_AGENT_TOKEN` is set in the environment, the CLI restricts
//! its command surface to the four agent-mode commands: `task`, `check`,
//! `progress`, and `done`. This module contains the dispatch logic and
//! each command's implementation.
//!
//! All commands validate the scoped token before doing any work. The token
//! encodes a (task_id, attempt) pair that scopes the agent to exactly one
//! task.

use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use poindexter_core::token::guard::{self, GuardError};
use poindexter_core::token::{TokenClaims, TokenConfig};
use poindexter_db::models::Invariant;
use sqlx::PgPool;

use crate::Commands;

// -----------------------------------------------------------------------
// Public entry point
// -----------------------------------------------------------------------

/// Run the CLI in agent mode.
///
/// This is called when `POINDEXTER_AGENT_TOKEN` is detected in the environment.
/// It validates the token, restricts the command surface, and dispatches to
/// the appropriate agent-mode handler.
///
/// # Errors
///
/// Returns an error (and the process should exit non-zero) when:
/// - The token is missing or invalid
/// - An operator-only command was attempted
/// - A DB query fails
/// - An invariant check fails (for `poindexter check`)
pub async fn run_agent_mode(
    command: Commands,
    pool: Option<&PgPool>,
) -> Result<()> {
    // Validate the token first.
    let token_config = TokenConfig::from_env()
        .context("POINDEXTER_TOKEN_SECRET must be set for agent mode")?;
    let claims = guard::require_agent_mode(&token_config)
        .map_err(|e| match e {
            GuardError::InvalidToken(inner) => {
                anyhow::anyhow!("invalid agent token: {inner}")
            }
            other => anyhow::anyhow!("{other}"),
        })?;

    match command {
        Commands::Task => cmd_task(&claims, pool).await,
        Commands::Check => cmd_check(&claims, pool).await,
        Commands::Progress { message } => cmd_progress(&claims, pool, &message).await,
        Commands::Done => cmd_done(&claims, pool).await,
        // Any operator command is blocked in agent mode.
        _ => {
            bail!("Error: this command is not available in agent mode");
        }
    }
}

// -----------------------------------------------------------------------
// poindexter task
// -----------------------------------------------------------------------

/// `poindexter task` -- read the assigned task description.
///
/// Validates the token, looks up the task in the DB, and prints a clean
/// markdown description that the LLM agent can consume.
async fn cmd_task(claims: &TokenClaims, pool: Option<&PgPool>) -> Result<()> {
    let pool = require_db(pool)?;

    let task = poindexter_db::queries::tasks::get_task(pool, claims.task_id)
        .await
        .context("failed to query task")?
        .with_context(|| format!("task {} not found", claims.task_id))?;

    let invariants =
        poindexter_db::queries::invariants::get_invariants_for_task(pool, claims.task_id)
            .await
            .context("failed to query invariants for task")?;

    // Print as clean markdown.
    println!("# Task: {}", task.title);
    println!();
    println!("{}", task.description);
    println!();
    println!("## Details");
    println!();
    println!("- **Type**: {}", task.task_type);
    println!("- **Autonomy**: {}", task.autonomy);
    println!("- **Attempt**: {}/{}", claims.attempt, task.retry_max);
    println!("- **Status**: {}", task.status);
    println!();

    if !invariants.is_empty() {
        println!("## Invariant commands");
        println!();
        println!("Run `poindexter check` to execute all invariants, or run individually:");
        println!();
        for inv in &invariants {
            let args_str = if inv.args.is_empty() {
                String::new()
            } else {
                format!(" {}", inv.args.join(" "))
            };
            println!("- **{}**: `{}{}`", inv.name, inv.command, args_str);
        }
        println!();
    } else {
        println!("_No invariants linked to this task._");
        println!();
    }

    Ok(())
}

// -----------------------------------------------------------------------
// poindexter check
// -----------------------------------------------------------------------

/// Result of running a single invariant check.
struct InvariantCheckResult {
    name: String,
    passed: bool,
    exit_code: i32,
    stdout_snippet: String,
    stderr_snippet: String,
    duration_ms: u64,
}

/// `poindexter check` -- run all invariants linked to this task.
///
/// Looks up linked invariants, executes each in the current working
/// directory, prints results, and exits 0 only if ALL pass.
async fn cmd_check(claims: &TokenClaims, pool: Option<&PgPool>) -> Result<()> {
    let pool = require_db(pool)?;

    let invariants =
        poindexter_db::queries::invariants::get_invariants_for_task(pool, claims.task_id)
            .await
            .context("failed to query invariants for task")?;

    if invariants.is_empty() {
        println!("No invariants linked to this task. Nothing to check.");
        return Ok(());
    }

    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let mut results = Vec::with_capacity(invariants.len());
    let mut all_passed = true;

    for inv in &invariants {
        let result = run_invariant_check(inv, &cwd)?;
        if !result.passed {
            all_passed = false;
        }
        results.push(result);
    }

    // Print results.
    println!("## Invariant check results");
    println!();

    for result in &results {
        let status_label = if result.passed { "PASS" } else { "FAIL" };
        println!(
            "- [{}] **{}** (exit {}, {}ms)",
            status_label, result.name, result.exit_code, result.duration_ms
        );
        if !result.passed {
            if !result.stderr_snippet.is_empty() {
                println!("  stderr: {}", result.stderr_snippet);
            }
            if !result.stdout_snippet.is_empty() {
                println!("  stdout: {}", result.stdout_snippet);
            }
        }
    }
    println!();

    // Record results as agent events (progress).
    let check_payload = serde_json::json!({
        "type": "invariant_check",
        "all_passed": all_passed,
        "results": results.iter().map(|r| {
            serde_json::json!({
                "name": r.name,
                "passed": r.passed,
                "exit_code": r.exit_code,
                "duration_ms": r.duration_ms,
            })
        }).collect::<Vec<_>>(),
    });

    // Best-effort: record the check event. If the DB insert fails we still
    // report the invariant results.
    let _ = sqlx::query(
        "INSERT INTO agent_events (task_id, attempt, event_type, payload) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(claims.task_id)
    .bind(claims.attempt as i32)
    .bind("invariant_check")
    .bind(&check_payload)
    .execute(pool)
    .await;

    if all_passed {
        println!("All invariants passed.");
        Ok(())
    } else {
        bail!("One or more invariants failed.");
    }
}

/// Execute a single invariant in the given working directory.
fn run_invariant_check(
    inv: &Invariant,
    cwd: &std::path::Path,
) -> Result<InvariantCheckResult> {
    let start = Instant::now();

    let output = std::process::Command::new(&inv.command)
        .args(&inv.args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("failed to execute invariant '{}': {}", inv.name, inv.command))?;

    let duration_ms = start.elapsed().as_millis() as u64;
    let exit_code = output.status.code().unwrap_or(-1);
    let passed = exit_code == inv.expected_exit_code;

    let stdout_full = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr_full = String::from_utf8_lossy(&output.stderr).to_string();

    // Truncate to a reasonable snippet length.
    let snippet_max = 500;
    let stdout_snippet = truncate_string(&stdout_full, snippet_max);
    let stderr_snippet = truncate_string(&stderr_full, snippet_max);

    Ok(InvariantCheckResult {
        name: inv.name.clone(),
        passed,
        exit_code,
        stdout_snippet,
        stderr_snippet,
        duration_ms,
    })
}

/// Truncate a string to at most `max_len` characters, appending "..." if
/// truncated.
fn truncate_string(s: &str, max_len: usize) -> String {
    let trimmed = s.trim();
    if trimmed.len() <= max_len {
        trimmed.to_string()
    } else {
        format!("{}...", &trimmed[..max_len])
    }
}

// -----------------------------------------------------------------------
// poindexter progress
// -----------------------------------------------------------------------

/// `poindexter progress "message"` -- record a progress event.
async fn cmd_progress(
    claims: &TokenClaims,
    pool: Option<&PgPool>,
    message: &str,
) -> Result<()> {
    let pool = require_db(pool)?;

    let payload = serde_json::json!({
        "message": message,
    });

    sqlx::query(
        "INSERT INTO agent_events (task_id, attempt, event_type, payload) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(claims.task_id)
    .bind(claims.attempt as i32)
    .bind("progress")
    .bind(&payload)
    .execute(pool)
    .await
    .context("failed to record progress event")?;

    println!("Progress recorded for task {}.", claims.task_id);
    Ok(())
}

// -----------------------------------------------------------------------
// poindexter done
// -----------------------------------------------------------------------

/// `poindexter done` -- signal task completion.
///
/// Records a done_signal event but does NOT change the task status.
/// That is poindexter's (the orchestrator's) job.
async fn cmd_done(claims: &TokenClaims, pool: Option<&PgPool>) -> Result<()> {
    let pool = require_db(pool)?;

    let payload = serde_json::json!({
        "task_id": claims.task_id.to_string(),
        "attempt": claims.attempt,
    });

    sqlx::query(
        "INSERT INTO agent_events (task_id, attempt, event_type, payload) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(claims.task_id)
    .bind(claims.attempt as i32)
    .bind("done_signal")
    .bind(&payload)
    .execute(pool)
    .await
    .context("failed to record done signal")?;

    println!("Completion signaled. Poindexter will now run gate checks.");
    Ok(())
}

// -----------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------

/// Require that a database pool is available.
fn require_db(pool: Option<&PgPool>) -> Result<&PgPool> {
    pool.ok_or_else(|| {
        anyhow::anyhow!(
            "database connection required but not available; \
             set POINDEXTER_DATABASE_URL or run `poindexter init` first"
        )
    })
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
