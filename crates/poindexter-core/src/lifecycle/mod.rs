//! The Ralph Loop (C5): drives one task from admission through a terminal
//! outcome, one hat session at a time.
//!
//! Named after the "disk is state, fresh context each iteration" loop
//! idiom: nothing the loop needs to resume survives only in process memory
//! -- hat, iteration counter, usage tallies and the agent's own resume
//! handle are all persisted to `sessions`/`checkpoints` after every
//! iteration, so a crashed scheduler can recover a task by replaying the
//! database rather than losing its place.

pub mod hats;
pub mod signal;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use poindexter_db::models::{ApprovalKind, Hat, Task};
use poindexter_db::queries::agent_events::{self, NewAgentEvent};
use poindexter_db::queries::checkpoints::{self, NewCheckpoint};
use poindexter_db::queries::invariants as inv_db;
use poindexter_db::queries::sessions;
use poindexter_db::queries::tasks as task_db;
use sqlx::PgPool;

use crate::approval::{self, GateOutcome};
use crate::eventbus::EventBus;
use crate::gate::evaluator::{evaluate_verdict, GateAction};
use crate::gate::GateRunner;
use crate::harness::types::{AgentEvent, AgentHandle, MaterializedTask, ResumeOutcome};
use crate::harness::Harness;
use crate::isolation::Isolation;
use crate::state::dispatch;
use crate::token::{self, TokenConfig};

use hats::{is_legal_transition, legal_next_hats, prompt_template};
use signal::{parse_terminal_signal, TerminalSignal};

/// Every C iterations, a checkpoint is written even if no terminal signal
/// fired (§4.2).
const CHECKPOINT_INTERVAL: i32 = 5;

/// Per-session iteration cap before the loop pauses for an
/// iteration-limit approval (§4.2).
const MAX_ITERATIONS: i32 = 50;

/// Outcome of running a task's full Ralph loop to whatever point it
/// stopped at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The task reached `completed`.
    Completed,
    /// The task reached `completed_with_issues` (gate-check retries
    /// exhausted, or the agent's own `TASK_COMPLETE` was demoted by a
    /// failing verification run).
    CompletedWithIssues,
    /// The task is `paused`, awaiting one of: a hat-transition approval, a
    /// question, a budget-extension request, or an iteration-limit
    /// decision. The caller does not need to do anything further; resuming
    /// re-enters this same function.
    Paused { approval_kind: ApprovalKind },
    /// The task was quarantined after an `ERROR` signal.
    Quarantined,
    /// A cancellation was observed between iterations.
    Cancelled,
}

/// Configuration for a single Ralph loop invocation.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Maximum wall time for a single agent call within one iteration.
    pub iteration_timeout: Duration,
}

/// Run the Ralph loop for `task`, starting a fresh hat session.
///
/// The caller is expected to have already admitted the task (`running`);
/// this function only drives the hat/iteration machinery and the final
/// status transition -- it never moves a task out of `ready` itself.
pub async fn run_agent_lifecycle(
    pool: &PgPool,
    task: &Task,
    project_name: &str,
    harness: &dyn Harness,
    isolation: &dyn Isolation,
    token_config: &TokenConfig,
    config: &LifecycleConfig,
    events: &EventBus,
    cancel: &CancellationToken,
) -> Result<LifecycleOutcome> {
    let task_id = task.id;

    let starting_hat = task.current_hat.unwrap_or(Hat::Implementer);

    tracing::info!(task_id = %task_id, hat = %starting_hat, "starting ralph loop");

    // Workspace is created once per task attempt and reused across hat
    // transitions within that attempt (§4.2: "a transition preserves the
    // worktree").
    let workspace = isolation
        .create_workspace(project_name, &task.title)
        .await
        .with_context(|| format!("failed to create workspace for task {}", task.title))?;

    let host_worktree_path = workspace
        .host_path
        .clone()
        .unwrap_or_else(|| workspace.path.clone());

    task_db::assign_task_worktree(
        pool,
        task_id,
        &host_worktree_path.to_string_lossy(),
        workspace.branch.as_deref().unwrap_or_default(),
    )
    .await
    .with_context(|| format!("failed to record worktree for task {}", task.title))?;

    let mut hat = starting_hat;

    loop {
        events.publish(
            "session.started",
            Some(task_id),
            serde_json::json!({"hat": hat.to_string()}),
        );

        let outcome = run_hat_session(
            pool,
            task_id,
            hat,
            &workspace.path,
            harness,
            token_config,
            config,
            events,
            cancel,
        )
        .await?;

        match outcome {
            HatSessionOutcome::NextHat(next_hat) => {
                let gate_outcome = approval::gate(
                    pool,
                    task_id,
                    ApprovalKind::HatTransition,
                    &format!("{hat} -> {next_hat}"),
                    serde_json::json!({"from": hat.to_string(), "to": next_hat.to_string()}),
                    None,
                )
                .await?;

                match gate_outcome {
                    GateOutcome::Proceed => {
                        task_db::set_current_hat(pool, task_id, next_hat).await?;
                        hat = next_hat;
                        continue;
                    }
                    GateOutcome::Paused { .. } => {
                        task_db::set_current_hat(pool, task_id, next_hat).await?;
                        return Ok(LifecycleOutcome::Paused {
                            approval_kind: ApprovalKind::HatTransition,
                        });
                    }
                }
            }
            HatSessionOutcome::TaskComplete => {
                return finish_with_verification(pool, task_id).await;
            }
            HatSessionOutcome::Question(question) => {
                let gate_outcome = approval::gate(
                    pool,
                    task_id,
                    ApprovalKind::Question,
                    &question,
                    serde_json::json!({"question": question}),
                    None,
                )
                .await?;
                debug_assert!(matches!(gate_outcome, GateOutcome::Paused { .. }));
                return Ok(LifecycleOutcome::Paused {
                    approval_kind: ApprovalKind::Question,
                });
            }
            HatSessionOutcome::Error(message) => {
                tracing::warn!(task_id = %task_id, error = %message, "agent reported unrecoverable error");
                dispatch::quarantine_task(pool, task_id).await?;
                return Ok(LifecycleOutcome::Quarantined);
            }
            HatSessionOutcome::IterationLimitReached => {
                let gate_outcome = approval::gate(
                    pool,
                    task_id,
                    ApprovalKind::IterationLimit,
                    &format!("{hat} reached {MAX_ITERATIONS} iterations"),
                    serde_json::json!({"hat": hat.to_string(), "iterations": MAX_ITERATIONS}),
                    None,
                )
                .await?;
                debug_assert!(matches!(gate_outcome, GateOutcome::Paused { .. }));
                return Ok(LifecycleOutcome::Paused {
                    approval_kind: ApprovalKind::IterationLimit,
                });
            }
            HatSessionOutcome::BudgetExceeded => {
                let gate_outcome = approval::gate(
                    pool,
                    task_id,
                    ApprovalKind::BudgetExtension,
                    &format!("{} exhausted its configured budget", task.title),
                    serde_json::json!({"hat": hat.to_string()}),
                    None,
                )
                .await?;
                debug_assert!(matches!(gate_outcome, GateOutcome::Paused { .. }));
                return Ok(LifecycleOutcome::Paused {
                    approval_kind: ApprovalKind::BudgetExtension,
                });
            }
            HatSessionOutcome::Cancelled => {
                dispatch::cancel_task(
                    pool,
                    &task_db::get_task(pool, task_id)
                        .await?
                        .with_context(|| format!("task {task_id} not found"))?,
                )
                .await?;
                return Ok(LifecycleOutcome::Cancelled);
            }
        }
    }
}

/// Run `TASK_COMPLETE`'s completion verification (§4.2): the same
/// subprocess-with-timeout gate runner used for every invariant check,
/// generalized here to decide whether the agent's own completion promise
/// holds before the status transition is made.
async fn finish_with_verification(pool: &PgPool, task_id: Uuid) -> Result<LifecycleOutcome> {
    let gate_runner = GateRunner::new(pool);
    let verdict = gate_runner
        .run_gate(task_id)
        .await
        .with_context(|| format!("gate check failed for task {task_id}"))?;

    let action = evaluate_verdict(pool, task_id, &verdict)
        .await
        .with_context(|| format!("failed to evaluate verdict for task {task_id}"))?;

    match action {
        GateAction::Completed => Ok(LifecycleOutcome::Completed),
        GateAction::CompletedWithIssues => Ok(LifecycleOutcome::CompletedWithIssues),
        GateAction::RetriedInPlace { .. } => {
            // Back to `ready`; the scheduler will re-admit it and this
            // function will be called again from a fresh `run_agent_lifecycle`.
            Ok(LifecycleOutcome::Paused {
                approval_kind: ApprovalKind::BudgetExtension,
            })
        }
    }
}

/// What a single hat session (one `sessions` row) ended with.
enum HatSessionOutcome {
    NextHat(Hat),
    TaskComplete,
    Question(String),
    Error(String),
    IterationLimitReached,
    BudgetExceeded,
    Cancelled,
}

/// Drive one hat's iteration loop: spawn (or resume) the agent, collect its
/// response, and react to whatever terminal signal (if any) it emits.
#[allow(clippy::too_many_arguments)]
async fn run_hat_session(
    pool: &PgPool,
    task_id: Uuid,
    hat: Hat,
    agent_working_dir: &Path,
    harness: &dyn Harness,
    token_config: &TokenConfig,
    config: &LifecycleConfig,
    events: &EventBus,
    cancel: &CancellationToken,
) -> Result<HatSessionOutcome> {
    let session = sessions::insert_session(pool, task_id, hat).await?;

    let mut iteration: i32 = 0;
    let mut session_handle: Option<String> = None;
    let mut follow_up: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            end_session(pool, session.id, "cancelled").await?;
            return Ok(HatSessionOutcome::Cancelled);
        }

        let task = task_db::get_task(pool, task_id)
            .await?
            .with_context(|| format!("task {task_id} not found"))?;

        if task.budget_exceeded() {
            end_session(pool, session.id, "budget_exceeded").await?;
            return Ok(HatSessionOutcome::BudgetExceeded);
        }

        if iteration >= MAX_ITERATIONS {
            end_session(pool, session.id, "iteration_limit").await?;
            return Ok(HatSessionOutcome::IterationLimitReached);
        }

        let prompt = compose_prompt(hat, &task, follow_up.as_deref());
        let agent_token = token::generate_token(token_config, task_id, task.attempt);

        let materialized = build_materialized_task(
            pool,
            task_id,
            &task.title,
            &prompt,
            agent_working_dir,
            &agent_token,
            token_config,
        )
        .await?;

        let handle = spawn_or_resume(harness, &materialized, session_handle.as_deref()).await?;

        let (response_text, usage) = collect_iteration(
            pool,
            task_id,
            task.attempt,
            Some(session.id),
            harness,
            &handle,
            config.iteration_timeout,
            events,
        )
        .await?;

        if let Some(new_handle) = handle.session_handle.clone() {
            session_handle = Some(new_handle);
        }

        task_db::accrue_task_usage(
            pool,
            task_id,
            usage.input_tokens as i64 + usage.output_tokens as i64,
            0,
            usage.dollar_cents,
        )
        .await?;

        iteration += 1;
        sessions::advance_session_iteration(pool, session.id, session_handle.as_deref(), iteration)
            .await?;

        if iteration % CHECKPOINT_INTERVAL == 0 {
            let refreshed = task_db::get_task(pool, task_id)
                .await?
                .with_context(|| format!("task {task_id} not found"))?;
            checkpoints::insert_checkpoint(
                pool,
                &NewCheckpoint {
                    session_id: session.id,
                    iteration,
                    agent_session_handle: session_handle.as_deref(),
                    completion_promise: &response_text,
                    tokens_used: refreshed.tokens_used,
                    wall_seconds_used: refreshed.wall_seconds_used,
                    dollar_cents_used: refreshed.dollar_cents_used,
                },
            )
            .await
            .with_context(|| format!("failed to checkpoint session {}", session.id))?;
        }

        match parse_terminal_signal(&response_text) {
            Some(TerminalSignal::TaskComplete) => {
                end_session(pool, session.id, "completed").await?;
                return Ok(HatSessionOutcome::TaskComplete);
            }
            Some(TerminalSignal::HatComplete(next_hat)) => {
                if !is_legal_transition(hat, next_hat) {
                    tracing::warn!(
                        task_id = %task_id,
                        from = %hat,
                        to = %next_hat,
                        legal = ?legal_next_hats(hat),
                        "agent requested an illegal hat transition; ignoring and continuing"
                    );
                    follow_up = Some(format!(
                        "{next_hat} is not a legal transition from {hat}. Legal transitions are: {:?}. Continue the current hat's work.",
                        legal_next_hats(hat)
                    ));
                    continue;
                }
                end_session(pool, session.id, "hat_complete").await?;
                return Ok(HatSessionOutcome::NextHat(next_hat));
            }
            Some(TerminalSignal::Question(question)) => {
                end_session(pool, session.id, "question").await?;
                return Ok(HatSessionOutcome::Question(question));
            }
            Some(TerminalSignal::Error(message)) => {
                end_session(pool, session.id, "error").await?;
                return Ok(HatSessionOutcome::Error(message));
            }
            None => {
                follow_up = None;
                continue;
            }
        }
    }
}

async fn end_session(pool: &PgPool, session_id: Uuid, outcome: &str) -> Result<()> {
    let session = sessions::get_session(pool, session_id)
        .await?
        .with_context(|| format!("session {session_id} not found"))?;
    sessions::end_session(
        pool,
        session_id,
        session.tokens_used,
        session.wall_seconds_used,
        session.dollar_cents_used,
        outcome,
    )
    .await?;
    Ok(())
}

/// Compose the prompt for one iteration: the hat's role template plus the
/// rendered task context, plus any corrective follow-up from the previous
/// iteration (e.g. an illegal hat-transition rejection).
fn compose_prompt(hat: Hat, task: &Task, follow_up: Option<&str>) -> String {
    let mut prompt = String::new();
    prompt.push_str(prompt_template(hat));
    prompt.push_str("\n\n# Task\n\n");
    prompt.push_str(&format!("**Title:** {}\n\n", task.title));
    prompt.push_str(&format!("**Description:**\n\n{}\n\n", task.description));
    prompt.push_str(&format!("**Attempt:** {}\n", task.attempt));
    if let Some(follow_up) = follow_up {
        prompt.push_str("\n# Follow-up\n\n");
        prompt.push_str(follow_up);
        prompt.push('\n');
    }
    prompt
}

async fn build_materialized_task(
    pool: &PgPool,
    task_id: Uuid,
    title: &str,
    prompt: &str,
    working_dir: &Path,
    agent_token: &str,
    token_config: &TokenConfig,
) -> Result<MaterializedTask> {
    let invariants = inv_db::get_invariants_for_task(pool, task_id).await?;
    let invariant_commands: Vec<String> = invariants
        .iter()
        .map(|inv| {
            if inv.args.is_empty() {
                inv.command.clone()
            } else {
                format!("{} {}", inv.command, inv.args.join(" "))
            }
        })
        .collect();

    let mut env_vars = HashMap::new();
    env_vars.insert("POINDEXTER_AGENT_TOKEN".to_string(), agent_token.to_string());
    if let Ok(db_url) = std::env::var("POINDEXTER_DATABASE_URL") {
        env_vars.insert("POINDEXTER_DATABASE_URL".to_string(), db_url);
    }
    env_vars.insert(
        "POINDEXTER_TOKEN_SECRET".to_string(),
        hex::encode(&token_config.secret),
    );

    Ok(MaterializedTask {
        task_id,
        name: title.to_string(),
        description: prompt.to_string(),
        invariant_commands,
        working_dir: working_dir.to_path_buf(),
        env_vars,
    })
}

/// Start a new process on the first iteration, or resume the prior
/// conversation via the adapter's own resume mechanism. Falls back to a
/// fresh spawn (continuing the same logical task from its last checkpoint,
/// per §4.2) if the adapter reports it can't resume.
async fn spawn_or_resume(
    harness: &dyn Harness,
    materialized: &MaterializedTask,
    session_handle: Option<&str>,
) -> Result<AgentHandle> {
    match session_handle {
        None => harness.spawn(materialized).await,
        Some(handle_id) => match harness.resume(materialized, handle_id).await? {
            ResumeOutcome::Resumed(handle) => Ok(handle),
            ResumeOutcome::NeedsRestart { reason } => {
                tracing::warn!(reason = %reason, "adapter could not resume session, restarting from checkpoint");
                harness.spawn(materialized).await
            }
        },
    }
}

/// Collect one iteration's worth of events, persisting each to
/// `agent_events`, publishing tool events to the bus, and returning the
/// concatenated assistant text plus the accrued usage delta.
#[allow(clippy::too_many_arguments)]
async fn collect_iteration(
    pool: &PgPool,
    task_id: Uuid,
    attempt: i32,
    session_id: Option<Uuid>,
    harness: &dyn Harness,
    handle: &AgentHandle,
    timeout: Duration,
    events: &EventBus,
) -> Result<(String, crate::harness::types::UsageDelta)> {
    let mut response_text = String::new();
    let mut usage = crate::harness::types::UsageDelta::default();

    let mut stream = harness.events(handle);
    let collected = tokio::time::timeout(timeout, async {
        while let Some(event) = stream.next().await {
            let is_completed = matches!(event, AgentEvent::Completed);

            if let AgentEvent::Message { content, .. } = &event {
                response_text.push_str(content);
                response_text.push('\n');
            }
            if let AgentEvent::TokenUsage {
                input_tokens,
                output_tokens,
            } = &event
            {
                usage.input_tokens += input_tokens;
                usage.output_tokens += output_tokens;
            }

            events.publish(
                event_bus_type(&event),
                Some(task_id),
                serde_json::json!({"event": format!("{:?}", event)}),
            );

            let (event_type, payload) = serialize_agent_event(&event);
            let new_event = NewAgentEvent {
                task_id,
                session_id,
                attempt,
                event_type,
                payload,
            };
            if let Err(e) = agent_events::insert_agent_event(pool, &new_event).await {
                tracing::warn!(task_id = %task_id, error = %e, "failed to persist agent event (best-effort)");
            }

            if is_completed {
                break;
            }
        }
    })
    .await;

    if collected.is_err() {
        tracing::warn!(task_id = %task_id, "iteration timed out");
        if let Err(e) = harness.kill(handle).await {
            tracing::warn!(task_id = %task_id, error = %e, "failed to kill timed-out agent");
        }
    }

    Ok((response_text, usage))
}

fn event_bus_type(event: &AgentEvent) -> &'static str {
    match event {
        AgentEvent::SessionStarted { .. } => "session.started",
        AgentEvent::Message { .. } => "session.message",
        AgentEvent::ToolCall { .. } => "session.tool-call",
        AgentEvent::ToolResult { .. } => "session.tool-result",
        AgentEvent::TokenUsage { .. } => "session.token-usage",
        AgentEvent::Error { .. } => "session.error",
        AgentEvent::Completed => "session.completed",
    }
}

fn serialize_agent_event(event: &AgentEvent) -> (String, serde_json::Value) {
    match event {
        AgentEvent::SessionStarted { session_handle } => (
            "session_started".to_string(),
            serde_json::json!({"session_handle": session_handle}),
        ),
        AgentEvent::Message { role, content } => (
            "message".to_string(),
            serde_json::json!({"role": role, "content": content}),
        ),
        AgentEvent::ToolCall { tool, input } => (
            "tool_call".to_string(),
            serde_json::json!({"tool": tool, "input": input}),
        ),
        AgentEvent::ToolResult { tool, output } => (
            "tool_result".to_string(),
            serde_json::json!({"tool": tool, "output": output}),
        ),
        AgentEvent::TokenUsage {
            input_tokens,
            output_tokens,
        } => (
            "token_usage".to_string(),
            serde_json::json!({"input_tokens": input_tokens, "output_tokens": output_tokens}),
        ),
        AgentEvent::Error { message } => {
            ("error".to_string(), serde_json::json!({"message": message}))
        }
        AgentEvent::Completed => ("completed".to_string(), serde_json::json!({})),
    }
}
