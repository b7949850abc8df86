//! Core types shared by harness adapters.
//!
//! [`MaterializedTask`] is everything a harness needs to spawn an agent
//! process. [`AgentHandle`] is what `spawn`/`resume` hand back to the
//! caller. [`AgentEvent`] is the common shape every adapter translates its
//! native wire format into. [`ResumeOutcome`] distinguishes a clean
//! conversation resume from a case where the adapter can't continue the
//! prior session and the caller must restart from the last checkpoint.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::process::ChildStdin;
use uuid::Uuid;

/// A task fully resolved into everything a harness needs to run it:
/// working directory, environment, and the invariant commands the agent
/// is told about up front.
#[derive(Debug, Clone)]
pub struct MaterializedTask {
    pub task_id: Uuid,
    pub name: String,
    pub description: String,
    pub invariant_commands: Vec<String>,
    pub working_dir: PathBuf,
    pub env_vars: HashMap<String, String>,
}

/// A handle to a live (or just-exited) agent process.
///
/// `stdin` is populated only in the value returned directly from `spawn`
/// or `resume`; it is taken immediately by the adapter and kept in its own
/// process table so that `send` can write to it later without needing
/// `&mut AgentHandle` (the trait passes handles by shared reference, since
/// the orchestrator holds them in shared task state alongside event
/// streams). Once the handle has been handed back to the caller, `stdin`
/// should be treated as already consumed and is normally `None`.
#[derive(Debug)]
pub struct AgentHandle {
    pub pid: u32,
    pub stdin: Option<ChildStdin>,
    pub task_id: Uuid,
    pub attempt: i32,
    pub harness_name: String,
    /// Opaque session identifier the adapter uses to resume this
    /// conversation later (e.g. Claude Code's `--resume <id>`). `None` for
    /// harnesses that don't support resumption.
    pub session_handle: Option<String>,
}

/// An event emitted by a running agent, translated from the harness's
/// native wire format into a shape the orchestrator can consume regardless
/// of which harness produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Carries the harness's opaque resume id, captured once per session
    /// (e.g. from Claude Code's `system`/`init` line) and persisted onto
    /// the `Session` row as `agent_session_handle`.
    SessionStarted { session_handle: String },
    Message { role: String, content: String },
    ToolCall { tool: String, input: serde_json::Value },
    ToolResult { tool: String, output: serde_json::Value },
    TokenUsage { input_tokens: u64, output_tokens: u64 },
    Error { message: String },
    Completed,
}

/// Per-call usage delta an adapter must surface alongside its response, so
/// the caller can accrue it against a task's token/dollar budgets without
/// re-deriving it from the raw event stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub dollar_cents: i64,
}

/// Outcome of attempting to resume a previously-suspended agent session.
///
/// Adapters are assumed unreliable: a resume attempt can fail for reasons
/// unrelated to the task itself (the session expired, the CLI version
/// changed, the process was killed mid-write). Callers must treat
/// `NeedsRestart` as "start a fresh session from the last checkpoint",
/// not as an error.
#[derive(Debug)]
pub enum ResumeOutcome {
    /// The harness resumed the prior conversation; `AgentHandle` continues
    /// it as if `send` had been called all along.
    Resumed(AgentHandle),
    /// The harness could not resume; the caller should start a new
    /// session via `spawn` seeded from the last checkpoint instead.
    NeedsRestart { reason: String },
}
