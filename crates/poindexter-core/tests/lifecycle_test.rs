//! Integration tests for the Ralph loop (§4.2): a single task's hat session
//! driven end to end through [`run_agent_lifecycle`] against a mock harness,
//! covering the completion, retry-in-place, completed-with-issues and
//! quarantine outcomes, plus agent-event persistence.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use poindexter_db::models::{ApprovalKind, Autonomy, InvariantKind, InvariantScope, Task, TaskStatus, TaskType};
use poindexter_db::queries::agent_events;
use poindexter_db::queries::invariants::{self, NewInvariant};
use poindexter_db::queries::projects::insert_project;
use poindexter_db::queries::tasks::{self as task_db, NewTask};
use poindexter_test_utils::{create_test_db, drop_test_db};

use poindexter_core::eventbus::EventBus;
use poindexter_core::harness::types::{AgentEvent, AgentHandle, MaterializedTask, ResumeOutcome};
use poindexter_core::harness::Harness;
use poindexter_core::isolation::worktree::WorktreeIsolation;
use poindexter_core::isolation::Isolation;
use poindexter_core::lifecycle::{run_agent_lifecycle, LifecycleConfig, LifecycleOutcome};
use poindexter_core::state::TaskStateMachine;
use poindexter_core::token::TokenConfig;
use poindexter_core::worktree::WorktreeManager;

// ===========================================================================
// Test harness
// ===========================================================================

struct TestHarness {
    pool: PgPool,
    db_name: String,
    repo_dir: tempfile::TempDir,
    worktree_base_dir: tempfile::TempDir,
    repo_path: PathBuf,
}

impl TestHarness {
    async fn new() -> Self {
        let (pool, db_name) = create_test_db().await;
        let (repo_dir, repo_path) = create_temp_git_repo();
        let worktree_base_dir =
            tempfile::TempDir::new().expect("failed to create worktree base dir");

        Self {
            pool,
            db_name,
            repo_dir,
            worktree_base_dir,
            repo_path,
        }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn isolation(&self) -> Arc<dyn Isolation> {
        let mgr = WorktreeManager::new(&self.repo_path, Some(self.worktree_base_dir.path().to_path_buf()))
            .expect("failed to create WorktreeManager");
        Arc::new(WorktreeIsolation::new(mgr))
    }

    async fn teardown(self) {
        self.pool.close().await;
        drop_test_db(&self.db_name).await;
        drop(self.worktree_base_dir);
        drop(self.repo_dir);
    }
}

fn create_temp_git_repo() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("failed to create temp dir");
    let repo_path = dir.path().to_path_buf();

    let run = |args: &[&str]| {
        let output = Command::new("git")
            .args(args)
            .current_dir(&repo_path)
            .output()
            .unwrap_or_else(|e| panic!("failed to run git {}: {e}", args.join(" ")));
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    };

    run(&["init"]);
    run(&["config", "user.email", "test@poindexter.dev"]);
    run(&["config", "user.name", "Poindexter Test"]);
    std::fs::write(repo_path.join("README.md"), "# Test repo\n").expect("failed to write README");
    run(&["add", "."]);
    run(&["commit", "-m", "Initial commit"]);

    (dir, repo_path)
}

fn test_token_config() -> TokenConfig {
    TokenConfig::new(b"lifecycle-test-secret".to_vec())
}

fn test_lifecycle_config() -> LifecycleConfig {
    LifecycleConfig {
        iteration_timeout: Duration::from_secs(10),
    }
}

// ===========================================================================
// Mock harness -- emits a configurable event sequence, then `Completed`.
// ===========================================================================

struct MockHarness {
    events: Vec<AgentEvent>,
}

impl MockHarness {
    fn completing_with(mut events: Vec<AgentEvent>) -> Self {
        events.push(AgentEvent::Completed);
        Self { events }
    }
}

#[async_trait]
impl Harness for MockHarness {
    fn name(&self) -> &str {
        "mock-harness"
    }

    async fn spawn(&self, task: &MaterializedTask) -> Result<AgentHandle> {
        Ok(AgentHandle {
            pid: 1,
            stdin: None,
            task_id: task.task_id,
            attempt: 0,
            harness_name: "mock-harness".to_string(),
            session_handle: None,
        })
    }

    fn events(&self, _handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        Box::pin(futures::stream::iter(self.events.clone()))
    }

    async fn send(&self, _handle: &AgentHandle, _message: &str) -> Result<()> {
        Ok(())
    }

    async fn resume(&self, _task: &MaterializedTask, _session_handle: &str) -> Result<ResumeOutcome> {
        Ok(ResumeOutcome::NeedsRestart {
            reason: "mock harness never resumes".to_string(),
        })
    }

    async fn kill(&self, _handle: &AgentHandle) -> Result<()> {
        Ok(())
    }

    async fn is_running(&self, _handle: &AgentHandle) -> bool {
        false
    }
}

fn message(content: &str) -> AgentEvent {
    AgentEvent::Message {
        role: "assistant".to_string(),
        content: content.to_string(),
    }
}

// ===========================================================================
// Helpers
// ===========================================================================

async fn create_invariant(pool: &PgPool, name: &str, command: &str) -> poindexter_db::models::Invariant {
    invariants::insert_invariant(
        pool,
        &NewInvariant {
            name,
            description: None,
            kind: InvariantKind::Custom,
            command,
            args: &[],
            expected_exit_code: 0,
            threshold: None,
            scope: InvariantScope::Project,
            timeout_secs: 300,
        },
    )
    .await
    .expect("insert invariant")
}

/// Create a task already admitted to `running`, the precondition
/// [`run_agent_lifecycle`] documents for its caller.
async fn create_running_task(pool: &PgPool, project_id: Uuid, title: &str, retry_max: i32) -> Task {
    let task = task_db::insert_task(
        pool,
        &NewTask {
            project_id,
            quest_id: None,
            parent_id: None,
            title,
            description: "a lifecycle test task",
            task_type: TaskType::Task,
            priority: 0,
            autonomy: Autonomy::Autonomous,
            base_branch: "main",
            token_budget: None,
            wall_seconds_budget: None,
            dollar_cents_budget: None,
            retry_max,
        },
    )
    .await
    .expect("insert_task should succeed");

    let machine = TaskStateMachine::new(pool.clone());
    machine.mark_ready(task.id).await.expect("mark_ready should succeed");
    machine.start(task.id).await.expect("start should succeed");
    machine.get(task.id).await.expect("task should exist")
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn happy_path_completes_task() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();

    let project = insert_project(pool, "lifecycle-project", &harness.repo_path.to_string_lossy(), "main", None)
        .await
        .unwrap();
    let inv = create_invariant(pool, "pass_inv", "true").await;
    let task = create_running_task(pool, project.id, "lifecycle-task", 3).await;
    task_db::link_task_invariant(pool, task.id, inv.id).await.unwrap();

    let mock = MockHarness::completing_with(vec![message("Working on it.\nTASK_COMPLETE\n")]);
    let isolation = harness.isolation();
    let events = EventBus::new();

    let outcome = run_agent_lifecycle(
        pool,
        &task,
        "lifecycle-project",
        &mock,
        isolation.as_ref(),
        &test_token_config(),
        &test_lifecycle_config(),
        &events,
        &CancellationToken::new(),
    )
    .await
    .expect("lifecycle should succeed");

    assert_eq!(outcome, LifecycleOutcome::Completed);

    let updated = task_db::get_task(pool, task.id).await.unwrap().unwrap();
    assert_eq!(updated.status, TaskStatus::Completed);

    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_invariant_with_budget_retries_in_place() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();

    let project = insert_project(pool, "retry-project", &harness.repo_path.to_string_lossy(), "main", None)
        .await
        .unwrap();
    let inv = create_invariant(pool, "fail_inv", "false").await;
    let task = create_running_task(pool, project.id, "retry-task", 3).await;
    task_db::link_task_invariant(pool, task.id, inv.id).await.unwrap();

    let mock = MockHarness::completing_with(vec![message("Done.\nTASK_COMPLETE\n")]);
    let isolation = harness.isolation();
    let events = EventBus::new();

    let outcome = run_agent_lifecycle(
        pool,
        &task,
        "retry-project",
        &mock,
        isolation.as_ref(),
        &test_token_config(),
        &test_lifecycle_config(),
        &events,
        &CancellationToken::new(),
    )
    .await
    .expect("lifecycle should succeed");

    assert_eq!(
        outcome,
        LifecycleOutcome::Paused {
            approval_kind: ApprovalKind::BudgetExtension
        }
    );

    let updated = task_db::get_task(pool, task.id).await.unwrap().unwrap();
    assert_eq!(updated.status, TaskStatus::Ready, "retry-in-place demotes back to ready");
    assert_eq!(updated.attempt, 1);

    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_invariant_with_no_budget_completes_with_issues() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();

    let project = insert_project(pool, "no-budget-project", &harness.repo_path.to_string_lossy(), "main", None)
        .await
        .unwrap();
    let inv = create_invariant(pool, "fail_inv", "false").await;
    let task = create_running_task(pool, project.id, "no-budget-task", 0).await;
    task_db::link_task_invariant(pool, task.id, inv.id).await.unwrap();

    let mock = MockHarness::completing_with(vec![message("Done.\nTASK_COMPLETE\n")]);
    let isolation = harness.isolation();
    let events = EventBus::new();

    let outcome = run_agent_lifecycle(
        pool,
        &task,
        "no-budget-project",
        &mock,
        isolation.as_ref(),
        &test_token_config(),
        &test_lifecycle_config(),
        &events,
        &CancellationToken::new(),
    )
    .await
    .expect("lifecycle should succeed");

    assert_eq!(outcome, LifecycleOutcome::CompletedWithIssues);

    let updated = task_db::get_task(pool, task.id).await.unwrap().unwrap();
    assert_eq!(updated.status, TaskStatus::CompletedWithIssues);

    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn error_signal_quarantines_task() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();

    let project = insert_project(pool, "error-project", &harness.repo_path.to_string_lossy(), "main", None)
        .await
        .unwrap();
    let inv = create_invariant(pool, "pass_inv", "true").await;
    let task = create_running_task(pool, project.id, "error-task", 3).await;
    task_db::link_task_invariant(pool, task.id, inv.id).await.unwrap();

    let mock = MockHarness::completing_with(vec![message(
        "ERROR cannot resolve a merge conflict in Cargo.lock\n",
    )]);
    let isolation = harness.isolation();
    let events = EventBus::new();

    let outcome = run_agent_lifecycle(
        pool,
        &task,
        "error-project",
        &mock,
        isolation.as_ref(),
        &test_token_config(),
        &test_lifecycle_config(),
        &events,
        &CancellationToken::new(),
    )
    .await
    .expect("lifecycle should succeed even when the agent reports an error");

    assert_eq!(outcome, LifecycleOutcome::Quarantined);

    let updated = task_db::get_task(pool, task.id).await.unwrap().unwrap();
    assert_eq!(updated.status, TaskStatus::Quarantined);

    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn events_persisted_to_db() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();

    let project = insert_project(pool, "events-project", &harness.repo_path.to_string_lossy(), "main", None)
        .await
        .unwrap();
    let inv = create_invariant(pool, "pass_inv", "true").await;
    let task = create_running_task(pool, project.id, "events-task", 3).await;
    task_db::link_task_invariant(pool, task.id, inv.id).await.unwrap();

    let mock = MockHarness::completing_with(vec![
        message("Starting work"),
        AgentEvent::ToolCall {
            tool: "Bash".to_string(),
            input: serde_json::json!({"command": "ls"}),
        },
        AgentEvent::TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
        },
        message("Done.\nTASK_COMPLETE\n"),
    ]);
    let isolation = harness.isolation();
    let events = EventBus::new();

    run_agent_lifecycle(
        pool,
        &task,
        "events-project",
        &mock,
        isolation.as_ref(),
        &test_token_config(),
        &test_lifecycle_config(),
        &events,
        &CancellationToken::new(),
    )
    .await
    .expect("lifecycle should succeed");

    let persisted = agent_events::list_events_for_task(pool, task.id, 0)
        .await
        .expect("list events should succeed");

    // message, tool_call, token_usage, message, completed
    assert_eq!(persisted.len(), 5, "should have 5 persisted events");
    assert_eq!(persisted[0].event_type, "message");
    assert_eq!(persisted[1].event_type, "tool_call");
    assert_eq!(persisted[2].event_type, "token_usage");
    assert_eq!(persisted[3].event_type, "message");
    assert_eq!(persisted[4].event_type, "completed");

    harness.teardown().await;
}
