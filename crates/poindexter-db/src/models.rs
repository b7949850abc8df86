use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a task (the scheduler's state machine, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Planning,
    Blocked,
    Ready,
    Running,
    Paused,
    Completed,
    CompletedWithIssues,
    Cancelled,
    Quarantined,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Blocked => "blocked",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::CompletedWithIssues => "completed_with_issues",
            Self::Cancelled => "cancelled",
            Self::Quarantined => "quarantined",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "planning" => Ok(Self::Planning),
            "blocked" => Ok(Self::Blocked),
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "completed_with_issues" => Ok(Self::CompletedWithIssues),
            "cancelled" => Ok(Self::Cancelled),
            "quarantined" => Ok(Self::Quarantined),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

impl TaskStatus {
    /// Terminal statuses never re-enter the scheduler's admission queue.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithIssues | Self::Cancelled | Self::Quarantined
        )
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// The kind of unit of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Epic,
    Feature,
    Bug,
    Chore,
    Task,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Epic => "epic",
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Chore => "chore",
            Self::Task => "task",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskType {
    type Err = TaskTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "epic" => Ok(Self::Epic),
            "feature" => Ok(Self::Feature),
            "bug" => Ok(Self::Bug),
            "chore" => Ok(Self::Chore),
            "task" => Ok(Self::Task),
            other => Err(TaskTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskType`] string.
#[derive(Debug, Clone)]
pub struct TaskTypeParseError(pub String);

impl fmt::Display for TaskTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task type: {:?}", self.0)
    }
}

impl std::error::Error for TaskTypeParseError {}

// ---------------------------------------------------------------------------

/// Autonomy level -- controls which events require human approval (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Autonomy {
    Supervised,
    SemiAuto,
    Autonomous,
    FullAuto,
}

impl fmt::Display for Autonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Supervised => "supervised",
            Self::SemiAuto => "semi_auto",
            Self::Autonomous => "autonomous",
            Self::FullAuto => "full_auto",
        };
        f.write_str(s)
    }
}

impl FromStr for Autonomy {
    type Err = AutonomyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supervised" => Ok(Self::Supervised),
            "semi_auto" => Ok(Self::SemiAuto),
            "autonomous" => Ok(Self::Autonomous),
            "full_auto" => Ok(Self::FullAuto),
            other => Err(AutonomyParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Autonomy`] string.
#[derive(Debug, Clone)]
pub struct AutonomyParseError(pub String);

impl fmt::Display for AutonomyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid autonomy level: {:?}", self.0)
    }
}

impl std::error::Error for AutonomyParseError {}

// ---------------------------------------------------------------------------

/// A named role prompt the Ralph loop drives the agent under (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Hat {
    Planner,
    Architect,
    Implementer,
    Reviewer,
    Tester,
    Debugger,
    Documenter,
    Devops,
    ConflictManager,
}

impl fmt::Display for Hat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planner => "planner",
            Self::Architect => "architect",
            Self::Implementer => "implementer",
            Self::Reviewer => "reviewer",
            Self::Tester => "tester",
            Self::Debugger => "debugger",
            Self::Documenter => "documenter",
            Self::Devops => "devops",
            Self::ConflictManager => "conflict_manager",
        };
        f.write_str(s)
    }
}

impl FromStr for Hat {
    type Err = HatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planner" => Ok(Self::Planner),
            "architect" => Ok(Self::Architect),
            "implementer" => Ok(Self::Implementer),
            "reviewer" => Ok(Self::Reviewer),
            "tester" => Ok(Self::Tester),
            "debugger" => Ok(Self::Debugger),
            "documenter" => Ok(Self::Documenter),
            "devops" => Ok(Self::Devops),
            "conflict_manager" => Ok(Self::ConflictManager),
            other => Err(HatParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Hat`] string.
#[derive(Debug, Clone)]
pub struct HatParseError(pub String);

impl fmt::Display for HatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid hat: {:?}", self.0)
    }
}

impl std::error::Error for HatParseError {}

// ---------------------------------------------------------------------------

/// Kind of action an [`Approval`] gates (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Commit,
    HatTransition,
    Pr,
    Merge,
    ConflictResolution,
    BudgetExtension,
    /// The agent emitted a `QUESTION` payload and needs user input before
    /// continuing. Not part of the §4.3 matrix proper (there is no
    /// autonomy level at which a direct question auto-resolves) but routed
    /// through the same pending-approval machinery.
    Question,
    /// A session hit its per-iteration cap (§4.2) without reaching a
    /// terminal signal. Same shape as the others: pauses the task until a
    /// human decides whether to extend it.
    IterationLimit,
}

impl fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Commit => "commit",
            Self::HatTransition => "hat_transition",
            Self::Pr => "pr",
            Self::Merge => "merge",
            Self::ConflictResolution => "conflict_resolution",
            Self::BudgetExtension => "budget_extension",
            Self::Question => "question",
            Self::IterationLimit => "iteration_limit",
        };
        f.write_str(s)
    }
}

impl FromStr for ApprovalKind {
    type Err = ApprovalKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(Self::Commit),
            "hat_transition" => Ok(Self::HatTransition),
            "pr" => Ok(Self::Pr),
            "merge" => Ok(Self::Merge),
            "conflict_resolution" => Ok(Self::ConflictResolution),
            "budget_extension" => Ok(Self::BudgetExtension),
            "question" => Ok(Self::Question),
            "iteration_limit" => Ok(Self::IterationLimit),
            other => Err(ApprovalKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ApprovalKind`] string.
#[derive(Debug, Clone)]
pub struct ApprovalKindParseError(pub String);

impl fmt::Display for ApprovalKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid approval kind: {:?}", self.0)
    }
}

impl std::error::Error for ApprovalKindParseError {}

// ---------------------------------------------------------------------------

/// Resolution status of an [`Approval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

impl FromStr for ApprovalStatus {
    type Err = ApprovalStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            other => Err(ApprovalStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ApprovalStatus`] string.
#[derive(Debug, Clone)]
pub struct ApprovalStatusParseError(pub String);

impl fmt::Display for ApprovalStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid approval status: {:?}", self.0)
    }
}

impl std::error::Error for ApprovalStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a planning conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Active,
    Completed,
}

impl fmt::Display for QuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for QuestStatus {
    type Err = QuestStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(QuestStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`QuestStatus`] string.
#[derive(Debug, Clone)]
pub struct QuestStatusParseError(pub String);

impl fmt::Display for QuestStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid quest status: {:?}", self.0)
    }
}

impl std::error::Error for QuestStatusParseError {}

// ---------------------------------------------------------------------------

/// Role of a message in a quest conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        };
        f.write_str(s)
    }
}

impl FromStr for MessageRole {
    type Err = MessageRoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(MessageRoleParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`MessageRole`] string.
#[derive(Debug, Clone)]
pub struct MessageRoleParseError(pub String);

impl fmt::Display for MessageRoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid message role: {:?}", self.0)
    }
}

impl std::error::Error for MessageRoleParseError {}

// ---------------------------------------------------------------------------

/// Kind of invariant check (a verification command, §4.2 "Completion verification").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvariantKind {
    TestSuite,
    Typecheck,
    Lint,
    Coverage,
    Custom,
}

impl fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TestSuite => "test_suite",
            Self::Typecheck => "typecheck",
            Self::Lint => "lint",
            Self::Coverage => "coverage",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

impl FromStr for InvariantKind {
    type Err = InvariantKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test_suite" => Ok(Self::TestSuite),
            "typecheck" => Ok(Self::Typecheck),
            "lint" => Ok(Self::Lint),
            "coverage" => Ok(Self::Coverage),
            "custom" => Ok(Self::Custom),
            other => Err(InvariantKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`InvariantKind`] string.
#[derive(Debug, Clone)]
pub struct InvariantKindParseError(pub String);

impl fmt::Display for InvariantKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid invariant kind: {:?}", self.0)
    }
}

impl std::error::Error for InvariantKindParseError {}

// ---------------------------------------------------------------------------

/// Scope of an invariant -- global or project-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvariantScope {
    Global,
    Project,
}

impl fmt::Display for InvariantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Global => "global",
            Self::Project => "project",
        };
        f.write_str(s)
    }
}

impl FromStr for InvariantScope {
    type Err = InvariantScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "project" => Ok(Self::Project),
            other => Err(InvariantScopeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`InvariantScope`] string.
#[derive(Debug, Clone)]
pub struct InvariantScopeParseError(pub String);

impl fmt::Display for InvariantScopeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid invariant scope: {:?}", self.0)
    }
}

impl std::error::Error for InvariantScopeParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A project: a logical repository container (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub repo_path: String,
    pub default_branch: String,
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A task (objective): a unit of work executed in an isolated worktree (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub quest_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: i16,
    pub autonomy: Autonomy,
    pub status: TaskStatus,
    pub current_hat: Option<Hat>,
    pub base_branch: String,
    pub worktree_path: Option<String>,
    pub branch_name: Option<String>,
    pub pr_number: Option<i32>,
    /// The Sync Projector's remote issue id for this task, if a provider
    /// is configured for its project (§4.8). `None` until the first
    /// successful projection.
    pub external_issue_id: Option<String>,
    pub token_budget: Option<i64>,
    pub wall_seconds_budget: Option<i64>,
    pub dollar_cents_budget: Option<i64>,
    pub tokens_used: i64,
    pub wall_seconds_used: i64,
    pub dollar_cents_used: i64,
    pub retry_max: i32,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Whether usage has breached any configured budget.
    pub fn budget_exceeded(&self) -> bool {
        self.token_budget.is_some_and(|b| self.tokens_used > b)
            || self
                .wall_seconds_budget
                .is_some_and(|b| self.wall_seconds_used > b)
            || self
                .dollar_cents_budget
                .is_some_and(|b| self.dollar_cents_used > b)
    }
}

/// An edge in the task dependency DAG: `task_id` is blocked by `depends_on`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub task_id: Uuid,
    pub depends_on: Uuid,
}

/// One execution attempt of a task under a single hat (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub task_id: Uuid,
    pub hat: Hat,
    pub agent_session_handle: Option<String>,
    pub iteration: i32,
    pub tokens_used: i64,
    pub wall_seconds_used: i64,
    pub dollar_cents_used: i64,
    pub outcome: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// A durable recovery point within a session (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Checkpoint {
    pub id: i64,
    pub session_id: Uuid,
    pub iteration: i32,
    pub agent_session_handle: Option<String>,
    pub completion_promise: String,
    pub tokens_used: i64,
    pub wall_seconds_used: i64,
    pub dollar_cents_used: i64,
    pub created_at: DateTime<Utc>,
}

/// A pending human decision gating a specific action (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Approval {
    pub id: Uuid,
    pub task_id: Uuid,
    pub kind: ApprovalKind,
    pub title: String,
    pub context: serde_json::Value,
    pub status: ApprovalStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A planning conversation scoped to a project (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quest {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: Option<String>,
    pub status: QuestStatus,
    pub model_choice: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One turn in a quest conversation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuestMessage {
    pub id: Uuid,
    pub quest_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// An objective proposal embedded in an assistant turn, awaiting acceptance.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuestDraft {
    pub id: Uuid,
    pub quest_id: Uuid,
    pub draft_id: String,
    pub title: String,
    pub description: String,
    pub checklist: serde_json::Value,
    pub auto_start: bool,
    pub consumed: bool,
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// An append-only per-task log entry surfaced to the UI (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivityRecord {
    pub id: i64,
    pub task_id: Uuid,
    pub session_id: Option<Uuid>,
    pub kind: String,
    pub content: String,
    pub hat: Option<String>,
    pub iteration: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// A reusable verification-command definition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invariant {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: InvariantKind,
    pub command: String,
    pub args: Vec<String>,
    pub expected_exit_code: i32,
    pub threshold: Option<f32>,
    pub scope: InvariantScope,
    pub timeout_secs: i32,
    pub created_at: DateTime<Utc>,
}

/// Join row linking a task to an invariant it must pass before completion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskInvariant {
    pub task_id: Uuid,
    pub invariant_id: Uuid,
}

/// Result of running one invariant as part of completion verification.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GateResult {
    pub id: i64,
    pub task_id: Uuid,
    pub invariant_id: Uuid,
    pub attempt: i32,
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub duration_ms: Option<i64>,
    pub checked_at: DateTime<Utc>,
}

/// A raw event recorded from an agent's execution stream (backs activity records).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentEvent {
    pub id: i64,
    pub task_id: Uuid,
    pub session_id: Option<Uuid>,
    pub attempt: i32,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Per-project Sync Projector provider settings (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProviderConfig {
    pub id: Uuid,
    pub project_id: Uuid,
    pub provider: String,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An encrypted-at-rest secret (e.g. toolbelt credentials).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Secret {
    pub id: Uuid,
    pub key: String,
    pub value_encrypted: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Pending,
            TaskStatus::Planning,
            TaskStatus::Blocked,
            TaskStatus::Ready,
            TaskStatus::Running,
            TaskStatus::Paused,
            TaskStatus::Completed,
            TaskStatus::CompletedWithIssues,
            TaskStatus::Cancelled,
            TaskStatus::Quarantined,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("nope".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_status_terminal_set() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::CompletedWithIssues.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Quarantined.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn task_type_display_roundtrip() {
        let variants = [
            TaskType::Epic,
            TaskType::Feature,
            TaskType::Bug,
            TaskType::Chore,
            TaskType::Task,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskType = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_type_invalid() {
        assert!("nonsense".parse::<TaskType>().is_err());
    }

    #[test]
    fn autonomy_display_roundtrip_and_order() {
        let variants = [
            Autonomy::Supervised,
            Autonomy::SemiAuto,
            Autonomy::Autonomous,
            Autonomy::FullAuto,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: Autonomy = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
        assert!(Autonomy::Supervised < Autonomy::FullAuto);
    }

    #[test]
    fn autonomy_invalid() {
        assert!("yolo".parse::<Autonomy>().is_err());
    }

    #[test]
    fn hat_display_roundtrip() {
        let variants = [
            Hat::Planner,
            Hat::Architect,
            Hat::Implementer,
            Hat::Reviewer,
            Hat::Tester,
            Hat::Debugger,
            Hat::Documenter,
            Hat::Devops,
            Hat::ConflictManager,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: Hat = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn hat_invalid() {
        assert!("wizard".parse::<Hat>().is_err());
    }

    #[test]
    fn approval_kind_display_roundtrip() {
        let variants = [
            ApprovalKind::Commit,
            ApprovalKind::HatTransition,
            ApprovalKind::Pr,
            ApprovalKind::Merge,
            ApprovalKind::ConflictResolution,
            ApprovalKind::BudgetExtension,
            ApprovalKind::Question,
            ApprovalKind::IterationLimit,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: ApprovalKind = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn approval_kind_invalid() {
        assert!("bribe".parse::<ApprovalKind>().is_err());
    }

    #[test]
    fn approval_status_display_roundtrip() {
        let variants = [
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
            ApprovalStatus::Expired,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: ApprovalStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn approval_status_invalid() {
        assert!("undecided".parse::<ApprovalStatus>().is_err());
    }

    #[test]
    fn quest_status_display_roundtrip() {
        let variants = [QuestStatus::Active, QuestStatus::Completed];
        for v in &variants {
            let s = v.to_string();
            let parsed: QuestStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn quest_status_invalid() {
        assert!("dormant".parse::<QuestStatus>().is_err());
    }

    #[test]
    fn message_role_display_roundtrip() {
        let variants = [MessageRole::User, MessageRole::Assistant];
        for v in &variants {
            let s = v.to_string();
            let parsed: MessageRole = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn message_role_invalid() {
        assert!("system".parse::<MessageRole>().is_err());
    }

    #[test]
    fn invariant_kind_display_roundtrip() {
        let variants = [
            InvariantKind::TestSuite,
            InvariantKind::Typecheck,
            InvariantKind::Lint,
            InvariantKind::Coverage,
            InvariantKind::Custom,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: InvariantKind = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn invariant_kind_invalid() {
        assert!("magic".parse::<InvariantKind>().is_err());
    }

    #[test]
    fn invariant_scope_display_roundtrip() {
        let variants = [InvariantScope::Global, InvariantScope::Project];
        for v in &variants {
            let s = v.to_string();
            let parsed: InvariantScope = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn invariant_scope_invalid() {
        assert!("local".parse::<InvariantScope>().is_err());
    }

    #[test]
    fn task_budget_exceeded_checks_all_three_dimensions() {
        let mut t = sample_task();
        assert!(!t.budget_exceeded());

        t.token_budget = Some(100);
        t.tokens_used = 180;
        assert!(t.budget_exceeded());

        t.token_budget = None;
        t.tokens_used = 0;
        assert!(!t.budget_exceeded());

        t.wall_seconds_budget = Some(60);
        t.wall_seconds_used = 61;
        assert!(t.budget_exceeded());
    }

    fn sample_task() -> Task {
        Task {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            quest_id: None,
            parent_id: None,
            title: "sample".into(),
            description: "sample task".into(),
            task_type: TaskType::Task,
            priority: 3,
            autonomy: Autonomy::Autonomous,
            status: TaskStatus::Ready,
            current_hat: None,
            base_branch: "main".into(),
            worktree_path: None,
            branch_name: None,
            pr_number: None,
            external_issue_id: None,
            token_budget: None,
            wall_seconds_budget: None,
            dollar_cents_budget: None,
            tokens_used: 0,
            wall_seconds_used: 0,
            dollar_cents_used: 0,
            retry_max: 3,
            attempt: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}
