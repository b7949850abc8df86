//! Sync Projector (C9): an optional mirror of task lifecycle state onto an
//! external issue tracker, through the narrowest provider capability each
//! call actually needs (§4.8).
//!
//! This component is provider-agnostic by construction: [`SyncProvider`] is
//! the only thing a concrete backend (GitHub, GitLab, Jira, ...) has to
//! implement, selected at startup the same way [`crate::harness::Harness`]
//! adapters are. Every projection call fails open -- a provider error is
//! logged and swallowed, never propagated to the caller, since task
//! execution must never block on an external service being reachable.
//! A failed projection simply leaves the task's `external_issue_id` (or a
//! comment/label) stale until the next successful call reconciles it.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use poindexter_db::models::Task;
use poindexter_db::queries::tasks as task_db;

pub mod github;

/// An external issue or pull request, identified the way its provider
/// names it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub external_id: String,
    pub url: String,
}

/// The capability interface the Sync Projector needs from an issue
/// tracker. Implementations wrap a specific provider's API client.
#[async_trait]
pub trait SyncProvider: Send + Sync {
    /// Human-readable name for this provider (e.g. "github").
    fn name(&self) -> &str;

    async fn create_issue(&self, title: &str, body: &str) -> Result<RemoteRef>;
    async fn update_issue(&self, external_id: &str, title: &str, body: &str) -> Result<()>;
    async fn close_issue(&self, external_id: &str) -> Result<()>;
    async fn add_comment(&self, external_id: &str, body: &str) -> Result<()>;
    async fn set_labels(&self, external_id: &str, labels: &[String]) -> Result<()>;
    async fn create_pr(&self, title: &str, body: &str, head: &str, base: &str) -> Result<RemoteRef>;
    async fn merge_pr(&self, external_id: &str) -> Result<()>;
    async fn install_webhook(&self, callback_url: &str) -> Result<()>;
}

// Compile-time object-safety assertion, matching the Harness trait's own.
const _: () = {
    fn _assert_object_safe(_: &dyn SyncProvider) {}
};

/// Projects one project's task lifecycle onto a configured provider.
pub struct SyncProjector {
    provider: Box<dyn SyncProvider>,
}

impl SyncProjector {
    pub fn new(provider: Box<dyn SyncProvider>) -> Self {
        Self { provider }
    }

    /// Project a newly created task as an external issue. On success,
    /// records the remote id on the task row so later projections (and
    /// inbound webhooks) can find it again.
    pub async fn on_task_created(&self, pool: &PgPool, task: &Task) {
        match self.provider.create_issue(&task.title, &task.description).await {
            Ok(remote) => {
                if let Err(e) =
                    task_db::set_task_external_issue_id(pool, task.id, Some(&remote.external_id)).await
                {
                    tracing::warn!(task_id = %task.id, error = %e, "projected issue but failed to record its id");
                }
            }
            Err(e) => self.log_failure(task.id, "create_issue", e),
        }
    }

    /// Project a hat transition as a progress comment.
    pub async fn on_hat_transition(&self, task: &Task, from_hat: &str, to_hat: &str) {
        let Some(external_id) = task.external_issue_id.as_deref() else {
            return;
        };
        let body = format!("Handed off from **{from_hat}** to **{to_hat}**.");
        if let Err(e) = self.provider.add_comment(external_id, &body).await {
            self.log_failure(task.id, "add_comment", e);
        }
    }

    /// Project a terminal outcome: close the issue (or leave it open with
    /// a note for `completed_with_issues`/`quarantined`).
    pub async fn on_task_finished(&self, task: &Task, outcome: &str) {
        let Some(external_id) = task.external_issue_id.as_deref() else {
            return;
        };

        let comment_result = self
            .provider
            .add_comment(external_id, &format!("Task ended: {outcome}."))
            .await;
        if let Err(e) = comment_result {
            self.log_failure(task.id, "add_comment", e);
        }

        if outcome == "completed" {
            if let Err(e) = self.provider.close_issue(external_id).await {
                self.log_failure(task.id, "close_issue", e);
            }
        }
    }

    /// Project a task's branch as a pull request once review starts.
    pub async fn on_pr_ready(&self, pool: &PgPool, task: &Task, head: &str, base: &str) {
        match self
            .provider
            .create_pr(&task.title, &task.description, head, base)
            .await
        {
            Ok(_remote) => {
                // PR numbers land on `tasks.pr_number` via the caller's own
                // provider-specific parsing of the remote id; this
                // projector only needs to know the call succeeded.
                let _ = pool;
            }
            Err(e) => self.log_failure(task.id, "create_pr", e),
        }
    }

    /// Handle an inbound webhook event: the external issue tied to
    /// `external_id` was closed. Feeds back into task state by marking the
    /// task complete if it's still open (§4.8).
    ///
    /// Only `Running` and `Paused` map onto `Completed` in the valid
    /// transition graph -- `Paused` goes through `resume` first since there
    /// is no direct `Paused -> Completed` edge. Any other non-terminal
    /// status (e.g. `Blocked`, `Quarantined`) has no sensible direct path
    /// to `Completed`, so the webhook is logged and otherwise ignored; the
    /// next successful sync reconciles once the task reaches `Running`.
    pub async fn on_external_issue_closed(&self, pool: &PgPool, external_id: &str) -> Result<()> {
        let Some(task) = task_db::get_task_by_external_issue_id(pool, external_id).await? else {
            tracing::debug!(external_id, "webhook for an issue with no linked task; ignoring");
            return Ok(());
        };

        use poindexter_db::models::TaskStatus;
        let machine = crate::state::TaskStateMachine::new(pool.clone());

        match task.status {
            TaskStatus::Completed | TaskStatus::CompletedWithIssues | TaskStatus::Cancelled => {
                Ok(())
            }
            TaskStatus::Paused => {
                machine.resume(task.id).await?;
                machine.complete(task.id).await
            }
            TaskStatus::Running => machine.complete(task.id).await,
            other => {
                tracing::info!(
                    task_id = %task.id,
                    status = %other,
                    "issue closed upstream but task has no direct path to completed yet; will reconcile once running"
                );
                Ok(())
            }
        }
    }

    fn log_failure(&self, task_id: uuid::Uuid, op: &str, err: anyhow::Error) {
        tracing::warn!(
            task_id = %task_id,
            provider = self.provider.name(),
            op,
            error = %err,
            "sync projector call failed; will reconcile on next successful call"
        );
    }
}
