//! Database query functions for the `quests`, `quest_messages`, and
//! `quest_drafts` tables.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{MessageRole, Quest, QuestDraft, QuestMessage, QuestStatus};

/// Start a new planning conversation for a project.
pub async fn insert_quest(
    pool: &PgPool,
    project_id: Uuid,
    title: Option<&str>,
    model_choice: Option<&str>,
) -> Result<Quest> {
    let quest = sqlx::query_as::<_, Quest>(
        "INSERT INTO quests (id, project_id, title, status, model_choice) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(title)
    .bind(QuestStatus::Active)
    .bind(model_choice)
    .fetch_one(pool)
    .await
    .context("failed to insert quest")?;

    Ok(quest)
}

/// Fetch a quest by its ID.
pub async fn get_quest(pool: &PgPool, id: Uuid) -> Result<Option<Quest>> {
    let quest = sqlx::query_as::<_, Quest>("SELECT * FROM quests WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch quest")?;

    Ok(quest)
}

/// List all quests for a project, newest first.
pub async fn list_quests_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Quest>> {
    let quests = sqlx::query_as::<_, Quest>(
        "SELECT * FROM quests WHERE project_id = $1 ORDER BY created_at DESC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list quests for project")?;

    Ok(quests)
}

/// Mark a quest completed.
pub async fn complete_quest(pool: &PgPool, id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE quests SET status = 'completed', completed_at = now() \
         WHERE id = $1 AND status = 'active'",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to complete quest")?;

    Ok(result.rows_affected())
}

/// Append a message to a quest's conversation.
pub async fn insert_quest_message(
    pool: &PgPool,
    quest_id: Uuid,
    role: MessageRole,
    content: &str,
    tool_calls: Option<Value>,
) -> Result<QuestMessage> {
    let message = sqlx::query_as::<_, QuestMessage>(
        "INSERT INTO quest_messages (id, quest_id, role, content, tool_calls) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(quest_id)
    .bind(role)
    .bind(content)
    .bind(tool_calls)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert message for quest {quest_id}"))?;

    Ok(message)
}

/// List all messages in a quest's conversation, oldest first.
pub async fn list_quest_messages(pool: &PgPool, quest_id: Uuid) -> Result<Vec<QuestMessage>> {
    let messages = sqlx::query_as::<_, QuestMessage>(
        "SELECT * FROM quest_messages WHERE quest_id = $1 ORDER BY created_at ASC",
    )
    .bind(quest_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list messages for quest {quest_id}"))?;

    Ok(messages)
}

/// Record an objective draft surfaced in an assistant turn.
///
/// `draft_id` is the identifier the agent embedded in its turn (e.g.
/// `OBJECTIVE_DRAFT(id=...)`). The `UNIQUE (quest_id, draft_id)` constraint
/// makes re-recording the same draft idempotent: a second insert of the
/// same `draft_id` is rejected, so the caller should treat a unique
/// violation here as "already recorded" rather than an error.
pub async fn insert_quest_draft(
    pool: &PgPool,
    quest_id: Uuid,
    draft_id: &str,
    title: &str,
    description: &str,
    checklist: Value,
    auto_start: bool,
) -> Result<QuestDraft> {
    let draft = sqlx::query_as::<_, QuestDraft>(
        "INSERT INTO quest_drafts \
         (id, quest_id, draft_id, title, description, checklist, auto_start) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(quest_id)
    .bind(draft_id)
    .bind(title)
    .bind(description)
    .bind(checklist)
    .bind(auto_start)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert draft {draft_id} for quest {quest_id}"))?;

    Ok(draft)
}

/// Fetch a draft by its quest-scoped `draft_id`.
pub async fn get_quest_draft(
    pool: &PgPool,
    quest_id: Uuid,
    draft_id: &str,
) -> Result<Option<QuestDraft>> {
    let draft = sqlx::query_as::<_, QuestDraft>(
        "SELECT * FROM quest_drafts WHERE quest_id = $1 AND draft_id = $2",
    )
    .bind(quest_id)
    .bind(draft_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch quest draft")?;

    Ok(draft)
}

/// Atomically mark a draft consumed and attach the task it spawned.
///
/// Uses optimistic locking on `consumed = false` so accepting the same
/// draft twice (e.g. a retried client request) is a no-op on the second
/// call rather than creating a second task -- this is what makes draft
/// acceptance idempotent end to end.
pub async fn consume_quest_draft(
    pool: &PgPool,
    quest_id: Uuid,
    draft_id: &str,
    task_id: Uuid,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE quest_drafts SET consumed = true, task_id = $1 \
         WHERE quest_id = $2 AND draft_id = $3 AND consumed = false",
    )
    .bind(task_id)
    .bind(quest_id)
    .bind(draft_id)
    .execute(pool)
    .await
    .context("failed to consume quest draft")?;

    Ok(result.rows_affected())
}

/// List all drafts recorded in a quest, oldest first.
pub async fn list_quest_drafts(pool: &PgPool, quest_id: Uuid) -> Result<Vec<QuestDraft>> {
    let drafts = sqlx::query_as::<_, QuestDraft>(
        "SELECT * FROM quest_drafts WHERE quest_id = $1 ORDER BY created_at ASC",
    )
    .bind(quest_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list drafts for quest {quest_id}"))?;

    Ok(drafts)
}
