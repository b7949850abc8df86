//! Quest Planner (C8): a long-running planning conversation aimed at
//! producing structured objective proposals rather than code (§4.7).
//!
//! A quest has no worktree and no hat. Unlike the Ralph loop, there is no
//! `sessions` row to hang a resumable handle off -- every turn is a fresh
//! `spawn` seeded with the full conversation rendered into the prompt, and
//! `quest_messages` is itself the durable record of the exchange.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use poindexter_db::models::{
    Autonomy, MessageRole, Quest, QuestDraft, QuestMessage, QuestStatus, Task, TaskStatus,
    TaskType,
};
use poindexter_db::queries::projects as project_db;
use poindexter_db::queries::quests as quest_db;
use poindexter_db::queries::tasks::{self as task_db, NewTask};
use sqlx::PgPool;

use crate::eventbus::EventBus;
use crate::harness::types::{AgentEvent, MaterializedTask};
use crate::harness::Harness;

const QUEST_PROMPT_PREAMBLE: &str = "You are a planning assistant for a software project. \
     Discuss the user's goal and, when you have enough detail to propose concrete work, \
     emit one or more objective drafts as lines of the form:\n\
     OBJECTIVE_DRAFT: {\"draft_id\": \"...\", \"title\": \"...\", \"description\": \"...\", \
     \"checklist\": [{\"label\": \"...\", \"required\": true}], \"auto_start\": false}\n\
     If you need the user to decide something before proposing work, emit:\n\
     QUESTION: {\"question\": \"...\", \"options\": [\"...\"]}\n\
     You do not write code in this conversation.";

/// Start a new planning conversation for a project.
pub async fn start_quest(
    pool: &PgPool,
    project_id: Uuid,
    title: Option<&str>,
    model_choice: Option<&str>,
) -> Result<Quest> {
    quest_db::insert_quest(pool, project_id, title, model_choice).await
}

/// The result of one round-trip through a quest's conversation.
#[derive(Debug, Clone)]
pub struct QuestTurn {
    pub assistant_message: QuestMessage,
    pub drafts: Vec<QuestDraft>,
    pub questions: Vec<QuestQuestion>,
}

/// A `QUESTION` marker embedded in an assistant turn (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct QuestQuestion {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// An `OBJECTIVE_DRAFT` marker embedded in an assistant turn (§6), before
/// it has been recorded as a [`QuestDraft`] row.
#[derive(Debug, Clone, Deserialize)]
struct ObjectiveDraftPayload {
    draft_id: String,
    title: String,
    description: String,
    #[serde(default)]
    checklist: Value,
    #[serde(default)]
    auto_start: bool,
}

/// Send a user message to a quest's conversation and collect the agent's
/// reply, recording any objective drafts or questions it emits.
pub async fn send_message(
    pool: &PgPool,
    harness: &dyn Harness,
    events: &EventBus,
    quest_id: Uuid,
    user_text: &str,
    working_dir: &Path,
) -> Result<QuestTurn> {
    let quest = quest_db::get_quest(pool, quest_id)
        .await?
        .with_context(|| format!("quest {quest_id} not found"))?;
    anyhow::ensure!(
        quest.status == QuestStatus::Active,
        "quest {quest_id} is not active"
    );

    quest_db::insert_quest_message(pool, quest_id, MessageRole::User, user_text, None).await?;

    let history = quest_db::list_quest_messages(pool, quest_id).await?;
    let prompt = compose_quest_prompt(&history);

    let materialized = MaterializedTask {
        task_id: quest_id,
        name: quest.title.clone().unwrap_or_else(|| "quest".to_string()),
        description: prompt,
        invariant_commands: vec![],
        working_dir: working_dir.to_path_buf(),
        env_vars: HashMap::new(),
    };

    let handle = harness
        .spawn(&materialized)
        .await
        .context("failed to spawn quest agent")?;

    let response_text = collect_reply(harness, &handle, events, quest_id).await;

    let draft_payloads = parse_objective_drafts(&response_text);
    let questions = parse_questions(&response_text);

    let mut drafts = Vec::with_capacity(draft_payloads.len());
    for payload in draft_payloads {
        match quest_db::insert_quest_draft(
            pool,
            quest_id,
            &payload.draft_id,
            &payload.title,
            &payload.description,
            payload.checklist.clone(),
            payload.auto_start,
        )
        .await
        {
            Ok(draft) => drafts.push(draft),
            Err(_) => {
                // The agent re-emitted a draft-id it already proposed this
                // conversation; surface the existing row rather than erroring.
                if let Some(existing) = quest_db::get_quest_draft(pool, quest_id, &payload.draft_id).await? {
                    drafts.push(existing);
                }
            }
        }
    }

    let assistant_message = quest_db::insert_quest_message(
        pool,
        quest_id,
        MessageRole::Assistant,
        &response_text,
        Some(serde_json::json!({
            "drafts": drafts.iter().map(|d| &d.draft_id).collect::<Vec<_>>(),
        })),
    )
    .await?;

    events.publish(
        "quest.turn",
        None,
        serde_json::json!({
            "quest_id": quest_id,
            "draft_count": drafts.len(),
            "question_count": questions.len(),
        }),
    );

    Ok(QuestTurn {
        assistant_message,
        drafts,
        questions,
    })
}

async fn collect_reply(
    harness: &dyn Harness,
    handle: &crate::harness::types::AgentHandle,
    events: &EventBus,
    quest_id: Uuid,
) -> String {
    let mut response_text = String::new();
    let mut stream = harness.events(handle);

    while let Some(event) = stream.next().await {
        let is_completed = matches!(event, AgentEvent::Completed);

        if let AgentEvent::Message { content, .. } = &event {
            response_text.push_str(content);
            response_text.push('\n');
        }

        events.publish(
            "quest.message",
            None,
            serde_json::json!({"quest_id": quest_id, "event": format!("{:?}", event)}),
        );

        if is_completed {
            break;
        }
    }

    response_text
}

/// Scan assistant text for embedded `OBJECTIVE_DRAFT: {json}` markers
/// (§6). One marker per line; a line whose JSON body fails to parse is
/// logged and skipped rather than failing the whole turn.
fn parse_objective_drafts(text: &str) -> Vec<ObjectiveDraftPayload> {
    text.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("OBJECTIVE_DRAFT:")?;
            match serde_json::from_str::<ObjectiveDraftPayload>(rest.trim()) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::debug!(error = %e, line, "ignoring malformed OBJECTIVE_DRAFT marker");
                    None
                }
            }
        })
        .collect()
}

/// Scan assistant text for embedded `QUESTION: {json}` markers (§6).
fn parse_questions(text: &str) -> Vec<QuestQuestion> {
    text.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("QUESTION:")?;
            match serde_json::from_str::<QuestQuestion>(rest.trim()) {
                Ok(question) => Some(question),
                Err(e) => {
                    tracing::debug!(error = %e, line, "ignoring malformed QUESTION marker");
                    None
                }
            }
        })
        .collect()
}

fn compose_quest_prompt(history: &[QuestMessage]) -> String {
    let mut prompt = String::new();
    prompt.push_str(QUEST_PROMPT_PREAMBLE);
    prompt.push_str("\n\n# Conversation so far\n\n");
    for message in history {
        prompt.push_str(&format!("**{}:** {}\n\n", message.role, message.content));
    }
    prompt
}

/// Accept an objective draft, creating its task. Idempotent by draft-id:
/// accepting the same draft twice returns the same task both times (§8
/// property 4).
pub async fn accept_draft(pool: &PgPool, quest_id: Uuid, draft_id: &str) -> Result<Task> {
    let draft = quest_db::get_quest_draft(pool, quest_id, draft_id)
        .await?
        .with_context(|| format!("draft {draft_id} not found for quest {quest_id}"))?;

    if draft.consumed {
        let task_id = draft
            .task_id
            .with_context(|| format!("draft {draft_id} marked consumed with no task"))?;
        return task_db::get_task(pool, task_id)
            .await?
            .with_context(|| format!("task {task_id} not found"));
    }

    let quest = quest_db::get_quest(pool, quest_id)
        .await?
        .with_context(|| format!("quest {quest_id} not found"))?;
    let project = project_db::get_project(pool, quest.project_id)
        .await?
        .with_context(|| format!("project {} not found", quest.project_id))?;

    let description = render_task_description(&draft);
    let new_task = NewTask {
        project_id: quest.project_id,
        quest_id: Some(quest_id),
        parent_id: None,
        title: &draft.title,
        description: &description,
        task_type: TaskType::Task,
        priority: 0,
        // Quest-spawned tasks start at the most conservative autonomy
        // level; the user can raise it explicitly once the draft becomes
        // a task.
        autonomy: Autonomy::Supervised,
        base_branch: &project.default_branch,
        token_budget: None,
        wall_seconds_budget: None,
        dollar_cents_budget: None,
        retry_max: 3,
    };

    let task = task_db::insert_task(pool, &new_task)
        .await
        .context("failed to create task from draft")?;

    let affected = quest_db::consume_quest_draft(pool, quest_id, draft_id, task.id).await?;
    if affected == 0 {
        // Lost the race: another caller consumed the draft first. Return
        // the task that call created instead of this one.
        let existing = quest_db::get_quest_draft(pool, quest_id, draft_id)
            .await?
            .with_context(|| format!("draft {draft_id} vanished for quest {quest_id}"))?;
        let existing_task_id = existing
            .task_id
            .with_context(|| format!("draft {draft_id} consumed with no task"))?;
        return task_db::get_task(pool, existing_task_id)
            .await?
            .with_context(|| format!("task {existing_task_id} not found"));
    }

    if draft.auto_start {
        task_db::transition_task_status(
            pool,
            task.id,
            TaskStatus::Pending,
            TaskStatus::Ready,
            None,
            None,
        )
        .await?;
    }

    Ok(task)
}

fn render_task_description(draft: &QuestDraft) -> String {
    let mut description = draft.description.clone();
    if let Some(items) = draft.checklist.as_array() {
        description.push_str("\n\n# Checklist\n\n");
        for item in items {
            let label = item.get("label").and_then(Value::as_str).unwrap_or("");
            let required = item
                .get("required")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            description.push_str(&format!(
                "- [{}] {}\n",
                if required { "required" } else { "optional" },
                label
            ));
        }
    }
    description
}

/// Mark a quest complete. A completed quest no longer accepts messages.
pub async fn complete_quest(pool: &PgPool, quest_id: Uuid) -> Result<()> {
    let affected = quest_db::complete_quest(pool, quest_id).await?;
    anyhow::ensure!(affected > 0, "quest {quest_id} was not active");
    Ok(())
}
