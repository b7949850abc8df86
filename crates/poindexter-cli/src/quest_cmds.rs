//! Operator-mode CLI handlers for `poindexter quest` subcommands.
//!
//! Implements:
//! - `poindexter quest start <project-id>`        -- start a planning conversation
//! - `poindexter quest send <quest-id> <message>`  -- send a turn, print any drafts/questions
//! - `poindexter quest show [quest-id]`            -- show quest detail or list all quests
//! - `poindexter quest accept <quest-id> <draft-id>` -- accept an objective draft into a task
//! - `poindexter quest complete <quest-id>`        -- end a quest

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use poindexter_core::eventbus::EventBus;
use poindexter_core::harness::{ClaudeCodeAdapter, HarnessRegistry};
use poindexter_core::quest;
use poindexter_db::queries::projects as project_db;
use poindexter_db::queries::quests as quest_db;

use crate::QuestCommands;

/// Dispatch a `QuestCommands` variant to the appropriate handler.
pub async fn run_quest_command(command: QuestCommands, pool: &PgPool) -> Result<()> {
    match command {
        QuestCommands::Start { project_id, title } => cmd_start(pool, &project_id, title).await,
        QuestCommands::Send { quest_id, message } => cmd_send(pool, &quest_id, &message).await,
        QuestCommands::Show { quest_id } => match quest_id {
            Some(id) => cmd_show_one(pool, &id).await,
            None => cmd_show_all(pool).await,
        },
        QuestCommands::Accept { quest_id, draft_id } => {
            cmd_accept(pool, &quest_id, &draft_id).await
        }
        QuestCommands::Complete { quest_id } => cmd_complete(pool, &quest_id).await,
    }
}

async fn cmd_start(pool: &PgPool, project_id_str: &str, title: Option<String>) -> Result<()> {
    let project_id = crate::resolve::resolve_project_id(project_id_str)?;
    let project = project_db::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;

    let q = quest::start_quest(pool, project.id, title.as_deref(), None).await?;

    println!("Quest started.");
    println!();
    println!("  Quest ID: {}", q.id);
    println!("  Project:  {}", project.name);
    if let Some(title) = &q.title {
        println!("  Title:    {title}");
    }

    Ok(())
}

async fn cmd_send(pool: &PgPool, quest_id_str: &str, message: &str) -> Result<()> {
    let quest_id: Uuid = quest_id_str
        .parse()
        .with_context(|| format!("invalid quest ID: {quest_id_str:?}"))?;

    let q = quest_db::get_quest(pool, quest_id)
        .await?
        .with_context(|| format!("quest {quest_id} not found"))?;
    let project = project_db::get_project(pool, q.project_id)
        .await?
        .with_context(|| format!("project {} not found", q.project_id))?;

    let mut registry = HarnessRegistry::new();
    registry.register(ClaudeCodeAdapter::new());
    let registry = Arc::new(registry);
    let harness = registry
        .get("claude-code")
        .context("claude-code harness not registered")?;

    let events = EventBus::new();
    let working_dir = Path::new(&project.repo_path);

    let turn = quest::send_message(pool, harness, &events, quest_id, message, working_dir).await?;

    println!("{}", turn.assistant_message.content.trim());

    if !turn.questions.is_empty() {
        println!();
        println!("Questions:");
        for q in &turn.questions {
            println!("  - {}", q.question);
            for opt in &q.options {
                println!("      [{opt}]");
            }
        }
    }

    if !turn.drafts.is_empty() {
        println!();
        println!("Objective drafts:");
        for d in &turn.drafts {
            println!("  - [{}] {}", d.draft_id, d.title);
        }
        println!();
        println!("Accept one with: poindexter quest accept {quest_id} <draft-id>");
    }

    Ok(())
}

async fn cmd_show_all(pool: &PgPool) -> Result<()> {
    let projects = project_db::list_projects(pool).await?;
    let mut any = false;

    println!("{:<38} {:<10} {:<38} TITLE", "QUEST ID", "STATUS", "PROJECT ID");
    for project in &projects {
        let quests = quest_db::list_quests_for_project(pool, project.id).await?;
        for q in &quests {
            any = true;
            println!(
                "{:<38} {:<10} {:<38} {}",
                q.id,
                q.status,
                project.id,
                q.title.as_deref().unwrap_or("-"),
            );
        }
    }

    if !any {
        println!("No quests found. Use `poindexter quest start <project-id>` to start one.");
    }

    Ok(())
}

async fn cmd_show_one(pool: &PgPool, quest_id_str: &str) -> Result<()> {
    let quest_id: Uuid = quest_id_str
        .parse()
        .with_context(|| format!("invalid quest ID: {quest_id_str:?}"))?;

    let q = quest_db::get_quest(pool, quest_id)
        .await?
        .with_context(|| format!("quest {quest_id} not found"))?;

    println!("Quest: {}", q.title.as_deref().unwrap_or("(untitled)"));
    println!("  ID:      {}", q.id);
    println!("  Status:  {}", q.status);
    println!(
        "  Created: {}",
        q.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(completed) = q.completed_at {
        println!(
            "  Completed: {}",
            completed.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    println!();

    let drafts = quest_db::list_quest_drafts(pool, quest_id).await?;
    if !drafts.is_empty() {
        println!("Drafts:");
        for d in &drafts {
            let marker = if d.consumed { "x" } else { " " };
            println!("  [{marker}] {} -- {}", d.draft_id, d.title);
        }
        println!();
    }

    let messages = quest_db::list_quest_messages(pool, quest_id).await?;
    println!("Conversation ({} turns):", messages.len());
    for m in &messages {
        println!("  {}: {}", m.role, m.content.trim());
    }

    Ok(())
}

async fn cmd_accept(pool: &PgPool, quest_id_str: &str, draft_id: &str) -> Result<()> {
    let quest_id: Uuid = quest_id_str
        .parse()
        .with_context(|| format!("invalid quest ID: {quest_id_str:?}"))?;

    let task = quest::accept_draft(pool, quest_id, draft_id).await?;

    println!("Draft accepted.");
    println!("  Task ID: {}", task.id);
    println!("  Title:   {}", task.title);
    println!("  Status:  {}", task.status);

    Ok(())
}

async fn cmd_complete(pool: &PgPool, quest_id_str: &str) -> Result<()> {
    let quest_id: Uuid = quest_id_str
        .parse()
        .with_context(|| format!("invalid quest ID: {quest_id_str:?}"))?;

    quest::complete_quest(pool, quest_id).await?;
    println!("Quest {quest_id} completed.");

    Ok(())
}
