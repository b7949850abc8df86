use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use axum::response::Html;
use poindexter_core::approval;
use poindexter_core::eventbus::{EventBus, Subscription};
use poindexter_core::state::dispatch;
use poindexter_db::models::{AgentEvent, Approval, Invariant, Project, Quest, Task};
use poindexter_db::queries::tasks::ProjectProgress;
use poindexter_db::queries::{
    agent_events, approvals as approval_db,
    gate_results::{self, GateResultWithName},
    invariants as invariant_db, projects as project_db, quests as quest_db, tasks as task_db,
};

/// Interval between WebSocket heartbeat frames (§6: "heartbeat every 30s").
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }
}

/// Map an error from a state-machine dispatch call to the right status code.
/// Transition and approval-lifecycle violations are input errors (§7) and
/// surface as 409; anything else is a genuine server fault.
fn map_dispatch_err(err: anyhow::Error) -> AppError {
    let message = format!("{err:#}");
    if message.contains("invalid task transition")
        || message.contains("is not in status")
        || message.contains("is not pending")
    {
        AppError::conflict(message)
    } else {
        AppError::internal(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub pending: i64,
    pub planning: i64,
    pub blocked: i64,
    pub ready: i64,
    pub running: i64,
    pub paused: i64,
    pub completed: i64,
    pub completed_with_issues: i64,
    pub cancelled: i64,
    pub quarantined: i64,
    pub total: i64,
}

impl From<ProjectProgress> for ProgressResponse {
    fn from(p: ProjectProgress) -> Self {
        Self {
            pending: p.pending,
            planning: p.planning,
            blocked: p.blocked,
            ready: p.ready,
            running: p.running,
            paused: p.paused,
            completed: p.completed,
            completed_with_issues: p.completed_with_issues,
            cancelled: p.cancelled,
            quarantined: p.quarantined,
            total: p.total,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenUsageResponse {
    pub tokens_used: i64,
    pub wall_seconds_used: i64,
    pub dollar_cents_used: i64,
}

#[derive(Debug, Serialize)]
pub struct ProjectSummaryResponse {
    #[serde(flatten)]
    pub project: Project,
    pub progress: ProgressResponse,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetailResponse {
    #[serde(flatten)]
    pub project: Project,
    pub progress: ProgressResponse,
    pub token_usage: TokenUsageResponse,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub task: Task,
    pub dependencies: Vec<Uuid>,
    pub invariants: Vec<Invariant>,
    pub events: Vec<AgentEvent>,
    pub gate_results: Vec<GateResultWithName>,
    pub token_usage: TokenUsageResponse,
}

#[derive(Debug, Serialize)]
pub struct QuestDetailResponse {
    #[serde(flatten)]
    pub quest: Quest,
    pub tasks: Vec<Task>,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    events: EventBus,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool) -> Router {
    let state = AppState {
        pool,
        events: EventBus::new(),
    };

    Router::new()
        .route("/", get(index))
        .route("/api/projects", get(list_projects))
        .route("/api/projects/{id}", get(get_project_detail))
        .route("/api/projects/{id}/quests", get(list_project_quests))
        .route("/api/tasks/{id}", get(get_task_detail))
        .route("/api/tasks/{id}/start", post(start_task_handler))
        .route("/api/tasks/{id}/pause", post(pause_task_handler))
        .route("/api/tasks/{id}/resume", post(resume_task_handler))
        .route("/api/tasks/{id}/cancel", post(cancel_task_handler))
        .route("/api/quests/{id}", get(get_quest_detail))
        .route("/api/approvals", get(list_approvals_handler))
        .route("/api/approvals/{id}/approve", post(approve_approval_handler))
        .route("/api/approvals/{id}/reject", post(reject_approval_handler))
        .route("/api/invariants", get(list_invariants_handler))
        .route("/api/events", get(events_ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, bind: &str, port: u16) -> Result<()> {
    let app = build_router(pool);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("poindexter serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("poindexter serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let projects = project_db::list_projects(&state.pool)
        .await
        .map_err(AppError::internal)?;

    let rows = if projects.is_empty() {
        "<tr><td colspan=\"3\">No projects found.</td></tr>".to_string()
    } else {
        projects
            .iter()
            .map(|p| {
                format!(
                    "<tr><td><a href=\"/api/projects/{id}\">{name}</a></td><td>{branch}</td><td>{id}</td></tr>",
                    id = p.id,
                    name = p.name,
                    branch = p.default_branch,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let html = format!(
        "<!DOCTYPE html>\
<html><head><title>poindexter</title></head><body>\
<h1>poindexter</h1>\
<p><a href=\"/api/projects\">/api/projects</a> | <a href=\"/api/approvals\">/api/approvals</a> | <a href=\"/api/invariants\">/api/invariants</a></p>\
<table><tr><th>Project</th><th>Default branch</th><th>ID</th></tr>{rows}</table>\
</body></html>"
    );

    Ok(Html(html).into_response())
}

async fn list_projects(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let projects = project_db::list_projects(&state.pool)
        .await
        .map_err(AppError::internal)?;

    let mut results = Vec::with_capacity(projects.len());
    for project in projects {
        let progress = task_db::get_project_progress(&state.pool, project.id)
            .await
            .map_err(AppError::internal)?;
        results.push(ProjectSummaryResponse {
            project,
            progress: progress.into(),
        });
    }

    Ok(Json(results).into_response())
}

async fn get_project_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let project = project_db::get_project(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("project {id} not found")))?;

    let progress = task_db::get_project_progress(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    let tasks = task_db::list_tasks_for_project(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    let token_usage = TokenUsageResponse {
        tokens_used: tasks.iter().map(|t| t.tokens_used).sum(),
        wall_seconds_used: tasks.iter().map(|t| t.wall_seconds_used).sum(),
        dollar_cents_used: tasks.iter().map(|t| t.dollar_cents_used).sum(),
    };

    Ok(Json(ProjectDetailResponse {
        project,
        progress: progress.into(),
        token_usage,
        tasks,
    })
    .into_response())
}

async fn list_project_quests(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let quests = quest_db::list_quests_for_project(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(quests).into_response())
}

async fn get_task_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let task = task_db::get_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    let dependencies = task_db::get_task_dependencies(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    let invariants = invariant_db::get_invariants_for_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    let events = agent_events::list_all_events_for_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    let gate_results = gate_results::get_latest_gate_results(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    let token_usage = TokenUsageResponse {
        tokens_used: task.tokens_used,
        wall_seconds_used: task.wall_seconds_used,
        dollar_cents_used: task.dollar_cents_used,
    };

    Ok(Json(TaskDetailResponse {
        task,
        dependencies,
        invariants,
        events,
        gate_results,
        token_usage,
    })
    .into_response())
}

async fn get_quest_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let quest = quest_db::get_quest(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("quest {id} not found")))?;

    let tasks = task_db::list_tasks_for_quest(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(QuestDetailResponse { quest, tasks }).into_response())
}

async fn list_approvals_handler(
    State(state): State<AppState>,
) -> Result<axum::response::Response, AppError> {
    let approvals: Vec<Approval> = approval_db::list_pending_approvals(&state.pool)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(approvals).into_response())
}

async fn list_invariants_handler(
    State(state): State<AppState>,
) -> Result<axum::response::Response, AppError> {
    let invariants = invariant_db::list_invariants(&state.pool)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(invariants).into_response())
}

// ---------------------------------------------------------------------------
// Mutating task routes
// ---------------------------------------------------------------------------

async fn fetch_task(pool: &PgPool, id: Uuid) -> Result<Task, AppError> {
    task_db::get_task(pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))
}

async fn start_task_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    dispatch::start_task(&state.pool, id)
        .await
        .map_err(map_dispatch_err)?;
    let task = fetch_task(&state.pool, id).await?;
    state
        .events
        .publish("task.started", Some(id), serde_json::json!({"status": task.status}));
    Ok(Json(task).into_response())
}

async fn pause_task_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    dispatch::pause_task(&state.pool, id)
        .await
        .map_err(map_dispatch_err)?;
    let task = fetch_task(&state.pool, id).await?;
    state
        .events
        .publish("task.paused", Some(id), serde_json::json!({"status": task.status}));
    Ok(Json(task).into_response())
}

async fn resume_task_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    dispatch::resume_task(&state.pool, id)
        .await
        .map_err(map_dispatch_err)?;
    let task = fetch_task(&state.pool, id).await?;
    state
        .events
        .publish("task.resumed", Some(id), serde_json::json!({"status": task.status}));
    Ok(Json(task).into_response())
}

async fn cancel_task_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let task = fetch_task(&state.pool, id).await?;
    dispatch::cancel_task(&state.pool, &task)
        .await
        .map_err(map_dispatch_err)?;
    let task = fetch_task(&state.pool, id).await?;
    state
        .events
        .publish("task.cancelled", Some(id), serde_json::json!({"status": task.status}));
    Ok(Json(task).into_response())
}

// ---------------------------------------------------------------------------
// Mutating approval routes
// ---------------------------------------------------------------------------

async fn approve_approval_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let resolved = approval::resolve(&state.pool, id, true)
        .await
        .map_err(map_dispatch_err)?;
    state.events.publish(
        "approval.resolved",
        Some(resolved.task_id),
        serde_json::json!({"approval_id": resolved.id, "approved": true}),
    );
    Ok(Json(resolved).into_response())
}

async fn reject_approval_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let resolved = approval::resolve(&state.pool, id, false)
        .await
        .map_err(map_dispatch_err)?;
    state.events.publish(
        "approval.resolved",
        Some(resolved.task_id),
        serde_json::json!({"approval_id": resolved.id, "approved": false}),
    );
    Ok(Json(resolved).into_response())
}

// ---------------------------------------------------------------------------
// Event stream (§4.6, §6)
// ---------------------------------------------------------------------------

async fn events_ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> axum::response::Response {
    ws.on_upgrade(move |socket| stream_events(socket, state.events.subscribe()))
}

/// Drive one client's WebSocket connection: forward every bus event as a
/// `{type, payload}` JSON frame, plus a heartbeat frame every 30s so proxies
/// don't kill the connection as idle. The stream carries no replay buffer --
/// a client that reconnects is expected to refetch current state over the
/// REST surface rather than ask for what it missed.
async fn stream_events(mut socket: WebSocket, mut sub: Subscription) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately; discard it

    loop {
        tokio::select! {
            event = sub.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(_) => return,
                };
                let frame = serde_json::json!({"type": event.event_type, "payload": event.payload});
                if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                    return;
                }
            }
            _ = heartbeat.tick() => {
                let frame = serde_json::json!({"type": "heartbeat", "payload": null});
                if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                    return;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(_)) => return,
                    _ => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
