//! TUI application state and data model.

use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use poindexter_db::models::{Project, Task};
use poindexter_db::queries::agent_events;
use poindexter_db::queries::gate_results::{self, GateResultWithName};
use poindexter_db::queries::projects as project_db;
use poindexter_db::queries::tasks as task_db;

/// Which view the TUI is currently showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    ProjectList,
    ProjectDetail(Uuid),
    TaskDetail(Uuid),
    ReviewQueue,
    Help,
}

/// Aggregated project info for the list view.
#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub project: Project,
    pub progress: task_db::ProjectProgress,
}

/// Re-export from poindexter-db for the review queue.
pub use poindexter_db::queries::tasks::TaskWithProjectName;

/// Application state for the TUI.
pub struct App {
    pub pool: PgPool,
    pub current_view: View,
    pub projects: Vec<ProjectRow>,
    pub selected_project: usize,
    pub tasks: Vec<Task>,
    pub selected_task: usize,
    pub gate_results: Vec<GateResultWithName>,
    pub events: Vec<poindexter_db::models::AgentEvent>,
    pub review_tasks: Vec<TaskWithProjectName>,
    pub selected_review: usize,
    pub tick_rate: Duration,
    pub should_quit: bool,
    pub status_message: Option<String>,
}

impl App {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            current_view: View::ProjectList,
            projects: Vec::new(),
            selected_project: 0,
            tasks: Vec::new(),
            selected_task: 0,
            gate_results: Vec::new(),
            events: Vec::new(),
            review_tasks: Vec::new(),
            selected_review: 0,
            tick_rate: Duration::from_secs(1),
            should_quit: false,
            status_message: None,
        }
    }

    /// Refresh data from the database based on the current view.
    pub async fn refresh(&mut self) -> Result<()> {
        match &self.current_view {
            View::ProjectList => {
                self.refresh_projects().await?;
            }
            View::ProjectDetail(project_id) => {
                let project_id = *project_id;
                self.tasks = task_db::list_tasks_for_project(&self.pool, project_id).await?;
                if self.selected_task >= self.tasks.len() && !self.tasks.is_empty() {
                    self.selected_task = self.tasks.len() - 1;
                }
            }
            View::TaskDetail(task_id) => {
                let task_id = *task_id;
                self.gate_results =
                    gate_results::get_latest_gate_results(&self.pool, task_id).await?;
                let mut events = agent_events::list_all_events_for_task(&self.pool, task_id).await?;
                if events.len() > 20 {
                    events.drain(..events.len() - 20);
                }
                self.events = events;
            }
            View::ReviewQueue => {
                self.refresh_review_queue().await?;
            }
            View::Help => {}
        }
        Ok(())
    }

    async fn refresh_projects(&mut self) -> Result<()> {
        let projects = project_db::list_projects(&self.pool).await?;
        let mut rows = Vec::with_capacity(projects.len());
        for project in projects {
            let progress = task_db::get_project_progress(&self.pool, project.id).await?;
            rows.push(ProjectRow { project, progress });
        }
        self.projects = rows;
        if self.selected_project >= self.projects.len() && !self.projects.is_empty() {
            self.selected_project = self.projects.len() - 1;
        }
        Ok(())
    }

    /// Tasks `paused` awaiting an operator decision, across all projects.
    async fn refresh_review_queue(&mut self) -> Result<()> {
        self.review_tasks = task_db::list_paused_tasks(&self.pool).await?;
        if self.selected_review >= self.review_tasks.len() && !self.review_tasks.is_empty() {
            self.selected_review = self.review_tasks.len() - 1;
        }
        Ok(())
    }

    // -- Navigation --

    pub fn navigate_back(&mut self) {
        match &self.current_view {
            View::ProjectList => self.should_quit = true,
            View::ProjectDetail(_) => self.current_view = View::ProjectList,
            View::TaskDetail(_) => {
                // Go back to the project that owns this task.
                if let Some(task) = self.tasks.first() {
                    self.current_view = View::ProjectDetail(task.project_id);
                } else {
                    self.current_view = View::ProjectList;
                }
            }
            View::ReviewQueue => self.current_view = View::ProjectList,
            View::Help => self.current_view = View::ProjectList,
        }
    }

    pub fn navigate_enter(&mut self) {
        match &self.current_view {
            View::ProjectList => {
                if let Some(row) = self.projects.get(self.selected_project) {
                    self.current_view = View::ProjectDetail(row.project.id);
                    self.selected_task = 0;
                }
            }
            View::ProjectDetail(_) => {
                if let Some(task) = self.tasks.get(self.selected_task) {
                    self.current_view = View::TaskDetail(task.id);
                }
            }
            _ => {}
        }
    }

    pub fn move_up(&mut self) {
        match &self.current_view {
            View::ProjectList => {
                if self.selected_project > 0 {
                    self.selected_project -= 1;
                }
            }
            View::ProjectDetail(_) => {
                if self.selected_task > 0 {
                    self.selected_task -= 1;
                }
            }
            View::ReviewQueue => {
                if self.selected_review > 0 {
                    self.selected_review -= 1;
                }
            }
            _ => {}
        }
    }

    pub fn move_down(&mut self) {
        match &self.current_view {
            View::ProjectList => {
                if !self.projects.is_empty() && self.selected_project < self.projects.len() - 1 {
                    self.selected_project += 1;
                }
            }
            View::ProjectDetail(_) => {
                if !self.tasks.is_empty() && self.selected_task < self.tasks.len() - 1 {
                    self.selected_task += 1;
                }
            }
            View::ReviewQueue => {
                if !self.review_tasks.is_empty()
                    && self.selected_review < self.review_tasks.len() - 1
                {
                    self.selected_review += 1;
                }
            }
            _ => {}
        }
    }

    pub fn cycle_view(&mut self) {
        self.current_view = match &self.current_view {
            View::ProjectList => View::ReviewQueue,
            View::ReviewQueue => View::ProjectList,
            other => other.clone(),
        };
    }

    pub fn show_help(&mut self) {
        self.current_view = View::Help;
    }

    // -- Actions --

    pub async fn approve_selected(&mut self) -> Result<()> {
        let task_id = self.selected_paused_task_id();
        if let Some(id) = task_id {
            crate::resolve_pending_approval(&self.pool, id, true).await?;
            self.status_message = Some("Task approved".to_string());
            self.refresh().await?;
        }
        Ok(())
    }

    pub async fn reject_selected(&mut self) -> Result<()> {
        let task_id = self.selected_paused_task_id();
        if let Some(id) = task_id {
            crate::resolve_pending_approval(&self.pool, id, false).await?;
            self.status_message = Some("Task rejected".to_string());
            self.refresh().await?;
        }
        Ok(())
    }

    pub async fn retry_selected(&mut self) -> Result<()> {
        let task_id = self.selected_actionable_task_id();
        if let Some(id) = task_id {
            crate::retry_task(&self.pool, id, false).await?;
            self.status_message = Some("Task queued for retry".to_string());
            self.refresh().await?;
        }
        Ok(())
    }

    /// Get the task ID of the currently selected task awaiting approval, if any.
    fn selected_paused_task_id(&self) -> Option<Uuid> {
        match &self.current_view {
            View::ReviewQueue => self.review_tasks.get(self.selected_review).map(|rt| rt.id),
            View::ProjectDetail(_) => self
                .tasks
                .get(self.selected_task)
                .filter(|t| t.status == poindexter_db::models::TaskStatus::Paused)
                .map(|t| t.id),
            _ => None,
        }
    }

    /// Get the task ID of the currently selected task if it's actionable
    /// (quarantined, i.e. it exhausted its retry budget and is waiting on
    /// an operator reopen).
    fn selected_actionable_task_id(&self) -> Option<Uuid> {
        match &self.current_view {
            View::ProjectDetail(_) => self
                .tasks
                .get(self.selected_task)
                .filter(|t| t.status == poindexter_db::models::TaskStatus::Quarantined)
                .map(|t| t.id),
            View::ReviewQueue => self
                .review_tasks
                .get(self.selected_review)
                .filter(|rt| rt.status == poindexter_db::models::TaskStatus::Quarantined)
                .map(|rt| rt.id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
