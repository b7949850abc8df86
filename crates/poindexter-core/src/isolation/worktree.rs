//! Git worktree isolation backend.
//!
//! Wraps [`WorktreeManager`] behind the [`Isolation`] trait.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{Isolation, WorkspaceInfo};
use crate::worktree::WorktreeManager;

/// Isolation backend backed by git worktrees.
#[derive(Debug)]
pub struct WorktreeIsolation {
    manager: WorktreeManager,
}

impl WorktreeIsolation {
    /// Create a new `WorktreeIsolation` from an existing `WorktreeManager`.
    pub fn new(manager: WorktreeManager) -> Self {
        Self { manager }
    }

    /// Access the underlying `WorktreeManager`.
    pub fn manager(&self) -> &WorktreeManager {
        &self.manager
    }
}

#[async_trait]
impl Isolation for WorktreeIsolation {
    fn name(&self) -> &str {
        "worktree"
    }

    async fn create_workspace(&self, project_name: &str, task_name: &str) -> Result<WorkspaceInfo> {
        let branch_name = WorktreeManager::branch_name(project_name, task_name);
        let wt_info = self
            .manager
            .create_worktree(&branch_name)
            .with_context(|| format!("failed to create worktree for {project_name}/{task_name}"))?;

        Ok(WorkspaceInfo {
            path: wt_info.path,
            host_path: None,
            branch: wt_info.branch,
            container_id: None,
        })
    }

    async fn extract_results(&self, _info: &WorkspaceInfo) -> Result<()> {
        // No-op: worktree isolation writes directly to the host filesystem.
        Ok(())
    }

    async fn remove_workspace(&self, info: &WorkspaceInfo) -> Result<()> {
        self.manager
            .remove_worktree(&info.path)
            .with_context(|| format!("failed to remove worktree at {}", info.path.display()))?;
        Ok(())
    }
}
