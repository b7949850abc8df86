//! `poindexter merge <project-id>` command: merge completed task branches into the base branch.

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use poindexter_core::worktree::{MergeResult, WorktreeManager};
use poindexter_db::models::TaskStatus;
use poindexter_db::queries::projects as project_db;
use poindexter_db::queries::tasks as task_db;

/// Run the merge command.
pub async fn run_merge(pool: &PgPool, project_id_str: &str, dry_run: bool) -> Result<()> {
    let project_id = Uuid::parse_str(project_id_str)
        .with_context(|| format!("invalid project ID: {project_id_str}"))?;

    let project = project_db::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;

    if !task_db::is_project_complete(pool, project_id).await? {
        bail!(
            "project {} still has tasks in flight -- all tasks must reach a terminal state before merging",
            project_id
        );
    }

    let worktree_manager =
        WorktreeManager::new(&project.repo_path, None).map_err(|e| anyhow::anyhow!("{e}"))?;

    let tasks = task_db::list_tasks_for_project(pool, project_id).await?;

    // Build dependency-ordered list using topological sort.
    let deps = build_dependency_map(pool, &tasks).await?;
    let ordered = topological_sort(&tasks, &deps)?;

    if !dry_run {
        worktree_manager
            .checkout(&project.default_branch)
            .map_err(|e| anyhow::anyhow!("failed to checkout {}: {e}", project.default_branch))?;
    }

    println!(
        "Merging {} task branch(es) into {}",
        ordered.len(),
        project.default_branch
    );

    let mut merged = 0;
    for task in &ordered {
        if task.status != TaskStatus::Completed {
            continue;
        }

        let branch = match &task.branch_name {
            Some(b) => b.clone(),
            None => WorktreeManager::branch_name(&project.name, &task.title),
        };

        if dry_run {
            println!("  Would merge: {branch}");
            merged += 1;
            continue;
        }

        print!("  Merging {branch}...");
        match worktree_manager.merge_branch(&branch) {
            Ok(MergeResult::Success) => {
                println!(" ok");
                merged += 1;
            }
            Ok(MergeResult::Conflict { details }) => {
                println!(" CONFLICT");
                eprintln!("\nMerge conflict on branch {branch}:");
                eprintln!("{details}");
                eprintln!("\nStopping. Please resolve the conflict manually and re-run.");
                bail!("merge conflict on branch {branch}");
            }
            Err(e) => {
                println!(" ERROR");
                bail!("failed to merge {branch}: {e}");
            }
        }
    }

    if dry_run {
        println!("\nDry run complete: {merged} branch(es) would be merged.");
    } else {
        println!(
            "\nMerge complete: {merged} branch(es) merged into {}.",
            project.default_branch
        );
    }

    Ok(())
}

/// Build a map of task_id -> list of dependency task_ids.
async fn build_dependency_map(
    pool: &PgPool,
    tasks: &[poindexter_db::models::Task],
) -> Result<std::collections::HashMap<Uuid, Vec<Uuid>>> {
    let mut deps = std::collections::HashMap::new();
    for task in tasks {
        let task_deps = task_db::get_task_dependencies(pool, task.id).await?;
        deps.insert(task.id, task_deps);
    }
    Ok(deps)
}

/// Topological sort of tasks based on dependencies.
fn topological_sort(
    tasks: &[poindexter_db::models::Task],
    deps: &std::collections::HashMap<Uuid, Vec<Uuid>>,
) -> Result<Vec<poindexter_db::models::Task>> {
    use std::collections::{HashMap, HashSet, VecDeque};

    let task_map: HashMap<Uuid, &poindexter_db::models::Task> =
        tasks.iter().map(|t| (t.id, t)).collect();

    let task_ids: HashSet<Uuid> = tasks.iter().map(|t| t.id).collect();
    let mut in_degree: HashMap<Uuid, usize> = tasks.iter().map(|t| (t.id, 0)).collect();

    for task in tasks {
        if let Some(task_deps) = deps.get(&task.id) {
            for dep_id in task_deps {
                if task_ids.contains(dep_id) {
                    *in_degree.entry(task.id).or_default() += 1;
                }
            }
        }
    }

    let mut queue: VecDeque<Uuid> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut sorted_queue: Vec<Uuid> = queue.drain(..).collect();
    sorted_queue.sort_by_key(|id| task_map[id].created_at);
    queue.extend(sorted_queue);

    let mut result = Vec::with_capacity(tasks.len());

    let mut reverse: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for task in tasks {
        if let Some(task_deps) = deps.get(&task.id) {
            for dep_id in task_deps {
                if task_ids.contains(dep_id) {
                    reverse.entry(*dep_id).or_default().push(task.id);
                }
            }
        }
    }

    while let Some(id) = queue.pop_front() {
        result.push(task_map[&id].clone());
        if let Some(dependents) = reverse.get(&id) {
            for dep in dependents {
                let deg = in_degree.get_mut(dep).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(*dep);
                }
            }
        }
    }

    if result.len() != tasks.len() {
        bail!("dependency cycle detected in task graph");
    }

    Ok(result)
}
