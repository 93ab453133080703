// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-execution git worktree lanes.
//!
//! Each claimed execution gets an isolated checkout under
//! `<project>/.goyais-worktrees/<execution_id>` on its own branch, so
//! concurrent executions against the same project never step on each other.
//! Preparation is best-effort: when the project is not a git repository, or
//! any git step fails or times out, the execution simply runs in the project
//! directory itself — degraded isolation is an event, not an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

const WORKTREE_BASE: &str = ".goyais-worktrees";
const GIT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("nothing to commit — working tree is clean")]
    NothingToCommit,

    #[error("git {command} failed (rc={code}): {stderr}")]
    Git {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("git command timed out after 60s: git {0}")]
    Timeout(String),

    #[error("git spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Where an execution actually runs. `created` marks lanes the worker owns
/// and must tear down.
#[derive(Debug, Clone)]
pub struct WorktreeContext {
    pub path: PathBuf,
    pub created: bool,
}

#[derive(Debug, Default)]
pub struct WorktreeManager;

impl WorktreeManager {
    pub fn new() -> Self {
        Self
    }

    pub fn lane_path(project_path: &Path, execution_id: &str) -> PathBuf {
        project_path.join(WORKTREE_BASE).join(execution_id)
    }

    pub fn branch_name(execution_id: &str) -> String {
        let short: String = execution_id.chars().take(10).collect();
        format!("goyais-{short}")
    }

    /// Prepare the lane for one execution. Never fails: any problem falls
    /// back to the project directory with `created=false`.
    pub async fn prepare(
        &self,
        execution_id: &str,
        project_path: &str,
        project_is_git: bool,
    ) -> WorktreeContext {
        let root = if project_path.is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            PathBuf::from(project_path)
        };

        if !project_is_git || !root.exists() {
            return WorktreeContext {
                path: root,
                created: false,
            };
        }

        let lane = Self::lane_path(&root, execution_id);
        if lane.exists() {
            return WorktreeContext {
                path: lane,
                created: true,
            };
        }
        if let Err(e) = tokio::fs::create_dir_all(root.join(WORKTREE_BASE)).await {
            warn!(execution_id, "worktree base dir creation failed: {e}");
            return WorktreeContext {
                path: root,
                created: false,
            };
        }

        let branch = Self::branch_name(execution_id);
        let lane_arg = lane.display().to_string();
        match run_git(
            &["worktree", "add", "-b", &branch, &lane_arg, "HEAD"],
            &root,
            &[],
        )
        .await
        {
            Ok(_) => {
                info!(execution_id, lane = %lane.display(), branch, "worktree lane created");
                WorktreeContext {
                    path: lane,
                    created: true,
                }
            }
            Err(e) => {
                warn!(execution_id, "worktree add failed, running in project dir: {e}");
                WorktreeContext {
                    path: root,
                    created: false,
                }
            }
        }
    }

    /// Tear down the lane created by [`prepare`]. Idempotent and best-effort.
    pub async fn cleanup(
        &self,
        context: &WorktreeContext,
        project_path: &str,
        project_is_git: bool,
    ) {
        if !context.created || !project_is_git {
            return;
        }
        let root = PathBuf::from(project_path);
        let lane = context.path.display().to_string();
        if !context.path.exists() {
            return;
        }
        if let Err(e) = run_git(&["worktree", "remove", "--force", &lane], &root, &[]).await {
            warn!("worktree remove failed: {e}");
            let _ = tokio::fs::remove_dir_all(&context.path).await;
        }
    }

    /// Remove the lane and its branch for an execution. Idempotent; invoked
    /// by the Hub-facing discard endpoint as well as internal cleanup.
    pub async fn remove(&self, project_path: &str, execution_id: &str, force: bool) {
        let root = PathBuf::from(project_path);
        let lane = Self::lane_path(&root, execution_id);
        let branch = Self::branch_name(execution_id);

        if lane.exists() {
            let lane_arg = lane.display().to_string();
            let mut args = vec!["worktree", "remove"];
            if force {
                args.push("--force");
            }
            args.push(&lane_arg);
            if let Err(e) = run_git(&args, &root, &[]).await {
                warn!(execution_id, "worktree remove failed: {e}");
                let _ = tokio::fs::remove_dir_all(&lane).await;
            }
        } else {
            debug!(execution_id, "worktree remove: lane already gone");
        }

        // Branch deletion is best-effort; the lane may never have existed.
        if let Err(e) = run_git(&["branch", "-D", &branch], &root, &[]).await {
            debug!(execution_id, "branch delete skipped: {e}");
        }
        info!(execution_id, "worktree removed");
    }

    /// Stage all changes in the lane and commit them with the given author.
    /// Returns the resulting commit SHA.
    pub async fn commit(
        &self,
        worktree_root: &Path,
        message: &str,
        git_name: &str,
        git_email: &str,
    ) -> Result<String, WorktreeError> {
        let identity = [
            ("GIT_AUTHOR_NAME", git_name),
            ("GIT_AUTHOR_EMAIL", git_email),
            ("GIT_COMMITTER_NAME", git_name),
            ("GIT_COMMITTER_EMAIL", git_email),
        ];

        run_git(&["add", "-A"], worktree_root, &identity).await?;

        // `diff --cached --quiet` exits 0 when the index is clean.
        match run_git(&["diff", "--cached", "--quiet"], worktree_root, &[]).await {
            Ok(_) => return Err(WorktreeError::NothingToCommit),
            Err(WorktreeError::Git { code: 1, .. }) => {}
            Err(e) => return Err(e),
        }

        run_git(&["commit", "-m", message], worktree_root, &identity).await?;
        let sha = run_git(&["rev-parse", "HEAD"], worktree_root, &[]).await?;
        Ok(sha.trim().to_string())
    }

    /// Unified diff of all uncommitted changes; after a commit left the tree
    /// clean, the last commit's patch instead.
    pub async fn diff(&self, worktree_root: &Path) -> Result<String, WorktreeError> {
        let diff = run_git(&["diff", "HEAD"], worktree_root, &[]).await?;
        if !diff.trim().is_empty() {
            return Ok(diff);
        }
        run_git(&["show", "HEAD"], worktree_root, &[]).await
    }
}

async fn run_git(
    args: &[&str],
    cwd: &Path,
    env: &[(&str, &str)],
) -> Result<String, WorktreeError> {
    let mut command = Command::new("git");
    command.args(args).current_dir(cwd).kill_on_drop(true);
    for (key, value) in env {
        command.env(key, value);
    }

    let output = tokio::time::timeout(GIT_TIMEOUT, command.output())
        .await
        .map_err(|_| WorktreeError::Timeout(args.join(" ")))??;

    if !output.status.success() {
        return Err(WorktreeError::Git {
            command: args.join(" "),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
