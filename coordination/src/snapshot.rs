//! Safety snapshots taken before a repair and restored on instability
//!
//! The core never inspects a snapshot; it only holds the opaque id returned by
//! [`SafetySnapshotManager::create_snapshot`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::process::{run_with_timeout, truncate_output};
use crate::state::SnapshotId;

/// Result of a rollback request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    pub error_message: Option<String>,
}

impl RollbackResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
        }
    }
}

/// Creates and restores environment snapshots
#[async_trait]
pub trait SafetySnapshotManager: Send + Sync {
    /// Best-effort: `None` means no snapshot could be taken
    async fn create_snapshot(&self, description: &str) -> Option<SnapshotId>;

    async fn rollback_to_snapshot(&self, snapshot_id: &str, reason: &str) -> RollbackResult;
}

/// Manager for deployments without snapshot support
pub struct NoSnapshots;

#[async_trait]
impl SafetySnapshotManager for NoSnapshots {
    async fn create_snapshot(&self, _description: &str) -> Option<SnapshotId> {
        None
    }

    async fn rollback_to_snapshot(&self, snapshot_id: &str, _reason: &str) -> RollbackResult {
        RollbackResult::failed(format!("snapshots are disabled; cannot restore {snapshot_id}"))
    }
}

/// Default timeout for a single git invocation
const GIT_TIMEOUT_SECS: u64 = 60;

/// Snapshots a working tree as git checkpoint commits.
///
/// A snapshot stages everything and commits (allowing empty commits, so an
/// unchanged tree still yields a distinct id). Rollback hard-resets to that
/// commit and removes untracked files created since.
pub struct GitSnapshotManager {
    working_dir: PathBuf,
    commit_prefix: String,
    timeout: Duration,
}

impl GitSnapshotManager {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            commit_prefix: "[repair-snapshot]".to_string(),
            timeout: Duration::from_secs(GIT_TIMEOUT_SECS),
        }
    }

    pub fn with_commit_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.commit_prefix = prefix.into();
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Run git and return trimmed stdout
    async fn run_git(&self, args: &[&str]) -> Result<String, String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.working_dir);
        let output = run_with_timeout(&mut cmd, self.timeout)
            .await
            .map_err(|e| format!("git {}: {e}", args.join(" ")))?;

        if !output.status.success() {
            return Err(format!(
                "git {}: {}",
                args.join(" "),
                truncate_output(&output.stderr, 2048).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn checkpoint(&self, description: &str) -> Result<String, String> {
        self.run_git(&["add", "-A"]).await?;
        let message = format!("{} {}", self.commit_prefix, description);
        self.run_git(&[
            "-c",
            "user.name=repair-agent",
            "-c",
            "user.email=repair-agent@localhost",
            "commit",
            "--allow-empty",
            "--no-verify",
            "-m",
            &message,
        ])
        .await?;
        self.run_git(&["rev-parse", "HEAD"]).await
    }

    async fn hard_rollback(&self, commit: &str) -> Result<(), String> {
        // Verify the commit exists before touching the tree
        self.run_git(&["cat-file", "-t", commit]).await?;
        self.run_git(&["reset", "--hard", commit]).await?;
        self.run_git(&["clean", "-fd"]).await?;
        Ok(())
    }
}

#[async_trait]
impl SafetySnapshotManager for GitSnapshotManager {
    async fn create_snapshot(&self, description: &str) -> Option<SnapshotId> {
        match self.checkpoint(description).await {
            Ok(id) => {
                debug!(snapshot_id = %id, "Snapshot created");
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, dir = %self.working_dir.display(), "Snapshot failed");
                None
            }
        }
    }

    async fn rollback_to_snapshot(&self, snapshot_id: &str, reason: &str) -> RollbackResult {
        debug!(snapshot_id = %snapshot_id, reason = %reason, "Rolling back");
        match self.hard_rollback(snapshot_id).await {
            Ok(()) => RollbackResult::ok(),
            Err(e) => RollbackResult::failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::tempdir;

    fn setup_git_repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            StdCommand::new("git")
                .args(&args)
                .current_dir(dir.path())
                .output()
                .unwrap();
        }
        std::fs::write(dir.path().join("service.conf"), "port = 80\n").unwrap();
        StdCommand::new("git")
            .args(["add", "."])
            .current_dir(dir.path())
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["commit", "-m", "Initial commit"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_snapshot_and_rollback_restores_tree() {
        let dir = setup_git_repo();
        let manager = GitSnapshotManager::new(dir.path());

        let snapshot = manager.create_snapshot("before repair").await.unwrap();
        assert_eq!(snapshot.len(), 40);

        std::fs::write(dir.path().join("service.conf"), "port = 9999\n").unwrap();
        std::fs::write(dir.path().join("junk.txt"), "generated").unwrap();

        let result = manager
            .rollback_to_snapshot(&snapshot, "validation_failure")
            .await;
        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("service.conf")).unwrap(),
            "port = 80\n"
        );
        assert!(!dir.path().join("junk.txt").exists());
    }

    #[tokio::test]
    async fn test_unchanged_tree_still_snapshots() {
        let dir = setup_git_repo();
        let manager = GitSnapshotManager::new(dir.path());
        let first = manager.create_snapshot("one").await.unwrap();
        let second = manager.create_snapshot("two").await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_non_repo_yields_no_snapshot() {
        let dir = tempdir().unwrap();
        let manager = GitSnapshotManager::new(dir.path().join("missing"));
        assert!(manager.create_snapshot("x").await.is_none());
    }

    #[tokio::test]
    async fn test_rollback_to_unknown_commit_fails() {
        let dir = setup_git_repo();
        let manager = GitSnapshotManager::new(dir.path());
        let result = manager
            .rollback_to_snapshot("0000000000000000000000000000000000000000", "test")
            .await;
        assert!(!result.success);
        assert!(result.error_message.is_some());
    }

    #[tokio::test]
    async fn test_no_snapshots() {
        assert!(NoSnapshots.create_snapshot("x").await.is_none());
        assert!(!NoSnapshots.rollback_to_snapshot("s", "r").await.success);
    }
}
