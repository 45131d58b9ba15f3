use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::models::VcsConfig;
use crate::domain::ports::SnapshotRecorder;

/// Commits passing artifacts to the project's git repository.
#[derive(Debug, Clone)]
pub struct GitSnapshotter {
    create_branch: bool,
    branch_prefix: String,
}

impl GitSnapshotter {
    pub fn new(create_branch: bool, branch_prefix: impl Into<String>) -> Self {
        Self {
            create_branch,
            branch_prefix: branch_prefix.into(),
        }
    }

    pub fn from_config(config: &VcsConfig) -> Self {
        Self::new(config.create_branch, config.branch_prefix.clone())
    }

    /// `<prefix>-YYYYMMDD-HHMMSS`
    pub fn branch_name(&self, started_at: DateTime<Utc>) -> String {
        format!("{}-{}", self.branch_prefix, started_at.format("%Y%m%d-%H%M%S"))
    }

    async fn is_repository(project: &Path) -> bool {
        Command::new("git")
            .current_dir(project)
            .args(["rev-parse", "--git-dir"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn git(project: &Path, args: &[&str], step: &'static str) -> Result<()> {
        let output = Command::new("git")
            .current_dir(project)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to {step}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to {step}: {}", stderr.trim());
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotRecorder for GitSnapshotter {
    async fn begin_session(
        &self,
        project: &Path,
        started_at: DateTime<Utc>,
    ) -> Result<Option<String>> {
        if !Self::is_repository(project).await {
            warn!(project = %project.display(), "not a git repository, snapshots disabled");
            return Ok(None);
        }
        if !self.create_branch {
            return Ok(None);
        }

        let branch = self.branch_name(started_at);
        Self::git(project, &["checkout", "-b", &branch], "create session branch").await?;
        info!(branch = %branch, "created session branch");
        Ok(Some(branch))
    }

    async fn record(&self, project: &Path, artifact: &Path, message: &str) -> Result<()> {
        if !Self::is_repository(project).await {
            return Ok(());
        }
        let artifact = artifact.to_string_lossy();

        Self::git(project, &["add", "--", &artifact], "stage artifact").await?;
        // Commit only the artifact, leaving anything else the user staged alone.
        Self::git(
            project,
            &["commit", "--no-verify", "-m", message, "--", &artifact],
            "commit artifact",
        )
        .await?;

        debug!(artifact = %artifact, "artifact committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "agent@example.com"],
            vec!["config", "user.name", "Agent"],
            vec!["commit", "-q", "--allow-empty", "-m", "init"],
        ] {
            GitSnapshotter::git(dir, &args, "set up repository").await.unwrap();
        }
    }

    #[test]
    fn test_branch_name() {
        let snapshotter = GitSnapshotter::new(true, "test-coverage-agent");
        let started = Utc.with_ymd_and_hms(2025, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(
            snapshotter.branch_name(started),
            "test-coverage-agent-20250307-140509"
        );
    }

    #[tokio::test]
    async fn test_outside_repository_is_a_no_op() {
        if !git_available().await {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = GitSnapshotter::new(true, "cov");

        let branch = snapshotter.begin_session(dir.path(), Utc::now()).await.unwrap();
        assert!(branch.is_none());
    }

    #[tokio::test]
    async fn test_branch_and_commit() {
        if !git_available().await {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;

        let snapshotter = GitSnapshotter::new(true, "cov");
        let started = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let branch = snapshotter.begin_session(dir.path(), started).await.unwrap();
        assert_eq!(branch.as_deref(), Some("cov-20250102-030405"));

        std::fs::write(dir.path().join("a_test.go"), "package a\n").unwrap();
        snapshotter
            .record(dir.path(), Path::new("a_test.go"), "Add tests for a.go")
            .await
            .unwrap();

        let log = Command::new("git")
            .current_dir(dir.path())
            .args(["log", "-1", "--format=%s"])
            .output()
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&log.stdout).trim(), "Add tests for a.go");
    }
}
