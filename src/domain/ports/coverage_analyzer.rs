use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::error::ToolError;
use crate::domain::models::CoverageModel;

/// Result of running or validating one test artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub passed: bool,
    /// Combined stdout and stderr
    pub output: String,
    /// Set when the build or compile step rejected the artifact
    pub compile_failed: bool,
}

impl ToolOutcome {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            passed: true,
            output: output.into(),
            compile_failed: false,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
            compile_failed: false,
        }
    }

    pub fn compile_failed(output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
            compile_failed: true,
        }
    }
}

/// One ecosystem's coverage tooling.
///
/// Unit IDs and artifact paths are relative to the project root. A test that
/// fails is a normal [`ToolOutcome`]; `Err` means the toolchain could not run.
#[async_trait]
pub trait CoverageAnalyzer: Send + Sync {
    /// Ecosystem name persisted with the session, e.g. `"Go"`.
    fn name(&self) -> &'static str;

    /// Whether this analyzer applies to the project at `project`.
    fn detect(&self, project: &Path) -> bool;

    async fn run_coverage(&self, project: &Path) -> Result<CoverageModel, ToolError>;

    /// Conventional companion test location for `unit_id`.
    fn artifact_path_for(&self, unit_id: &str) -> Option<PathBuf>;

    /// Inverse of [`artifact_path_for`](Self::artifact_path_for).
    fn unit_for_artifact(&self, artifact: &Path) -> Option<String>;

    async fn run_artifact(&self, project: &Path, artifact: &Path)
        -> Result<ToolOutcome, ToolError>;

    /// Build or compile where the ecosystem requires it, then run.
    async fn validate_artifact(
        &self,
        project: &Path,
        artifact: &Path,
    ) -> Result<ToolOutcome, ToolError>;
}
