//! TypeScript/JavaScript analyzer: Jest with the Istanbul JSON reporter.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use super::discovery::{
    has_file_with_extension, has_marker, in_skipped_dir, relative_unit_id, split_unit_path,
};
use super::process::{ProcessOutput, ToolRunner};
use super::report::{malformed, read_report, ScratchPath};
use crate::domain::error::ToolError;
use crate::domain::models::coverage::percentage;
use crate::domain::models::{CoverageModel, UnitCoverage};
use crate::domain::ports::{CoverageAnalyzer, ToolOutcome};

const SOURCE_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".js", ".jsx"];

/// Jest prints this when a test file cannot be loaded at all.
const SUITE_FAILED_TO_RUN: &str = "Test suite failed to run";

#[derive(Debug, Clone)]
pub struct TypeScriptAnalyzer {
    runner: ToolRunner,
}

impl TypeScriptAnalyzer {
    pub const fn new(timeout: Duration) -> Self {
        Self {
            runner: ToolRunner::new(timeout),
        }
    }

    /// Run the project's test script through yarn when it owns the lockfile,
    /// npm otherwise.
    async fn run_jest(&self, project: &Path, jest_args: &[&str]) -> Result<ProcessOutput, ToolError> {
        if project.join("yarn.lock").exists() {
            let args: Vec<&str> = std::iter::once("test").chain(jest_args.iter().copied()).collect();
            self.runner.run("yarn", args, project).await
        } else {
            let args: Vec<&str> = ["test", "--"]
                .into_iter()
                .chain(jest_args.iter().copied())
                .collect();
            self.runner.run("npm", args, project).await
        }
    }
}

#[async_trait]
impl CoverageAnalyzer for TypeScriptAnalyzer {
    fn name(&self) -> &'static str {
        "TypeScript"
    }

    fn detect(&self, project: &Path) -> bool {
        has_marker(project, &["package.json", "tsconfig.json"])
            || has_file_with_extension(project, SOURCE_EXTENSIONS)
    }

    #[instrument(skip(self), fields(analyzer = "typescript"))]
    async fn run_coverage(&self, project: &Path) -> Result<CoverageModel, ToolError> {
        let report_dir = ScratchPath::dir("jest")?;
        let dir_arg = format!("--coverageDirectory={}", report_dir.path().display());

        let out = self
            .run_jest(
                project,
                &["--coverage", "--coverageReporters=json", dir_arg.as_str()],
            )
            .await?;

        let report_path = report_dir.path().join("coverage-final.json");
        let contents = read_report(&report_path, &out.output)?;
        parse_istanbul_json(&contents, project).map_err(|reason| malformed(&report_path, reason))
    }

    fn artifact_path_for(&self, unit_id: &str) -> Option<PathBuf> {
        if is_test_file(unit_id) {
            return None;
        }
        let (dir, stem, ext) = split_unit_path(unit_id);
        if !SOURCE_EXTENSIONS.contains(&ext) {
            return None;
        }
        Some(PathBuf::from(format!("{dir}{stem}.test{ext}")))
    }

    fn unit_for_artifact(&self, artifact: &Path) -> Option<String> {
        let artifact = artifact.to_str()?;
        [".test.", ".spec."]
            .iter()
            .find(|marker| artifact.contains(*marker))
            .map(|marker| artifact.replacen(marker, ".", 1))
    }

    async fn run_artifact(&self, project: &Path, artifact: &Path) -> Result<ToolOutcome, ToolError> {
        let artifact = artifact.to_string_lossy();
        let out = self.run_jest(project, &[artifact.as_ref()]).await?;

        Ok(if out.success {
            ToolOutcome::passed(out.output)
        } else if out.output.contains(SUITE_FAILED_TO_RUN) {
            ToolOutcome::compile_failed(out.output)
        } else {
            ToolOutcome::failed(out.output)
        })
    }

    async fn validate_artifact(
        &self,
        project: &Path,
        artifact: &Path,
    ) -> Result<ToolOutcome, ToolError> {
        // ts-jest type-checks while loading the file.
        self.run_artifact(project, artifact).await
    }
}

fn is_test_file(unit_id: &str) -> bool {
    unit_id.contains(".test.") || unit_id.contains(".spec.") || unit_id.split('/').any(|p| p == "__tests__")
}

#[derive(Debug, Deserialize)]
struct FileCoverage {
    #[serde(rename = "statementMap")]
    statement_map: HashMap<String, Span>,
    s: HashMap<String, u64>,
}

#[derive(Debug, Deserialize)]
struct Span {
    start: Position,
}

#[derive(Debug, Deserialize)]
struct Position {
    line: u32,
}

/// Parse Istanbul's `coverage-final.json` into line coverage.
///
/// A line counts once; it is covered when any statement starting on it ran.
fn parse_istanbul_json(contents: &str, project: &Path) -> Result<CoverageModel, String> {
    let report: BTreeMap<String, FileCoverage> =
        serde_json::from_str(contents).map_err(|e| e.to_string())?;

    let mut covered_total = 0u64;
    let mut lines_total = 0u64;
    let mut units = BTreeMap::new();

    for (file, coverage) in report {
        let Some(unit_id) = relative_unit_id(project, Path::new(&file)) else {
            continue;
        };
        if is_test_file(&unit_id) || in_skipped_dir(&unit_id) {
            continue;
        }

        let mut lines: BTreeMap<u32, u64> = BTreeMap::new();
        for (id, span) in &coverage.statement_map {
            let hits = coverage.s.get(id).copied().unwrap_or(0);
            let entry = lines.entry(span.start.line).or_insert(0);
            *entry = (*entry).max(hits);
        }

        let total = lines.len() as u64;
        let covered = lines.values().filter(|hits| **hits > 0).count() as u64;
        let uncovered = lines
            .iter()
            .filter(|(_, hits)| **hits == 0)
            .map(|(line, _)| *line)
            .collect::<Vec<_>>();

        covered_total += covered;
        lines_total += total;
        units.insert(
            unit_id.clone(),
            UnitCoverage::from_counts(unit_id, covered, total, uncovered),
        );
    }

    Ok(CoverageModel::new(
        percentage(covered_total, lines_total),
        units.into_values().collect(),
    ))
}
