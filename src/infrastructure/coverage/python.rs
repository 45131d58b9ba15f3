//! Python analyzer: pytest-cov, falling back to plain coverage.py.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::discovery::{has_file_with_extension, has_marker, in_skipped_dir, relative_unit_id};
use super::process::ToolRunner;
use super::report::{malformed, read_report, ScratchPath};
use crate::domain::error::ToolError;
use crate::domain::models::coverage::percentage;
use crate::domain::models::{CoverageModel, UnitCoverage};
use crate::domain::ports::{CoverageAnalyzer, ToolOutcome};

/// pytest exits with 2 when collection fails (syntax or import errors)
const PYTEST_INTERRUPTED: i32 = 2;

#[derive(Debug, Clone)]
pub struct PythonAnalyzer {
    runner: ToolRunner,
}

impl PythonAnalyzer {
    pub const fn new(timeout: Duration) -> Self {
        Self {
            runner: ToolRunner::new(timeout),
        }
    }
}

#[async_trait]
impl CoverageAnalyzer for PythonAnalyzer {
    fn name(&self) -> &'static str {
        "Python"
    }

    fn detect(&self, project: &Path) -> bool {
        has_marker(
            project,
            &["setup.py", "pyproject.toml", "requirements.txt", "Pipfile"],
        ) || has_file_with_extension(project, &[".py"])
    }

    #[instrument(skip(self), fields(analyzer = "python"))]
    async fn run_coverage(&self, project: &Path) -> Result<CoverageModel, ToolError> {
        let report = ScratchPath::file("python", "json")?;
        let report_arg = format!("--cov-report=json:{}", report.path().display());

        let out = self
            .runner
            .run("pytest", ["--cov=.", report_arg.as_str()], project)
            .await?;
        let mut tool_output = out.output;

        if !report.path().is_file() {
            debug!("pytest-cov produced no report, falling back to coverage.py");
            let run = self
                .runner
                .run("coverage", ["run", "-m", "pytest"], project)
                .await?;
            let report_path = report.path().to_string_lossy().into_owned();
            let json = self
                .runner
                .run("coverage", ["json", "-o", report_path.as_str()], project)
                .await?;
            tool_output = format!("{tool_output}\n{}\n{}", run.output, json.output);
        }

        let contents = read_report(report.path(), &tool_output)?;
        parse_coverage_json(&contents, project).map_err(|reason| malformed(report.path(), reason))
    }

    fn artifact_path_for(&self, unit_id: &str) -> Option<PathBuf> {
        if is_test_file(unit_id) {
            return None;
        }
        let (dir, file) = unit_id.rsplit_once('/').map_or(("", unit_id), |(d, f)| (d, f));
        let stem = file.strip_suffix(".py")?;
        let name = format!("test_{stem}.py");
        Some(if dir.is_empty() {
            PathBuf::from(name)
        } else {
            PathBuf::from(format!("{dir}/{name}"))
        })
    }

    fn unit_for_artifact(&self, artifact: &Path) -> Option<String> {
        let artifact = artifact.to_str()?;
        let (dir, file) = artifact.rsplit_once('/').map_or(("", artifact), |(d, f)| (d, f));
        let source = file
            .strip_prefix("test_")
            .map(ToString::to_string)
            .or_else(|| file.strip_suffix("_test.py").map(|stem| format!("{stem}.py")))?;
        Some(if dir.is_empty() {
            source
        } else {
            format!("{dir}/{source}")
        })
    }

    async fn run_artifact(&self, project: &Path, artifact: &Path) -> Result<ToolOutcome, ToolError> {
        let out = self
            .runner
            .run("pytest", [OsStr::new("-v"), artifact.as_os_str()], project)
            .await?;

        Ok(if out.success {
            ToolOutcome::passed(out.output)
        } else if out.code == Some(PYTEST_INTERRUPTED) {
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
        // No separate compile step: collection errors surface as exit code 2.
        self.run_artifact(project, artifact).await
    }
}

fn is_test_file(unit_id: &str) -> bool {
    let file = unit_id.rsplit('/').next().unwrap_or(unit_id);
    file.starts_with("test_") || file.ends_with("_test.py") || file == "conftest.py"
}

#[derive(Debug, Deserialize)]
struct CoverageJson {
    files: BTreeMap<String, FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    summary: Summary,
    #[serde(default)]
    missing_lines: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct Summary {
    covered_lines: u64,
    num_statements: u64,
}

/// Parse a coverage.py JSON report. Test files are measured by coverage.py
/// but are not units; the total is recomputed over the units kept.
fn parse_coverage_json(contents: &str, project: &Path) -> Result<CoverageModel, String> {
    let report: CoverageJson = serde_json::from_str(contents).map_err(|e| e.to_string())?;

    let mut covered_total = 0u64;
    let mut statements_total = 0u64;
    let mut units = BTreeMap::new();

    for (file, entry) in report.files {
        let Some(unit_id) = relative_unit_id(project, Path::new(&file)) else {
            continue;
        };
        if is_test_file(&unit_id) || in_skipped_dir(&unit_id) {
            continue;
        }

        covered_total += entry.summary.covered_lines;
        statements_total += entry.summary.num_statements;
        let unit = UnitCoverage::from_counts(
            unit_id.clone(),
            entry.summary.covered_lines,
            entry.summary.num_statements,
            entry.missing_lines,
        );
        units.insert(unit_id, unit);
    }

    Ok(CoverageModel::new(
        percentage(covered_total, statements_total),
        units.into_values().collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "meta": {"version": "7.4.0"},
        "files": {
            "pkg/calc.py": {
                "executed_lines": [1, 2, 3],
                "summary": {"covered_lines": 3, "num_statements": 4, "percent_covered": 75.0},
                "missing_lines": [7]
            },
            "pkg/test_calc.py": {
                "executed_lines": [1, 2],
                "summary": {"covered_lines": 2, "num_statements": 2, "percent_covered": 100.0},
                "missing_lines": []
            },
            "app.py": {
                "summary": {"covered_lines": 0, "num_statements": 4, "percent_covered": 0.0},
                "missing_lines": [1, 2, 3, 4]
            },
            "pkg/__init__.py": {
                "summary": {"covered_lines": 0, "num_statements": 0, "percent_covered": 100.0},
                "missing_lines": []
            }
        },
        "totals": {"covered_lines": 5, "num_statements": 10, "percent_covered": 50.0}
    }"#;

    #[test]
    fn test_parses_report_without_test_files() {
        let model = parse_coverage_json(REPORT, Path::new("/project")).unwrap();

        let ids: Vec<_> = model.units().iter().map(|u| u.unit_id.as_str()).collect();
        assert_eq!(ids, vec!["app.py", "pkg/__init__.py", "pkg/calc.py"]);

        let calc = model.unit("pkg/calc.py").unwrap();
        assert!((calc.coverage - 75.0).abs() < f64::EPSILON);
        assert!(calc.uncovered_lines.contains(&7));

        assert!(model.unit("pkg/__init__.py").unwrap().is_fully_covered());
        // 3 of 8 statements outside test files.
        assert!((model.total_coverage() - 37.5).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_report() {
        assert!(parse_coverage_json("{\"totals\": {}}", Path::new(".")).is_err());
        assert!(parse_coverage_json("not json", Path::new(".")).is_err());
    }

    #[test]
    fn test_artifact_mapping() {
        let analyzer = PythonAnalyzer::new(Duration::from_secs(1));
        assert_eq!(
            analyzer.artifact_path_for("pkg/calc.py"),
            Some(PathBuf::from("pkg/test_calc.py"))
        );
        assert_eq!(analyzer.artifact_path_for("app.py"), Some(PathBuf::from("test_app.py")));
        assert_eq!(analyzer.artifact_path_for("pkg/test_calc.py"), None);

        assert_eq!(
            analyzer.unit_for_artifact(Path::new("pkg/test_calc.py")).as_deref(),
            Some("pkg/calc.py")
        );
        assert_eq!(
            analyzer.unit_for_artifact(Path::new("calc_test.py")).as_deref(),
            Some("calc.py")
        );
        assert_eq!(analyzer.unit_for_artifact(Path::new("calc.py")), None);
    }
}
