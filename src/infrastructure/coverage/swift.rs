//! Swift analyzer: SwiftPM with llvm-cov JSON export.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::discovery::{has_file_with_extension, has_marker, relative_unit_id};
use super::process::ToolRunner;
use super::report::{malformed, read_report};
use crate::domain::error::ToolError;
use crate::domain::models::coverage::percentage;
use crate::domain::models::{CoverageModel, UnitCoverage};
use crate::domain::ports::{CoverageAnalyzer, ToolOutcome};

#[derive(Debug, Clone)]
pub struct SwiftAnalyzer {
    runner: ToolRunner,
}

impl SwiftAnalyzer {
    pub const fn new(timeout: Duration) -> Self {
        Self {
            runner: ToolRunner::new(timeout),
        }
    }
}

#[async_trait]
impl CoverageAnalyzer for SwiftAnalyzer {
    fn name(&self) -> &'static str {
        "Swift"
    }

    fn detect(&self, project: &Path) -> bool {
        if has_marker(project, &["Package.swift"]) {
            return true;
        }
        let has_xcode_bundle = std::fs::read_dir(project)
            .map(|entries| {
                entries.filter_map(Result::ok).any(|entry| {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    name.ends_with(".xcodeproj") || name.ends_with(".xcworkspace")
                })
            })
            .unwrap_or(false);
        has_xcode_bundle || has_file_with_extension(project, &[".swift"])
    }

    #[instrument(skip(self), fields(analyzer = "swift"))]
    async fn run_coverage(&self, project: &Path) -> Result<CoverageModel, ToolError> {
        let test = self
            .runner
            .run("swift", ["test", "--enable-code-coverage"], project)
            .await?;

        let located = self
            .runner
            .run("swift", ["test", "--show-codecov-path"], project)
            .await?;
        let report_path = located
            .output
            .lines()
            .map(str::trim)
            .rfind(|line| line.ends_with(".json"))
            .map(|line| project.join(line))
            .ok_or_else(|| ToolError::MissingReport {
                path: project.join(".build"),
                output: format!("{}\n{}", test.output, located.output),
            })?;
        debug!(path = %report_path.display(), "reading llvm-cov export");

        let contents = read_report(&report_path, &test.output)?;
        parse_llvm_cov_json(&contents, project).map_err(|reason| malformed(&report_path, reason))
    }

    fn artifact_path_for(&self, unit_id: &str) -> Option<PathBuf> {
        let (module, rest) = unit_id.strip_prefix("Sources/")?.split_once('/')?;
        let stem = rest.strip_suffix(".swift")?;
        Some(PathBuf::from(format!("Tests/{module}Tests/{stem}Tests.swift")))
    }

    fn unit_for_artifact(&self, artifact: &Path) -> Option<String> {
        let artifact = artifact.to_str()?;
        let (test_module, rest) = artifact.strip_prefix("Tests/")?.split_once('/')?;
        let module = test_module.strip_suffix("Tests")?;
        let stem = rest.strip_suffix("Tests.swift")?;
        Some(format!("Sources/{module}/{stem}.swift"))
    }

    async fn run_artifact(&self, project: &Path, artifact: &Path) -> Result<ToolOutcome, ToolError> {
        let out = match test_filter(artifact) {
            Some(filter) => {
                self.runner
                    .run("swift", ["test", "--filter", filter.as_str()], project)
                    .await?
            }
            None => self.runner.run("swift", ["test"], project).await?,
        };
        Ok(if out.success {
            ToolOutcome::passed(out.output)
        } else {
            ToolOutcome::failed(out.output)
        })
    }

    async fn validate_artifact(
        &self,
        project: &Path,
        artifact: &Path,
    ) -> Result<ToolOutcome, ToolError> {
        let build = self
            .runner
            .run("swift", ["build", "--build-tests"], project)
            .await?;
        if !build.success {
            return Ok(ToolOutcome::compile_failed(build.output));
        }
        self.run_artifact(project, artifact).await
    }
}

/// `Tests/CalcTests/AdderTests.swift` → `CalcTests.AdderTests`
fn test_filter(artifact: &Path) -> Option<String> {
    let module = artifact.iter().nth(1)?.to_str()?;
    let class = artifact.file_stem()?.to_str()?;
    Some(format!("{module}.{class}"))
}

#[derive(Debug, Deserialize)]
struct Export {
    data: Vec<ExportData>,
}

#[derive(Debug, Deserialize)]
struct ExportData {
    files: Vec<ExportFile>,
}

#[derive(Debug, Deserialize)]
struct ExportFile {
    filename: String,
    #[serde(default)]
    segments: Vec<Vec<Value>>,
    summary: FileSummary,
}

#[derive(Debug, Deserialize)]
struct FileSummary {
    lines: LineSummary,
}

#[derive(Debug, Deserialize)]
struct LineSummary {
    count: u64,
    covered: u64,
}

/// Lines on which a counted region starts, mapped to their highest count.
/// Segments are `[line, col, count, has_count, is_region_entry, is_gap]`.
fn region_entry_lines(segments: &[Vec<Value>]) -> BTreeMap<u32, u64> {
    let mut lines = BTreeMap::new();
    for segment in segments {
        let line = segment.first().and_then(Value::as_u64).and_then(|l| u32::try_from(l).ok());
        let count = segment.get(2).and_then(Value::as_u64);
        let has_count = segment.get(3).and_then(Value::as_bool).unwrap_or(false);
        let is_entry = segment.get(4).and_then(Value::as_bool).unwrap_or(false);
        let is_gap = segment.get(5).and_then(Value::as_bool).unwrap_or(false);

        if let (Some(line), Some(count)) = (line, count) {
            if has_count && is_entry && !is_gap {
                let entry = lines.entry(line).or_insert(0);
                *entry = (*entry).max(count);
            }
        }
    }
    lines
}

/// Parse an llvm-cov export. Only package sources under `Sources/` are units.
fn parse_llvm_cov_json(contents: &str, project: &Path) -> Result<CoverageModel, String> {
    let export: Export = serde_json::from_str(contents).map_err(|e| e.to_string())?;

    let mut units = BTreeMap::new();
    let mut covered_total = 0u64;
    let mut lines_total = 0u64;

    for file in export.data.into_iter().flat_map(|d| d.files) {
        let Some(unit_id) = relative_unit_id(project, Path::new(&file.filename)) else {
            continue;
        };
        if !unit_id.starts_with("Sources/") {
            continue;
        }

        let uncovered: BTreeSet<u32> = region_entry_lines(&file.segments)
            .into_iter()
            .filter(|(_, count)| *count == 0)
            .map(|(line, _)| line)
            .collect();

        covered_total += file.summary.lines.covered;
        lines_total += file.summary.lines.count;
        units.insert(
            unit_id.clone(),
            UnitCoverage::from_counts(
                unit_id,
                file.summary.lines.covered,
                file.summary.lines.count,
                uncovered,
            ),
        );
    }

    Ok(CoverageModel::new(
        percentage(covered_total, lines_total),
        units.into_values().collect(),
    ))
}
