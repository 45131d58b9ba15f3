//! Go analyzer: `go test -coverprofile`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::discovery::{has_file_with_extension, has_marker, relative_unit_id};
use super::process::ToolRunner;
use super::report::{malformed, read_report, ScratchPath};
use crate::domain::error::ToolError;
use crate::domain::models::coverage::percentage;
use crate::domain::models::{CoverageModel, UnitCoverage};
use crate::domain::ports::{CoverageAnalyzer, ToolOutcome};

#[derive(Debug, Clone)]
pub struct GoAnalyzer {
    runner: ToolRunner,
}

impl GoAnalyzer {
    pub const fn new(timeout: Duration) -> Self {
        Self {
            runner: ToolRunner::new(timeout),
        }
    }

    async fn go_test(&self, project: &Path, args: &[&str]) -> Result<ToolOutcome, ToolError> {
        let out = self.runner.run("go", args, project).await?;
        Ok(if out.success {
            ToolOutcome::passed(out.output)
        } else {
            ToolOutcome::failed(out.output)
        })
    }
}

#[async_trait]
impl CoverageAnalyzer for GoAnalyzer {
    fn name(&self) -> &'static str {
        "Go"
    }

    fn detect(&self, project: &Path) -> bool {
        has_marker(project, &["go.mod"]) || has_file_with_extension(project, &[".go"])
    }

    #[instrument(skip(self), fields(analyzer = "go"))]
    async fn run_coverage(&self, project: &Path) -> Result<CoverageModel, ToolError> {
        let profile = ScratchPath::file("go", "out")?;
        let profile_arg = format!("-coverprofile={}", profile.path().display());

        // Failing tests still write a profile.
        let out = self
            .runner
            .run("go", ["test", "./...", &profile_arg, "-covermode=atomic"], project)
            .await?;

        let contents = read_report(profile.path(), &out.output)?;
        let module = read_module_path(project);
        parse_profile(&contents, project, module.as_deref())
            .map_err(|reason| malformed(profile.path(), reason))
    }

    fn artifact_path_for(&self, unit_id: &str) -> Option<PathBuf> {
        let stem = unit_id.strip_suffix(".go")?;
        if stem.ends_with("_test") {
            return None;
        }
        Some(PathBuf::from(format!("{stem}_test.go")))
    }

    fn unit_for_artifact(&self, artifact: &Path) -> Option<String> {
        let artifact = artifact.to_str()?;
        let stem = artifact.strip_suffix("_test.go")?;
        Some(format!("{stem}.go"))
    }

    async fn run_artifact(&self, project: &Path, artifact: &Path) -> Result<ToolOutcome, ToolError> {
        let package = package_dir(artifact);
        self.go_test(project, &["test", "-count=1", "-v", &package]).await
    }

    async fn validate_artifact(
        &self,
        project: &Path,
        artifact: &Path,
    ) -> Result<ToolOutcome, ToolError> {
        let package = package_dir(artifact);

        // `-run ^$` compiles the test binary without running anything.
        let compile = self
            .runner
            .run("go", ["test", "-count=1", "-run", "^$", &package], project)
            .await?;
        if !compile.success {
            debug!(package = %package, "test package failed to compile");
            return Ok(ToolOutcome::compile_failed(compile.output));
        }

        self.run_artifact(project, artifact).await
    }
}

/// `./dir` for an artifact path, `.` at the module root.
fn package_dir(artifact: &Path) -> String {
    match artifact.parent().and_then(Path::to_str) {
        Some(dir) if !dir.is_empty() => format!("./{}", dir.replace('\\', "/")),
        _ => ".".to_string(),
    }
}

fn read_module_path(project: &Path) -> Option<String> {
    let go_mod = std::fs::read_to_string(project.join("go.mod")).ok()?;
    go_mod.lines().find_map(|line| {
        line.trim()
            .strip_prefix("module ")
            .map(|m| m.trim().trim_matches('"').to_string())
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BlockRange {
    start_line: u32,
    start_col: u32,
    end_line: u32,
    end_col: u32,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    statements: u64,
    count: u64,
}

/// Parse a cover profile into a coverage model.
///
/// Coverage is statement-weighted. The same block can appear several times
/// (once per test binary that touches the file); those entries are merged by
/// keeping the highest count. A line is uncovered when a zero-count block
/// spans it and no covered block does.
fn parse_profile(contents: &str, project: &Path, module: Option<&str>) -> Result<CoverageModel, String> {
    let mut files: BTreeMap<String, HashMap<BlockRange, Block>> = BTreeMap::new();

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("mode:") {
            continue;
        }
        let (file, range, block) =
            parse_profile_line(line).ok_or_else(|| format!("line {}: unrecognized entry `{line}`", index + 1))?;

        let Some(unit_id) = unit_id_for(file, project, module) else {
            continue;
        };
        files
            .entry(unit_id)
            .or_default()
            .entry(range)
            .and_modify(|existing| existing.count = existing.count.max(block.count))
            .or_insert(block);
    }

    let mut total_statements = 0u64;
    let mut total_covered = 0u64;
    let mut units = Vec::with_capacity(files.len());

    for (unit_id, blocks) in files {
        let mut statements = 0u64;
        let mut covered = 0u64;
        let mut covered_lines = BTreeSet::new();
        let mut zero_lines = BTreeSet::new();

        for (range, block) in &blocks {
            statements += block.statements;
            let lines = range.start_line..=range.end_line;
            if block.count > 0 {
                covered += block.statements;
                covered_lines.extend(lines);
            } else {
                zero_lines.extend(lines);
            }
        }

        total_statements += statements;
        total_covered += covered;
        let uncovered = zero_lines.difference(&covered_lines).copied().collect::<Vec<_>>();
        units.push(UnitCoverage::from_counts(unit_id, covered, statements, uncovered));
    }

    Ok(CoverageModel::new(percentage(total_covered, total_statements), units))
}

/// `file.go:12.3,15.2 4 1` → (file, range, block)
fn parse_profile_line(line: &str) -> Option<(&str, BlockRange, Block)> {
    let (location, rest) = line.rsplit_once(':')?;
    let mut fields = rest.split_whitespace();
    let span = fields.next()?;
    let statements = fields.next()?.parse().ok()?;
    let count = fields.next()?.parse().ok()?;

    let (start, end) = span.split_once(',')?;
    let (start_line, start_col) = start.split_once('.')?;
    let (end_line, end_col) = end.split_once('.')?;

    Some((
        location,
        BlockRange {
            start_line: start_line.parse().ok()?,
            start_col: start_col.parse().ok()?,
            end_line: end_line.parse().ok()?,
            end_col: end_col.parse().ok()?,
        },
        Block { statements, count },
    ))
}

fn unit_id_for(file: &str, project: &Path, module: Option<&str>) -> Option<String> {
    if let Some(relative) = module.and_then(|m| file.strip_prefix(m)) {
        let relative = relative.trim_start_matches('/');
        return (!relative.is_empty()).then(|| relative.to_string());
    }
    relative_unit_id(project, Path::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = "\
mode: atomic
example.com/calc/add.go:3.24,5.2 1 4
example.com/calc/div.go:3.31,4.12 1 2
example.com/calc/div.go:4.12,6.3 1 0
example.com/calc/div.go:7.2,7.14 1 2
example.com/calc/div.go:3.31,4.12 1 0
example.com/calc/internal/fmt.go:1.1,2.2 2 0
";

    fn parse(contents: &str) -> CoverageModel {
        parse_profile(contents, Path::new("/project"), Some("example.com/calc")).unwrap()
    }

    #[test]
    fn test_parses_statement_weighted_coverage() {
        let model = parse(PROFILE);

        let ids: Vec<_> = model.units().iter().map(|u| u.unit_id.as_str()).collect();
        assert_eq!(ids, vec!["add.go", "div.go", "internal/fmt.go"]);

        let add = model.unit("add.go").unwrap();
        assert!((add.coverage - 100.0).abs() < f64::EPSILON);

        // Duplicate block keeps its highest count: 2 of 3 statements covered.
        let div = model.unit("div.go").unwrap();
        assert!((div.coverage - 200.0 / 3.0).abs() < 1e-9);

        let fmt = model.unit("internal/fmt.go").unwrap();
        assert!(fmt.coverage.abs() < f64::EPSILON);
        assert_eq!(fmt.uncovered_lines.iter().copied().collect::<Vec<_>>(), vec![1, 2]);

        // 3 covered of 6 statements overall.
        assert!((model.total_coverage() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_lines_shared_with_covered_blocks_are_not_uncovered() {
        let model = parse(PROFILE);
        let div = model.unit("div.go").unwrap();
        // Line 4 is shared with a covered block, 5 and 6 are not.
        assert_eq!(div.uncovered_lines.iter().copied().collect::<Vec<_>>(), vec![5, 6]);
    }

    #[test]
    fn test_rejects_garbage() {
        let err = parse_profile("mode: set\nnot a profile line\n", Path::new("."), None).unwrap_err();
        assert!(err.contains("line 2"));
    }

    #[test]
    fn test_empty_profile_is_zero() {
        let model = parse("mode: atomic\n");
        assert!(model.units().is_empty());
        assert!(model.total_coverage().abs() < f64::EPSILON);
    }

    #[test]
    fn test_artifact_mapping() {
        let analyzer = GoAnalyzer::new(Duration::from_secs(1));
        assert_eq!(
            analyzer.artifact_path_for("pkg/util.go"),
            Some(PathBuf::from("pkg/util_test.go"))
        );
        assert_eq!(analyzer.artifact_path_for("pkg/util_test.go"), None);
        assert_eq!(
            analyzer.unit_for_artifact(Path::new("pkg/util_test.go")).as_deref(),
            Some("pkg/util.go")
        );
    }

    #[test]
    fn test_package_dir() {
        assert_eq!(package_dir(Path::new("pkg/util_test.go")), "./pkg");
        assert_eq!(package_dir(Path::new("main_test.go")), ".");
    }

    #[test]
    fn test_reads_module_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/calc\n\ngo 1.22\n").unwrap();
        assert_eq!(read_module_path(dir.path()).as_deref(), Some("example.com/calc"));
    }
}
