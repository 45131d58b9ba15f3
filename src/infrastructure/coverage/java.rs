//! Java analyzer: Maven or Gradle with JaCoCo.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument};

use super::discovery::{has_file_with_extension, has_marker};
use super::process::ToolRunner;
use super::report::{malformed, read_report};
use crate::domain::error::ToolError;
use crate::domain::models::coverage::percentage;
use crate::domain::models::{CoverageModel, UnitCoverage};
use crate::domain::ports::{CoverageAnalyzer, ToolOutcome};

const SOURCE_ROOT: &str = "src/main/java";

const COMPILE_FAILURE_MARKERS: &[&str] = &[
    "COMPILATION ERROR",
    "compileTestJava FAILED",
    "Compilation failed",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildTool {
    Maven,
    Gradle,
}

impl BuildTool {
    fn detect(project: &Path) -> Option<Self> {
        if project.join("pom.xml").exists() {
            Some(Self::Maven)
        } else if has_marker(project, &["build.gradle", "build.gradle.kts"]) {
            Some(Self::Gradle)
        } else {
            None
        }
    }

    fn report_path(self, project: &Path) -> PathBuf {
        match self {
            Self::Maven => project.join("target/site/jacoco/jacoco.xml"),
            Self::Gradle => project.join("build/reports/jacoco/test/jacocoTestReport.xml"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JavaAnalyzer {
    runner: ToolRunner,
}

impl JavaAnalyzer {
    pub const fn new(timeout: Duration) -> Self {
        Self {
            runner: ToolRunner::new(timeout),
        }
    }

    fn gradle_program(project: &Path) -> String {
        let wrapper = project.join("gradlew");
        if wrapper.exists() {
            wrapper.to_string_lossy().into_owned()
        } else {
            "gradle".to_string()
        }
    }

    fn build_tool(project: &Path) -> Result<BuildTool, ToolError> {
        BuildTool::detect(project).ok_or_else(|| ToolError::UnsupportedProject(project.to_path_buf()))
    }
}

#[async_trait]
impl CoverageAnalyzer for JavaAnalyzer {
    fn name(&self) -> &'static str {
        "Java"
    }

    fn detect(&self, project: &Path) -> bool {
        has_marker(project, &["pom.xml", "build.gradle", "build.gradle.kts"])
            || has_file_with_extension(project, &[".java"])
    }

    #[instrument(skip(self), fields(analyzer = "java"))]
    async fn run_coverage(&self, project: &Path) -> Result<CoverageModel, ToolError> {
        let tool = Self::build_tool(project)?;
        let report_path = tool.report_path(project);

        // A stale report from an earlier build must not be mistaken for this one.
        match std::fs::remove_file(&report_path) {
            Ok(()) => debug!(path = %report_path.display(), "removed stale JaCoCo report"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let out = match tool {
            BuildTool::Maven => {
                self.runner
                    .run("mvn", ["test", "jacoco:report"], project)
                    .await?
            }
            BuildTool::Gradle => {
                self.runner
                    .run(&Self::gradle_program(project), ["test", "jacocoTestReport"], project)
                    .await?
            }
        };

        let contents = read_report(&report_path, &out.output)?;
        parse_jacoco_xml(&contents).map_err(|reason| malformed(&report_path, reason))
    }

    fn artifact_path_for(&self, unit_id: &str) -> Option<PathBuf> {
        let stem = unit_id.strip_suffix(".java")?;
        if stem.ends_with("Test") {
            return None;
        }
        let stem = stem.replacen("/main/", "/test/", 1);
        Some(PathBuf::from(format!("{stem}Test.java")))
    }

    fn unit_for_artifact(&self, artifact: &Path) -> Option<String> {
        let artifact = artifact.to_str()?;
        let stem = artifact.strip_suffix("Test.java")?;
        Some(format!("{}.java", stem.replacen("/test/", "/main/", 1)))
    }

    async fn run_artifact(&self, project: &Path, artifact: &Path) -> Result<ToolOutcome, ToolError> {
        let class = test_class_name(artifact);
        let out = match Self::build_tool(project)? {
            BuildTool::Maven => {
                let selector = format!("-Dtest={class}");
                self.runner.run("mvn", ["test", selector.as_str()], project).await?
            }
            BuildTool::Gradle => {
                self.runner
                    .run(
                        &Self::gradle_program(project),
                        ["test", "--tests", class.as_str()],
                        project,
                    )
                    .await?
            }
        };

        Ok(if out.success {
            ToolOutcome::passed(out.output)
        } else if COMPILE_FAILURE_MARKERS.iter().any(|m| out.output.contains(m)) {
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
        // The build tool compiles test sources as part of `test`.
        self.run_artifact(project, artifact).await
    }
}

/// `src/test/java/com/acme/FooTest.java` → `com.acme.FooTest`
fn test_class_name(artifact: &Path) -> String {
    let parts: Vec<String> = artifact
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let start = parts
        .iter()
        .position(|p| p == "java")
        .map_or(0, |idx| idx + 1);

    parts[start..]
        .iter()
        .map(|p| p.strip_suffix(".java").unwrap_or(p))
        .collect::<Vec<_>>()
        .join(".")
}

struct JacocoPatterns {
    package: Regex,
    source_file: Regex,
    line: Regex,
    counter: Regex,
    attribute: Regex,
}

impl JacocoPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            package: Regex::new(r#"(?s)<package\s+name="([^"]*)"\s*>(.*?)</package>"#)?,
            source_file: Regex::new(r#"(?s)<sourcefile\s+name="([^"]*)"\s*>(.*?)</sourcefile>"#)?,
            line: Regex::new(r"<line\s+([^>]*?)/?>")?,
            counter: Regex::new(r"<counter\s+([^>]*?)/?>")?,
            attribute: Regex::new(r#"(\w+)="([^"]*)""#)?,
        })
    }

    fn attributes<'a>(&self, tag: &'a str) -> HashMap<&'a str, &'a str> {
        self.attribute
            .captures_iter(tag)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .collect()
    }
}

fn numeric(attrs: &HashMap<&str, &str>, name: &str) -> Result<u64, String> {
    attrs
        .get(name)
        .ok_or_else(|| format!("missing `{name}` attribute"))?
        .parse()
        .map_err(|e| format!("bad `{name}` attribute: {e}"))
}

/// Parse a JaCoCo XML report.
///
/// Per-file coverage comes from `<line nr mi ci>` entries, a line being
/// covered when any of its instructions ran. The total is the report-level
/// LINE counter, which follows the last package.
fn parse_jacoco_xml(contents: &str) -> Result<CoverageModel, String> {
    if !contents.contains("<report") {
        return Err("not a JaCoCo report".to_string());
    }
    let patterns = JacocoPatterns::new().map_err(|e| e.to_string())?;

    let mut units = BTreeMap::new();
    let mut covered_total = 0u64;
    let mut lines_total = 0u64;

    for package in patterns.package.captures_iter(contents) {
        let (Some(name), Some(body)) = (package.get(1), package.get(2)) else {
            continue;
        };
        let package_name = name.as_str().trim_matches('/');

        for file in patterns.source_file.captures_iter(body.as_str()) {
            let (Some(file_name), Some(file_body)) = (file.get(1), file.get(2)) else {
                continue;
            };

            let mut covered = 0u64;
            let mut total = 0u64;
            let mut uncovered = Vec::new();
            for line in patterns.line.captures_iter(file_body.as_str()) {
                let attrs = patterns.attributes(line.get(1).map_or("", |m| m.as_str()));
                let number = numeric(&attrs, "nr")?;
                let hits = numeric(&attrs, "ci")?;
                total += 1;
                if hits > 0 {
                    covered += 1;
                } else {
                    uncovered.push(u32::try_from(number).map_err(|e| e.to_string())?);
                }
            }

            let unit_id = if package_name.is_empty() {
                format!("{SOURCE_ROOT}/{}", file_name.as_str())
            } else {
                format!("{SOURCE_ROOT}/{package_name}/{}", file_name.as_str())
            };
            covered_total += covered;
            lines_total += total;
            units.insert(
                unit_id.clone(),
                UnitCoverage::from_counts(unit_id, covered, total, uncovered),
            );
        }
    }

    let tail = contents
        .rfind("</package>")
        .map_or(contents, |idx| &contents[idx..]);
    let report_total = patterns
        .counter
        .captures_iter(tail)
        .map(|c| patterns.attributes(c.get(1).map_or("", |m| m.as_str())))
        .find(|attrs| attrs.get("type") == Some(&"LINE"))
        .map(|attrs| -> Result<f64, String> {
            let missed = numeric(&attrs, "missed")?;
            let covered = numeric(&attrs, "covered")?;
            Ok(percentage(covered, missed + covered))
        })
        .transpose()?;

    Ok(CoverageModel::new(
        report_total.unwrap_or_else(|| percentage(covered_total, lines_total)),
        units.into_values().collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<!DOCTYPE report PUBLIC "-//JACOCO//DTD Report 1.1//EN" "report.dtd">
<report name="calc">
  <sessioninfo id="host-1" start="1" dump="2"/>
  <package name="com/acme/calc">
    <class name="com/acme/calc/Adder" sourcefilename="Adder.java">
      <counter type="LINE" missed="1" covered="2"/>
    </class>
    <sourcefile name="Adder.java">
      <line nr="3" mi="0" ci="3" mb="0" cb="0"/>
      <line nr="5" mi="0" ci="4" mb="0" cb="0"/>
      <line nr="7" mi="2" ci="0" mb="0" cb="0"/>
      <counter type="LINE" missed="1" covered="2"/>
    </sourcefile>
    <sourcefile name="Divider.java">
      <line nr="4" mi="3" ci="0" mb="0" cb="0"/>
      <counter type="LINE" missed="1" covered="0"/>
    </sourcefile>
    <counter type="LINE" missed="2" covered="2"/>
  </package>
  <counter type="INSTRUCTION" missed="5" covered="7"/>
  <counter type="LINE" missed="2" covered="2"/>
</report>"#;

    #[test]
    fn test_parses_jacoco_report() {
        let model = parse_jacoco_xml(REPORT).unwrap();

        let ids: Vec<_> = model.units().iter().map(|u| u.unit_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "src/main/java/com/acme/calc/Adder.java",
                "src/main/java/com/acme/calc/Divider.java"
            ]
        );

        let adder = model.unit("src/main/java/com/acme/calc/Adder.java").unwrap();
        assert!((adder.coverage - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(adder.uncovered_lines.iter().copied().collect::<Vec<_>>(), vec![7]);

        assert!((model.total_coverage() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_non_jacoco_document() {
        assert!(parse_jacoco_xml("<html></html>").is_err());
    }

    #[test]
    fn test_rejects_bad_line_numbers() {
        let bad = r#"<report name="x"><package name="p"><sourcefile name="A.java"><line nr="x" mi="0" ci="1"/></sourcefile></package></report>"#;
        assert!(parse_jacoco_xml(bad).is_err());
    }

    #[test]
    fn test_artifact_mapping() {
        let analyzer = JavaAnalyzer::new(Duration::from_secs(1));
        assert_eq!(
            analyzer.artifact_path_for("src/main/java/com/acme/Adder.java"),
            Some(PathBuf::from("src/test/java/com/acme/AdderTest.java"))
        );
        assert_eq!(analyzer.artifact_path_for("src/test/java/com/acme/AdderTest.java"), None);
        assert_eq!(
            analyzer
                .unit_for_artifact(Path::new("src/test/java/com/acme/AdderTest.java"))
                .as_deref(),
            Some("src/main/java/com/acme/Adder.java")
        );
    }

    #[test]
    fn test_class_name_from_artifact() {
        assert_eq!(
            test_class_name(Path::new("src/test/java/com/acme/AdderTest.java")),
            "com.acme.AdderTest"
        );
        assert_eq!(test_class_name(Path::new("AdderTest.java")), "AdderTest");
    }

    #[test]
    fn test_build_tool_detection() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(BuildTool::detect(dir.path()), None);
        std::fs::write(dir.path().join("build.gradle.kts"), "").unwrap();
        assert_eq!(BuildTool::detect(dir.path()), Some(BuildTool::Gradle));
        std::fs::write(dir.path().join("pom.xml"), "<project/>").unwrap();
        assert_eq!(BuildTool::detect(dir.path()), Some(BuildTool::Maven));
    }
}
