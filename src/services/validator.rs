//! Artifact validation and the bounded validate/repair ladder.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::domain::error::ToolError;
use crate::domain::models::ValidationResult;
use crate::domain::ports::{CoverageAnalyzer, ToolOutcome};

/// Output fragments that mean the artifact never got as far as running.
const COMPILE_FAILURE_MARKERS: &[&str] = &[
    "compilation failed",
    "build failed",
    "COMPILATION ERROR",
    "cannot find symbol",
    "SyntaxError",
    "error TS",
    "compileTestJava FAILED",
    "[setup failed]",
    "ERROR collecting",
];

/// Errors that end a validate/repair ladder early.
#[derive(Debug, Error)]
pub enum ValidateError<E> {
    /// The toolchain could not run at all
    #[error(transparent)]
    Tool(ToolError),

    /// The repair function failed
    #[error("Repair failed: {0}")]
    Repair(E),
}

/// Summary of a [`ArtifactValidator::validate_and_retry`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryReport {
    /// The last validation result
    pub result: ValidationResult,
    /// Validations performed, including the first
    pub attempts: u32,
    /// Repairs applied
    pub repairs: u32,
}

/// Runs artifacts through the project's toolchain and classifies the outcome.
pub struct ArtifactValidator {
    analyzer: Arc<dyn CoverageAnalyzer>,
    project_root: PathBuf,
}

impl ArtifactValidator {
    pub fn new(analyzer: Arc<dyn CoverageAnalyzer>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            analyzer,
            project_root: project_root.into(),
        }
    }

    /// Validate one artifact.
    ///
    /// A toolchain timeout is reported as a failed result: a generated test
    /// that hangs is a defect of that test. Any other tool error is returned.
    #[instrument(skip(self), fields(artifact = %artifact.display()))]
    pub async fn validate(&self, artifact: &Path) -> Result<ValidationResult, ToolError> {
        match self
            .analyzer
            .validate_artifact(&self.project_root, artifact)
            .await
        {
            Ok(outcome) => Ok(classify(outcome)),
            Err(ToolError::Timeout {
                program,
                timeout_secs,
            }) => {
                warn!(%program, timeout_secs, "validation timed out, treating artifact as failing");
                Ok(ValidationResult::tests_failed(
                    format!("`{program}` timed out after {timeout_secs}s running the test artifact"),
                    Vec::new(),
                ))
            }
            Err(err) => Err(err),
        }
    }

    /// Validate, and on failure repair and re-validate up to `max_retries`
    /// times. Stops at the first passing result.
    ///
    /// `repair` receives the failing result and must leave a revised artifact
    /// at the same path. Its errors end the ladder unchanged.
    pub async fn validate_and_retry<F, Fut, E>(
        &self,
        artifact: &Path,
        mut repair: F,
        max_retries: u32,
    ) -> Result<RetryReport, ValidateError<E>>
    where
        F: FnMut(&ValidationResult) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut result = self.validate(artifact).await.map_err(ValidateError::Tool)?;
        let mut attempts = 1;
        let mut repairs = 0;

        while !result.success && repairs < max_retries {
            info!(
                artifact = %artifact.display(),
                attempt = attempts,
                kind = ?result.failure_kind(),
                "validation failed, requesting repair"
            );
            repair(&result).await.map_err(ValidateError::Repair)?;
            repairs += 1;

            result = self.validate(artifact).await.map_err(ValidateError::Tool)?;
            attempts += 1;
        }

        if result.success {
            debug!(attempts, repairs, "artifact passed");
        } else {
            warn!(attempts, repairs, "artifact still failing after repairs");
        }

        Ok(RetryReport {
            result,
            attempts,
            repairs,
        })
    }
}

/// Turn raw tool output into a terminal validation result.
pub fn classify(outcome: ToolOutcome) -> ValidationResult {
    if outcome.passed {
        return ValidationResult::passed(outcome.output);
    }
    if outcome.compile_failed || looks_like_compile_failure(&outcome.output) {
        return ValidationResult::compile_failed(outcome.output);
    }
    let failed = extract_failed_test_names(&outcome.output);
    ValidationResult::tests_failed(outcome.output, failed)
}

fn looks_like_compile_failure(output: &str) -> bool {
    COMPILE_FAILURE_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
}

/// Names of failing tests, in first-seen order, recognized from the common
/// runner formats (go test, pytest, cargo/XCTest, Jest, JUnit).
pub fn extract_failed_test_names(output: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    };

    for line in output.lines() {
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("--- FAIL: ") {
            push(rest.split_whitespace().next().unwrap_or_default());
        } else if let Some(rest) = trimmed.strip_prefix("FAILED ") {
            push(rest.split_whitespace().next().unwrap_or_default());
        } else if let Some(name) = trimmed
            .strip_prefix("test ")
            .and_then(|s| s.strip_suffix(" ... FAILED"))
        {
            push(name);
        } else if let Some(rest) = trimmed.strip_prefix("✕ ") {
            push(strip_duration(rest));
        } else if let Some(rest) = trimmed.strip_prefix("Test Case '") {
            if trimmed.ends_with("' failed") || trimmed.contains("' failed (") {
                push(rest.split('\'').next().unwrap_or_default());
            }
        } else if let Some(rest) = trimmed.strip_prefix("Failed: ") {
            push(rest);
        }
    }
    names
}

/// `"adds numbers (3 ms)"` -> `"adds numbers"`
fn strip_duration(name: &str) -> &str {
    match name.rfind(" (") {
        Some(idx) if name.ends_with(')') => &name[..idx],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CoverageModel;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Analyzer whose validation results are scripted in order.
    struct ScriptedValidation {
        outcomes: Mutex<Vec<Result<ToolOutcome, ToolError>>>,
    }

    impl ScriptedValidation {
        fn new(outcomes: Vec<Result<ToolOutcome, ToolError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
            })
        }
    }

    #[async_trait]
    impl CoverageAnalyzer for ScriptedValidation {
        fn name(&self) -> &'static str {
            "Scripted"
        }

        fn detect(&self, _project: &Path) -> bool {
            true
        }

        async fn run_coverage(&self, _project: &Path) -> Result<CoverageModel, ToolError> {
            Ok(CoverageModel::default())
        }

        fn artifact_path_for(&self, unit_id: &str) -> Option<PathBuf> {
            Some(PathBuf::from(format!("{unit_id}.test")))
        }

        fn unit_for_artifact(&self, artifact: &Path) -> Option<String> {
            artifact
                .to_str()
                .and_then(|s| s.strip_suffix(".test"))
                .map(str::to_string)
        }

        async fn run_artifact(
            &self,
            project: &Path,
            artifact: &Path,
        ) -> Result<ToolOutcome, ToolError> {
            self.validate_artifact(project, artifact).await
        }

        async fn validate_artifact(
            &self,
            _project: &Path,
            _artifact: &Path,
        ) -> Result<ToolOutcome, ToolError> {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Ok(ToolOutcome::failed("no more scripted outcomes"))
            } else {
                outcomes.remove(0)
            }
        }
    }

    #[tokio::test]
    async fn test_passes_without_repair() {
        let validator = ArtifactValidator::new(
            ScriptedValidation::new(vec![Ok(ToolOutcome::passed("ok"))]),
            "/p",
        );
        let mut repair_calls = 0;
        let report = validator
            .validate_and_retry(
                Path::new("a.test"),
                |_| {
                    repair_calls += 1;
                    async { Ok::<(), String>(()) }
                },
                2,
            )
            .await
            .unwrap();

        assert!(report.result.success);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.repairs, 0);
        assert_eq!(repair_calls, 0);
    }

    #[tokio::test]
    async fn test_repair_is_bounded() {
        let validator = ArtifactValidator::new(
            ScriptedValidation::new(vec![
                Ok(ToolOutcome::failed("--- FAIL: TestA")),
                Ok(ToolOutcome::failed("--- FAIL: TestA")),
                Ok(ToolOutcome::failed("--- FAIL: TestB")),
                Ok(ToolOutcome::passed("never reached")),
            ]),
            "/p",
        );
        let mut repair_calls = 0;
        let report = validator
            .validate_and_retry(
                Path::new("a.test"),
                |_| {
                    repair_calls += 1;
                    async { Ok::<(), String>(()) }
                },
                2,
            )
            .await
            .unwrap();

        assert_eq!(repair_calls, 2);
        assert_eq!(report.repairs, 2);
        assert_eq!(report.attempts, 3);
        assert!(!report.result.success);
        assert_eq!(report.result.failed_unit_names, vec!["TestB".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_retries_never_repairs() {
        let validator = ArtifactValidator::new(
            ScriptedValidation::new(vec![Ok(ToolOutcome::failed("boom"))]),
            "/p",
        );
        let mut repair_calls = 0;
        let report = validator
            .validate_and_retry(
                Path::new("a.test"),
                |_| {
                    repair_calls += 1;
                    async { Ok::<(), String>(()) }
                },
                0,
            )
            .await
            .unwrap();

        assert_eq!(repair_calls, 0);
        assert_eq!(report.attempts, 1);
        assert!(!report.result.success);
    }

    #[tokio::test]
    async fn test_repair_sees_failure_kind() {
        let validator = ArtifactValidator::new(
            ScriptedValidation::new(vec![
                Ok(ToolOutcome::compile_failed("undefined: Foo")),
                Ok(ToolOutcome::passed("ok")),
            ]),
            "/p",
        );
        let mut seen = Vec::new();
        let report = validator
            .validate_and_retry(
                Path::new("a.test"),
                |result| {
                    seen.push(result.compiled);
                    async { Ok::<(), String>(()) }
                },
                2,
            )
            .await
            .unwrap();

        assert_eq!(seen, vec![false]);
        assert!(report.result.success);
        assert_eq!(report.repairs, 1);
    }

    #[tokio::test]
    async fn test_repair_error_propagates() {
        let validator = ArtifactValidator::new(
            ScriptedValidation::new(vec![Ok(ToolOutcome::failed("boom"))]),
            "/p",
        );
        let err = validator
            .validate_and_retry(
                Path::new("a.test"),
                |_| async { Err::<(), _>("throttled".to_string()) },
                2,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ValidateError::Repair(ref e) if e == "throttled"));
    }

    #[tokio::test]
    async fn test_hard_tool_error_is_not_a_result() {
        let validator = ArtifactValidator::new(
            ScriptedValidation::new(vec![Err(ToolError::Spawn {
                program: "go".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            })]),
            "/p",
        );
        let err = validator.validate(Path::new("a.test")).await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_an_artifact_defect() {
        let validator = ArtifactValidator::new(
            ScriptedValidation::new(vec![Err(ToolError::Timeout {
                program: "pytest".to_string(),
                timeout_secs: 5,
            })]),
            "/p",
        );
        let result = validator.validate(Path::new("a.test")).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("timed out"));
    }

    #[test]
    fn test_classify_compile_heuristics() {
        let result = classify(ToolOutcome::failed(
            "src/test/java/FooTest.java:[3,8] cannot find symbol",
        ));
        assert!(!result.compiled);

        let result = classify(ToolOutcome::failed("FAILED tests/test_a.py::test_one - assert 1 == 2"));
        assert!(result.compiled);
        assert_eq!(result.failed_unit_names, vec!["tests/test_a.py::test_one".to_string()]);
    }

    #[test]
    fn test_extract_failed_test_names() {
        let output = "\
--- FAIL: TestAdd (0.00s)
--- FAIL: TestAdd (0.00s)
test math::sub ... FAILED
  ✕ adds numbers (3 ms)
Test Case '-[CalcTests.CalcTests testDiv]' failed (0.01 seconds).
";
        assert_eq!(
            extract_failed_test_names(output),
            vec![
                "TestAdd".to_string(),
                "math::sub".to_string(),
                "adds numbers".to_string(),
                "-[CalcTests.CalcTests testDiv]".to_string(),
            ]
        );
    }
}
