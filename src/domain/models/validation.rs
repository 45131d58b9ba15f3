use serde::{Deserialize, Serialize};

/// Lifecycle of one artifact through validation.
///
/// `Unvalidated -> CompilationChecked -> {Passed, Failed}`. A compile failure
/// goes straight from `Unvalidated` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Unvalidated,
    CompilationChecked,
    Passed,
    Failed,
}

impl ValidationStage {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }
}

/// Why a validation failed. Each kind gets its own repair prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Compilation,
    TestFailure,
}

/// Outcome of validating one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub stage: ValidationStage,
    pub success: bool,
    pub compiled: bool,
    pub passed: bool,
    /// Full combined tool output
    pub output: String,
    pub error_message: Option<String>,
    pub failed_unit_names: Vec<String>,
}

impl ValidationResult {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            stage: ValidationStage::Passed,
            success: true,
            compiled: true,
            passed: true,
            output: output.into(),
            error_message: None,
            failed_unit_names: Vec::new(),
        }
    }

    pub fn compile_failed(output: impl Into<String>) -> Self {
        Self {
            stage: ValidationStage::Failed,
            success: false,
            compiled: false,
            passed: false,
            output: output.into(),
            error_message: Some("Test artifact failed to compile".to_string()),
            failed_unit_names: Vec::new(),
        }
    }

    pub fn tests_failed(output: impl Into<String>, failed_unit_names: Vec<String>) -> Self {
        let error_message = if failed_unit_names.is_empty() {
            "Test artifact failed".to_string()
        } else {
            format!("Failing tests: {}", failed_unit_names.join(", "))
        };
        Self {
            stage: ValidationStage::Failed,
            success: false,
            compiled: true,
            passed: false,
            output: output.into(),
            error_message: Some(error_message),
            failed_unit_names,
        }
    }

    pub const fn failure_kind(&self) -> Option<FailureKind> {
        if self.success {
            None
        } else if self.compiled {
            Some(FailureKind::TestFailure)
        } else {
            Some(FailureKind::Compilation)
        }
    }

    /// Error message followed by the untruncated tool output.
    pub fn diagnostic(&self) -> String {
        match &self.error_message {
            Some(message) if self.output.is_empty() => message.clone(),
            Some(message) => format!("{message}\n{}", self.output),
            None => self.output.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(ValidationResult::passed("ok").failure_kind(), None);
        assert_eq!(
            ValidationResult::compile_failed("undefined: Foo").failure_kind(),
            Some(FailureKind::Compilation)
        );
        assert_eq!(
            ValidationResult::tests_failed("--- FAIL: TestFoo", vec!["TestFoo".into()])
                .failure_kind(),
            Some(FailureKind::TestFailure)
        );
    }

    #[test]
    fn test_diagnostic_keeps_full_output() {
        let result = ValidationResult::tests_failed("line1\nline2", vec!["TestA".into()]);
        let diagnostic = result.diagnostic();
        assert!(diagnostic.starts_with("Failing tests: TestA"));
        assert!(diagnostic.ends_with("line1\nline2"));
        assert!(result.stage.is_terminal());
    }
}
