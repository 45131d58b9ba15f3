//! Generation backend boundary.
//!
//! [`GenerationClient`] is what the orchestrator consumes: produce or repair
//! a test artifact and hand back a clean body ready to be written verbatim.
//! [`LlmClient`] is the raw request/response call underneath it.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::error::GenerationError;

/// Request for a brand-new test artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub language: String,
    pub unit_id: String,
    pub unit_source: String,
    pub artifact_path: PathBuf,
    pub current_coverage: f64,
    pub uncovered_lines: BTreeSet<u32>,
}

/// Why an existing artifact needs another pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairReason {
    /// The artifact runs but leaves these lines uncovered
    CoverageGap { uncovered_lines: BTreeSet<u32> },
    /// The artifact does not compile
    CompilationFailure { output: String },
    /// The artifact compiles but its tests fail
    TestFailure {
        output: String,
        failed_tests: Vec<String>,
    },
}

/// Request to revise an existing artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairRequest {
    pub language: String,
    pub unit_id: String,
    pub unit_source: String,
    pub artifact_path: PathBuf,
    pub artifact_source: String,
    pub reason: RepairReason,
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate_artifact(&self, request: &GenerationRequest)
        -> Result<String, GenerationError>;

    async fn repair_artifact(&self, request: &RepairRequest) -> Result<String, GenerationError>;
}

/// A single free-text request/response exchange with a language model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Generation client used when no backend may be contacted (dry runs).
///
/// Every call fails with [`GenerationError::Fatal`].
#[derive(Debug, Clone, Default)]
pub struct DisabledGenerationClient;

#[async_trait]
impl GenerationClient for DisabledGenerationClient {
    async fn generate_artifact(
        &self,
        request: &GenerationRequest,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Fatal(format!(
            "generation is disabled (requested for {})",
            request.unit_id
        )))
    }

    async fn repair_artifact(&self, request: &RepairRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Fatal(format!(
            "generation is disabled (repair requested for {})",
            request.unit_id
        )))
    }
}
