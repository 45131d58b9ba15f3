//! Core services: prioritization, generation, validation and the control loop.

pub mod orchestrator;
pub mod prioritizer;
pub mod prompts;
pub mod test_generator;
pub mod validator;

pub use orchestrator::{
    open_session, CoverageOrchestrator, OrchestratorEvent, RunOutcome, RunSettings, UnitMode,
};
pub use prioritizer::{prioritize, priority_for};
pub use test_generator::TestGenerator;
pub use validator::{ArtifactValidator, RetryReport, ValidateError};
