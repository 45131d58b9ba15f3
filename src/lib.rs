//! coverage-agent - unattended test coverage improvement
//!
//! Measures a project's test coverage with its native toolchain, picks the
//! worst-covered unit, asks a language model for a test artifact, validates
//! it (repairing it a bounded number of times) and repeats until the target
//! is met. Sessions survive throttling, interruption and crashes through a
//! resumable state file.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, error taxonomy and ports
//! - **Service Layer** (`services`): the control loop, prioritization,
//!   prompting and validation
//! - **Infrastructure Layer** (`infrastructure`): toolchain analyzers, the
//!   Claude client, configuration, logging, persistence and git
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use coverage_agent::services::{open_session, CoverageOrchestrator, RunSettings};
//!
//! let (state, resumed) = open_session(&store, analyzer.as_ref(), &settings, true, clock.now())?;
//! let outcome = CoverageOrchestrator::new(analyzer, generator, store, clock, settings, state)
//!     .resumed(resumed)
//!     .run()
//!     .await?;
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::error::{GenerationError, OrchestratorError, SessionError, ToolError};
pub use domain::models::{
    Config, CoverageModel, FailureKind, ProgressSummary, SessionState, UnitCoverage,
    ValidationResult, WorkItem,
};
pub use domain::ports::{
    Clock, CoverageAnalyzer, GenerationClient, LlmClient, SessionStore, SnapshotRecorder,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{CoverageOrchestrator, OrchestratorEvent, RunOutcome, RunSettings};
