//! Error types shared across the domain boundary.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures raised while driving a project's native toolchain.
///
/// These are environment problems, never artifact defects: a test that
/// fails or does not compile is reported through a normal result, not here.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },

    #[error("Coverage report not found at {}\n{output}", path.display())]
    MissingReport { path: PathBuf, output: String },

    #[error("Malformed coverage report {}: {reason}", path.display())]
    MalformedReport { path: PathBuf, reason: String },

    #[error("No supported ecosystem detected in {}", .0.display())]
    UnsupportedProject(PathBuf),

    #[error("Unit {0} has no conventional test location")]
    NoArtifactPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome classification of a generation backend call.
///
/// Callers branch on the variant, never on message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// The backend asked us to come back later.
    #[error("Generation backend throttled until {reset_at}")]
    Throttled { reset_at: DateTime<Utc> },

    /// Retries were exhausted on a failure that is usually temporary.
    #[error("Transient generation failure: {0}")]
    Transient(String),

    /// The request can never succeed as issued (bad credentials, bad request).
    #[error("Generation failed: {0}")]
    Fatal(String),
}

impl GenerationError {
    pub const fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }
}

/// Session state persistence errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No saved session at {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read session file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write session file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session file {} is corrupt: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode session state: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Saved session targets {saved} but the project is now detected as {detected}")]
    EcosystemMismatch { saved: String, detected: String },

    #[error("Saved session belongs to {} not {}", saved.display(), current.display())]
    ProjectMismatch { saved: PathBuf, current: PathBuf },
}

/// Errors that stop a coverage session.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Coverage measurement failed: {0}")]
    Measurement(#[source] ToolError),

    #[error("Toolchain could not validate {unit}: {source}")]
    Validation {
        unit: String,
        #[source]
        source: ToolError,
    },

    #[error("Generation for {unit} failed: {source}")]
    Generation {
        unit: String,
        #[source]
        source: GenerationError,
    },

    #[error("Failed to access {}: {source}", path.display())]
    WorkingTree {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}
