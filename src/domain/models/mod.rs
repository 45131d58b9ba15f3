pub mod config;
pub mod coverage;
pub mod session;
pub mod validation;
pub mod work_item;

pub use config::{
    Config, GenerationConfig, LoggingConfig, RateLimitConfig, RetryConfig, ToolErrorPolicy,
    ValidationConfig, VcsConfig,
};
pub use coverage::{CoverageModel, UnitCoverage};
pub use session::{CoverageSnapshot, ProgressSummary, SessionState};
pub use validation::{FailureKind, ValidationResult, ValidationStage};
pub use work_item::WorkItem;
