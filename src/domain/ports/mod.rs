//! Ports implemented by infrastructure adapters and consumed by services.

pub mod clock;
pub mod coverage_analyzer;
pub mod generation_client;
pub mod session_store;
pub mod snapshot_recorder;

pub use clock::{Clock, SystemClock};
pub use coverage_analyzer::{CoverageAnalyzer, ToolOutcome};
pub use generation_client::{
    DisabledGenerationClient, GenerationClient, GenerationRequest, LlmClient, RepairReason,
    RepairRequest,
};
pub use session_store::SessionStore;
pub use snapshot_recorder::SnapshotRecorder;
