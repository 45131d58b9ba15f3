use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;

/// A candidate unit for this iteration, with its derived priority.
///
/// Recomputed every iteration from the current coverage model and session
/// ledger. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItem {
    pub unit_id: String,

    /// Project-relative location of the companion test artifact
    pub artifact_path: PathBuf,

    pub current_coverage: f64,

    pub uncovered_lines: BTreeSet<u32>,

    /// Higher is more urgent
    pub priority: i64,

    pub artifact_exists: bool,
}
