//! Work-item prioritization.
//!
//! Turns a coverage measurement and the session ledger into the ordered list
//! of units worth attempting this iteration.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::models::{CoverageModel, SessionState, WorkItem};

/// Priority of a unit: `100 - coverage`, truncated toward zero.
#[allow(clippy::cast_possible_truncation)]
pub fn priority_for(coverage: f64) -> i64 {
    (100.0 - coverage).trunc() as i64
}

/// Build the ordered work queue.
///
/// Units already processed or failed this session are excluded, as are
/// fully covered units. Order is by priority (highest first), then by exact
/// coverage (lowest first), then by position in the model. `locate` maps a
/// unit to its artifact path and `exists` reports whether that artifact is
/// already on disk.
pub fn prioritize<L, E>(
    coverage: &CoverageModel,
    state: &SessionState,
    locate: L,
    exists: E,
) -> Vec<WorkItem>
where
    L: Fn(&str) -> Option<PathBuf>,
    E: Fn(&Path) -> bool,
{
    let mut items: Vec<WorkItem> = coverage
        .units_below_full()
        .filter(|unit| !state.is_classified(&unit.unit_id))
        .filter_map(|unit| {
            let Some(artifact_path) = locate(&unit.unit_id) else {
                debug!(unit = %unit.unit_id, "no artifact location, skipping");
                return None;
            };
            let artifact_exists = exists(&artifact_path);
            Some(WorkItem {
                unit_id: unit.unit_id.clone(),
                artifact_path,
                current_coverage: unit.coverage,
                uncovered_lines: unit.uncovered_lines.clone(),
                priority: priority_for(unit.coverage),
                artifact_exists,
            })
        })
        .collect();

    // sort_by is stable, so equal keys keep model order.
    items.sort_by(|a, b| match b.priority.cmp(&a.priority) {
        Ordering::Equal => a.current_coverage.total_cmp(&b.current_coverage),
        other => other,
    });
    items
}
