//! Durable session state.
//!
//! [`SessionState`] is the only persisted entity. Everything needed to resume
//! a run after a crash, a cancellation or a throttle wait lives here, and
//! every change goes through a named method so the ledger invariants hold:
//!
//! - a unit is in at most one of `processed_units` / `failed_units`, and once
//!   classified it is never reclassified during the session;
//! - `current_coverage` is always the most recent completed measurement;
//! - `coverage_history` only grows, ordered by iteration and timestamp.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry of the coverage history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    pub timestamp: DateTime<Utc>,
    pub coverage: f64,
    pub iteration: u32,
    /// Generated plus repaired artifacts accumulated so far
    pub artifacts_added: usize,
}

/// Resumable record of one coverage session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    session_id: Uuid,
    project_path: PathBuf,
    target_coverage: f64,
    language: String,
    started_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    paused_at: Option<DateTime<Utc>>,

    current_iteration: u32,
    current_coverage: f64,
    #[serde(default)]
    coverage_history: Vec<CoverageSnapshot>,

    #[serde(default)]
    processed_units: BTreeSet<String>,
    #[serde(default)]
    failed_units: BTreeMap<String, String>,
    #[serde(default)]
    generated_artifacts: Vec<PathBuf>,
    #[serde(default)]
    repaired_artifacts: Vec<PathBuf>,

    #[serde(default)]
    last_backend_call: Option<DateTime<Utc>>,
    #[serde(default)]
    backend_call_count: u64,
    #[serde(default)]
    throttled_until: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Fresh session at iteration 0 with empty ledgers.
    pub fn new(
        project_path: impl Into<PathBuf>,
        target_coverage: f64,
        language: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            project_path: project_path.into(),
            target_coverage,
            language: language.into(),
            started_at: now,
            last_updated_at: now,
            paused_at: None,
            current_iteration: 0,
            current_coverage: 0.0,
            coverage_history: Vec::new(),
            processed_units: BTreeSet::new(),
            failed_units: BTreeMap::new(),
            generated_artifacts: Vec::new(),
            repaired_artifacts: Vec::new(),
            last_backend_call: None,
            backend_call_count: 0,
            throttled_until: None,
        }
    }

    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub const fn target_coverage(&self) -> f64 {
        self.target_coverage
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub const fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }

    pub const fn paused_at(&self) -> Option<DateTime<Utc>> {
        self.paused_at
    }

    pub const fn current_iteration(&self) -> u32 {
        self.current_iteration
    }

    pub const fn current_coverage(&self) -> f64 {
        self.current_coverage
    }

    pub fn coverage_history(&self) -> &[CoverageSnapshot] {
        &self.coverage_history
    }

    pub const fn processed_units(&self) -> &BTreeSet<String> {
        &self.processed_units
    }

    pub const fn failed_units(&self) -> &BTreeMap<String, String> {
        &self.failed_units
    }

    pub fn generated_artifacts(&self) -> &[PathBuf] {
        &self.generated_artifacts
    }

    pub fn repaired_artifacts(&self) -> &[PathBuf] {
        &self.repaired_artifacts
    }

    pub const fn last_backend_call(&self) -> Option<DateTime<Utc>> {
        self.last_backend_call
    }

    pub const fn backend_call_count(&self) -> u64 {
        self.backend_call_count
    }

    pub const fn throttled_until(&self) -> Option<DateTime<Utc>> {
        self.throttled_until
    }

    /// Replace the target, e.g. when a resumed run asks for a different one.
    pub fn set_target_coverage(&mut self, target: f64) {
        self.target_coverage = target;
    }

    /// Advance the iteration counter and return the new iteration number.
    pub fn begin_iteration(&mut self) -> u32 {
        self.current_iteration += 1;
        self.current_iteration
    }

    /// Record a completed measurement for the current iteration.
    ///
    /// Re-recording within the same iteration replaces that iteration's
    /// snapshot rather than appending a second one.
    pub fn record_measurement(&mut self, coverage: f64, at: DateTime<Utc>) {
        let timestamp = self
            .coverage_history
            .last()
            .map_or(at, |last| at.max(last.timestamp));
        let snapshot = CoverageSnapshot {
            timestamp,
            coverage,
            iteration: self.current_iteration,
            artifacts_added: self.artifacts_added(),
        };

        match self.coverage_history.last_mut() {
            Some(last) if last.iteration == self.current_iteration => *last = snapshot,
            _ => self.coverage_history.push(snapshot),
        }
        self.current_coverage = coverage;
        self.last_updated_at = timestamp;
    }

    /// Whether `unit_id` already has a terminal outcome this session.
    pub fn is_classified(&self, unit_id: &str) -> bool {
        self.processed_units.contains(unit_id) || self.failed_units.contains_key(unit_id)
    }

    /// Classify a unit as done. Returns `false` and changes nothing if the
    /// unit was already classified.
    pub fn mark_processed(&mut self, unit_id: &str) -> bool {
        if self.is_classified(unit_id) {
            return false;
        }
        self.processed_units.insert(unit_id.to_string())
    }

    /// Classify a unit as failed for the rest of the session, keeping the
    /// full diagnostic. Returns `false` if the unit was already classified.
    pub fn mark_failed(&mut self, unit_id: &str, diagnostic: impl Into<String>) -> bool {
        if self.is_classified(unit_id) {
            return false;
        }
        self.failed_units
            .insert(unit_id.to_string(), diagnostic.into());
        true
    }

    pub fn add_generated_artifact(&mut self, path: impl Into<PathBuf>) {
        self.generated_artifacts.push(path.into());
    }

    pub fn add_repaired_artifact(&mut self, path: impl Into<PathBuf>) {
        self.repaired_artifacts.push(path.into());
    }

    pub fn artifacts_added(&self) -> usize {
        self.generated_artifacts.len() + self.repaired_artifacts.len()
    }

    pub fn record_backend_call(&mut self, at: DateTime<Utc>) {
        self.record_backend_calls(1, at);
    }

    pub fn record_backend_calls(&mut self, count: u64, at: DateTime<Utc>) {
        if count == 0 {
            return;
        }
        self.backend_call_count += count;
        self.last_backend_call = Some(at);
    }

    pub fn set_throttle(&mut self, reset_at: DateTime<Utc>) {
        self.throttled_until = Some(reset_at);
    }

    pub fn clear_throttle(&mut self) {
        self.throttled_until = None;
    }

    /// Time left before the backend may be called again, if any.
    pub fn throttle_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.throttled_until
            .and_then(|until| (until - now).to_std().ok())
            .filter(|remaining| !remaining.is_zero())
    }

    pub fn mark_paused(&mut self, at: DateTime<Utc>) {
        self.paused_at = Some(at);
        self.last_updated_at = at;
    }

    /// Clear the pause marker when a run picks the session back up.
    pub fn mark_resumed(&mut self, at: DateTime<Utc>) {
        self.paused_at = None;
        self.last_updated_at = at;
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_updated_at = at;
    }

    pub fn progress(&self) -> ProgressSummary {
        ProgressSummary {
            iteration: self.current_iteration,
            current_coverage: self.current_coverage,
            target_coverage: self.target_coverage,
            generated: self.generated_artifacts.len(),
            repaired: self.repaired_artifacts.len(),
            failed: self.failed_units.len(),
            processed: self.processed_units.len(),
        }
    }
}

/// Per-iteration progress line shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSummary {
    pub iteration: u32,
    pub current_coverage: f64,
    pub target_coverage: f64,
    pub generated: usize,
    pub repaired: usize,
    pub failed: usize,
    pub processed: usize,
}

impl fmt::Display for ProgressSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iteration {}: coverage {:.2}% / target {:.2}% | generated {} | repaired {} | failed {}",
            self.iteration,
            self.current_coverage,
            self.target_coverage,
            self.generated,
            self.repaired,
            self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn state() -> SessionState {
        SessionState::new("/tmp/project", 80.0, "Go", at(0))
    }

    #[test]
    fn test_new_session_is_empty() {
        let s = state();
        assert_eq!(s.current_iteration(), 0);
        assert!(s.coverage_history().is_empty());
        assert!(s.processed_units().is_empty());
        assert!(s.failed_units().is_empty());
        assert!(s.throttled_until().is_none());
    }

    #[test]
    fn test_classification_is_at_most_once() {
        let mut s = state();
        assert!(s.mark_processed("a.go"));
        assert!(!s.mark_processed("a.go"));
        assert!(!s.mark_failed("a.go", "boom"));
        assert!(s.failed_units().is_empty());

        assert!(s.mark_failed("b.go", "compile error"));
        assert!(!s.mark_processed("b.go"));
        assert!(!s.mark_failed("b.go", "second"));
        assert_eq!(s.failed_units()["b.go"], "compile error");
        assert!(!s.processed_units().contains("b.go"));
    }

    #[test]
    fn test_history_is_monotonic() {
        let mut s = state();
        s.begin_iteration();
        s.record_measurement(60.0, at(10));
        s.begin_iteration();
        // Clock went backwards; timestamp must not.
        s.record_measurement(65.0, at(5));

        let history = s.coverage_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].iteration, 1);
        assert_eq!(history[1].iteration, 2);
        assert!(history[1].timestamp >= history[0].timestamp);
        assert!((s.current_coverage() - 65.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_remeasuring_same_iteration_replaces_snapshot() {
        let mut s = state();
        s.begin_iteration();
        s.record_measurement(60.0, at(10));
        s.record_measurement(61.0, at(11));
        assert_eq!(s.coverage_history().len(), 1);
        assert!((s.coverage_history()[0].coverage - 61.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_throttle_remaining() {
        let mut s = state();
        assert!(s.throttle_remaining(at(0)).is_none());

        s.set_throttle(at(60));
        assert_eq!(s.throttle_remaining(at(0)), Some(Duration::from_secs(60)));
        assert!(s.throttle_remaining(at(60)).is_none());
        assert!(s.throttle_remaining(at(90)).is_none());

        s.clear_throttle();
        assert!(s.throttled_until().is_none());
    }

    #[test]
    fn test_progress_counts() {
        let mut s = state();
        s.add_generated_artifact("a_test.go");
        s.add_repaired_artifact("b_test.go");
        s.mark_failed("c.go", "x");
        let p = s.progress();
        assert_eq!((p.generated, p.repaired, p.failed), (1, 1, 1));
        assert!(p.to_string().contains("target 80.00%"));
    }

    #[test]
    fn test_round_trips_through_json() {
        let mut s = state();
        s.begin_iteration();
        s.record_measurement(42.5, at(3));
        s.mark_processed("x.go");
        s.set_throttle(at(120));

        let json = serde_json::to_string(&s).unwrap();
        let restored: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, s);
    }
}
