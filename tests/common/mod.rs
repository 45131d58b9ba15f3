//! Common test utilities for integration tests
//!
//! Scripted fakes for every port the orchestrator consumes, plus a
//! throwaway project directory.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use coverage_agent::domain::ports::{
    Clock, CoverageAnalyzer, GenerationClient, GenerationRequest, RepairRequest, SessionStore,
    ToolOutcome,
};
use coverage_agent::domain::{GenerationError, SessionError, ToolError};
use coverage_agent::domain::models::{CoverageModel, SessionState, UnitCoverage};
use coverage_agent::services::RunSettings;

/// Setup test logging
#[allow(dead_code)]
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

/// A project directory holding `pkg/<name>.go` for every unit name.
pub fn go_project(units: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    for unit in units {
        let path = dir.path().join(unit);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("package pkg\n\n// {unit}\nfunc F() int {{ return 1 }}\n"))
            .unwrap();
    }
    dir
}

/// Coverage model with the given total and `(unit, coverage)` pairs.
pub fn model(total: f64, units: &[(&str, f64)]) -> CoverageModel {
    CoverageModel::new(
        total,
        units
            .iter()
            .map(|(id, cov)| UnitCoverage::new(*id, *cov, [3, 4]))
            .collect(),
    )
}

pub fn settings(root: &Path, target: f64) -> RunSettings {
    RunSettings {
        project_root: root.to_path_buf(),
        target_coverage: target,
        max_iterations: 20,
        max_repair_retries: 2,
        dry_run: false,
        on_tool_error: coverage_agent::domain::models::ToolErrorPolicy::MarkAndContinue,
        rollback_failed_artifacts: true,
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Go-like analyzer whose measurements and validation outcomes are scripted.
///
/// The last measurement repeats once the script runs out; validations pass
/// by default.
pub struct FakeAnalyzer {
    measurements: Mutex<VecDeque<CoverageModel>>,
    last: Mutex<CoverageModel>,
    validations: Mutex<VecDeque<Result<ToolOutcome, ToolError>>>,
    pub measure_calls: Mutex<u32>,
    pub validated: Mutex<Vec<PathBuf>>,
}

impl FakeAnalyzer {
    pub fn new(measurements: Vec<CoverageModel>) -> Self {
        Self {
            measurements: Mutex::new(measurements.into()),
            last: Mutex::new(CoverageModel::default()),
            validations: Mutex::new(VecDeque::new()),
            measure_calls: Mutex::new(0),
            validated: Mutex::new(Vec::new()),
        }
    }

    pub fn with_validations(self, outcomes: Vec<Result<ToolOutcome, ToolError>>) -> Self {
        *self.validations.lock().unwrap() = outcomes.into();
        self
    }

    pub fn measure_calls(&self) -> u32 {
        *self.measure_calls.lock().unwrap()
    }

    pub fn validation_count(&self) -> usize {
        self.validated.lock().unwrap().len()
    }
}

#[async_trait]
impl CoverageAnalyzer for FakeAnalyzer {
    fn name(&self) -> &'static str {
        "Go"
    }

    fn detect(&self, _project: &Path) -> bool {
        true
    }

    async fn run_coverage(&self, _project: &Path) -> Result<CoverageModel, ToolError> {
        *self.measure_calls.lock().unwrap() += 1;
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.measurements.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }

    fn artifact_path_for(&self, unit_id: &str) -> Option<PathBuf> {
        unit_id
            .strip_suffix(".go")
            .map(|stem| PathBuf::from(format!("{stem}_test.go")))
    }

    fn unit_for_artifact(&self, artifact: &Path) -> Option<String> {
        artifact
            .to_str()?
            .strip_suffix("_test.go")
            .map(|stem| format!("{stem}.go"))
    }

    async fn run_artifact(
        &self,
        project: &Path,
        artifact: &Path,
    ) -> Result<ToolOutcome, ToolError> {
        self.validate_artifact(project, artifact).await
    }

    async fn validate_artifact(
        &self,
        _project: &Path,
        artifact: &Path,
    ) -> Result<ToolOutcome, ToolError> {
        self.validated.lock().unwrap().push(artifact.to_path_buf());
        self.validations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ToolOutcome::passed("ok")))
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Generation client that answers from a script, then with a canned body.
#[derive(Default)]
pub struct FakeGenerator {
    responses: Mutex<VecDeque<Result<String, GenerationError>>>,
    pub generated_for: Mutex<Vec<String>>,
    pub repaired_for: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(responses: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn generated_for(&self) -> Vec<String> {
        self.generated_for.lock().unwrap().clone()
    }

    pub fn repaired_for(&self) -> Vec<String> {
        self.repaired_for.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.generated_for.lock().unwrap().len() + self.repaired_for.lock().unwrap().len()
    }

    fn next(&self, unit: &str) -> Result<String, GenerationError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("package pkg\n\n// tests for {unit}\n")))
    }
}

#[async_trait]
impl GenerationClient for FakeGenerator {
    async fn generate_artifact(
        &self,
        request: &GenerationRequest,
    ) -> Result<String, GenerationError> {
        self.generated_for
            .lock()
            .unwrap()
            .push(request.unit_id.clone());
        self.next(&request.unit_id)
    }

    async fn repair_artifact(&self, request: &RepairRequest) -> Result<String, GenerationError> {
        self.repaired_for
            .lock()
            .unwrap()
            .push(request.unit_id.clone());
        self.next(&request.unit_id)
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Manual clock: `sleep` returns at once after advancing `now`.
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    pub slept: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            slept: Mutex::new(Vec::new()),
        }
    }

    pub fn total_slept(&self) -> Duration {
        self.slept.lock().unwrap().iter().sum()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(duration).unwrap();
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// In-memory session store that keeps every snapshot written.
pub struct MemoryStore {
    location: PathBuf,
    saves: Mutex<Vec<SessionState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            location: PathBuf::from("memory://session.json"),
            saves: Mutex::new(Vec::new()),
        }
    }

    pub fn with_state(state: SessionState) -> Self {
        let store = Self::new();
        store.saves.lock().unwrap().push(state);
        store
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    pub fn history(&self) -> Vec<SessionState> {
        self.saves.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Option<SessionState> {
        self.saves.lock().unwrap().last().cloned()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<SessionState, SessionError> {
        self.latest()
            .ok_or_else(|| SessionError::NotFound(self.location.clone()))
    }

    fn save(&self, state: &SessionState) -> Result<(), SessionError> {
        self.saves.lock().unwrap().push(state.clone());
        Ok(())
    }

    fn exists(&self) -> bool {
        !self.saves.lock().unwrap().is_empty()
    }

    fn location(&self) -> &Path {
        &self.location
    }
}

/// Shared handles to the fakes behind one orchestrator.
pub struct Harness {
    pub project: TempDir,
    pub analyzer: Arc<FakeAnalyzer>,
    pub generator: Arc<FakeGenerator>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FakeClock>,
}

impl Harness {
    pub fn new(units: &[&str], analyzer: FakeAnalyzer, generator: FakeGenerator) -> Self {
        Self {
            project: go_project(units),
            analyzer: Arc::new(analyzer),
            generator: Arc::new(generator),
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(FakeClock::new(start_time())),
        }
    }

    pub fn root(&self) -> &Path {
        self.project.path()
    }

    pub fn fresh_state(&self, target: f64) -> SessionState {
        SessionState::new(self.root(), target, "Go", start_time())
    }

    pub fn orchestrator(
        &self,
        settings: RunSettings,
        state: SessionState,
    ) -> coverage_agent::services::CoverageOrchestrator {
        coverage_agent::services::CoverageOrchestrator::new(
            self.analyzer.clone(),
            self.generator.clone(),
            self.store.clone(),
            self.clock.clone(),
            settings,
            state,
        )
    }
}
