//! The coverage control loop.
//!
//! One work item per iteration, strictly sequential:
//!
//! 1. honor cancellation and the iteration ceiling, then any pending
//!    throttle deadline (persisting before the wait);
//! 2. measure coverage and stop once the target is met;
//! 3. pick the highest-priority unclassified unit;
//! 4. generate (or improve) its test artifact and run the bounded
//!    validate/repair ladder;
//! 5. classify the unit and persist.
//!
//! A throttled backend reschedules the current unit without classifying it.
//! The state is saved on every way out of the loop, errors included.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::{GenerationError, OrchestratorError, SessionError, ToolError};
use crate::domain::models::{
    Config, CoverageModel, FailureKind, ProgressSummary, SessionState, ToolErrorPolicy,
    ValidationResult, WorkItem,
};
use crate::domain::ports::{
    Clock, CoverageAnalyzer, GenerationClient, GenerationRequest, RepairReason, RepairRequest,
    SessionStore, SnapshotRecorder,
};
use crate::services::prioritizer::prioritize;
use crate::services::validator::{ArtifactValidator, RetryReport, ValidateError};

/// Per-run knobs, resolved from configuration and command-line flags.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub project_root: PathBuf,
    pub target_coverage: f64,
    pub max_iterations: u32,
    pub max_repair_retries: u32,
    pub dry_run: bool,
    pub on_tool_error: ToolErrorPolicy,
    pub rollback_failed_artifacts: bool,
}

impl RunSettings {
    pub fn from_config(config: &Config, project_root: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            project_root: project_root.into(),
            target_coverage: config.target_coverage,
            max_iterations: config.max_iterations,
            max_repair_retries: config.validation.max_repair_retries,
            dry_run,
            on_tool_error: config.validation.on_tool_error,
            rollback_failed_artifacts: config.validation.rollback_failed_artifacts,
        }
    }
}

/// How a run ended without error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    TargetReached { coverage: f64 },
    NoRemainingCandidates,
    MaxIterationsReached,
    Cancelled,
    /// Preview only: the ordered plan that a real run would work through
    DryRunComplete { work_items: Vec<WorkItem> },
}

/// Whether a unit gets a brand-new artifact or an improved existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitMode {
    Generate,
    Improve,
}

/// Progress notifications for whoever is watching the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    SessionStarted {
        session_id: Uuid,
        language: String,
        resumed: bool,
        branch: Option<String>,
    },
    IterationStarted {
        iteration: u32,
    },
    CoverageMeasured {
        iteration: u32,
        coverage: f64,
        target: f64,
    },
    WorkPlanned {
        candidates: usize,
        next_unit: String,
    },
    UnitStarted {
        unit_id: String,
        artifact_path: PathBuf,
        mode: UnitMode,
    },
    RepairRequested {
        unit_id: String,
        attempt: u32,
        kind: Option<FailureKind>,
    },
    UnitPassed {
        unit_id: String,
        artifact_path: PathBuf,
        repairs: u32,
    },
    UnitFailed {
        unit_id: String,
        reason: String,
    },
    Throttled {
        unit_id: String,
        reset_at: DateTime<Utc>,
    },
    Waiting {
        until: DateTime<Utc>,
        remaining_secs: u64,
    },
    WaitFinished,
    Progress(ProgressSummary),
    Finished {
        outcome: String,
    },
}

/// Failures raised inside a repair step.
#[derive(Debug)]
enum RepairFailure {
    Generation(GenerationError),
    WorkingTree {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Drives one coverage session to completion.
pub struct CoverageOrchestrator {
    analyzer: Arc<dyn CoverageAnalyzer>,
    generator: Arc<dyn GenerationClient>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    validator: ArtifactValidator,
    snapshots: Option<Arc<dyn SnapshotRecorder>>,
    events: Option<mpsc::Sender<OrchestratorEvent>>,
    cancel: CancellationToken,
    settings: RunSettings,
    state: SessionState,
    resumed: bool,
}

impl CoverageOrchestrator {
    pub fn new(
        analyzer: Arc<dyn CoverageAnalyzer>,
        generator: Arc<dyn GenerationClient>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        settings: RunSettings,
        state: SessionState,
    ) -> Self {
        let validator = ArtifactValidator::new(analyzer.clone(), settings.project_root.clone());
        Self {
            analyzer,
            generator,
            store,
            clock,
            validator,
            snapshots: None,
            events: None,
            cancel: CancellationToken::new(),
            settings,
            state,
            resumed: false,
        }
    }

    #[must_use]
    pub fn with_snapshots(mut self, recorder: Arc<dyn SnapshotRecorder>) -> Self {
        self.snapshots = Some(recorder);
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: mpsc::Sender<OrchestratorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Mark the state as loaded from a previous run.
    #[must_use]
    pub const fn resumed(mut self, resumed: bool) -> Self {
        self.resumed = resumed;
        self
    }

    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn into_state(self) -> SessionState {
        self.state
    }

    /// Run the loop until a terminal outcome or an error.
    ///
    /// Every exit path saves the state first, except dry runs, which never
    /// write it.
    #[instrument(skip(self), fields(session = %self.state.session_id()))]
    pub async fn run(&mut self) -> Result<RunOutcome, OrchestratorError> {
        self.start().await;

        let result = self.run_loop().await;

        match &result {
            Ok(outcome) => {
                info!(?outcome, "coverage session finished");
                self.emit(OrchestratorEvent::Finished {
                    outcome: outcome_label(outcome).to_string(),
                })
                .await;
            }
            Err(err) => {
                error!(error = %err, "coverage session stopped");
                self.state.touch(self.clock.now());
                if let Err(save_err) = self.persist() {
                    error!(error = %save_err, "failed to save session state after error");
                }
                self.emit(OrchestratorEvent::Finished {
                    outcome: "error".to_string(),
                })
                .await;
            }
        }

        result
    }

    async fn start(&mut self) {
        let now = self.clock.now();
        if self.resumed {
            self.state.mark_resumed(now);
            info!(
                iteration = self.state.current_iteration(),
                processed = self.state.processed_units().len(),
                failed = self.state.failed_units().len(),
                "resuming coverage session"
            );
        }

        let mut branch = None;
        if !self.resumed && !self.settings.dry_run {
            if let Some(recorder) = &self.snapshots {
                match recorder
                    .begin_session(&self.settings.project_root, self.state.started_at())
                    .await
                {
                    Ok(created) => branch = created,
                    Err(err) => warn!(error = %err, "could not prepare version control branch"),
                }
            }
        }

        self.emit(OrchestratorEvent::SessionStarted {
            session_id: self.state.session_id(),
            language: self.state.language().to_string(),
            resumed: self.resumed,
            branch,
        })
        .await;
    }

    async fn run_loop(&mut self) -> Result<RunOutcome, OrchestratorError> {
        loop {
            if self.cancel.is_cancelled() {
                return self.stop_cancelled();
            }

            // A pending throttle deadline stays saved for the next run.
            if self.state.current_iteration() >= self.settings.max_iterations {
                info!(
                    max_iterations = self.settings.max_iterations,
                    "iteration ceiling reached"
                );
                self.persist()?;
                return Ok(RunOutcome::MaxIterationsReached);
            }

            if !self.settings.dry_run && !self.wait_out_throttle().await? {
                return self.stop_cancelled();
            }

            let iteration = self.state.current_iteration() + 1;
            self.emit(OrchestratorEvent::IterationStarted { iteration })
                .await;

            let coverage = self
                .analyzer
                .run_coverage(&self.settings.project_root)
                .await
                .map_err(OrchestratorError::Measurement)?;

            // Only a completed measurement advances the iteration.
            self.state.begin_iteration();
            self.state
                .record_measurement(coverage.total_coverage(), self.clock.now());
            info!(
                iteration,
                coverage = coverage.total_coverage(),
                target = self.settings.target_coverage,
                units = coverage.len(),
                "coverage measured"
            );
            self.emit(OrchestratorEvent::CoverageMeasured {
                iteration,
                coverage: coverage.total_coverage(),
                target: self.settings.target_coverage,
            })
            .await;

            if coverage.total_coverage() >= self.settings.target_coverage {
                self.persist()?;
                return Ok(RunOutcome::TargetReached {
                    coverage: coverage.total_coverage(),
                });
            }

            let work_items = self.plan(&coverage);
            let Some(next) = work_items.first() else {
                info!("no remaining candidates");
                self.persist()?;
                return Ok(RunOutcome::NoRemainingCandidates);
            };
            self.emit(OrchestratorEvent::WorkPlanned {
                candidates: work_items.len(),
                next_unit: next.unit_id.clone(),
            })
            .await;

            if self.settings.dry_run {
                return Ok(RunOutcome::DryRunComplete { work_items });
            }

            let item = next.clone();
            self.process(&item).await?;

            self.state.touch(self.clock.now());
            self.persist()?;
            self.emit(OrchestratorEvent::Progress(self.state.progress()))
                .await;
        }
    }

    fn plan(&self, coverage: &CoverageModel) -> Vec<WorkItem> {
        let root = &self.settings.project_root;
        prioritize(
            coverage,
            &self.state,
            |unit| self.analyzer.artifact_path_for(unit),
            |artifact| root.join(artifact).is_file(),
        )
    }

    /// Block until any throttle deadline has passed. Returns `false` if
    /// cancelled while waiting.
    async fn wait_out_throttle(&mut self) -> Result<bool, OrchestratorError> {
        let Some(until) = self.state.throttled_until() else {
            return Ok(true);
        };

        let mut persisted = false;
        while let Some(remaining) = self.state.throttle_remaining(self.clock.now()) {
            if !persisted {
                self.persist()?;
                persisted = true;
            }
            info!(until = %until, remaining_secs = remaining.as_secs(), "waiting for throttle to reset");
            self.emit(OrchestratorEvent::Waiting {
                until,
                remaining_secs: remaining.as_secs(),
            })
            .await;

            if !self.sleep_or_cancel(remaining).await {
                return Ok(false);
            }
        }

        self.state.clear_throttle();
        self.emit(OrchestratorEvent::WaitFinished).await;
        Ok(true)
    }

    async fn sleep_or_cancel(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = self.clock.sleep(duration) => true,
        }
    }

    fn stop_cancelled(&mut self) -> Result<RunOutcome, OrchestratorError> {
        info!("cancellation requested, saving session");
        self.state.mark_paused(self.clock.now());
        self.persist()?;
        Ok(RunOutcome::Cancelled)
    }

    /// Generate or improve one unit's artifact, validate it and classify.
    #[instrument(skip(self, item), fields(unit = %item.unit_id))]
    async fn process(&mut self, item: &WorkItem) -> Result<(), OrchestratorError> {
        let root = self.settings.project_root.clone();
        let unit_path = root.join(&item.unit_id);
        let artifact_abs = root.join(&item.artifact_path);

        let unit_source = read_file(&unit_path).await?;
        let original = if item.artifact_exists {
            Some(read_file(&artifact_abs).await?)
        } else {
            None
        };
        let mode = if original.is_some() {
            UnitMode::Improve
        } else {
            UnitMode::Generate
        };

        info!(artifact = %item.artifact_path.display(), ?mode, coverage = item.current_coverage, "processing unit");
        self.emit(OrchestratorEvent::UnitStarted {
            unit_id: item.unit_id.clone(),
            artifact_path: item.artifact_path.clone(),
            mode,
        })
        .await;

        let language = self.analyzer.name().to_string();
        self.state.record_backend_call(self.clock.now());
        let response = match &original {
            Some(existing) => {
                self.generator
                    .repair_artifact(&RepairRequest {
                        language: language.clone(),
                        unit_id: item.unit_id.clone(),
                        unit_source: unit_source.clone(),
                        artifact_path: item.artifact_path.clone(),
                        artifact_source: existing.clone(),
                        reason: RepairReason::CoverageGap {
                            uncovered_lines: item.uncovered_lines.clone(),
                        },
                    })
                    .await
            }
            None => {
                self.generator
                    .generate_artifact(&GenerationRequest {
                        language: language.clone(),
                        unit_id: item.unit_id.clone(),
                        unit_source: unit_source.clone(),
                        artifact_path: item.artifact_path.clone(),
                        current_coverage: item.current_coverage,
                        uncovered_lines: item.uncovered_lines.clone(),
                    })
                    .await
            }
        };

        let body = match response {
            Ok(body) => body,
            Err(GenerationError::Throttled { reset_at }) => {
                self.reschedule(item, reset_at).await;
                return Ok(());
            }
            Err(source) => {
                return Err(OrchestratorError::Generation {
                    unit: item.unit_id.clone(),
                    source,
                })
            }
        };

        write_file(&artifact_abs, &body).await?;

        let repair_calls = AtomicU64::new(0);
        let outcome = self
            .validate_with_repairs(item, &language, &unit_source, &artifact_abs, &repair_calls)
            .await;
        self.state
            .record_backend_calls(repair_calls.load(Ordering::Relaxed), self.clock.now());

        match outcome {
            Ok(report) if report.result.success => {
                self.state.mark_processed(&item.unit_id);
                match mode {
                    UnitMode::Generate => self.state.add_generated_artifact(&item.artifact_path),
                    UnitMode::Improve => self.state.add_repaired_artifact(&item.artifact_path),
                }
                info!(repairs = report.repairs, "artifact passed");
                self.emit(OrchestratorEvent::UnitPassed {
                    unit_id: item.unit_id.clone(),
                    artifact_path: item.artifact_path.clone(),
                    repairs: report.repairs,
                })
                .await;
                self.snapshot(item).await;
                Ok(())
            }
            Ok(report) => {
                self.rollback(&artifact_abs, original.as_deref()).await;
                self.fail_unit(item, &report.result).await;
                Ok(())
            }
            Err(ValidateError::Repair(RepairFailure::Generation(GenerationError::Throttled {
                reset_at,
            }))) => {
                self.rollback(&artifact_abs, original.as_deref()).await;
                self.reschedule(item, reset_at).await;
                Ok(())
            }
            Err(ValidateError::Repair(RepairFailure::Generation(source))) => {
                self.rollback(&artifact_abs, original.as_deref()).await;
                Err(OrchestratorError::Generation {
                    unit: item.unit_id.clone(),
                    source,
                })
            }
            Err(ValidateError::Repair(RepairFailure::WorkingTree { path, source })) => {
                self.rollback(&artifact_abs, original.as_deref()).await;
                Err(OrchestratorError::WorkingTree { path, source })
            }
            Err(ValidateError::Tool(source)) => {
                self.rollback(&artifact_abs, original.as_deref()).await;
                self.handle_tool_error(item, source).await
            }
        }
    }

    async fn validate_with_repairs(
        &self,
        item: &WorkItem,
        language: &str,
        unit_source: &str,
        artifact_abs: &Path,
        repair_calls: &AtomicU64,
    ) -> Result<RetryReport, ValidateError<RepairFailure>> {
        let generator = &self.generator;
        let events = self.events.clone();

        self.validator
            .validate_and_retry(
                &item.artifact_path,
                |result: &ValidationResult| {
                    let attempt = u32::try_from(repair_calls.fetch_add(1, Ordering::Relaxed))
                        .unwrap_or(u32::MAX)
                        .saturating_add(1);
                    let kind = result.failure_kind();
                    let reason = repair_reason(result);
                    let events = events.clone();
                    let request_base = (
                        language.to_string(),
                        item.unit_id.clone(),
                        unit_source.to_string(),
                        item.artifact_path.clone(),
                    );
                    let path = artifact_abs.to_path_buf();

                    async move {
                        let (language, unit_id, unit_source, artifact_path) = request_base;
                        if let Some(tx) = &events {
                            let _ = tx
                                .send(OrchestratorEvent::RepairRequested {
                                    unit_id: unit_id.clone(),
                                    attempt,
                                    kind,
                                })
                                .await;
                        }

                        let artifact_source = tokio::fs::read_to_string(&path).await.map_err(
                            |source| RepairFailure::WorkingTree {
                                path: path.clone(),
                                source,
                            },
                        )?;
                        let body = generator
                            .repair_artifact(&RepairRequest {
                                language,
                                unit_id,
                                unit_source,
                                artifact_path,
                                artifact_source,
                                reason,
                            })
                            .await
                            .map_err(RepairFailure::Generation)?;
                        tokio::fs::write(&path, body)
                            .await
                            .map_err(|source| RepairFailure::WorkingTree {
                                path: path.clone(),
                                source,
                            })
                    }
                },
                self.settings.max_repair_retries,
            )
            .await
    }

    async fn fail_unit(&mut self, item: &WorkItem, result: &ValidationResult) {
        let reason = result
            .error_message
            .clone()
            .unwrap_or_else(|| "validation failed".to_string());
        warn!(unit = %item.unit_id, %reason, "unit failed validation, skipping for this session");
        self.state.mark_failed(&item.unit_id, result.diagnostic());
        self.emit(OrchestratorEvent::UnitFailed {
            unit_id: item.unit_id.clone(),
            reason,
        })
        .await;
    }

    async fn handle_tool_error(
        &mut self,
        item: &WorkItem,
        source: ToolError,
    ) -> Result<(), OrchestratorError> {
        match self.settings.on_tool_error {
            ToolErrorPolicy::FailFast => Err(OrchestratorError::Validation {
                unit: item.unit_id.clone(),
                source,
            }),
            ToolErrorPolicy::MarkAndContinue => {
                let reason = format!("Toolchain error: {source}");
                warn!(unit = %item.unit_id, %reason, "marking unit failed and continuing");
                self.state.mark_failed(&item.unit_id, reason.clone());
                self.emit(OrchestratorEvent::UnitFailed {
                    unit_id: item.unit_id.clone(),
                    reason,
                })
                .await;
                Ok(())
            }
        }
    }

    /// Record the throttle deadline; the unit stays unclassified and comes
    /// back after the wait.
    async fn reschedule(&mut self, item: &WorkItem, reset_at: DateTime<Utc>) {
        warn!(unit = %item.unit_id, %reset_at, "generation backend throttled, rescheduling");
        self.state.set_throttle(reset_at);
        self.emit(OrchestratorEvent::Throttled {
            unit_id: item.unit_id.clone(),
            reset_at,
        })
        .await;
    }

    /// Put the artifact back the way it was before this iteration.
    async fn rollback(&self, artifact: &Path, original: Option<&str>) {
        if !self.settings.rollback_failed_artifacts {
            return;
        }
        let result = match original {
            Some(contents) => tokio::fs::write(artifact, contents).await,
            None => match tokio::fs::remove_file(artifact).await {
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        match result {
            Ok(()) => debug!(artifact = %artifact.display(), "rolled back artifact"),
            Err(err) => {
                warn!(artifact = %artifact.display(), error = %err, "failed to roll back artifact");
            }
        }
    }

    async fn snapshot(&self, item: &WorkItem) {
        let Some(recorder) = &self.snapshots else {
            return;
        };
        let message = format!(
            "Add tests for {} (coverage was {:.1}%)",
            item.unit_id, item.current_coverage
        );
        if let Err(err) = recorder
            .record(&self.settings.project_root, &item.artifact_path, &message)
            .await
        {
            warn!(unit = %item.unit_id, error = %err, "version control snapshot failed");
        }
    }

    fn persist(&self) -> Result<(), SessionError> {
        if self.settings.dry_run {
            debug!("dry run, session state not written");
            return Ok(());
        }
        self.store.save(&self.state)?;
        debug!(
            location = %self.store.location().display(),
            iteration = self.state.current_iteration(),
            "session state saved"
        );
        Ok(())
    }

    async fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).await.is_err() {
                debug!("event receiver dropped");
            }
        }
    }
}

/// Map a failed validation to the repair prompt it should get.
fn repair_reason(result: &ValidationResult) -> RepairReason {
    match result.failure_kind() {
        Some(FailureKind::Compilation) => RepairReason::CompilationFailure {
            output: result.output.clone(),
        },
        _ => RepairReason::TestFailure {
            output: result.output.clone(),
            failed_tests: result.failed_unit_names.clone(),
        },
    }
}

const fn outcome_label(outcome: &RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::TargetReached { .. } => "target_reached",
        RunOutcome::NoRemainingCandidates => "no_remaining_candidates",
        RunOutcome::MaxIterationsReached => "max_iterations_reached",
        RunOutcome::Cancelled => "cancelled",
        RunOutcome::DryRunComplete { .. } => "dry_run_complete",
    }
}

async fn read_file(path: &Path) -> Result<String, OrchestratorError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| OrchestratorError::WorkingTree {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_file(path: &Path, contents: &str) -> Result<(), OrchestratorError> {
    let to_err = |source| OrchestratorError::WorkingTree {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
    }
    tokio::fs::write(path, contents).await.map_err(to_err)
}

/// Open the session for a run: load and reconcile a saved one when resuming,
/// otherwise start fresh. Returns the state and whether it was resumed.
pub fn open_session(
    store: &dyn SessionStore,
    analyzer: &dyn CoverageAnalyzer,
    settings: &RunSettings,
    resume: bool,
    now: DateTime<Utc>,
) -> Result<(SessionState, bool), SessionError> {
    if resume && store.exists() {
        let mut state = store.load()?;
        if state.language() != analyzer.name() {
            return Err(SessionError::EcosystemMismatch {
                saved: state.language().to_string(),
                detected: analyzer.name().to_string(),
            });
        }
        if !same_path(state.project_path(), &settings.project_root) {
            return Err(SessionError::ProjectMismatch {
                saved: state.project_path().to_path_buf(),
                current: settings.project_root.clone(),
            });
        }
        if (state.target_coverage() - settings.target_coverage).abs() > f64::EPSILON {
            info!(
                saved = state.target_coverage(),
                requested = settings.target_coverage,
                "target coverage changed on resume"
            );
            state.set_target_coverage(settings.target_coverage);
        }
        return Ok((state, true));
    }

    if resume {
        warn!(location = %store.location().display(), "no saved session to resume, starting fresh");
    }
    Ok((
        SessionState::new(
            settings.project_root.clone(),
            settings.target_coverage,
            analyzer.name(),
            now,
        ),
        false,
    ))
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
