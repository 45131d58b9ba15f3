//! Implementation of the `coverage-agent run` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, CellAlignment};
use console::style;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::output::events::EventPrinter;
use crate::cli::output::table::list_table;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, ProgressSummary, WorkItem};
use crate::domain::ports::{
    Clock, DisabledGenerationClient, GenerationClient, SessionStore, SystemClock,
};
use crate::infrastructure::claude::{ClaudeClient, ClaudeClientConfig};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::coverage::detect_analyzer;
use crate::infrastructure::logging::{LogConfig, LoggerImpl};
use crate::infrastructure::persistence::JsonSessionStore;
use crate::infrastructure::vcs::GitSnapshotter;
use crate::services::{open_session, CoverageOrchestrator, RunOutcome, RunSettings, TestGenerator};

const EVENT_BUFFER: usize = 64;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Project directory to work on
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub project: PathBuf,

    /// Coverage percentage to reach (0-100)
    #[arg(short, long, value_parser = parse_target)]
    pub target: Option<f64>,

    /// Session state file, relative to the current directory
    #[arg(long, value_name = "FILE")]
    pub state: Option<PathBuf>,

    /// Measure and print the work plan without generating anything
    #[arg(long)]
    pub dry_run: bool,

    /// Continue the session saved in the state file
    #[arg(long)]
    pub resume: bool,

    /// Upper bound on iterations for the whole session
    #[arg(long, value_name = "N")]
    pub max_iterations: Option<u32>,

    /// Generation backend API key (falls back to ANTHROPIC_API_KEY)
    #[arg(long, value_name = "KEY")]
    pub api_key: Option<String>,
}

impl RunArgs {
    /// Command-line flags take precedence over every configuration layer.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(target) = self.target {
            config.target_coverage = target;
        }
        if let Some(max) = self.max_iterations {
            config.max_iterations = max;
        }
        if let Some(state) = &self.state {
            config.state_file.clone_from(state);
        }
        if let Some(key) = &self.api_key {
            config.generation.api_key = Some(key.clone());
        }
    }
}

/// Parse and range-check a target percentage.
pub fn parse_target(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .trim_end_matches('%')
        .parse()
        .map_err(|_| format!("`{raw}` is not a number"))?;
    if (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("target must be between 0 and 100, got {value}"))
    }
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub session_id: String,
    pub language: String,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    pub progress: ProgressSummary,
    /// `None` for dry runs, which never write state
    pub state_file: Option<PathBuf>,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        match &self.outcome {
            RunOutcome::TargetReached { coverage } => lines.push(format!(
                "{} Target reached: {coverage:.1}% (target {:.1}%)",
                style("✓").green(),
                self.progress.target_coverage
            )),
            RunOutcome::NoRemainingCandidates => lines.push(format!(
                "{} No units left to work on; coverage stopped at {:.1}%",
                style("!").yellow(),
                self.progress.current_coverage
            )),
            RunOutcome::MaxIterationsReached => lines.push(format!(
                "{} Iteration limit reached at {:.1}%",
                style("!").yellow(),
                self.progress.current_coverage
            )),
            RunOutcome::Cancelled => lines.push(format!(
                "{} Interrupted; run again with --resume to continue",
                style("!").yellow()
            )),
            RunOutcome::DryRunComplete { work_items } => {
                lines.push(format!(
                    "Dry run: coverage {:.1}%, target {:.1}%, {} candidate unit(s)",
                    self.progress.current_coverage,
                    self.progress.target_coverage,
                    work_items.len()
                ));
                if !work_items.is_empty() {
                    lines.push(String::new());
                    lines.push(work_plan_table(work_items).to_string());
                }
            }
        }

        if !matches!(self.outcome, RunOutcome::DryRunComplete { .. }) {
            lines.push(format!(
                "{} generated, {} improved, {} failed over {} iteration(s)",
                self.progress.generated,
                self.progress.repaired,
                self.progress.failed,
                self.progress.iteration
            ));
        }
        if let Some(path) = &self.state_file {
            lines.push(format!("Session saved to {}", path.display()));
        }
        lines.join("\n")
    }
}

fn work_plan_table(items: &[WorkItem]) -> comfy_table::Table {
    let mut table = list_table(&["#", "unit", "coverage", "uncovered", "artifact", "mode"]);
    for (index, item) in items.iter().enumerate() {
        table.add_row(vec![
            Cell::new(index + 1).set_alignment(CellAlignment::Right),
            Cell::new(&item.unit_id),
            Cell::new(format!("{:.1}%", item.current_coverage)).set_alignment(CellAlignment::Right),
            Cell::new(item.uncovered_lines.len()).set_alignment(CellAlignment::Right),
            Cell::new(item.artifact_path.display()),
            Cell::new(if item.artifact_exists { "improve" } else { "generate" }),
        ]);
    }
    table
}

pub async fn execute(args: RunArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let mut config = ConfigLoader::load(config_path)?;
    args.apply_to(&mut config);
    ConfigLoader::validate(&config)?;

    let _logger = LoggerImpl::init(&LogConfig::from_settings(&config.logging)?)?;

    let project_root = args
        .project
        .canonicalize()
        .with_context(|| format!("Project directory {} not found", args.project.display()))?;
    let tool_timeout = Duration::from_secs(config.validation.tool_timeout_secs);
    let analyzer = detect_analyzer(&project_root, tool_timeout)?;

    let settings = RunSettings::from_config(&config, project_root, args.dry_run);
    let store = Arc::new(JsonSessionStore::new(config.state_file.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (state, resumed) = open_session(
        store.as_ref(),
        analyzer.as_ref(),
        &settings,
        args.resume,
        clock.now(),
    )?;

    let generator = build_generator(&config, args.dry_run)?;

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let printer = tokio::spawn(EventPrinter::new(json_mode).run(rx));

    let mut orchestrator = CoverageOrchestrator::new(
        analyzer,
        generator,
        store.clone(),
        clock,
        settings,
        state,
    )
    .with_events(tx)
    .with_cancellation(cancel)
    .resumed(resumed);

    if config.vcs.enabled && !args.dry_run {
        orchestrator = orchestrator.with_snapshots(Arc::new(GitSnapshotter::from_config(&config.vcs)));
    }

    let result = orchestrator.run().await;
    let state = orchestrator.into_state();

    // Dropping the orchestrator closed the channel; let the printer drain.
    if let Err(err) = printer.await {
        warn!(error = %err, "event printer stopped early");
    }

    let outcome = result.context("Coverage session failed")?;
    let run_output = RunOutput {
        session_id: state.session_id().to_string(),
        language: state.language().to_string(),
        state_file: (!args.dry_run).then(|| store.location().to_path_buf()),
        progress: state.progress(),
        outcome,
    };
    output(&run_output, json_mode);
    Ok(())
}

fn build_generator(config: &Config, dry_run: bool) -> Result<Arc<dyn GenerationClient>> {
    if dry_run {
        info!("dry run, generation backend disabled");
        return Ok(Arc::new(DisabledGenerationClient));
    }

    let client_config = ClaudeClientConfig::from_config(config).context(
        "No API key configured: pass --api-key, set ANTHROPIC_API_KEY or generation.api_key",
    )?;
    let client = ClaudeClient::new(client_config).context("Failed to create generation client")?;
    Ok(Arc::new(
        TestGenerator::new(Arc::new(client)).with_retry(config.retry.clone()),
    ))
}

/// Cancel `token` on Ctrl+C or SIGTERM so the loop can save and stop.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("interrupt received, saving session before exit");
        token.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to register SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::priority_for;

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("80").unwrap(), 80.0);
        assert_eq!(parse_target("72.5%").unwrap(), 72.5);
        assert_eq!(parse_target("0").unwrap(), 0.0);
        assert_eq!(parse_target("100").unwrap(), 100.0);
        assert!(parse_target("100.1").is_err());
        assert!(parse_target("-1").is_err());
        assert!(parse_target("lots").is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::default();
        let args = RunArgs {
            project: PathBuf::from("."),
            target: Some(91.0),
            state: Some(PathBuf::from("custom.json")),
            dry_run: false,
            resume: false,
            max_iterations: Some(7),
            api_key: Some("sk-test".to_string()),
        };
        args.apply_to(&mut config);

        assert_eq!(config.target_coverage, 91.0);
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.state_file, PathBuf::from("custom.json"));
        assert_eq!(config.generation.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_dry_run_output_lists_plan() {
        console::set_colors_enabled(false);
        let run_output = RunOutput {
            session_id: "s".to_string(),
            language: "Go".to_string(),
            outcome: RunOutcome::DryRunComplete {
                work_items: vec![WorkItem {
                    unit_id: "pkg/a.go".to_string(),
                    artifact_path: PathBuf::from("pkg/a_test.go"),
                    current_coverage: 12.5,
                    uncovered_lines: [3, 4, 9].into_iter().collect(),
                    priority: priority_for(12.5),
                    artifact_exists: false,
                }],
            },
            progress: ProgressSummary {
                iteration: 1,
                current_coverage: 12.5,
                target_coverage: 80.0,
                generated: 0,
                repaired: 0,
                failed: 0,
                processed: 0,
            },
            state_file: None,
        };

        let human = run_output.to_human();
        assert!(human.contains("1 candidate unit(s)"));
        assert!(human.contains("pkg/a_test.go"));
        assert!(human.contains("generate"));
        assert!(!human.contains("Session saved"));

        let json = run_output.to_json();
        assert_eq!(json["outcome"], "dry_run_complete");
        assert_eq!(json["work_items"][0]["unit_id"], "pkg/a.go");
        assert_eq!(json["work_items"][0]["priority"], 87);
    }
}
