//! Rendering of orchestrator events on stdout.

use console::style;
use indicatif::ProgressBar;
use tokio::sync::mpsc;

use super::progress::{create_spinner_with_message, format_remaining, ProgressBarExt};
use crate::domain::models::FailureKind;
use crate::services::{OrchestratorEvent, UnitMode};

/// Prints events as they arrive: one JSON object per line in JSON mode,
/// styled progress lines otherwise. Throttle waits show a spinner.
pub struct EventPrinter {
    json_mode: bool,
    spinner: Option<ProgressBar>,
}

impl EventPrinter {
    pub const fn new(json_mode: bool) -> Self {
        Self {
            json_mode,
            spinner: None,
        }
    }

    /// Drain the channel until every sender is dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<OrchestratorEvent>) {
        while let Some(event) = events.recv().await {
            self.print(&event);
        }
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    pub fn print(&mut self, event: &OrchestratorEvent) {
        if self.json_mode {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
            return;
        }

        if let OrchestratorEvent::Waiting { until, remaining_secs } = event {
            let message = format!(
                "Backend throttled, resuming at {} ({} left)",
                until.format("%H:%M:%S UTC"),
                format_remaining(*remaining_secs)
            );
            match &self.spinner {
                Some(spinner) => spinner.set_message(message),
                None => self.spinner = Some(create_spinner_with_message(message)),
            }
            return;
        }

        if let Some(spinner) = self.spinner.take() {
            spinner.finish_success("Throttle window passed");
        }
        if let Some(line) = render(event) {
            println!("{line}");
        }
    }
}

/// Human-readable line for an event, `None` for events shown elsewhere.
pub fn render(event: &OrchestratorEvent) -> Option<String> {
    let line = match event {
        OrchestratorEvent::SessionStarted {
            session_id,
            language,
            resumed,
            branch,
        } => {
            let verb = if *resumed { "Resuming" } else { "Starting" };
            let mut line = format!(
                "{} {} session {}",
                style(verb).bold(),
                style(language).cyan(),
                style(session_id).dim()
            );
            if let Some(branch) = branch {
                line.push_str(&format!(" on branch {}", style(branch).cyan()));
            }
            line
        }
        OrchestratorEvent::IterationStarted { iteration } => {
            format!("\n{}", style(format!("Iteration {iteration}")).bold().underlined())
        }
        OrchestratorEvent::CoverageMeasured {
            coverage, target, ..
        } => {
            let value = format!("{coverage:.1}%");
            let value = if coverage >= target {
                style(value).green().bold()
            } else {
                style(value).yellow()
            };
            format!("  Coverage {value} (target {target:.1}%)")
        }
        OrchestratorEvent::WorkPlanned {
            candidates,
            next_unit,
        } => format!(
            "  {} candidate unit(s), next: {}",
            candidates,
            style(next_unit).cyan()
        ),
        OrchestratorEvent::UnitStarted {
            artifact_path,
            mode,
            ..
        } => {
            let verb = match mode {
                UnitMode::Generate => "Generating",
                UnitMode::Improve => "Improving",
            };
            format!("  {verb} {}", artifact_path.display())
        }
        OrchestratorEvent::RepairRequested { attempt, kind, .. } => {
            let kind = match kind {
                Some(FailureKind::Compilation) => "compile failure",
                Some(FailureKind::TestFailure) => "test failure",
                None => "failure",
            };
            format!("  {} repair #{attempt} after {kind}", style("↻").yellow())
        }
        OrchestratorEvent::UnitPassed {
            artifact_path,
            repairs,
            ..
        } => format!(
            "  {} {} passed ({repairs} repair(s))",
            style("✓").green(),
            artifact_path.display()
        ),
        OrchestratorEvent::UnitFailed { unit_id, reason } => format!(
            "  {} {} failed: {}",
            style("✗").red(),
            unit_id,
            super::truncate(reason.lines().next().unwrap_or_default(), 120)
        ),
        OrchestratorEvent::Throttled { unit_id, reset_at } => format!(
            "  {} backend throttled on {unit_id} until {}",
            style("!").yellow(),
            reset_at.format("%H:%M:%S UTC")
        ),
        OrchestratorEvent::Progress(summary) => format!("  {}", style(summary).dim()),
        OrchestratorEvent::Finished { outcome } => {
            format!("\n{} {}", style("Session finished:").bold(), outcome.replace('_', " "))
        }
        OrchestratorEvent::Waiting { .. } | OrchestratorEvent::WaitFinished => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_render_unit_events() {
        console::set_colors_enabled(false);

        let line = render(&OrchestratorEvent::UnitPassed {
            unit_id: "a.go".to_string(),
            artifact_path: PathBuf::from("a_test.go"),
            repairs: 1,
        })
        .unwrap();
        assert!(line.contains("a_test.go passed (1 repair(s))"));

        let line = render(&OrchestratorEvent::UnitFailed {
            unit_id: "b.go".to_string(),
            reason: "does not compile\nlong output".to_string(),
        })
        .unwrap();
        assert!(line.contains("b.go failed: does not compile"));
        assert!(!line.contains("long output"));

        assert!(render(&OrchestratorEvent::WaitFinished).is_none());
    }

    #[test]
    fn test_json_events_are_tagged() {
        let json = serde_json::to_value(OrchestratorEvent::IterationStarted { iteration: 3 }).unwrap();
        assert_eq!(json["event"], "iteration_started");
        assert_eq!(json["iteration"], 3);
    }
}
