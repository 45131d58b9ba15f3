//! Table builders around comfy-table for session display.

use comfy_table::{presets, Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use super::truncate;
use crate::domain::models::SessionState;

/// Failed-unit diagnostics are cut to this many characters unless `--full`.
const DIAGNOSTIC_PREVIEW_CHARS: usize = 160;

/// Borderless table with upper-cased headers.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Two-column key/value overview of a session.
pub fn session_summary_table(state: &SessionState) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let reached = state.current_coverage() >= state.target_coverage();
    let coverage = Cell::new(format!(
        "{:.1}% / {:.1}%",
        state.current_coverage(),
        state.target_coverage()
    ))
    .fg(if reached { Color::Green } else { Color::Yellow });

    let key = |k: &str| Cell::new(k).add_attribute(Attribute::Bold);
    table.add_row(vec![key("Session"), Cell::new(state.session_id())]);
    table.add_row(vec![key("Project"), Cell::new(state.project_path().display())]);
    table.add_row(vec![key("Language"), Cell::new(state.language())]);
    table.add_row(vec![key("Coverage"), coverage]);
    table.add_row(vec![key("Iteration"), Cell::new(state.current_iteration())]);
    table.add_row(vec![
        key("Artifacts"),
        Cell::new(format!(
            "{} generated, {} improved",
            state.generated_artifacts().len(),
            state.repaired_artifacts().len()
        )),
    ]);
    table.add_row(vec![
        key("Units"),
        Cell::new(format!(
            "{} done, {} failed",
            state.processed_units().len(),
            state.failed_units().len()
        )),
    ]);
    table.add_row(vec![
        key("Backend calls"),
        Cell::new(state.backend_call_count()),
    ]);
    table.add_row(vec![
        key("Started"),
        Cell::new(state.started_at().format("%Y-%m-%d %H:%M:%S UTC")),
    ]);
    table.add_row(vec![
        key("Updated"),
        Cell::new(state.last_updated_at().format("%Y-%m-%d %H:%M:%S UTC")),
    ]);
    if let Some(paused) = state.paused_at() {
        table.add_row(vec![
            key("Paused"),
            Cell::new(paused.format("%Y-%m-%d %H:%M:%S UTC")).fg(Color::Yellow),
        ]);
    }
    if let Some(until) = state.throttled_until() {
        table.add_row(vec![
            key("Throttled until"),
            Cell::new(until.format("%Y-%m-%d %H:%M:%S UTC")).fg(Color::Yellow),
        ]);
    }
    table
}

pub fn coverage_history_table(state: &SessionState) -> Table {
    let mut table = list_table(&["iteration", "coverage", "artifacts", "measured at"]);
    for snapshot in state.coverage_history() {
        table.add_row(vec![
            Cell::new(snapshot.iteration).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}%", snapshot.coverage)).set_alignment(CellAlignment::Right),
            Cell::new(snapshot.artifacts_added).set_alignment(CellAlignment::Right),
            Cell::new(snapshot.timestamp.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    table
}

pub fn failed_units_table(state: &SessionState, full: bool) -> Table {
    let mut table = list_table(&["unit", "diagnostic"]);
    for (unit, diagnostic) in state.failed_units() {
        let diagnostic = if full {
            diagnostic.clone()
        } else {
            let first_lines = diagnostic.lines().take(3).collect::<Vec<_>>().join(" ");
            truncate(&first_lines, DIAGNOSTIC_PREVIEW_CHARS)
        };
        table.add_row(vec![Cell::new(unit).fg(Color::Red), Cell::new(diagnostic)]);
    }
    table
}
