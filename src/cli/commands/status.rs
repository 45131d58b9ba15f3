//! Implementation of the `coverage-agent status` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::output::table::{coverage_history_table, failed_units_table, session_summary_table};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::SessionState;
use crate::domain::ports::SessionStore;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::persistence::JsonSessionStore;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Session state file, relative to the current directory
    #[arg(long, value_name = "FILE")]
    pub state: Option<PathBuf>,

    /// Show complete diagnostics for failed units
    #[arg(long)]
    pub full: bool,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct StatusOutput {
    state: SessionState,
    #[serde(skip)]
    full: bool,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let mut sections = vec![session_summary_table(&self.state).to_string()];

        if !self.state.coverage_history().is_empty() {
            sections.push(format!(
                "Coverage history:\n{}",
                coverage_history_table(&self.state)
            ));
        }
        if !self.state.failed_units().is_empty() {
            sections.push(format!(
                "Failed units:\n{}",
                failed_units_table(&self.state, self.full)
            ));
        }
        sections.join("\n\n")
    }
}

pub async fn execute(args: StatusArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let state_file = match args.state {
        Some(path) => path,
        None => ConfigLoader::load(config_path)?.state_file,
    };

    let store = JsonSessionStore::new(state_file);
    let state = store
        .load()
        .with_context(|| format!("Cannot show status for {}", store.location().display()))?;

    output(
        &StatusOutput {
            state,
            full: args.full,
        },
        json_mode,
    );
    Ok(())
}
