//! CLI type definitions
//!
//! Clap structures for the command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::commands::init::InitArgs;
use super::commands::run::RunArgs;
use super::commands::status::StatusArgs;

#[derive(Parser, Debug)]
#[command(name = "coverage-agent")]
#[command(about = "Raise a project's test coverage toward a target, unattended", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Extra configuration file, layered over `.coverage-agent/`
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run (or resume) a coverage session
    Run(RunArgs),

    /// Show the saved session
    Status(StatusArgs),

    /// Write the default configuration to `.coverage-agent/config.yaml`
    Init(InitArgs),
}
