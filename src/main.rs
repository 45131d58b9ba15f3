//! coverage-agent CLI entry point.

use clap::Parser;

use coverage_agent::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, config, cli.json).await,
        Commands::Status(args) => commands::status::execute(args, config, cli.json).await,
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
    };

    if let Err(err) = result {
        coverage_agent::cli::handle_error(err, cli.json);
    }
}
