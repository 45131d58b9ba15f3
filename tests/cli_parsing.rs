use std::path::PathBuf;

use clap::Parser;
use coverage_agent::cli::{Cli, Commands};

#[test]
fn test_parse_run_defaults() {
    let cli = Cli::try_parse_from(["coverage-agent", "run"]).unwrap();

    assert!(!cli.json);
    assert!(cli.config.is_none());
    match cli.command {
        Commands::Run(args) => {
            assert_eq!(args.project, PathBuf::from("."));
            assert!(args.target.is_none());
            assert!(args.state.is_none());
            assert!(!args.dry_run);
            assert!(!args.resume);
            assert!(args.max_iterations.is_none());
            assert!(args.api_key.is_none());
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_run_with_flags() {
    let cli = Cli::try_parse_from([
        "coverage-agent",
        "run",
        "--project",
        "../service",
        "--target",
        "85",
        "--state",
        "session.json",
        "--resume",
        "--max-iterations",
        "12",
        "--api-key",
        "sk-test",
        "--json",
    ])
    .unwrap();

    assert!(cli.json);
    match cli.command {
        Commands::Run(args) => {
            assert_eq!(args.project, PathBuf::from("../service"));
            assert_eq!(args.target, Some(85.0));
            assert_eq!(args.state, Some(PathBuf::from("session.json")));
            assert!(args.resume);
            assert_eq!(args.max_iterations, Some(12));
            assert_eq!(args.api_key.as_deref(), Some("sk-test"));
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_run_dry_run_short_flags() {
    let cli = Cli::try_parse_from(["coverage-agent", "run", "-p", "app", "-t", "70", "--dry-run"])
        .unwrap();

    match cli.command {
        Commands::Run(args) => {
            assert!(args.dry_run);
            assert_eq!(args.target, Some(70.0));
            assert_eq!(args.project, PathBuf::from("app"));
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_target_out_of_range_is_rejected() {
    assert!(Cli::try_parse_from(["coverage-agent", "run", "--target", "120"]).is_err());
    assert!(Cli::try_parse_from(["coverage-agent", "run", "--target", "-5"]).is_err());
    assert!(Cli::try_parse_from(["coverage-agent", "run", "--target", "high"]).is_err());
}

#[test]
fn test_parse_status() {
    let cli =
        Cli::try_parse_from(["coverage-agent", "status", "--full", "--state", "s.json"]).unwrap();

    match cli.command {
        Commands::Status(args) => {
            assert!(args.full);
            assert_eq!(args.state, Some(PathBuf::from("s.json")));
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_init_with_global_config() {
    let cli = Cli::try_parse_from([
        "coverage-agent",
        "--config",
        "ci.yaml",
        "init",
        "--force",
    ])
    .unwrap();

    assert_eq!(cli.config, Some(PathBuf::from("ci.yaml")));
    match cli.command {
        Commands::Init(args) => {
            assert!(args.force);
            assert_eq!(args.path, PathBuf::from("."));
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_missing_subcommand_fails() {
    assert!(Cli::try_parse_from(["coverage-agent"]).is_err());
}
