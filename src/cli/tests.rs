//! Unit tests for CLI commands

use crate::cli::{Cli, Commands};
use clap::Parser;
use std::path::PathBuf;

#[test]
fn test_routes_command_parses() {
    let cli = Cli::try_parse_from(["kitrouter", "routes", "--json"]).unwrap();
    assert!(matches!(cli.command, Commands::Routes { json: true }));
    assert!(!cli.dev);
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from(["kitrouter", "prerender", "--config", "kit.toml", "--dev"]).unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("kit.toml")));
    assert!(cli.dev);
}

#[test]
fn test_build_command_with_flags() {
    let cli = Cli::try_parse_from([
        "kitrouter",
        "build",
        "--out",
        "dist",
        "--strict",
        "--fallback",
        "200.html",
    ])
    .unwrap();
    match cli.command {
        Commands::Build {
            out,
            strict,
            fallback,
        } => {
            assert_eq!(out, Some(PathBuf::from("dist")));
            assert!(strict);
            assert_eq!(fallback.as_deref(), Some("200.html"));
        }
        other => panic!("Expected Build command, got {other:?}"),
    }
}

#[test]
fn test_serve_defaults() {
    let cli = Cli::try_parse_from(["kitrouter", "serve"]).unwrap();
    match cli.command {
        Commands::Serve { addr, watch } => {
            assert_eq!(addr, None);
            assert!(!watch);
        }
        other => panic!("Expected Serve command, got {other:?}"),
    }
}

#[test]
fn test_unknown_command_is_rejected() {
    assert!(Cli::try_parse_from(["kitrouter", "generate"]).is_err());
}
