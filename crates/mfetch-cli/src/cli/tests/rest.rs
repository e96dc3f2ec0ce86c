//! Tests for reap, check and config-path.

use super::parse;
use crate::cli::CliCommand;
use std::path::Path;

#[test]
fn cli_parse_reap() {
    match parse(&["mfetch", "reap"]) {
        CliCommand::Reap { config } => assert!(config.is_none()),
        _ => panic!("expected Reap"),
    }
}

#[test]
fn cli_parse_reap_with_config() {
    match parse(&["mfetch", "reap", "--config", "/tmp/c.toml"]) {
        CliCommand::Reap { config } => {
            assert_eq!(config.as_deref(), Some(Path::new("/tmp/c.toml")))
        }
        _ => panic!("expected Reap with --config"),
    }
}

#[test]
fn cli_parse_check() {
    match parse(&["mfetch", "check"]) {
        CliCommand::Check { config } => assert!(config.is_none()),
        _ => panic!("expected Check"),
    }
}

#[test]
fn cli_parse_config_path() {
    assert!(matches!(
        parse(&["mfetch", "config-path"]),
        CliCommand::ConfigPath
    ));
}
