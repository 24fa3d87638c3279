// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn no_shorthands_passes_config_through() {
    let config = merge_config_shorthands(Some(r#"{"queue":"gpu"}"#.to_string()), None, None)
        .unwrap()
        .unwrap();
    assert_eq!(config, r#"{"queue":"gpu"}"#);
    assert!(merge_config_shorthands(None, None, None).unwrap().is_none());
}

#[test]
fn queue_shorthand_builds_config() {
    let config = merge_config_shorthands(None, Some("gpu".to_string()), None)
        .unwrap()
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&config).unwrap();
    assert_eq!(parsed, json!({"queue": "gpu"}));
}

#[test]
fn shorthands_merge_into_existing_config() {
    let config = merge_config_shorthands(
        Some(r#"{"time_limit": 60}"#.to_string()),
        Some("gpu".to_string()),
        Some("screenshot".to_string()),
    )
    .unwrap()
    .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&config).unwrap();
    assert_eq!(parsed["time_limit"], 60);
    assert_eq!(parsed["queue"], "gpu");
    assert_eq!(parsed["entrypoint"], "screenshot");
}

#[test]
fn invalid_config_with_shorthand_errors() {
    assert!(
        merge_config_shorthands(Some("{broken".to_string()), Some("gpu".to_string()), None)
            .is_err()
    );
}

#[test]
fn cli_parses() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
