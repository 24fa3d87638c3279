// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use lathe_core::QueueName;
use std::path::PathBuf;

fn parse(content: &str) -> Result<Script, ScriptError> {
    parse_script(content, &PathBuf::from("/srv/processes/test.hcl"))
}

#[test]
fn parses_minimal_entrypoint() {
    let script = parse(
        r#"
entrypoint "main" {
  run = "sleep 1"
}
"#,
    )
    .unwrap();
    assert_eq!(script.entrypoint_names(), vec!["main"]);
    assert_eq!(script.entrypoint("main").unwrap().run, "sleep 1");
    assert!(script.entrypoint("main").unwrap().schedule.is_none());
}

#[test]
fn parses_schedule_directive() {
    let script = parse(
        r#"
entrypoint "main" {
  doc = "thumbnail pipeline"
  schedule {
    queue   = "gpu"
    wait    = true
    timeout = 3600
  }
  run = "true"
}
"#,
    )
    .unwrap();
    let def = script.entrypoint("main").unwrap();
    assert_eq!(def.doc.as_deref(), Some("thumbnail pipeline"));
    let schedule = def.schedule.clone().unwrap();
    assert_eq!(schedule.queue, Some(QueueName::Gpu));
    assert!(schedule.wait);
    assert_eq!(schedule.timeout, Some(3600));
}

#[test]
fn heredoc_run_body_dedented() {
    let script = parse(
        "entrypoint \"main\" {\n  run = <<-SH\n    echo one\n    echo two\n  SH\n}\n",
    )
    .unwrap();
    let run = &script.entrypoint("main").unwrap().run;
    assert!(run.contains("echo one\n"));
    assert!(!run.contains("    echo one"));
}

#[test]
fn multiple_entrypoints_in_order() {
    let script = parse(
        r#"
entrypoint "split" {
  run = "true"
}
entrypoint "merge" {
  schedule {
    queue = "control"
  }
  run = "true"
}
"#,
    )
    .unwrap();
    assert_eq!(script.entrypoint_names(), vec!["split", "merge"]);
}

#[test]
fn non_literal_schedule_values_ignored() {
    // `queue` is a variable reference, not a literal: dropped with a
    // warning, the rest of the directive still parses.
    let script = parse(
        r#"
entrypoint "main" {
  schedule {
    queue   = var.target_queue
    timeout = 60
  }
  run = "true"
}
"#,
    )
    .unwrap();
    let schedule = script.entrypoint("main").unwrap().schedule.clone().unwrap();
    assert_eq!(schedule.queue, None);
    assert_eq!(schedule.timeout, Some(60));
}

#[test]
fn invalid_queue_name_ignored() {
    let script = parse(
        r#"
entrypoint "main" {
  schedule {
    queue = "warp"
  }
  run = "true"
}
"#,
    )
    .unwrap();
    assert_eq!(
        script.entrypoint("main").unwrap().schedule.clone().unwrap().queue,
        None
    );
}

#[test]
fn missing_run_is_an_error() {
    let err = parse(
        r#"
entrypoint "main" {
  doc = "no body"
}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ScriptError::MissingRun { .. }));
}

#[test]
fn empty_script_is_an_error() {
    let err = parse("# nothing here\n").unwrap_err();
    assert!(matches!(err, ScriptError::NoEntrypoints { .. }));
}

#[test]
fn unnamed_entrypoint_is_an_error() {
    let err = parse("entrypoint {\n  run = \"true\"\n}\n").unwrap_err();
    assert!(matches!(err, ScriptError::UnnamedEntrypoint { .. }));
}

#[test]
fn malformed_hcl_is_a_parse_error() {
    let err = parse("entrypoint \"main\" {").unwrap_err();
    assert!(matches!(err, ScriptError::Parse(_)));
}
