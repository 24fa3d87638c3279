// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;
use serde_json::json;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

fn meta_id() -> TaskId {
    TaskId::new("ab6d6726-f630-4467-9e44-c57df60107c3")
}

#[test]
fn result_merge_is_shallow() {
    let mut base = ResultMeta {
        progress: Some(10),
        steps: vec![Step::in_flight("Importing file")],
        shadow_name: Some("panda".to_string()),
        ..ResultMeta::default()
    };
    base.merge(ResultMeta {
        progress: Some(50),
        ..ResultMeta::default()
    });

    assert_eq!(base.progress, Some(50));
    // untouched fields survive
    assert_eq!(base.steps.len(), 1);
    assert_eq!(base.shadow_name.as_deref(), Some("panda"));
}

#[test]
fn result_value_replaced_wholesale() {
    let mut base = ResultMeta::from_result(json!({"thumbs": {"iso": "iso.png"}}));
    base.merge(ResultMeta::from_result(json!({"sleep": 0.2})));
    assert_eq!(base.result, Some(json!({"sleep": 0.2})));
}

#[test]
fn time_info_merges_field_wise() {
    let mut base = ResultMeta {
        time_info: Some(TimeInfo {
            request: Some(at(100)),
            started: Some(at(101)),
            stopped: None,
        }),
        ..ResultMeta::default()
    };
    base.merge(ResultMeta {
        time_info: Some(TimeInfo {
            request: None,
            started: None,
            stopped: Some(at(150)),
        }),
        ..ResultMeta::default()
    });

    let time_info = base.time_info.unwrap();
    assert_eq!(time_info.request, Some(at(100)));
    assert_eq!(time_info.started, Some(at(101)));
    assert_eq!(time_info.stopped, Some(at(150)));
}

#[test]
fn normalized_fills_stopped_from_date_done() {
    let mut meta = TaskMeta::with_status(meta_id(), JobStatus::Success);
    meta.date_done = Some(at(200));

    let view = meta.normalized();
    assert_eq!(
        view.result.time_info.unwrap().stopped,
        Some(at(200))
    );
}

#[test]
fn normalized_keeps_tracker_stamp_when_present() {
    let mut meta = TaskMeta::with_status(meta_id(), JobStatus::Success);
    meta.date_done = Some(at(200));
    meta.result.time_info = Some(TimeInfo {
        request: None,
        started: None,
        stopped: Some(at(150)),
    });

    let view = meta.normalized();
    assert_eq!(view.result.time_info.unwrap().stopped, Some(at(150)));
}

#[test]
fn normalized_leaves_non_terminal_alone() {
    let mut meta = TaskMeta::with_status(meta_id(), JobStatus::Running);
    meta.date_done = Some(at(200));
    assert!(meta.normalized().result.time_info.is_none());
}

#[test]
fn error_text_prefers_traceback() {
    let mut meta = TaskMeta::with_status(meta_id(), JobStatus::Failure);
    meta.result.record_failure(&FailureMeta {
        exc_type: "Timeout".to_string(),
        exc_module: None,
        exc_message: "task timed out after 1s".to_string(),
        exc_traceback: Vec::new(),
    });
    assert_eq!(
        meta.error_text().as_deref(),
        Some("Timeout: task timed out after 1s")
    );

    meta.traceback = Some("trace".to_string());
    assert_eq!(meta.error_text().as_deref(), Some("trace"));
}

#[test]
fn failure_fields_flatten_into_result() {
    let meta = ResultMeta::from_failure(FailureMeta {
        exc_type: "SignalFault".to_string(),
        exc_module: Some("lathe_runner".to_string()),
        exc_message: "child killed by signal 11".to_string(),
        exc_traceback: Vec::new(),
    });
    let json = serde_json::to_value(&meta).unwrap();
    assert_eq!(json["exc_type"], "SignalFault");
    assert_eq!(json["exc_message"], "child killed by signal 11");

    let parsed: ResultMeta = serde_json::from_value(json).unwrap();
    let failure = parsed.failure().unwrap();
    assert_eq!(failure.exc_type, "SignalFault");
    assert_eq!(failure.exc_module.as_deref(), Some("lathe_runner"));
}

#[test]
fn meta_without_failure_round_trips() {
    // a successful record has no exc_* keys and must still read back
    let meta = ResultMeta {
        progress: Some(100),
        result: Some(json!({"sleep": 0.2})),
        ..ResultMeta::default()
    };
    let json = serde_json::to_value(&meta).unwrap();
    let parsed: ResultMeta = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, meta);
    assert!(parsed.failure().is_none());
}

#[test]
fn extras_round_trip() {
    let mut meta = ResultMeta::default();
    meta.extra
        .insert("output".to_string(), json!("/share/x/outputs/a.glb"));
    let json = serde_json::to_value(&meta).unwrap();
    let parsed: ResultMeta = serde_json::from_value(json).unwrap();
    assert_eq!(parsed.extra["output"], json!("/share/x/outputs/a.glb"));
}
