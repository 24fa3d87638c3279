// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::env::PoolType;
use lathe_core::{ResultMeta, TaskMeta};
use lathe_storage::LocalBackend;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

const JOB: &str = "ab6d6726-f630-4467-9e44-c57df60107c3";

pub(crate) fn test_config(dir: &TempDir) -> Config {
    Config {
        share_path: dir.path().join("share"),
        process_path: dir.path().join("processes"),
        queues: vec![QueueName::Cpu, QueueName::Control],
        concurrent_tasks: 1,
        pool: PoolType::Solo,
        time_limit: 2400,
        retry_time_limit: 3600,
        cleanup_enabled: false,
        cleanup_delay: Duration::from_secs(3600),
        max_tasks_before_shutdown: 0,
        disable_kernel: true,
        license_host: None,
        license_port: 35000,
        license_acquire_at_start: true,
        license_flexlm: false,
        api_key_sha256: Some(crate::auth::digest("hunter2")),
        socket_path: dir.path().join("lathed.sock"),
        spool_path: dir.path().join("spool"),
        result_ttl: Duration::from_secs(3600),
        max_memory_mb: None,
        log_path: dir.path().join("lathed.log"),
        lock_path: dir.path().join("lathed.lock"),
        beacon_dir: dir.path().join("beacons"),
        backend_url: None,
    }
}

pub(crate) fn test_ctx(dir: &TempDir) -> DaemonCtx {
    let config = test_config(dir);
    std::fs::create_dir_all(&config.process_path).unwrap();
    std::fs::create_dir_all(&config.beacon_dir).unwrap();
    DaemonCtx {
        store: SharedStore::open(&config.share_path).unwrap(),
        backend: Arc::new(LocalBackend::open(&config.spool_path, config.result_ttl).unwrap()),
        broker: Arc::new(Broker::new()),
        revocations: Arc::new(RevocationRegistry::new()),
        shutdown: Arc::new(CancelFlag::new()),
        config,
    }
}

fn write_process(ctx: &DaemonCtx, name: &str, doc: &str) {
    std::fs::write(
        ctx.config.process_path.join(format!("{}.hcl", name)),
        format!(
            "entrypoint \"main\" {{\n  doc = \"{}\"\n  run = \"true\"\n}}\n",
            doc
        ),
    )
    .unwrap();
}

#[test]
fn ping_needs_no_auth() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let response = handle_request(Request::Ping, &ctx);
    assert!(matches!(response, Response::Pong { .. }));
}

#[test]
fn wrong_key_is_unauthorized() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let response = handle_request(
        Request::ListJobs {
            api_key: "wrong".to_string(),
        },
        &ctx,
    );
    match response {
        Response::Error { error } => {
            assert_eq!(error.code, 401);
            assert_eq!(error.message, "Unauthorized");
        }
        other => panic!("expected 401, got {:?}", other),
    }
}

#[test]
fn list_processes_returns_stems() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    write_process(&ctx, "sleep", "Sleep");
    write_process(&ctx, "convert", "Convert");
    std::fs::write(ctx.config.process_path.join("notes.txt"), "x").unwrap();

    let response = handle_request(
        Request::ListProcesses {
            api_key: "hunter2".to_string(),
        },
        &ctx,
    );
    match response {
        Response::Processes { processes } => {
            assert_eq!(processes, vec!["convert", "sleep"]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn process_doc_and_404() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    write_process(&ctx, "sleep", "Sleep for params.duration seconds");

    let response = handle_request(
        Request::ProcessDoc {
            api_key: "hunter2".to_string(),
            name: "sleep".to_string(),
        },
        &ctx,
    );
    match response {
        Response::Doc { doc } => assert_eq!(doc, "Sleep for params.duration seconds"),
        other => panic!("unexpected {:?}", other),
    }

    let response = handle_request(
        Request::ProcessDoc {
            api_key: "hunter2".to_string(),
            name: "missing".to_string(),
        },
        &ctx,
    );
    match response {
        Response::Error { error } => assert_eq!(error.code, 404),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn job_status_unknown_is_pending() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let response = handle_request(
        Request::JobStatus {
            api_key: "hunter2".to_string(),
            uuid: JOB.to_string(),
        },
        &ctx,
    );
    match response {
        Response::Job { job } => assert_eq!(job.status, JobStatus::Pending),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn bad_uuid_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let response = handle_request(
        Request::JobDetails {
            api_key: "hunter2".to_string(),
            uuid: "../etc/passwd".to_string(),
        },
        &ctx,
    );
    match response {
        Response::Error { error } => assert_eq!(error.code, 400),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn list_jobs_reflects_backend() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    ctx.backend.put(TaskMeta::sent(TaskId::new(JOB))).unwrap();

    let response = handle_request(
        Request::ListJobs {
            api_key: "hunter2".to_string(),
        },
        &ctx,
    );
    match response {
        Response::Jobs { jobs } => {
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0].uuid, JOB);
            assert_eq!(jobs[0].status, JobStatus::Sent);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn output_traversal_is_rejected() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let error = resolve_output(&ctx, JOB, "../etc/passwd").unwrap_err();
    assert_eq!(error.code, 400);
    assert_eq!(error.message, "Bad Request");
}

#[test]
fn missing_output_is_404() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let error = resolve_output(&ctx, JOB, "missing.glb").unwrap_err();
    assert_eq!(error.code, 404);
}

#[test]
fn existing_output_resolves() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let path = ctx.store.output_path(JOB, "preview.glb", false).unwrap();
    std::fs::write(&path, b"glb").unwrap();
    assert_eq!(resolve_output(&ctx, JOB, "preview.glb").unwrap(), path);
}

#[test]
fn archive_for_unknown_job_is_404() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let error = resolve_archive(&ctx, JOB).unwrap_err();
    assert_eq!(error.code, 404);
}

#[test]
fn archive_for_running_job_is_425_without_enqueue() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    ctx.store.output_dir(JOB).unwrap();
    ctx.backend
        .update_state(&TaskId::new(JOB), JobStatus::Running, ResultMeta::default())
        .unwrap();

    let error = resolve_archive(&ctx, JOB).unwrap_err();
    assert_eq!(error.code, 425);
    assert_eq!(ctx.broker.depth(QueueName::Archive), 0);
}

#[test]
fn archive_first_call_enqueues_packaging() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    ctx.store.output_dir(JOB).unwrap();
    ctx.backend
        .update_state(&TaskId::new(JOB), JobStatus::Success, ResultMeta::default())
        .unwrap();

    let error = resolve_archive(&ctx, JOB).unwrap_err();
    assert_eq!(error.code, 425);
    assert_eq!(ctx.broker.depth(QueueName::Archive), 1);
}

#[test]
fn archive_in_progress_does_not_enqueue_again() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    ctx.store.output_dir(JOB).unwrap();
    ctx.backend
        .update_state(&TaskId::new(JOB), JobStatus::Success, ResultMeta::default())
        .unwrap();
    let _guard = DiskStateMarker::new(&ctx.store, JOB, "zip", DEFAULT_MARKER_TTL)
        .unwrap()
        .register()
        .unwrap();

    let error = resolve_archive(&ctx, JOB).unwrap_err();
    assert_eq!(error.code, 425);
    assert_eq!(ctx.broker.depth(QueueName::Archive), 0);
}

#[test]
fn built_archive_resolves_to_the_file() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    ctx.store.output_dir(JOB).unwrap();
    let archive = ctx.store.archive_path(JOB, "zip").unwrap();
    std::fs::write(&archive, b"zipbytes").unwrap();

    assert_eq!(resolve_archive(&ctx, JOB).unwrap(), archive);
}

#[test]
fn revoke_unknown_job_is_404() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let response = handle_request(
        Request::Revoke {
            api_key: "hunter2".to_string(),
            uuid: JOB.to_string(),
        },
        &ctx,
    );
    match response {
        Response::Error { error } => assert_eq!(error.code, 404),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn revoke_queued_job_marks_revoked() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    ctx.backend.put(TaskMeta::sent(TaskId::new(JOB))).unwrap();

    let response = handle_request(
        Request::Revoke {
            api_key: "hunter2".to_string(),
            uuid: JOB.to_string(),
        },
        &ctx,
    );
    match response {
        Response::Revoked { terminating } => assert!(!terminating),
        other => panic!("unexpected {:?}", other),
    }
    let meta = ctx.backend.get(&TaskId::new(JOB)).unwrap().unwrap();
    assert_eq!(meta.status, JobStatus::Revoked);
}

#[test]
fn shutdown_closes_broker_and_signals() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let response = handle_request(
        Request::Shutdown {
            api_key: "hunter2".to_string(),
        },
        &ctx,
    );
    assert!(matches!(response, Response::ShuttingDown));
    assert!(ctx.shutdown.is_cancelled());
    assert!(matches!(
        ctx.broker.enqueue(Envelope::new(
            TaskId::new(JOB),
            TaskKind::Cleanup {
                path: "/x".into(),
                is_dir: false
            },
            QueueName::Maintenance,
        )),
        Err(_)
    ));
}

#[test]
fn task_meta_surface_returns_raw_meta() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    let mut meta = TaskMeta::sent(TaskId::new(JOB));
    meta.result.result = Some(json!({"sleep": 0.2}));
    ctx.backend.put(meta.clone()).unwrap();

    let response = handle_request(
        Request::TaskMeta {
            api_key: "hunter2".to_string(),
            uuid: JOB.to_string(),
        },
        &ctx,
    );
    match response {
        Response::Meta { meta: served } => assert_eq!(served, meta),
        other => panic!("unexpected {:?}", other),
    }
}
