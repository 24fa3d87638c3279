// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::executor::{Executor, ExecutorConfig};
use crate::revoke::RevocationRegistry;
use crate::session::LicenseSettings;
use lathe_core::{JobStatus, ProgramContext, TaskId};
use lathe_storage::{LocalBackend, ResultBackend, SharedStore};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

const JOB: &str = "ab6d6726-f630-4467-9e44-c57df60107c3";

struct Fixture {
    dir: TempDir,
    backend: std::sync::Arc<dyn ResultBackend>,
    broker: Arc<Broker>,
    session: Arc<KernelSession>,
    executor: Arc<Executor<lathe_core::SystemClock>>,
}

fn fixture(settings: LicenseSettings) -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = SharedStore::open(dir.path().join("share")).unwrap();
    let backend: std::sync::Arc<dyn ResultBackend> = std::sync::Arc::new(
        LocalBackend::open(dir.path().join("spool"), Duration::from_secs(3600)).unwrap(),
    );
    let broker = Arc::new(Broker::new());
    let session = Arc::new(KernelSession::new(settings));
    let executor = Arc::new(Executor::new(
        store,
        std::sync::Arc::clone(&backend),
        Arc::clone(&broker),
        Arc::clone(&session),
        Arc::new(RevocationRegistry::new()),
        ExecutorConfig::default(),
        lathe_core::SystemClock,
    ));
    Fixture {
        dir,
        backend,
        broker,
        session,
        executor,
    }
}

fn disabled_kernel() -> LicenseSettings {
    LicenseSettings {
        disabled: true,
        ..LicenseSettings::default()
    }
}

fn sleep_envelope(fx: &Fixture, id: &str) -> Envelope {
    let path = fx.dir.path().join(format!("script-{}.hcl", id));
    std::fs::write(
        &path,
        "entrypoint \"main\" {\n  run = <<-SH\n    printf '{\"op\":\"result\",\"value\":{\"ok\":true}}\\n'\n  SH\n}\n",
    )
    .unwrap();
    let mut pc = ProgramContext::new(TaskId::new(id), &path, chrono::Utc::now());
    pc.queue = Some(QueueName::Cpu);
    pc.compute_only = true;
    Envelope::new(
        TaskId::new(id),
        TaskKind::Execute {
            params: json!({}),
            pc,
            chain: Vec::new(),
        },
        QueueName::Cpu,
    )
}

fn worker(fx: &Fixture, max_tasks: u32, shutdown: Arc<CancelFlag>) -> Worker {
    Worker::new(
        Arc::clone(&fx.executor),
        Arc::clone(&fx.broker),
        Arc::clone(&fx.session),
        WorkerConfig {
            queues: vec![QueueName::Cpu],
            max_tasks,
            beacon_dir: fx.dir.path().to_path_buf(),
        },
        shutdown,
    )
}

#[tokio::test]
async fn worker_executes_and_clears_beacon() {
    let fx = fixture(disabled_kernel());
    fx.broker.enqueue(sleep_envelope(&fx, JOB)).unwrap();
    fx.broker.close();

    let shutdown = Arc::new(CancelFlag::new());
    worker(&fx, 0, shutdown).run().await.unwrap();

    let meta = fx.backend.get(&TaskId::new(JOB)).unwrap().unwrap();
    assert_eq!(meta.status, JobStatus::Success);

    let beacon = CrashBeacon::for_process(fx.dir.path(), std::process::id());
    assert!(beacon.read().is_none());
}

#[tokio::test]
async fn task_cap_broadcasts_shutdown() {
    let fx = fixture(disabled_kernel());
    fx.broker.enqueue(sleep_envelope(&fx, JOB)).unwrap();
    fx.broker
        .enqueue(sleep_envelope(
            &fx,
            "11111111-1111-4111-8111-111111111111",
        ))
        .unwrap();

    let shutdown = Arc::new(CancelFlag::new());
    worker(&fx, 1, Arc::clone(&shutdown)).run().await.unwrap();

    // the cap stopped the worker after one task and signalled everyone
    assert!(shutdown.is_cancelled());
    assert_eq!(fx.broker.depth(QueueName::Cpu), 1);
}

#[tokio::test]
async fn shutdown_flag_stops_idle_worker() {
    let fx = fixture(disabled_kernel());
    let shutdown = Arc::new(CancelFlag::new());
    let handle = {
        let worker = worker(&fx, 0, Arc::clone(&shutdown));
        tokio::spawn(async move { worker.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn license_failure_at_boot_is_fatal() {
    let fx = fixture(LicenseSettings {
        host: None,
        flexlm: true,
        acquire_at_start: true,
        ..LicenseSettings::default()
    });
    let shutdown = Arc::new(CancelFlag::new());
    let result = worker(&fx, 0, Arc::clone(&shutdown)).run().await;
    assert!(matches!(result, Err(WorkerError::License(_))));
    // shutdown broadcast so sibling workers stop too
    assert!(shutdown.is_cancelled());
}
