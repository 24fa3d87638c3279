// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use lathe_storage::LocalBackend;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

fn info(n: u8) -> BeaconInfo {
    BeaconInfo {
        task_id: TaskId::new(format!("ab6d6726-f630-4467-9e44-c57df6010{:02x}", n)),
        name: "execute".to_string(),
        queue: QueueName::Gpu,
        retries: 0,
        args: json!({"duration": 0.2}),
    }
}

#[test]
fn write_read_round_trip() {
    let dir = TempDir::new().unwrap();
    let beacon = CrashBeacon::for_process(dir.path(), 4242);
    beacon.write(&info(1)).unwrap();
    assert_eq!(beacon.read().unwrap(), info(1));
}

#[test]
fn beacons_are_per_process() {
    let dir = TempDir::new().unwrap();
    let a = CrashBeacon::for_process(dir.path(), 1);
    let b = CrashBeacon::for_process(dir.path(), 2);
    assert_ne!(a.path(), b.path());
}

#[test]
fn clear_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let beacon = CrashBeacon::for_process(dir.path(), 4242);
    beacon.write(&info(1)).unwrap();
    beacon.clear(false);
    assert!(beacon.read().is_none());
    // second clear of a missing beacon only warns
    beacon.clear(false);
}

#[test]
fn recovery_marks_failure_and_clears() {
    let dir = TempDir::new().unwrap();
    let backend = LocalBackend::open(dir.path().join("spool"), Duration::from_secs(3600)).unwrap();

    let beacon = CrashBeacon::for_process(dir.path(), 4242);
    beacon.write(&info(1)).unwrap();

    let recovered = recover_crashed(dir.path(), &backend).unwrap();
    assert_eq!(recovered, vec![info(1).task_id]);

    let meta = backend.get(&info(1).task_id).unwrap().unwrap();
    assert_eq!(meta.status, JobStatus::Failure);
    let failure = meta.result.failure().unwrap();
    assert_eq!(failure.exc_type, "SystemError");
    assert_eq!(failure.exc_message, "Not enough memory or segfault");

    assert!(beacon.read().is_none());
}

#[test]
fn recovery_with_no_beacons_is_quiet() {
    let dir = TempDir::new().unwrap();
    let backend = LocalBackend::open(dir.path().join("spool"), Duration::from_secs(3600)).unwrap();
    assert!(recover_crashed(dir.path(), &backend).unwrap().is_empty());
}

#[test]
fn corrupt_beacon_is_dropped() {
    let dir = TempDir::new().unwrap();
    let backend = LocalBackend::open(dir.path().join("spool"), Duration::from_secs(3600)).unwrap();
    std::fs::write(dir.path().join("lathe_latest_task_99"), "not json").unwrap();
    let recovered = recover_crashed(dir.path(), &backend).unwrap();
    assert!(recovered.is_empty());
    assert!(!dir.path().join("lathe_latest_task_99").exists());
}
