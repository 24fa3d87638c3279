// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use lathe_core::Step;
use serde_json::json;
use tempfile::TempDir;

fn task(n: u8) -> TaskId {
    TaskId::new(format!("ab6d6726-f630-4467-9e44-c57df6010{:02x}", n))
}

fn backend() -> (TempDir, LocalBackend) {
    let dir = TempDir::new().unwrap();
    let backend = LocalBackend::open(dir.path(), DEFAULT_RESULT_TTL).unwrap();
    (dir, backend)
}

#[test]
fn put_then_get() {
    let (_dir, backend) = backend();
    backend.put(TaskMeta::sent(task(1))).unwrap();
    let meta = backend.get(&task(1)).unwrap().unwrap();
    assert_eq!(meta.status, JobStatus::Sent);
}

#[test]
fn get_missing_is_none() {
    let (_dir, backend) = backend();
    assert!(backend.get(&task(9)).unwrap().is_none());
}

#[test]
fn update_state_creates_and_merges() {
    let (_dir, backend) = backend();
    backend
        .update_state(
            &task(1),
            JobStatus::Running,
            ResultMeta {
                progress: Some(25),
                steps: vec![Step::in_flight("Importing file")],
                ..ResultMeta::default()
            },
        )
        .unwrap();
    backend
        .update_state(
            &task(1),
            JobStatus::Running,
            ResultMeta {
                progress: Some(50),
                ..ResultMeta::default()
            },
        )
        .unwrap();

    let meta = backend.get(&task(1)).unwrap().unwrap();
    assert_eq!(meta.status, JobStatus::Running);
    assert_eq!(meta.result.progress, Some(50));
    assert_eq!(meta.result.steps.len(), 1);
}

#[test]
fn terminal_state_is_write_once() {
    let (_dir, backend) = backend();
    backend
        .update_state(&task(1), JobStatus::Success, ResultMeta::default())
        .unwrap();
    backend
        .update_state(
            &task(1),
            JobStatus::Running,
            ResultMeta {
                progress: Some(10),
                ..ResultMeta::default()
            },
        )
        .unwrap();

    let meta = backend.get(&task(1)).unwrap().unwrap();
    assert_eq!(meta.status, JobStatus::Success);
    assert_eq!(meta.result.progress, None);
}

#[test]
fn terminal_write_stamps_date_done() {
    let (_dir, backend) = backend();
    backend
        .update_state(&task(1), JobStatus::Failure, ResultMeta::default())
        .unwrap();
    let meta = backend.get(&task(1)).unwrap().unwrap();
    assert!(meta.date_done.is_some());
}

#[test]
fn result_value_replaced_wholesale() {
    let (_dir, backend) = backend();
    backend
        .update_state(
            &task(1),
            JobStatus::Running,
            ResultMeta::from_result(json!({"a": 1})),
        )
        .unwrap();
    backend
        .update_state(
            &task(1),
            JobStatus::Success,
            ResultMeta::from_result(json!({"sleep": 0.2})),
        )
        .unwrap();
    let meta = backend.get(&task(1)).unwrap().unwrap();
    assert_eq!(meta.result.result, Some(json!({"sleep": 0.2})));
}

#[test]
fn spool_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let backend = LocalBackend::open(dir.path(), DEFAULT_RESULT_TTL).unwrap();
        backend.put(TaskMeta::sent(task(1))).unwrap();
        backend
            .update_state(&task(1), JobStatus::Success, ResultMeta::default())
            .unwrap();
    }
    let backend = LocalBackend::open(dir.path(), DEFAULT_RESULT_TTL).unwrap();
    let meta = backend.get(&task(1)).unwrap().unwrap();
    assert_eq!(meta.status, JobStatus::Success);
}

#[test]
fn expired_records_dropped_on_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let backend = LocalBackend::open(dir.path(), DEFAULT_RESULT_TTL).unwrap();
        backend.put(TaskMeta::sent(task(1))).unwrap();
    }
    // Age the record on disk past the TTL.
    let path = dir.path().join(format!("task-meta-{}.json", task(1)));
    let content = std::fs::read_to_string(&path).unwrap();
    let mut record: serde_json::Value = serde_json::from_str(&content).unwrap();
    record["updated_at"] = json!("2001-01-01T00:00:00Z");
    std::fs::write(&path, record.to_string()).unwrap();

    let backend = LocalBackend::open(dir.path(), DEFAULT_RESULT_TTL).unwrap();
    assert!(backend.get(&task(1)).unwrap().is_none());
    assert!(!path.exists());
}

#[test]
fn sweep_removes_stale_entries() {
    let (_dir, backend) = backend();
    backend.put(TaskMeta::sent(task(1))).unwrap();
    assert_eq!(backend.sweep().unwrap(), 0);
    assert_eq!(backend.list_ids().unwrap().len(), 1);
}

#[test]
fn list_ids_sorted() {
    let (_dir, backend) = backend();
    backend.put(TaskMeta::sent(task(2))).unwrap();
    backend.put(TaskMeta::sent(task(1))).unwrap();
    let ids = backend.list_ids().unwrap();
    assert_eq!(ids, vec![task(1), task(2)]);
}

#[test]
fn delete_removes_entry_and_spool() {
    let (dir, backend) = backend();
    backend.put(TaskMeta::sent(task(1))).unwrap();
    backend.delete(&task(1)).unwrap();
    assert!(backend.get(&task(1)).unwrap().is_none());
    assert!(!dir
        .path()
        .join(format!("task-meta-{}.json", task(1)))
        .exists());
}

#[test]
fn add_children_dedupes() {
    let (_dir, backend) = backend();
    backend.put(TaskMeta::sent(task(1))).unwrap();
    backend
        .add_children(&task(1), &[task(2), task(3)])
        .unwrap();
    backend.add_children(&task(1), &[task(2)]).unwrap();
    let meta = backend.get(&task(1)).unwrap().unwrap();
    assert_eq!(meta.children, vec![task(2), task(3)]);
}

#[tokio::test]
async fn subscribe_sees_state_changes() {
    let (_dir, backend) = backend();
    let mut rx = backend.subscribe();
    backend
        .update_state(&task(1), JobStatus::Running, ResultMeta::default())
        .unwrap();
    let change = rx.recv().await.unwrap();
    assert_eq!(change.task_id, task(1));
    assert_eq!(change.status, JobStatus::Running);
}
