// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Result backend: the durable key→task-meta map.
//!
//! Each task is the sole writer of its own key during its lifetime, so
//! merges are last-write-wins without coordination. State changes are
//! fanned out over a broadcast channel for pollers that prefer push.

use crate::share::ShareError;
use chrono::{DateTime, Utc};
use lathe_core::{JobStatus, ResultMeta, TaskId, TaskMeta};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default retention of task meta (3 days).
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 3);

const SPOOL_PREFIX: &str = "task-meta-";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend is read-only")]
    ReadOnly,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error(transparent)]
    Share(#[from] ShareError),
}

/// Pub-sub notification of a task state change.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub task_id: TaskId,
    pub status: JobStatus,
}

/// The key-value + pub-sub abstraction over task meta.
pub trait ResultBackend: Send + Sync {
    fn get(&self, id: &TaskId) -> Result<Option<TaskMeta>, BackendError>;

    /// Store a whole record (used at submission and for relations).
    fn put(&self, meta: TaskMeta) -> Result<(), BackendError>;

    /// Merge a state transition + result patch into the record, creating
    /// it when absent.
    fn update_state(
        &self,
        id: &TaskId,
        status: JobStatus,
        patch: ResultMeta,
    ) -> Result<(), BackendError>;

    /// Append composite descendants to a record.
    fn add_children(&self, id: &TaskId, children: &[TaskId]) -> Result<(), BackendError>;

    fn list_ids(&self) -> Result<Vec<TaskId>, BackendError>;

    fn delete(&self, id: &TaskId) -> Result<(), BackendError>;

    fn subscribe(&self) -> broadcast::Receiver<StateChange>;
}

/// On-disk spool record, so retention survives a daemon restart.
#[derive(Serialize, Deserialize)]
struct SpoolRecord {
    updated_at: DateTime<Utc>,
    meta: TaskMeta,
}

struct Entry {
    meta: TaskMeta,
    updated_at: DateTime<Utc>,
}

/// Local result backend: an in-memory map spooled to one JSON file per
/// key, with TTL-based retention.
pub struct LocalBackend {
    spool: PathBuf,
    ttl: Duration,
    entries: Mutex<HashMap<TaskId, Entry>>,
    tx: broadcast::Sender<StateChange>,
}

impl LocalBackend {
    /// Open the backend, loading any unexpired spool records.
    pub fn open(spool: impl Into<PathBuf>, ttl: Duration) -> Result<Self, BackendError> {
        let spool = spool.into();
        fs::create_dir_all(&spool)?;
        let (tx, _) = broadcast::channel(256);
        let backend = Self {
            spool,
            ttl,
            entries: Mutex::new(HashMap::new()),
            tx,
        };
        backend.load_spool()?;
        Ok(backend)
    }

    fn load_spool(&self) -> Result<(), BackendError> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        for dir_entry in fs::read_dir(&self.spool)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(SPOOL_PREFIX) || !name.ends_with(".json") {
                continue;
            }
            let record: SpoolRecord = match fs::read_to_string(&path)
                .map_err(BackendError::from)
                .and_then(|content| serde_json::from_str(&content).map_err(BackendError::from))
            {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "dropping corrupt spool record");
                    let _ = fs::remove_file(&path);
                    continue;
                }
            };
            if self.expired(now, record.updated_at) {
                let _ = fs::remove_file(&path);
                continue;
            }
            entries.insert(
                record.meta.task_id.clone(),
                Entry {
                    meta: record.meta,
                    updated_at: record.updated_at,
                },
            );
        }
        debug!(count = entries.len(), "loaded result spool");
        Ok(())
    }

    fn expired(&self, now: DateTime<Utc>, updated_at: DateTime<Utc>) -> bool {
        now.signed_duration_since(updated_at).num_seconds() >= self.ttl.as_secs() as i64
    }

    fn spool_path(&self, id: &TaskId) -> PathBuf {
        self.spool.join(format!("{}{}.json", SPOOL_PREFIX, id))
    }

    fn persist(&self, entry: &Entry) -> Result<(), BackendError> {
        let record = SpoolRecord {
            updated_at: entry.updated_at,
            meta: entry.meta.clone(),
        };
        let path = self.spool_path(&entry.meta.task_id);
        fs::write(&path, serde_json::to_vec(&record)?)?;
        Ok(())
    }

    /// Drop entries past the TTL. Returns how many were removed.
    pub fn sweep(&self) -> Result<usize, BackendError> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let stale: Vec<TaskId> = entries
            .iter()
            .filter(|(_, entry)| self.expired(now, entry.updated_at))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            entries.remove(id);
            let _ = fs::remove_file(self.spool_path(id));
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "swept expired task meta");
        }
        Ok(stale.len())
    }

    fn notify(&self, task_id: &TaskId, status: JobStatus) {
        let _ = self.tx.send(StateChange {
            task_id: task_id.clone(),
            status,
        });
    }
}

impl ResultBackend for LocalBackend {
    fn get(&self, id: &TaskId) -> Result<Option<TaskMeta>, BackendError> {
        let entries = self.entries.lock();
        match entries.get(id) {
            Some(entry) if !self.expired(Utc::now(), entry.updated_at) => {
                Ok(Some(entry.meta.clone()))
            }
            _ => Ok(None),
        }
    }

    fn put(&self, meta: TaskMeta) -> Result<(), BackendError> {
        let status = meta.status;
        let task_id = meta.task_id.clone();
        let mut entries = self.entries.lock();
        let entry = Entry {
            meta,
            updated_at: Utc::now(),
        };
        self.persist(&entry)?;
        entries.insert(task_id.clone(), entry);
        drop(entries);
        self.notify(&task_id, status);
        Ok(())
    }

    fn update_state(
        &self,
        id: &TaskId,
        status: JobStatus,
        patch: ResultMeta,
    ) -> Result<(), BackendError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(id.clone()).or_insert_with(|| Entry {
            meta: TaskMeta::with_status(id.clone(), JobStatus::Pending),
            updated_at: Utc::now(),
        });

        // Terminal states are write-once: a late RUNNING write from a
        // straggling tracker must not resurrect a finished task.
        if entry.meta.status.is_terminal() && !status.is_terminal() {
            warn!(
                task = %id,
                current = %entry.meta.status,
                attempted = %status,
                "ignoring non-terminal write over terminal state"
            );
            return Ok(());
        }

        entry.meta.status = status;
        entry.meta.result.merge(patch);
        if status.is_terminal() && entry.meta.date_done.is_none() {
            entry.meta.date_done = Some(Utc::now());
        }
        entry.updated_at = Utc::now();
        self.persist(entry)?;
        drop(entries);
        self.notify(id, status);
        Ok(())
    }

    fn add_children(&self, id: &TaskId, children: &[TaskId]) -> Result<(), BackendError> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(id) {
            for child in children {
                if !entry.meta.children.contains(child) {
                    entry.meta.children.push(child.clone());
                }
            }
            entry.updated_at = Utc::now();
            self.persist(entry)?;
        }
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<TaskId>, BackendError> {
        let now = Utc::now();
        let entries = self.entries.lock();
        let mut ids: Vec<TaskId> = entries
            .iter()
            .filter(|(_, entry)| !self.expired(now, entry.updated_at))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    fn delete(&self, id: &TaskId) -> Result<(), BackendError> {
        let mut entries = self.entries.lock();
        entries.remove(id);
        let _ = fs::remove_file(self.spool_path(id));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
