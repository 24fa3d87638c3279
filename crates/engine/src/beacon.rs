// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash beacon: the on-disk sentinel closing the segfault loop.
//!
//! A worker writes the beacon just before handing a task to the runner
//! and deletes it right after. If the whole worker process dies under a
//! task (segfault in the kernel, OOM kill), the beacon survives; the
//! recovery sweep at the next boot marks that task FAILURE so clients
//! are not left staring at a forever-RUNNING job.
//!
//! The file name carries the worker pid so concurrent workers on one
//! host never clobber each other's beacon.

use crate::error::EngineError;
use lathe_core::{FailureMeta, JobStatus, QueueName, ResultMeta, TaskId};
use lathe_storage::ResultBackend;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BEACON_PREFIX: &str = "lathe_latest_task_";

/// Snapshot of the task a worker is about to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconInfo {
    pub task_id: TaskId,
    pub name: String,
    pub queue: QueueName,
    pub retries: u32,
    #[serde(default)]
    pub args: Value,
}

/// One worker process's beacon file.
pub struct CrashBeacon {
    path: PathBuf,
}

impl CrashBeacon {
    /// Beacon for a worker process, keyed by pid.
    pub fn for_process(dir: &Path, pid: u32) -> Self {
        Self {
            path: dir.join(format!("{}{}", BEACON_PREFIX, pid)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pre-run hook: persist the task snapshot.
    pub fn write(&self, info: &BeaconInfo) -> Result<(), EngineError> {
        let serialized = serde_json::to_string(info)?;
        debug!(task = %info.task_id, "writing crash beacon");
        fs::write(&self.path, serialized)?;
        Ok(())
    }

    /// Post-run hook: remove the beacon. Missing is only worth a warning
    /// after the first task.
    pub fn clear(&self, first_time: bool) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !first_time {
                    warn!(path = %self.path.display(), "beacon already gone");
                }
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to clear beacon"),
        }
    }

    pub fn read(&self) -> Option<BeaconInfo> {
        let content = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable beacon");
                None
            }
        }
    }
}

/// Startup sweep: every leftover beacon marks a task the previous worker
/// generation died under. Mark each FAILURE and drop the beacon.
pub fn recover_crashed(
    dir: &Path,
    backend: &dyn ResultBackend,
) -> Result<Vec<TaskId>, EngineError> {
    let mut recovered = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(recovered),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(BEACON_PREFIX) {
            continue;
        }
        let beacon = CrashBeacon { path: path.clone() };
        if let Some(info) = beacon.read() {
            info!(task = %info.task_id, "recovering crashed task from beacon");
            backend.update_state(
                &info.task_id,
                JobStatus::Failure,
                ResultMeta::from_failure(FailureMeta::worker_crash()),
            )?;
            recovered.push(info.task_id);
        }
        beacon.clear(false);
    }
    Ok(recovered)
}

#[cfg(test)]
#[path = "beacon_tests.rs"]
mod tests;
