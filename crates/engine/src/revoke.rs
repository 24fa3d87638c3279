// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Revocation registry: cancel-by-id for queued and running tasks.

use lathe_runner::CancelFlag;
use lathe_core::TaskId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// Tracks which tasks are running (with their cancel flags) and which
/// ids were revoked before a worker picked them up.
#[derive(Default)]
pub struct RevocationRegistry {
    running: Mutex<HashMap<TaskId, Arc<CancelFlag>>>,
    pending: Mutex<HashSet<TaskId>>,
}

impl RevocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task about to run. If it was revoked while queued, the
    /// returned flag is already cancelled and the runner bails before
    /// spawning anything.
    pub fn register(&self, id: &TaskId) -> Arc<CancelFlag> {
        let flag = Arc::new(CancelFlag::new());
        if self.pending.lock().remove(id) {
            flag.cancel();
        }
        self.running.lock().insert(id.clone(), Arc::clone(&flag));
        flag
    }

    /// Forget a finished task.
    pub fn complete(&self, id: &TaskId) {
        self.running.lock().remove(id);
    }

    /// Revoke a task. Returns true when it was running and its child is
    /// being terminated; false when the revocation is parked for pickup.
    pub fn revoke(&self, id: &TaskId) -> bool {
        if let Some(flag) = self.running.lock().get(id) {
            info!(task = %id, "revoking running task");
            flag.cancel();
            true
        } else {
            info!(task = %id, "parking revocation for queued task");
            self.pending.lock().insert(id.clone());
            false
        }
    }
}

#[cfg(test)]
#[path = "revoke_tests.rs"]
mod tests;
