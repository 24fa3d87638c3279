// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote result backend: polls a peer scheduler's façade for task meta.
//!
//! Used when this orchestrator runs as a downstream of another one: the
//! upstream exposes `GET /backend/get_task_meta/{id}` and this adapter
//! polls it every 500 ms until the task is terminal. Writes are rejected;
//! the upstream owns its own records.

use crate::backend::{BackendError, ResultBackend, StateChange};
use lathe_core::{JobStatus, ResultMeta, TaskId, TaskMeta};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Poll cadence against the peer façade.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("peer returned status {0}")]
    BadStatus(u16),

    #[error("timed out waiting for task {0} to finish")]
    WaitTimeout(TaskId),
}

/// HTTP adapter over a peer scheduler's backend surface.
pub struct RemoteBackend {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
    tx: broadcast::Sender<StateChange>,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::blocking::Client::new(),
            tx,
        }
    }

    /// One fetch of the peer's task meta.
    pub fn get_task_meta(&self, id: &TaskId) -> Result<TaskMeta, RemoteError> {
        let url = format!("{}/backend/get_task_meta/{}", self.base_url, id);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::BadStatus(status.as_u16()));
        }
        Ok(response.json::<TaskMeta>()?)
    }

    /// Poll until the task reaches a terminal state (or `timeout` runs
    /// out), returning the final meta.
    pub fn wait_terminal(
        &self,
        id: &TaskId,
        timeout: Option<Duration>,
    ) -> Result<TaskMeta, RemoteError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let meta = self.get_task_meta(id)?;
            if meta.status.is_terminal() {
                debug!(task = %id, status = %meta.status, "peer task finished");
                return Ok(meta);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(RemoteError::WaitTimeout(id.clone()));
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ResultBackend for RemoteBackend {
    fn get(&self, id: &TaskId) -> Result<Option<TaskMeta>, BackendError> {
        match self.get_task_meta(id) {
            Ok(meta) => Ok(Some(meta)),
            Err(RemoteError::BadStatus(404)) => Ok(None),
            Err(e) => Err(BackendError::Http(e.to_string())),
        }
    }

    fn put(&self, _meta: TaskMeta) -> Result<(), BackendError> {
        Err(BackendError::ReadOnly)
    }

    fn update_state(
        &self,
        _id: &TaskId,
        _status: JobStatus,
        _patch: ResultMeta,
    ) -> Result<(), BackendError> {
        Err(BackendError::ReadOnly)
    }

    fn add_children(&self, _id: &TaskId, _children: &[TaskId]) -> Result<(), BackendError> {
        Err(BackendError::ReadOnly)
    }

    fn list_ids(&self) -> Result<Vec<TaskId>, BackendError> {
        Err(BackendError::ReadOnly)
    }

    fn delete(&self, _id: &TaskId) -> Result<(), BackendError> {
        Err(BackendError::ReadOnly)
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        // Remote peers push nothing; the receiver simply never fires.
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
