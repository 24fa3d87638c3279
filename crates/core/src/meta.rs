// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task meta: the record stored in the result backend per task.

use crate::fault::FailureMeta;
use crate::id::{GroupId, TaskId};
use crate::status::JobStatus;
use crate::step::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// UTC wall-clock stamps of one task's life.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeInfo {
    pub request: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    /// Null until terminal; readers fall back to `date_done` when absent.
    pub stopped: Option<DateTime<Utc>>,
}

impl TimeInfo {
    fn merge(&mut self, patch: &TimeInfo) {
        if patch.request.is_some() {
            self.request = patch.request;
        }
        if patch.started.is_some() {
            self.started = patch.started;
        }
        if patch.stopped.is_some() {
            self.stopped = patch.stopped;
        }
    }
}

/// The running dict accumulated by the executor while a task runs.
///
/// Merges are shallow: scalar fields take the patched value when present,
/// `steps` is replaced as a whole (the tracker always sends the full
/// list), and the `result` payload is replaced wholesale when supplied.
///
/// Failure records live as plain `exc_*` keys inside `extra`, keeping
/// the stored shape flat without an optional flattened struct that
/// could not round-trip when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_info: Option<TimeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ResultMeta {
    pub fn merge(&mut self, patch: ResultMeta) {
        if patch.progress.is_some() {
            self.progress = patch.progress;
        }
        if !patch.steps.is_empty() {
            self.steps = patch.steps;
        }
        if let Some(patch_time) = &patch.time_info {
            self.time_info
                .get_or_insert_with(TimeInfo::default)
                .merge(patch_time);
        }
        if patch.shadow_name.is_some() {
            self.shadow_name = patch.shadow_name;
        }
        if patch.retry.is_some() {
            self.retry = patch.retry;
        }
        if patch.result.is_some() {
            self.result = patch.result;
        }
        self.extra.extend(patch.extra);
    }

    pub fn from_failure(failure: FailureMeta) -> Self {
        let mut meta = Self::default();
        meta.record_failure(&failure);
        meta
    }

    /// Spread a failure record over the `exc_*` keys.
    pub fn record_failure(&mut self, failure: &FailureMeta) {
        if let Ok(Value::Object(map)) = serde_json::to_value(failure) {
            self.extra.extend(map);
        }
    }

    /// The failure record, when the `exc_*` keys are present.
    pub fn failure(&self) -> Option<FailureMeta> {
        if !self.extra.contains_key("exc_type") {
            return None;
        }
        serde_json::from_value(Value::Object(self.extra.clone())).ok()
    }

    pub fn from_result(value: Value) -> Self {
        Self {
            result: Some(value),
            ..Self::default()
        }
    }
}

/// The record stored under `task-meta:<id>` in the result backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub task_id: TaskId,
    pub status: JobStatus,
    #[serde(default)]
    pub result: ResultMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    /// Composite descendants (chain links, group children, chord body).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_done: Option<DateTime<Utc>>,
}

impl TaskMeta {
    pub fn sent(task_id: TaskId) -> Self {
        Self::with_status(task_id, JobStatus::Sent)
    }

    pub fn with_status(task_id: TaskId, status: JobStatus) -> Self {
        Self {
            task_id,
            status,
            result: ResultMeta::default(),
            traceback: None,
            children: Vec::new(),
            parent_id: None,
            group_id: None,
            date_done: None,
        }
    }

    /// Read-side view with the `date_done` fallback applied: a terminal
    /// record missing `time_info.stopped` borrows the backend stamp.
    pub fn normalized(&self) -> TaskMeta {
        let mut meta = self.clone();
        if meta.status.is_terminal() {
            let time_info = meta.result.time_info.get_or_insert_with(TimeInfo::default);
            if time_info.stopped.is_none() {
                time_info.stopped = meta.date_done;
            }
        }
        meta
    }

    /// Blocking error text for client views: the stored traceback when one
    /// exists, else the failure record's message.
    pub fn error_text(&self) -> Option<String> {
        if let Some(traceback) = &self.traceback {
            return Some(traceback.clone());
        }
        self.result
            .failure()
            .map(|f| format!("{}: {}", f.exc_type, f.exc_message))
    }
}

#[cfg(test)]
#[path = "meta_tests.rs"]
mod tests;
