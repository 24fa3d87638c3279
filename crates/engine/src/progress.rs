// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task step accountant.
//!
//! Owned by the currently executing task; every transition persists
//! `{progress, steps}` into the task meta with state RUNNING, so clients
//! watch the job move while it runs. Durations come from the monotonic
//! clock; the wall clock only feeds `time_info`.

use chrono::{DateTime, Utc};
use lathe_core::{Clock, JobStatus, ResultMeta, Step, SystemClock, TaskId, TimeInfo};
use lathe_storage::{BackendError, ResultBackend};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub struct ProgressTracker<C: Clock = SystemClock> {
    backend: Arc<dyn ResultBackend>,
    task_id: TaskId,
    clock: C,
    step_total: u64,
    steps: Vec<Step>,
    step_started: Option<Instant>,
    time_request: Option<DateTime<Utc>>,
    time_started: Option<DateTime<Utc>>,
    time_stopped: Option<DateTime<Utc>>,
    retry_count: u32,
    shadow: Option<String>,
}

impl<C: Clock> ProgressTracker<C> {
    pub fn new(
        backend: Arc<dyn ResultBackend>,
        task_id: TaskId,
        time_request: Option<DateTime<Utc>>,
        shadow: Option<String>,
        clock: C,
    ) -> Self {
        Self {
            backend,
            task_id,
            clock,
            step_total: 1,
            steps: Vec::new(),
            step_started: None,
            time_request,
            time_started: None,
            time_stopped: None,
            retry_count: 0,
            shadow,
        }
    }

    /// Stamp the start time and persist it (first RUNNING write).
    pub fn start(&mut self) -> Result<(), BackendError> {
        self.time_started = Some(self.clock.utc_now());
        let patch = ResultMeta {
            time_info: Some(self.time_info()),
            shadow_name: self.shadow.clone(),
            ..ResultMeta::default()
        };
        self.persist(patch)
    }

    /// Declare the total step count; values below 1 clamp to 1.
    pub fn set_total(&mut self, total: u64) {
        self.step_total = total.max(1);
    }

    /// Completed steps over total, floored. Capped at 99 while running —
    /// only `stop` writes 100.
    pub fn percent(&self) -> u8 {
        let ended = self.steps.len().saturating_sub(1) as u64;
        ((ended * 100 / self.step_total).min(99)) as u8
    }

    /// Close the previous step and open a new one.
    pub fn next(&mut self, info: &str, data: Option<Value>) -> Result<(), BackendError> {
        self.close_last();
        self.steps.push(Step::in_flight(info));
        self.step_started = Some(self.clock.now());
        info!(
            task = %self.task_id,
            step = self.steps.len(),
            total = self.step_total,
            "{}",
            info
        );

        let mut patch = ResultMeta {
            progress: Some(self.percent()),
            steps: self.steps.clone(),
            ..ResultMeta::default()
        };
        if let Some(data) = data {
            patch.extra.insert("output".to_string(), data);
        }
        self.persist(patch)
    }

    /// Merge arbitrary keys into the result meta.
    pub fn store(&mut self, extras: Map<String, Value>) -> Result<(), BackendError> {
        self.persist(ResultMeta {
            extra: extras,
            ..ResultMeta::default()
        })
    }

    /// Store the script's return under `result`.
    pub fn output(&mut self, value: Value) -> Result<(), BackendError> {
        self.persist(ResultMeta::from_result(value))
    }

    /// Advance the retry counter and persist it.
    pub fn retry(&mut self, count: u32) -> Result<(), BackendError> {
        self.retry_count = count;
        self.persist(ResultMeta {
            retry: Some(count),
            ..ResultMeta::default()
        })
    }

    /// Close the last step, stamp the stop time, and force progress to
    /// 100.
    pub fn stop(&mut self, extras: Map<String, Value>) -> Result<(), BackendError> {
        self.close_last();
        self.time_stopped = Some(self.clock.utc_now());
        self.persist(ResultMeta {
            progress: Some(100),
            steps: self.steps.clone(),
            time_info: Some(self.time_info()),
            extra: extras,
            ..ResultMeta::default()
        })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    fn time_info(&self) -> TimeInfo {
        TimeInfo {
            request: self.time_request,
            started: self.time_started,
            stopped: self.time_stopped,
        }
    }

    fn close_last(&mut self) {
        if let (Some(last), Some(started)) = (self.steps.last_mut(), self.step_started) {
            if last.is_in_flight() {
                last.duration = self.clock.now().duration_since(started).as_secs_f64();
            }
        }
    }

    fn persist(&self, patch: ResultMeta) -> Result<(), BackendError> {
        self.backend
            .update_state(&self.task_id, JobStatus::Running, patch)
    }
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
