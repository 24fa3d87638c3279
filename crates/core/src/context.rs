// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Program context: the serializable execution envelope.
//!
//! One context travels with every enqueue. The submission path fills the
//! identity and routing fields; the executor materializes the staging
//! fields (`input_dir`, `input_file`, `output_dir`) just before the script
//! runs, and strips them again when forking downstream work.

use crate::id::TaskId;
use crate::queue::QueueName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;

/// Wire schema version.
pub const CONTEXT_SCHEMA: u32 = 1;

/// Keys a submission-time config override may never touch.
const IMMUTABLE_KEYS: [&str; 5] = ["task_id", "script", "data", "shadow", "uuid"];

fn schema_version() -> u32 {
    CONTEXT_SCHEMA
}

fn default_entrypoint() -> String {
    "main".to_string()
}

fn default_tmp() -> bool {
    true
}

/// The execution envelope passed with every enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramContext {
    #[serde(default = "schema_version")]
    pub v: u32,
    pub task_id: TaskId,
    pub script: PathBuf,
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
    /// Input file on shared storage, or none for pure-compute tasks.
    #[serde(default)]
    pub data: Option<PathBuf>,
    /// Inner path inside an input archive, when auto-detection won't do.
    #[serde(default)]
    pub root_file: Option<String>,
    pub time_request: DateTime<Utc>,
    #[serde(default)]
    pub time_limit: Option<u64>,
    #[serde(default)]
    pub queue: Option<QueueName>,
    /// No per-job output directory is allocated when set.
    #[serde(default)]
    pub compute_only: bool,
    /// Prepare a scratch directory for the run.
    #[serde(default = "default_tmp")]
    pub tmp: bool,
    /// Pass the unwrapped return value downstream instead of the
    /// progress-annotated envelope (used by chain links).
    #[serde(default)]
    pub raw: bool,
    #[serde(default)]
    pub is_local: bool,
    /// Display alias, surfaced as `shadow_name` in task meta.
    #[serde(default)]
    pub shadow: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub retry: u32,
    // Staging fields, populated by the executor for the lifetime of one
    // run and stripped when forking downstream tasks.
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl ProgramContext {
    /// New context with the mandatory defaults established.
    pub fn new(task_id: TaskId, script: impl Into<PathBuf>, time_request: DateTime<Utc>) -> Self {
        Self {
            v: CONTEXT_SCHEMA,
            task_id,
            script: script.into(),
            entrypoint: default_entrypoint(),
            data: None,
            root_file: None,
            time_request,
            time_limit: None,
            queue: None,
            compute_only: false,
            tmp: true,
            raw: false,
            is_local: false,
            shadow: None,
            params: Value::Null,
            retry: 0,
            input_dir: None,
            input_file: None,
            output_dir: None,
        }
    }

    /// Fresh context for a forked downstream task: same identity-bearing
    /// fields, re-stamped request time, staging fields stripped.
    pub fn clone_for_dispatch(&self, now: DateTime<Utc>) -> Self {
        let mut pc = self.clone();
        pc.time_request = now;
        pc.retry = 0;
        pc.input_dir = None;
        pc.input_file = None;
        pc.output_dir = None;
        pc
    }

    /// Apply a submission-time config override map.
    ///
    /// Immutable keys are dropped (and returned so the caller can surface
    /// a warning); unknown keys fall through into `params` so scripts can
    /// still read them.
    pub fn apply_overrides(&mut self, overrides: &serde_json::Map<String, Value>) -> Vec<String> {
        let mut rejected = Vec::new();
        for (key, value) in overrides {
            if value.is_null() {
                continue;
            }
            if IMMUTABLE_KEYS.contains(&key.as_str()) {
                rejected.push(key.clone());
                continue;
            }
            match key.as_str() {
                "entrypoint" => {
                    if let Some(s) = value.as_str() {
                        self.entrypoint = s.to_string();
                    }
                }
                "root_file" => {
                    if let Some(s) = value.as_str() {
                        self.root_file = Some(s.to_string());
                    }
                }
                "time_limit" => {
                    if let Some(n) = value.as_u64() {
                        self.time_limit = Some(n);
                    }
                }
                "queue" => match value.as_str().map(str::parse::<QueueName>) {
                    Some(Ok(queue)) => self.queue = Some(queue),
                    _ => warn!(value = %value, "ignoring invalid queue override"),
                },
                "compute_only" => {
                    if let Some(b) = value.as_bool() {
                        self.compute_only = b;
                    }
                }
                "tmp" => {
                    if let Some(b) = value.as_bool() {
                        self.tmp = b;
                    }
                }
                "raw" => {
                    if let Some(b) = value.as_bool() {
                        self.raw = b;
                    }
                }
                "is_local" => {
                    if let Some(b) = value.as_bool() {
                        self.is_local = b;
                    }
                }
                "params" => {
                    self.params = value.clone();
                }
                other => {
                    if !self.params.is_object() {
                        self.params = Value::Object(serde_json::Map::new());
                    }
                    if let Some(obj) = self.params.as_object_mut() {
                        obj.insert(other.to_string(), value.clone());
                    }
                }
            }
        }
        if !rejected.is_empty() {
            warn!(keys = ?rejected, "dropped immutable context keys from config override");
        }
        rejected
    }

    /// Routing queue with the default applied.
    pub fn routed_queue(&self) -> QueueName {
        self.queue.unwrap_or(QueueName::DEFAULT)
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
