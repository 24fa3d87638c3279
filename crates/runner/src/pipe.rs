// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The control-pipe protocol between a script child and the runner.
//!
//! The child writes one JSON object per stdout line. The final `result`
//! or `error` record is the return-value convention; a `context` record
//! patches the program context back into the parent. Lines that do not
//! parse as control records are ordinary script output and go to the
//! task log.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One record on the child's control pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRecord {
    /// Declare the total step count for progress accounting.
    SetTotal { n: u64 },
    /// Close the previous step and open a new one.
    Next {
        info: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// Merge arbitrary keys into the task's result meta.
    Store { patch: Map<String, Value> },
    /// Patch fields of the program context back into the parent.
    Context { patch: Map<String, Value> },
    /// Final return value.
    Result { value: Value },
    /// Structured failure raised by the script.
    Error {
        kind: String,
        message: String,
        #[serde(default)]
        trace: Vec<String>,
    },
}

/// Outcome of parsing one stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum PipeLine {
    Record(ControlRecord),
    /// JSON that looked like a control record but didn't decode; the raw
    /// value is kept so a malformed `error` can still fail the task.
    Malformed { op: String, raw: Value },
    /// Ordinary script output.
    Log(String),
}

/// Classify one line of child stdout.
pub fn parse_line(line: &str) -> PipeLine {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return PipeLine::Log(line.to_string());
    }
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return PipeLine::Log(line.to_string());
    };
    let Some(op) = value.get("op").and_then(Value::as_str) else {
        return PipeLine::Log(line.to_string());
    };
    let op = op.to_string();
    match serde_json::from_value::<ControlRecord>(value.clone()) {
        Ok(record) => PipeLine::Record(record),
        Err(_) => PipeLine::Malformed { op, raw: value },
    }
}

#[cfg(test)]
#[path = "pipe_tests.rs"]
mod tests;
