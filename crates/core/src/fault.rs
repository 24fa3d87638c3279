// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution fault taxonomy.
//!
//! Faults cross the runner boundary and the result backend, so they are
//! plain data: no live error chains, just kind + message + trace lines.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a task execution failed.
///
/// The retriable kinds are infrastructure casualties (the payload may well
/// succeed on a bigger box); everything the script itself raised is fatal.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionFault {
    #[error("task timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("child killed by signal {signal}")]
    Signal { signal: i32 },

    #[error("child exited with code {code}")]
    Exit { code: i32 },

    #[error("out of memory")]
    OutOfMemory,

    #[error("worker lost")]
    WorkerLost,

    /// A structured error the script reported over the control pipe.
    #[error("{exc_type}: {message}")]
    Script {
        exc_type: String,
        message: String,
        #[serde(default)]
        trace: Vec<String>,
    },

    /// A failure that could not be decoded into a structured record;
    /// carries whatever summary crossed the pipe.
    #[error("{summary}")]
    Opaque { summary: String },
}

impl ExecutionFault {
    /// Retriable faults get one automatic retry, escalated to `gpuhigh`
    /// when they came off `cpu` or `gpu`.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ExecutionFault::Timeout { .. }
                | ExecutionFault::Signal { .. }
                | ExecutionFault::Exit { .. }
                | ExecutionFault::OutOfMemory
                | ExecutionFault::WorkerLost
        )
    }

    /// Short class name recorded as `exc_type` in failure meta.
    pub fn exc_type(&self) -> &str {
        match self {
            ExecutionFault::Timeout { .. } => "Timeout",
            ExecutionFault::Signal { .. } => "SignalFault",
            ExecutionFault::Exit { .. } => "ExitFault",
            ExecutionFault::OutOfMemory => "OutOfMemory",
            ExecutionFault::WorkerLost => "WorkerLost",
            ExecutionFault::Script { exc_type, .. } => exc_type,
            ExecutionFault::Opaque { .. } => "OpaqueFault",
        }
    }
}

/// The failure record stored in task meta when a task goes terminal
/// FAILURE.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureMeta {
    pub exc_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exc_module: Option<String>,
    pub exc_message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exc_traceback: Vec<String>,
}

impl FailureMeta {
    pub fn from_fault(fault: &ExecutionFault) -> Self {
        let trace = match fault {
            ExecutionFault::Script { trace, .. } => trace.clone(),
            _ => Vec::new(),
        };
        Self {
            exc_type: fault.exc_type().to_string(),
            exc_module: None,
            exc_message: fault.to_string(),
            exc_traceback: trace,
        }
    }

    /// The record written by crash recovery when a worker died under a
    /// task: the beacon cannot tell a segfault from the OOM killer.
    pub fn worker_crash() -> Self {
        Self {
            exc_type: "SystemError".to_string(),
            exc_module: None,
            exc_message: "Not enough memory or segfault".to_string(),
            exc_traceback: Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "fault_tests.rs"]
mod tests;
