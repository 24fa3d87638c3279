// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job/task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job (or of one task of a composed job).
///
/// Flow: created on submit → `Sent`; picked by a worker → `Received` →
/// `Started` → `Running` (on the first progress write) → terminal.
/// `Retry` marks a task between a retriable fault and its redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Sent,
    Pending,
    Received,
    Started,
    Running,
    Success,
    Failure,
    Retry,
    Revoked,
    Unknown,
}

impl JobStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failure | JobStatus::Revoked
        )
    }

    /// A task counts as picked up once a worker has touched it.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Received | JobStatus::Started | JobStatus::Running | JobStatus::Retry
        )
    }

    /// Parse a status string, mapping anything unrecognized to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "SENT" => JobStatus::Sent,
            "PENDING" => JobStatus::Pending,
            "RECEIVED" => JobStatus::Received,
            "STARTED" => JobStatus::Started,
            "RUNNING" => JobStatus::Running,
            "SUCCESS" => JobStatus::Success,
            "FAILURE" => JobStatus::Failure,
            "RETRY" => JobStatus::Retry,
            "REVOKED" => JobStatus::Revoked,
            _ => JobStatus::Unknown,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Sent => "SENT",
            JobStatus::Pending => "PENDING",
            JobStatus::Received => "RECEIVED",
            JobStatus::Started => "STARTED",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
            JobStatus::Retry => "RETRY",
            JobStatus::Revoked => "REVOKED",
            JobStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
