// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logical queue model: resource-class routing and ack semantics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The six logical queues workers can serve.
///
/// `gpuhigh` is reserved for the "bigger box" auto-retry of compute tasks
/// that faulted on `cpu` or `gpu`; `control` hosts waiters and chord
/// unlock tasks so they never occupy a compute slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Cpu,
    Gpu,
    #[serde(rename = "gpuhigh")]
    GpuHigh,
    Archive,
    Maintenance,
    Control,
}

/// Acknowledgement policy for an envelope class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Acknowledge on delivery. A worker crash does not redeliver the
    /// message, so a segfaulting payload cannot loop forever.
    Early,
    /// Acknowledge after completion, with automatic redelivery on failure
    /// (countdown 60s, max 3 attempts).
    Late,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown queue '{0}'")]
pub struct UnknownQueue(pub String);

impl QueueName {
    pub const ALL: [QueueName; 6] = [
        QueueName::Cpu,
        QueueName::Gpu,
        QueueName::GpuHigh,
        QueueName::Archive,
        QueueName::Maintenance,
        QueueName::Control,
    ];

    /// Default queue for compute tasks when neither the submitter nor the
    /// script directive picked one.
    pub const DEFAULT: QueueName = QueueName::Cpu;

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Cpu => "cpu",
            QueueName::Gpu => "gpu",
            QueueName::GpuHigh => "gpuhigh",
            QueueName::Archive => "archive",
            QueueName::Maintenance => "maintenance",
            QueueName::Control => "control",
        }
    }

    /// Where the single auto-retry of a retriable compute fault is routed:
    /// `cpu` and `gpu` escalate to `gpuhigh`, everything else retries in
    /// place.
    pub fn retry_route(&self) -> QueueName {
        match self {
            QueueName::Cpu | QueueName::Gpu => QueueName::GpuHigh,
            other => *other,
        }
    }

    /// Parse a comma-separated queue list (e.g. the worker's `LATHE_QUEUES`).
    pub fn parse_list(s: &str) -> Result<Vec<QueueName>, UnknownQueue> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(QueueName::from_str)
            .collect()
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = UnknownQueue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(QueueName::Cpu),
            "gpu" => Ok(QueueName::Gpu),
            "gpuhigh" => Ok(QueueName::GpuHigh),
            "archive" => Ok(QueueName::Archive),
            "maintenance" => Ok(QueueName::Maintenance),
            "control" => Ok(QueueName::Control),
            other => Err(UnknownQueue(other.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
