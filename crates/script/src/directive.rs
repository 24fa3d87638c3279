// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schedule directives extracted from entrypoint blocks.

use lathe_core::QueueName;
use serde::{Deserialize, Serialize};

/// Scheduling metadata attached to an entrypoint.
///
/// Only literal attribute values are honored by the inspector; anything
/// computed is ignored with a warning, so a directive is always a plain
/// record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDirective {
    pub queue: Option<QueueName>,
    #[serde(default)]
    pub wait: bool,
    pub timeout: Option<u64>,
}

impl ScheduleDirective {
    /// Directive with the waiter rule applied: a waiting entrypoint that
    /// named no queue lands on `control`, so a waiter can never occupy
    /// the compute slot its own descendants need.
    pub fn resolved(mut self) -> Self {
        if self.wait && self.queue.is_none() {
            self.queue = Some(QueueName::Control);
        }
        self
    }
}

#[cfg(test)]
#[path = "directive_tests.rs"]
mod tests;
