// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step records of a job's progress log.

use serde::{Deserialize, Serialize};

/// Sentinel duration for a step that is still in flight.
pub const IN_FLIGHT: f64 = -1.0;

/// One ordered element of a job's progress log.
///
/// At most one step per job is in flight; its duration stays at the
/// sentinel until the next transition finalizes it from the monotonic
/// clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub info: String,
    pub duration: f64,
}

impl Step {
    pub fn in_flight(info: impl Into<String>) -> Self {
        Self {
            info: info.into(),
            duration: IN_FLIGHT,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.duration < 0.0
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
