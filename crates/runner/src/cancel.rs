// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancellation flag shared between a running task and the revocation
//! path.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// One-shot cancellation flag. `cancel()` is idempotent and wakes every
/// waiter; the flag never resets.
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested; immediately if it already
    /// was.
    pub async fn cancelled_wait(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[path = "cancel_tests.rs"]
mod tests;
