// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process broker: named FIFO queues with prefetch-1 delivery.
//!
//! Compute envelopes are early-acked (a pop is final — a worker crash
//! must not redeliver a segfaulting payload); management envelopes are
//! late-acked via [`Broker::nack`], which redelivers with a 60s countdown
//! up to 3 attempts. Envelopes with a future ETA become eligible only
//! once due.

use crate::canvas::{PlannedLink, Signature};
use crate::package::ArchiveFormat;
use chrono::{DateTime, Utc};
use lathe_core::{AckMode, ProgramContext, QueueName, TaskId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, info};

/// Redelivery countdown for nacked management envelopes.
pub const MGMT_RETRY_COUNTDOWN: Duration = Duration::from_secs(60);

/// Redelivery ceiling for management envelopes.
pub const MGMT_MAX_RETRIES: u32 = 3;

/// Idle poll slice while waiting for work or a due ETA.
const POP_WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable")]
    Unavailable,
}

/// What a queued envelope asks a worker to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskKind {
    /// Run a script entrypoint.
    Execute {
        params: Value,
        pc: ProgramContext,
        /// Remaining chain links, dispatched one per success.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        chain: Vec<PlannedLink>,
    },
    /// Package a job's outputs into an archive.
    Package {
        job_id: String,
        format: ArchiveFormat,
    },
    /// Remove a file or job directory from shared storage.
    Cleanup { path: PathBuf, is_dir: bool },
    /// Poll a chord's group and release the body on success.
    ChordUnlock {
        group: Vec<TaskId>,
        body_id: TaskId,
        body: Signature,
        pc: ProgramContext,
    },
}

impl TaskKind {
    pub fn ack_mode(&self) -> AckMode {
        match self {
            TaskKind::Execute { .. } => AckMode::Early,
            _ => AckMode::Late,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Execute { .. } => "execute",
            TaskKind::Package { .. } => "package_outputs",
            TaskKind::Cleanup { .. } => "cleanup_share_file",
            TaskKind::ChordUnlock { .. } => "chord_unlock",
        }
    }
}

/// One broker message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: TaskId,
    pub kind: TaskKind,
    pub queue: QueueName,
    /// Earliest delivery time; `None` means immediately eligible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u64>,
}

impl Envelope {
    pub fn new(id: TaskId, kind: TaskKind, queue: QueueName) -> Self {
        Self {
            id,
            kind,
            queue,
            eta: None,
            retries: 0,
            time_limit: None,
        }
    }
}

/// The in-process broker shared by the daemon and its workers.
pub struct Broker {
    queues: Mutex<HashMap<QueueName, VecDeque<Envelope>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Append an envelope to its queue.
    pub fn enqueue(&self, envelope: Envelope) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable);
        }
        debug!(
            task = %envelope.id,
            kind = envelope.kind.name(),
            queue = %envelope.queue,
            eta = ?envelope.eta,
            "enqueued"
        );
        let mut queues = self.queues.lock();
        queues.entry(envelope.queue).or_default().push_back(envelope);
        drop(queues);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Pop the next due envelope from any of `queues`, in queue order.
    ///
    /// Waits until something is due; returns `None` once the broker is
    /// closed and the served queues are drained.
    pub async fn pop(&self, queues: &[QueueName]) -> Option<Envelope> {
        loop {
            let now = Utc::now();
            {
                let mut map = self.queues.lock();
                for queue in queues {
                    if let Some(deque) = map.get_mut(queue) {
                        if let Some(pos) = deque
                            .iter()
                            .position(|e| e.eta.map(|eta| eta <= now).unwrap_or(true))
                        {
                            return deque.remove(pos);
                        }
                    }
                }
                if self.closed.load(Ordering::SeqCst) {
                    let drained = queues
                        .iter()
                        .all(|q| map.get(q).map(VecDeque::is_empty).unwrap_or(true));
                    if drained {
                        return None;
                    }
                }
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(POP_WAIT_SLICE) => {}
            }
        }
    }

    /// Reject a late-ack envelope, redelivering it with the countdown.
    ///
    /// Returns `false` once the retry ceiling is hit; the envelope is
    /// then dropped for good.
    pub fn nack(&self, mut envelope: Envelope) -> bool {
        if envelope.retries >= MGMT_MAX_RETRIES {
            error!(
                task = %envelope.id,
                kind = envelope.kind.name(),
                retries = envelope.retries,
                "management task exhausted its retries, dropping"
            );
            return false;
        }
        envelope.retries += 1;
        envelope.eta = Some(
            Utc::now()
                + chrono::TimeDelta::from_std(MGMT_RETRY_COUNTDOWN)
                    .unwrap_or(chrono::TimeDelta::zero()),
        );
        info!(
            task = %envelope.id,
            retries = envelope.retries,
            "management task redelivered with countdown"
        );
        // A closed broker drops the redelivery; shutdown wins.
        let _ = self.enqueue(envelope);
        true
    }

    /// Front envelope of a queue without removing it (due or not).
    pub fn peek(&self, queue: QueueName) -> Option<Envelope> {
        self.queues
            .lock()
            .get(&queue)
            .and_then(|q| q.front().cloned())
    }

    /// Number of envelopes sitting in a queue (due or not).
    pub fn depth(&self, queue: QueueName) -> usize {
        self.queues
            .lock()
            .get(&queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Stop accepting new envelopes and let poppers drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
