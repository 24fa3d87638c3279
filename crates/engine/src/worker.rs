// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker supervisor: one pull-execute-ack loop per worker.
//!
//! A worker serves a set of queues with a single in-flight task
//! (prefetch 1). Around every task it maintains the crash beacon; after
//! an optional task cap it broadcasts shutdown so the deployment can
//! recycle leaky kernel processes.

use crate::beacon::{BeaconInfo, CrashBeacon};
use crate::broker::{Broker, Envelope, TaskKind};
use crate::executor::Executor;
use crate::session::{KernelSession, SessionError};
use lathe_core::{Clock, QueueName, SystemClock};
use lathe_runner::CancelFlag;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Process exit code when license acquisition fails at boot.
pub const LICENSE_EXIT_CODE: i32 = 100;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("license acquisition failed at boot: {0}")]
    License(#[from] SessionError),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queues this worker serves, in priority order.
    pub queues: Vec<QueueName>,
    /// Shut the worker down after this many tasks (0 = unlimited).
    pub max_tasks: u32,
    /// Directory holding the per-process crash beacon.
    pub beacon_dir: PathBuf,
}

pub struct Worker<C: Clock = SystemClock> {
    executor: Arc<Executor<C>>,
    broker: Arc<Broker>,
    session: Arc<KernelSession>,
    config: WorkerConfig,
    shutdown: Arc<CancelFlag>,
}

impl<C: Clock> Worker<C> {
    pub fn new(
        executor: Arc<Executor<C>>,
        broker: Arc<Broker>,
        session: Arc<KernelSession>,
        config: WorkerConfig,
        shutdown: Arc<CancelFlag>,
    ) -> Self {
        Self {
            executor,
            broker,
            session,
            config,
            shutdown,
        }
    }

    /// Run the pull loop until shutdown, queue drain, or the task cap.
    pub async fn run(&self) -> Result<(), WorkerError> {
        // License-at-boot failure is fatal for the whole deployment: a
        // worker without a kernel would fail every task it touches.
        if let Err(e) = self.session.initialize_at_boot() {
            error!(error = %e, "license acquisition failed, broadcasting shutdown");
            self.shutdown.cancel();
            return Err(e.into());
        }

        let beacon = CrashBeacon::for_process(&self.config.beacon_dir, std::process::id());
        beacon.clear(true);

        info!(queues = ?self.config.queues, "worker started");
        let mut completed = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let envelope = tokio::select! {
                envelope = self.broker.pop(&self.config.queues) => envelope,
                _ = self.shutdown.cancelled_wait() => break,
            };
            let Some(envelope) = envelope else {
                break;
            };

            if let Err(e) = beacon.write(&beacon_info(&envelope)) {
                warn!(error = %e, "failed to write crash beacon");
            }
            self.executor.run(envelope).await;
            beacon.clear(false);

            completed += 1;
            if self.config.max_tasks > 0 && completed >= self.config.max_tasks {
                info!(
                    completed,
                    "task cap reached for this worker, broadcasting shutdown"
                );
                self.shutdown.cancel();
                break;
            }
        }

        self.session.release_at_shutdown();
        info!(completed, "worker stopped");
        Ok(())
    }
}

fn beacon_info(envelope: &Envelope) -> BeaconInfo {
    let args = match &envelope.kind {
        TaskKind::Execute { params, .. } => params.clone(),
        _ => Value::Null,
    };
    BeaconInfo {
        task_id: envelope.id.clone(),
        name: envelope.kind.name().to_string(),
        queue: envelope.queue,
        retries: envelope.retries,
        args,
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
