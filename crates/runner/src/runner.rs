// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child-process execution of an entrypoint body.

use crate::cancel::CancelFlag;
use crate::memwatch;
use crate::pipe::{parse_line, ControlRecord, PipeLine};
use lathe_core::ExecutionFault;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Deadlines above one day overflow no clock here, but a limit that
/// large is indistinguishable from "unbounded" and usually a config
/// mistake, so it is coerced to unbounded with a warning.
pub const MAX_TIME_LIMIT_SECS: u64 = 86_400;

/// Memory sampling cadence for the OOM watchdog.
const MEM_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("task timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("child killed by signal {0}")]
    Signal(i32),

    #[error("child exited with code {0}")]
    Exit(i32),

    #[error("out of memory: rss {rss_mb} MB over the {limit_mb} MB ceiling")]
    OutOfMemory { rss_mb: u64, limit_mb: u64 },

    #[error("task revoked")]
    Revoked,

    #[error("{exc_type}: {message}")]
    Script {
        exc_type: String,
        message: String,
        trace: Vec<String>,
    },

    #[error("{summary}")]
    Opaque { summary: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Map to the stored fault taxonomy. Revocation is not a fault — the
    /// executor reports it as REVOKED instead.
    pub fn to_fault(&self) -> Option<ExecutionFault> {
        match self {
            RunError::Timeout { seconds } => Some(ExecutionFault::Timeout { seconds: *seconds }),
            RunError::Signal(signal) => Some(ExecutionFault::Signal { signal: *signal }),
            RunError::Exit(code) => Some(ExecutionFault::Exit { code: *code }),
            RunError::OutOfMemory { .. } => Some(ExecutionFault::OutOfMemory),
            RunError::Script {
                exc_type,
                message,
                trace,
            } => Some(ExecutionFault::Script {
                exc_type: exc_type.clone(),
                message: message.clone(),
                trace: trace.clone(),
            }),
            RunError::Opaque { summary } => Some(ExecutionFault::Opaque {
                summary: summary.clone(),
            }),
            RunError::Io(e) => Some(ExecutionFault::Opaque {
                summary: format!("runner IO error: {}", e),
            }),
            RunError::Revoked => None,
        }
    }
}

/// Wall-clock limit and containment knobs for one run.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Seconds; `None` is unbounded.
    pub time_limit: Option<u64>,
    /// RSS ceiling in MiB; `None` disables the watchdog.
    pub max_memory_mb: Option<u64>,
    /// Own process group + group kill. Off when the worker is nested or
    /// the platform can't do it; the body then runs as a plain child.
    pub isolate: bool,
}

/// Everything the child sees: the `LATHE_*` environment and its working
/// directory.
#[derive(Debug, Clone)]
pub struct RunEnv {
    pub task_id: String,
    pub queue: String,
    pub retry: u32,
    pub params: Value,
    /// Serialized program context, readable by the script.
    pub context_file: PathBuf,
    pub input_file: Option<PathBuf>,
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub workdir: PathBuf,
}

impl RunEnv {
    fn apply(&self, cmd: &mut Command) {
        cmd.current_dir(&self.workdir)
            .env("LATHE_TASK_ID", &self.task_id)
            .env("LATHE_QUEUE", &self.queue)
            .env("LATHE_RETRY", self.retry.to_string())
            .env("LATHE_PARAMS", self.params.to_string())
            .env("LATHE_CONTEXT", &self.context_file);
        if let Some(input_file) = &self.input_file {
            cmd.env("LATHE_INPUT_FILE", input_file);
        }
        if let Some(input_dir) = &self.input_dir {
            cmd.env("LATHE_INPUT_DIR", input_dir);
        }
        if let Some(output_dir) = &self.output_dir {
            cmd.env("LATHE_OUTPUT_DIR", output_dir);
        }
    }
}

/// What a successful child handed back.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub value: Option<Value>,
    pub context_patch: Map<String, Value>,
}

/// Run an entrypoint body to completion under the configured containment.
///
/// `on_record` receives the progress-facing records (`set_total`, `next`,
/// `store`) as they arrive so the caller can persist them live; `result`,
/// `error`, and `context` records are folded into the return value.
pub async fn run_entrypoint(
    body: &str,
    env: &RunEnv,
    cfg: &RunnerConfig,
    cancel: Arc<CancelFlag>,
    on_record: &mut (dyn FnMut(ControlRecord) + Send),
) -> Result<RunOutcome, RunError> {
    let time_limit = effective_time_limit(cfg.time_limit);
    let deadline = time_limit.map(|secs| Instant::now() + Duration::from_secs(secs));

    if cancel.is_cancelled() {
        return Err(RunError::Revoked);
    }

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(body)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    env.apply(&mut cmd);
    #[cfg(unix)]
    if cfg.isolate {
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;
    let pid = child.id();
    debug!(task = %env.task_id, pid, isolate = cfg.isolate, "child spawned");

    let stdout = child.stdout.take().ok_or_else(|| {
        RunError::Io(std::io::Error::other("child stdout unavailable"))
    })?;
    let stderr = child.stderr.take();
    let stderr_task = stderr.map(|stderr| {
        let task_id = env.task_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_id, "script stderr: {}", line);
            }
        })
    });

    let mut lines = BufReader::new(stdout).lines();
    let mut result_value: Option<Value> = None;
    let mut script_error: Option<RunError> = None;
    let mut context_patch = Map::new();
    let mut mem_interval = tokio::time::interval(MEM_SAMPLE_INTERVAL);

    // Read the control pipe until EOF (the child exiting closes it), or
    // until a deadline / revocation / OOM breach forces a kill.
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    None => break,
                    Some(line) => match parse_line(&line) {
                        PipeLine::Record(ControlRecord::Result { value }) => {
                            result_value = Some(value);
                        }
                        PipeLine::Record(ControlRecord::Context { patch }) => {
                            context_patch.extend(patch);
                        }
                        PipeLine::Record(ControlRecord::Error { kind, message, trace }) => {
                            script_error = Some(RunError::Script {
                                exc_type: kind,
                                message,
                                trace,
                            });
                        }
                        PipeLine::Record(record) => on_record(record),
                        PipeLine::Malformed { op, raw } if op == "error" => {
                            // A failure the child couldn't structure still
                            // has to fail the task.
                            script_error = Some(RunError::Opaque {
                                summary: raw.to_string(),
                            });
                        }
                        PipeLine::Malformed { op, raw } => {
                            warn!(task = %env.task_id, op = %op, "dropping malformed control record");
                            debug!(task = %env.task_id, raw = %raw, "malformed record content");
                        }
                        PipeLine::Log(line) => {
                            info!(task = %env.task_id, "script: {}", line);
                        }
                    },
                }
            }
            _ = maybe_deadline(deadline) => {
                let seconds = time_limit.unwrap_or(0);
                error!(task = %env.task_id, seconds, "deadline hit, killing child");
                kill_child(&mut child, cfg.isolate).await;
                return Err(RunError::Timeout { seconds });
            }
            _ = cancel.cancelled_wait() => {
                info!(task = %env.task_id, "revocation requested, killing child");
                kill_child(&mut child, cfg.isolate).await;
                return Err(RunError::Revoked);
            }
            _ = mem_interval.tick(), if cfg.max_memory_mb.is_some() => {
                if let (Some(limit_mb), Some(pid)) = (cfg.max_memory_mb, pid) {
                    if let Some(rss_mb) = memwatch::rss_mb(pid) {
                        if rss_mb > limit_mb {
                            error!(task = %env.task_id, rss_mb, limit_mb, "rss ceiling crossed, killing child");
                            kill_child(&mut child, cfg.isolate).await;
                            return Err(RunError::OutOfMemory { rss_mb, limit_mb });
                        }
                    }
                }
            }
        }
    }

    // EOF on the pipe does not prove the child exited: a script can close
    // stdout and keep running, so the reap itself stays under the deadline.
    let status = match deadline {
        Some(at) => match tokio::time::timeout_at(at, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let seconds = time_limit.unwrap_or(0);
                error!(task = %env.task_id, seconds, "deadline hit while reaping, killing child");
                kill_child(&mut child, cfg.isolate).await;
                return Err(RunError::Timeout { seconds });
            }
        },
        None => child.wait().await?,
    };
    if let Some(stderr_task) = stderr_task {
        let _ = stderr_task.await;
    }

    // An error record wins over the exit status: the child may have
    // reported a structured failure and still exited zero.
    if let Some(err) = script_error {
        return Err(err);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(RunError::Signal(signal));
        }
    }

    match status.code() {
        Some(0) => Ok(RunOutcome {
            value: result_value,
            context_patch,
        }),
        Some(code) => {
            // A final result that made it out before a bad exit still
            // counts, matching the pipe's final-record convention.
            if let Some(value) = result_value {
                warn!(task = %env.task_id, code, "child exited non-zero after posting a result");
                Ok(RunOutcome {
                    value: Some(value),
                    context_patch,
                })
            } else {
                Err(RunError::Exit(code))
            }
        }
        None => Err(RunError::Signal(0)),
    }
}

fn effective_time_limit(requested: Option<u64>) -> Option<u64> {
    match requested {
        Some(secs) if secs > MAX_TIME_LIMIT_SECS => {
            warn!(
                requested = secs,
                "requested time limit is too large, running unbounded"
            );
            None
        }
        other => other,
    }
}

async fn maybe_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Hard-kill the child. With isolation the whole process group goes so a
/// forking script can't leave orphans holding the kernel license.
async fn kill_child(child: &mut Child, isolate: bool) {
    #[cfg(unix)]
    if isolate {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!(pid, error = %e, "killpg failed, falling back to kill");
            }
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
