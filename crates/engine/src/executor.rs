// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task executor: the per-dispatch lifecycle.
//!
//! One executor is shared by all workers of a daemon. For a compute task
//! it acquires the kernel session, opens the progress tracker, stages
//! input, materializes the program context, runs the entrypoint under
//! the fault-isolated runner, and applies the retry policy; management
//! tasks (packaging, cleanup, chord unlock) run inline.

use crate::broker::{Broker, Envelope, TaskKind};
use crate::canvas::{dispatch_workflow, PlannedLink, WorkflowHandle, WorkflowSpec};
use crate::error::EngineError;
use crate::input::stage_input;
use crate::package::{build_archive, ArchiveFormat};
use crate::progress::ProgressTracker;
use crate::revoke::RevocationRegistry;
use crate::session::KernelSession;
use chrono::TimeDelta;
use lathe_core::{
    AckMode, Clock, ExecutionFault, FailureMeta, IdGen, JobStatus, ProgramContext, QueueName,
    ResultMeta, SystemClock, TaskId, TimeInfo, UuidIdGen,
};
use lathe_runner::{run_entrypoint, ControlRecord, RunEnv, RunError, RunnerConfig};
use lathe_script::Script;
use lathe_storage::{MarkerError, DiskStateMarker, ResultBackend, SharedStore};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Tuning knobs of one executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wall-clock limit for compute tasks without an explicit one.
    pub default_time_limit: u64,
    /// Extended limit applied to the "bigger box" retry.
    pub retry_time_limit: u64,
    pub cleanup_enabled: bool,
    pub cleanup_delay: Duration,
    /// RSS ceiling handed to the runner; `None` disables the watchdog.
    pub max_memory_mb: Option<u64>,
    /// Run children in their own process group (POSIX main process).
    pub isolate: bool,
    /// TTL of packaging state markers.
    pub marker_ttl: Duration,
    /// How long a chord unlock polls before giving up on its group.
    pub chord_join_timeout: Duration,
    /// Base poll cadence of waiting orchestrations and chord unlocks.
    pub wait_poll: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_time_limit: 2400,
            retry_time_limit: 3600,
            cleanup_enabled: false,
            cleanup_delay: Duration::from_secs(3600),
            max_memory_mb: None,
            isolate: cfg!(unix),
            marker_ttl: Duration::from_secs(3600),
            chord_join_timeout: Duration::from_secs(8 * 3600),
            wait_poll: Duration::from_millis(100),
        }
    }
}

/// Poll backoff ceiling for waiting orchestrations.
const WAIT_POLL_CAP: Duration = Duration::from_millis(500);

pub struct Executor<C: Clock = SystemClock> {
    store: SharedStore,
    backend: Arc<dyn ResultBackend>,
    broker: Arc<Broker>,
    session: Arc<KernelSession>,
    revocations: Arc<RevocationRegistry>,
    config: ExecutorConfig,
    clock: C,
}

impl<C: Clock> Executor<C> {
    pub fn new(
        store: SharedStore,
        backend: Arc<dyn ResultBackend>,
        broker: Arc<Broker>,
        session: Arc<KernelSession>,
        revocations: Arc<RevocationRegistry>,
        config: ExecutorConfig,
        clock: C,
    ) -> Self {
        Self {
            store,
            backend,
            broker,
            session,
            revocations,
            config,
            clock,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn ResultBackend> {
        &self.backend
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn revocations(&self) -> &Arc<RevocationRegistry> {
        &self.revocations
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run one envelope to completion, with tracing and ack handling.
    pub async fn run(&self, envelope: Envelope) {
        let kind = envelope.kind.name();
        let span = tracing::info_span!("task", task = %envelope.id, kind, queue = %envelope.queue);
        let _guard = span.enter();
        info!("executing");

        let start = Instant::now();
        let ack_mode = envelope.kind.ack_mode();
        let result = self.dispatch(&envelope).await;
        let elapsed = start.elapsed();

        match result {
            Ok(()) => info!(elapsed_ms = elapsed.as_millis() as u64, "completed"),
            Err(e) => {
                error!(elapsed_ms = elapsed.as_millis() as u64, error = %e, "failed");
                match ack_mode {
                    // Late-ack management tasks are redelivered with a
                    // countdown until the ceiling.
                    AckMode::Late => {
                        self.broker.nack(envelope);
                    }
                    // Compute tasks handled their own retry policy; an
                    // error escaping here is infrastructure trouble.
                    AckMode::Early => {
                        let _ = self.backend.update_state(
                            &envelope.id,
                            JobStatus::Failure,
                            ResultMeta::from_failure(FailureMeta {
                                exc_type: "InternalError".to_string(),
                                exc_module: None,
                                exc_message: e.to_string(),
                                exc_traceback: Vec::new(),
                            }),
                        );
                    }
                }
            }
        }
    }

    async fn dispatch(&self, envelope: &Envelope) -> Result<(), EngineError> {
        match &envelope.kind {
            TaskKind::Execute { params, pc, chain } => {
                self.run_execute(
                    envelope.id.clone(),
                    params.clone(),
                    pc.clone(),
                    chain.clone(),
                    envelope.retries,
                    envelope.queue,
                    envelope.time_limit,
                )
                .await
            }
            TaskKind::Package { job_id, format } => self.run_package(job_id, *format),
            TaskKind::Cleanup { path, is_dir } => self.run_cleanup(path, *is_dir),
            TaskKind::ChordUnlock {
                group,
                body_id,
                body,
                pc,
            } => {
                self.run_chord_unlock(group, body_id.clone(), body.clone(), pc.clone())
                    .await
            }
        }
    }

    /// Schedule deferred removal of a path on the maintenance queue.
    pub fn schedule_cleanup(&self, path: PathBuf, is_dir: bool) -> Result<(), EngineError> {
        if !self.config.cleanup_enabled {
            return Ok(());
        }
        let eta = self.clock.utc_now()
            + TimeDelta::from_std(self.config.cleanup_delay).unwrap_or(TimeDelta::zero());
        info!(path = %path.display(), eta = %eta, "scheduling cleanup");
        let mut envelope = Envelope::new(
            TaskId::new(UuidIdGen.next()),
            TaskKind::Cleanup { path, is_dir },
            QueueName::Maintenance,
        );
        envelope.eta = Some(eta);
        self.broker.enqueue(envelope)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_execute(
        &self,
        id: TaskId,
        params: Value,
        mut pc: ProgramContext,
        chain: Vec<PlannedLink>,
        retries: u32,
        queue: QueueName,
        envelope_time_limit: Option<u64>,
    ) -> Result<(), EngineError> {
        self.backend
            .update_state(&id, JobStatus::Received, ResultMeta::default())?;
        self.backend
            .update_state(&id, JobStatus::Started, ResultMeta::default())?;

        let mut tracker = ProgressTracker::new(
            Arc::clone(&self.backend),
            id.clone(),
            Some(pc.time_request),
            pc.shadow.clone(),
            self.clock.clone(),
        );

        // Kernel session scoped to this task; reset-or-release on exit.
        let _session = match self.session.acquire_for_task() {
            Ok(scope) => Some(scope),
            Err(e) => {
                self.fail(
                    &id,
                    &ExecutionFault::Opaque {
                        summary: e.to_string(),
                    },
                )?;
                return Ok(());
            }
        };

        tracker.start()?;

        // Entrypoint validation before anything expensive.
        let entry = match Script::load(&pc.script)
            .and_then(|script| script.require_entrypoint(&pc.entrypoint).map(Clone::clone))
        {
            Ok(entry) => entry,
            Err(e) => {
                self.fail(
                    &id,
                    &ExecutionFault::Script {
                        exc_type: "ScriptError".to_string(),
                        message: e.to_string(),
                        trace: Vec::new(),
                    },
                )?;
                return Ok(());
            }
        };
        let directive = entry.directive();

        // Stage the input (archive extraction + root-file resolution).
        let staged = match stage_input(pc.data.as_deref(), pc.root_file.as_deref(), &mut tracker) {
            Ok(staged) => staged,
            Err(e) => {
                self.fail(&id, &engine_fault(&e))?;
                return Ok(());
            }
        };

        // Output directory on shared storage, with its eventual cleanup.
        let output_dir = if pc.compute_only {
            None
        } else {
            let dir = self.store.output_dir(id.as_str())?;
            self.schedule_cleanup(self.store.job_dir(id.as_str())?, true)?;
            Some(dir)
        };

        // Materialize the context the script will see.
        pc.input_dir = staged.dir().map(Path::to_path_buf);
        pc.input_file = staged.file.clone();
        pc.output_dir = output_dir.clone();
        pc.queue = Some(queue);
        pc.retry = retries;
        pc.params = params.clone();

        if retries > 0 {
            tracker.retry(retries)?;
        }

        let scratch = if pc.tmp { Some(tempfile::TempDir::new()?) } else { None };
        let workdir = scratch
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .or_else(|| output_dir.clone())
            .unwrap_or_else(std::env::temp_dir);
        let context_file = workdir.join("context.json");
        std::fs::write(&context_file, serde_json::to_vec(&pc)?)?;

        let run_env = RunEnv {
            task_id: id.to_string(),
            queue: queue.to_string(),
            retry: retries,
            params: params.clone(),
            context_file,
            input_file: pc.input_file.clone(),
            input_dir: pc.input_dir.clone(),
            output_dir: pc.output_dir.clone(),
            workdir,
        };
        let time_limit = envelope_time_limit
            .or(pc.time_limit)
            .unwrap_or(self.config.default_time_limit);
        let run_cfg = RunnerConfig {
            time_limit: Some(time_limit),
            max_memory_mb: self.config.max_memory_mb,
            isolate: self.config.isolate,
        };

        info!(
            entrypoint = %pc.entrypoint,
            script = %pc.script.display(),
            time_limit,
            "starting entrypoint"
        );

        let cancel = self.revocations.register(&id);
        let outcome = {
            let mut on_record = |record: ControlRecord| {
                let applied = match record {
                    ControlRecord::SetTotal { n } => {
                        tracker.set_total(n);
                        Ok(())
                    }
                    ControlRecord::Next { info, data } => tracker.next(&info, data),
                    ControlRecord::Store { patch } => tracker.store(patch),
                    // folded into the outcome by the runner
                    _ => Ok(()),
                };
                if let Err(e) = applied {
                    warn!(task = %id, error = %e, "progress write failed");
                }
            };
            run_entrypoint(&entry.run, &run_env, &run_cfg, cancel, &mut on_record).await
        };
        self.revocations.complete(&id);

        match outcome {
            Ok(outcome) => {
                apply_context_patch(&mut pc, outcome.context_patch);
                let value = outcome.value.unwrap_or(Value::Null);

                match WorkflowSpec::from_return(&value) {
                    Some(Ok(spec)) => {
                        let handle = dispatch_workflow(
                            &self.broker,
                            &self.backend,
                            &pc,
                            spec,
                            self.clock.utc_now(),
                        )?;
                        if directive.wait {
                            match self
                                .wait_workflow(&handle, &mut tracker, directive.timeout)
                                .await
                            {
                                Ok(aggregate) => {
                                    self.succeed(&id, &pc, aggregate, &mut tracker, &chain)?
                                }
                                Err(fault) => self.fail(&id, &fault)?,
                            }
                        } else {
                            // Fire-and-forget launch: the parent's result
                            // is the handle on its descendants.
                            let ids: Vec<String> =
                                handle.ids.iter().map(|i| i.to_string()).collect();
                            self.succeed(
                                &id,
                                &pc,
                                serde_json::json!({ "workflow_ids": ids }),
                                &mut tracker,
                                &chain,
                            )?
                        }
                    }
                    Some(Err(e)) => self.fail(
                        &id,
                        &ExecutionFault::Script {
                            exc_type: "WorkflowError".to_string(),
                            message: format!("invalid workflow spec: {}", e),
                            trace: Vec::new(),
                        },
                    )?,
                    None => self.succeed(&id, &pc, value, &mut tracker, &chain)?,
                }
            }
            Err(RunError::Revoked) => {
                info!(task = %id, "task revoked");
                self.backend.update_state(
                    &id,
                    JobStatus::Revoked,
                    ResultMeta {
                        time_info: Some(stopped_now(&self.clock)),
                        ..ResultMeta::default()
                    },
                )?;
            }
            Err(run_error) => {
                let fault = run_error.to_fault().unwrap_or(ExecutionFault::Opaque {
                    summary: "unclassified runner failure".to_string(),
                });
                if fault.is_retriable() && retries == 0 {
                    self.request_retry(&id, &fault, &pc, params, chain, queue, &mut tracker)?;
                } else {
                    self.fail(&id, &fault)?;
                }
            }
        }
        Ok(())
    }

    /// One automatic retry for a retriable fault: re-enqueue the same
    /// task id, rerouting `cpu`/`gpu` to `gpuhigh` with the extended
    /// limit.
    #[allow(clippy::too_many_arguments)]
    fn request_retry(
        &self,
        id: &TaskId,
        fault: &ExecutionFault,
        pc: &ProgramContext,
        params: Value,
        chain: Vec<PlannedLink>,
        queue: QueueName,
        tracker: &mut ProgressTracker<C>,
    ) -> Result<(), EngineError> {
        let retry_queue = queue.retry_route();
        let time_limit = if retry_queue != queue {
            self.config.retry_time_limit
        } else {
            self.config.default_time_limit
        };
        warn!(
            task = %id,
            fault = %fault,
            retry_queue = %retry_queue,
            time_limit,
            "retriable fault, requesting retry"
        );

        // Keep the failure string visible while the retry waits.
        tracker.output(Value::String(fault.to_string()))?;
        self.backend.update_state(
            id,
            JobStatus::Retry,
            ResultMeta {
                retry: Some(1),
                ..ResultMeta::default()
            },
        )?;

        let mut retry_pc = pc.clone_for_dispatch(self.clock.utc_now());
        retry_pc.task_id = id.clone();
        retry_pc.retry = 1;
        self.broker.enqueue(Envelope {
            id: id.clone(),
            kind: TaskKind::Execute {
                params,
                pc: retry_pc,
                chain,
            },
            queue: retry_queue,
            eta: None,
            retries: 1,
            time_limit: Some(time_limit),
        })?;
        Ok(())
    }

    /// Success path: stop the tracker, store the result, go SUCCESS, and
    /// dispatch the next chain link with this task's downstream value.
    fn succeed(
        &self,
        id: &TaskId,
        pc: &ProgramContext,
        value: Value,
        tracker: &mut ProgressTracker<C>,
        chain: &[PlannedLink],
    ) -> Result<(), EngineError> {
        tracker.stop(Map::new())?;

        let downstream = if pc.raw {
            self.backend
                .update_state(id, JobStatus::Success, ResultMeta::from_result(value.clone()))?;
            value
        } else {
            // The annotated envelope: progress, steps, timing, and the
            // stored result together.
            tracker.output(value)?;
            self.backend
                .update_state(id, JobStatus::Success, ResultMeta::default())?;
            let meta = self
                .backend
                .get(id)?
                .ok_or_else(|| EngineError::Internal(format!("meta vanished for {}", id)))?;
            serde_json::to_value(&meta.result)?
        };

        if let Some((next, rest)) = chain.split_first() {
            let pc_next = next
                .signature
                .materialize(pc, next.id.clone(), self.clock.utc_now());
            let next_queue = pc_next.routed_queue();
            let time_limit = pc_next.time_limit;
            debug!(task = %id, next = %next.id, queue = %next_queue, "dispatching next chain link");
            self.broker.enqueue(Envelope {
                id: next.id.clone(),
                kind: TaskKind::Execute {
                    // The previous link's return is the next link's input.
                    params: downstream,
                    pc: pc_next,
                    chain: rest.to_vec(),
                },
                queue: next_queue,
                eta: None,
                retries: 0,
                time_limit,
            })?;
        }
        Ok(())
    }

    fn fail(&self, id: &TaskId, fault: &ExecutionFault) -> Result<(), EngineError> {
        error!(task = %id, fault = %fault, "task failed");
        let mut patch = ResultMeta::from_failure(FailureMeta::from_fault(fault));
        patch.time_info = Some(stopped_now(&self.clock));
        self.backend.update_state(id, JobStatus::Failure, patch)?;
        Ok(())
    }

    /// Poll a workflow's descendants until all are terminal, recording a
    /// progress step per child, then aggregate. Bails on the first child
    /// failure — descendants of a failed link never run.
    async fn wait_workflow(
        &self,
        handle: &WorkflowHandle,
        tracker: &mut ProgressTracker<C>,
        timeout: Option<u64>,
    ) -> Result<Value, ExecutionFault> {
        tracker.set_total(handle.ids.len() as u64);
        let deadline = timeout.map(|secs| Instant::now() + Duration::from_secs(secs));
        let mut seen: HashSet<TaskId> = HashSet::new();
        let mut poll = self.config.wait_poll;

        loop {
            let mut all_terminal = true;
            let mut failure: Option<(TaskId, JobStatus, Option<FailureMeta>)> = None;

            for child in &handle.ids {
                let meta = self.backend.get(child).ok().flatten();
                let status = meta
                    .as_ref()
                    .map(|m| m.status)
                    .unwrap_or(JobStatus::Pending);

                if !seen.contains(child) && (status.is_active() || status.is_terminal()) {
                    let _ = tracker.next(
                        child.as_str(),
                        Some(serde_json::json!({
                            "id": child.as_str(),
                            "state": status.to_string(),
                        })),
                    );
                    seen.insert(child.clone());
                }

                if !status.is_terminal() {
                    all_terminal = false;
                } else if status != JobStatus::Success && failure.is_none() {
                    failure = Some((
                        child.clone(),
                        status,
                        meta.and_then(|m| m.result.failure()),
                    ));
                }
            }

            if let Some((child, status, failure_meta)) = failure {
                warn!(child = %child, status = %status, "descendant did not succeed");
                return Err(match failure_meta {
                    Some(f) => ExecutionFault::Script {
                        exc_type: f.exc_type,
                        message: f.exc_message,
                        trace: f.exc_traceback,
                    },
                    None => ExecutionFault::Script {
                        exc_type: "ChildFailure".to_string(),
                        message: format!("descendant {} finished {}", child, status),
                        trace: Vec::new(),
                    },
                });
            }

            if all_terminal {
                return handle
                    .aggregate(self.backend.as_ref())
                    .map_err(|e| ExecutionFault::Opaque {
                        summary: format!("aggregation failed: {}", e),
                    });
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(ExecutionFault::Timeout {
                        seconds: timeout.unwrap_or(0),
                    });
                }
            }

            tokio::time::sleep(poll).await;
            poll = (poll * 2).min(WAIT_POLL_CAP);
        }
    }

    /// Packaging task: build one archive of a job's outputs, guarded by
    /// the disk state marker so concurrent requests collapse to one
    /// build.
    fn run_package(&self, job_id: &str, format: ArchiveFormat) -> Result<(), EngineError> {
        let marker = DiskStateMarker::new(&self.store, job_id, format.ext(), self.config.marker_ttl)?;
        let guard = match marker.register() {
            Ok(guard) => guard,
            Err(MarkerError::AlreadyExists { .. }) => {
                warn!(job = job_id, format = %format, "packaging already in progress, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let outputs = self.store.job_dir(job_id)?.join("outputs");
        if !outputs.is_dir() {
            return Err(EngineError::FileNotFound(format!(
                "output directory for job {}",
                job_id
            )));
        }

        // One archive per job: stale builds of any format go first.
        for existing in ArchiveFormat::ALL {
            let path = self.store.archive_path(job_id, existing.ext())?;
            if path.is_file() {
                info!(archive = %path.display(), "removing stale archive");
                std::fs::remove_file(&path)?;
            }
        }

        // Build outside the outputs tree, then copy into place — the
        // share may be a different filesystem, so no rename.
        let destination = self.store.archive_path(job_id, format.ext())?;
        let tmp = tempfile::NamedTempFile::new()?;
        info!(job = job_id, format = %format, "packaging outputs");
        build_archive(&outputs, format, tmp.path())?;
        std::fs::copy(tmp.path(), &destination)?;
        info!(archive = %destination.display(), "packaging done");
        drop(guard);
        Ok(())
    }

    /// Cleanup task: delete a file or a whole job directory, with the
    /// second-line containment check before anything recursive.
    fn run_cleanup(&self, path: &Path, is_dir: bool) -> Result<(), EngineError> {
        if !path.exists() {
            // Already gone is the desired end state.
            warn!(path = %path.display(), "cleanup target already gone");
            return Ok(());
        }
        if !self.store.is_cleanup_safe(path, is_dir) {
            warn!(path = %path.display(), "cleanup sanity check failed, refusing to delete");
            return Ok(());
        }
        info!(path = %path.display(), is_dir, "removing");
        let result = if is_dir {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "cleanup target vanished mid-delete");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Chord unlock: poll the group; release the body once every child
    /// succeeded, or resolve the chord to the first failure.
    async fn run_chord_unlock(
        &self,
        group: &[TaskId],
        body_id: TaskId,
        body: crate::canvas::Signature,
        pc: ProgramContext,
    ) -> Result<(), EngineError> {
        let deadline = Instant::now() + self.config.chord_join_timeout;
        let mut poll = self.config.wait_poll;

        loop {
            let mut all_success = true;
            for child in group {
                let meta = self.backend.get(child)?;
                let status = meta
                    .as_ref()
                    .map(|m| m.status)
                    .unwrap_or(JobStatus::Pending);

                if status.is_terminal() && status != JobStatus::Success {
                    warn!(chord_body = %body_id, child = %child, status = %status, "chord child did not succeed");
                    let failure = meta.and_then(|m| m.result.failure()).unwrap_or(FailureMeta {
                        exc_type: "ChordError".to_string(),
                        exc_module: None,
                        exc_message: format!("chord child {} finished {}", child, status),
                        exc_traceback: Vec::new(),
                    });
                    self.backend.update_state(
                        &body_id,
                        JobStatus::Failure,
                        ResultMeta::from_failure(failure),
                    )?;
                    return Ok(());
                }
                if status != JobStatus::Success {
                    all_success = false;
                }
            }

            if all_success {
                let mut results = Vec::with_capacity(group.len());
                for child in group {
                    results.push(
                        self.backend
                            .get(child)?
                            .and_then(|m| m.result.result)
                            .unwrap_or(Value::Null),
                    );
                }
                let mut body_pc = body.materialize(&pc, body_id.clone(), self.clock.utc_now());
                // The fan-in body defaults to control.
                if body.queue.is_none() {
                    body_pc.queue = Some(QueueName::Control);
                }
                let queue = body_pc.routed_queue();
                let time_limit = body_pc.time_limit;
                debug!(chord_body = %body_id, queue = %queue, "group complete, releasing chord body");
                self.broker.enqueue(Envelope {
                    id: body_id,
                    kind: TaskKind::Execute {
                        params: Value::Array(results),
                        pc: body_pc,
                        chain: Vec::new(),
                    },
                    queue,
                    eta: None,
                    retries: 0,
                    time_limit,
                })?;
                return Ok(());
            }

            if Instant::now() >= deadline {
                error!(chord_body = %body_id, "chord join timed out");
                self.backend.update_state(
                    &body_id,
                    JobStatus::Failure,
                    ResultMeta::from_failure(FailureMeta {
                        exc_type: "Timeout".to_string(),
                        exc_module: None,
                        exc_message: "chord join timed out".to_string(),
                        exc_traceback: Vec::new(),
                    }),
                )?;
                return Ok(());
            }

            tokio::time::sleep(poll).await;
            poll = (poll * 2).min(WAIT_POLL_CAP);
        }
    }
}

fn stopped_now<C: Clock>(clock: &C) -> TimeInfo {
    TimeInfo {
        request: None,
        started: None,
        stopped: Some(clock.utc_now()),
    }
}

fn engine_fault(e: &EngineError) -> ExecutionFault {
    match e {
        EngineError::FileNotFound(message) => ExecutionFault::Script {
            exc_type: "FileNotFound".to_string(),
            message: message.clone(),
            trace: Vec::new(),
        },
        EngineError::SecurityViolation(message) => ExecutionFault::Script {
            exc_type: "SecurityViolation".to_string(),
            message: message.clone(),
            trace: Vec::new(),
        },
        other => ExecutionFault::Opaque {
            summary: other.to_string(),
        },
    }
}

/// Merge a child's context patch back into the parent context.
/// Immutable keys are refused, everything else shallow-merges.
fn apply_context_patch(pc: &mut ProgramContext, patch: Map<String, Value>) {
    if patch.is_empty() {
        return;
    }
    let Ok(mut value) = serde_json::to_value(&*pc) else {
        return;
    };
    if let Some(obj) = value.as_object_mut() {
        for (key, patched) in patch {
            if matches!(key.as_str(), "task_id" | "script" | "data" | "shadow" | "v") {
                warn!(key = %key, "child tried to patch an immutable context key");
                continue;
            }
            obj.insert(key, patched);
        }
    }
    match serde_json::from_value(value) {
        Ok(updated) => *pc = updated,
        Err(e) => warn!(error = %e, "dropping unusable context patch"),
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
