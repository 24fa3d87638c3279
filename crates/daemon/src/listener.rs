// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! Accepts connections on the daemon socket and serves one request per
//! connection without blocking the worker pool. File downloads stream as
//! chunk frames after their header response.

use crate::auth;
use crate::env::Config;
use crate::protocol::{ApiError, JobDetails, JobState, Request, Response};
use crate::submit::{self, SubmitParams};
use crate::wire::{self, ProtocolError, DEFAULT_TIMEOUT, PROTOCOL_VERSION};
use lathe_core::{IdGen, JobStatus, QueueName, ResultMeta, TaskId, UuidIdGen};
use lathe_engine::{ArchiveFormat, Broker, Envelope, RevocationRegistry, TaskKind};
use lathe_runner::CancelFlag;
use lathe_script::Script;
use lathe_storage::state_marker::DEFAULT_MARKER_TTL;
use lathe_storage::{DiskStateMarker, ResultBackend, ShareError, SharedStore};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

/// Shared daemon context for all request handlers.
pub struct DaemonCtx {
    pub config: Config,
    pub store: SharedStore,
    pub backend: Arc<dyn ResultBackend>,
    pub broker: Arc<Broker>,
    pub revocations: Arc<RevocationRegistry>,
    pub shutdown: Arc<CancelFlag>,
}

/// Listener task for accepting socket connections.
pub struct Listener {
    socket: UnixListener,
    ctx: Arc<DaemonCtx>,
}

#[derive(Debug, Error)]
pub(crate) enum ConnectionError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl Listener {
    pub fn new(socket: UnixListener, ctx: Arc<DaemonCtx>) -> Self {
        Self { socket, ctx }
    }

    /// Run the accept loop until shutdown, spawning a task per
    /// connection.
    pub async fn run(self) {
        loop {
            tokio::select! {
                accepted = self.socket.accept() => match accepted {
                    Ok((stream, _)) => {
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &ctx).await {
                                match e {
                                    ConnectionError::Protocol(ProtocolError::ConnectionClosed) => {
                                        debug!("client disconnected")
                                    }
                                    ConnectionError::Protocol(ProtocolError::Timeout) => {
                                        warn!("connection timeout")
                                    }
                                    _ => error!("connection error: {}", e),
                                }
                            }
                        });
                    }
                    Err(e) => error!("accept error: {}", e),
                },
                _ = self.ctx.shutdown.cancelled_wait() => break,
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, ctx: &DaemonCtx) -> Result<(), ConnectionError> {
    let (mut reader, mut writer) = stream.into_split();
    let request = wire::read_request(&mut reader, DEFAULT_TIMEOUT).await?;

    if matches!(request, Request::ListJobs { .. } | Request::JobStatus { .. }) {
        debug!(request = ?request, "received query");
    } else {
        info!(request = ?request, "received request");
    }

    match request {
        Request::SubmitJob {
            api_key,
            process,
            file_name,
            script_name,
            params,
            name,
            config,
        } => {
            let response = if !auth::verify(ctx.config.api_key_sha256.as_deref(), &api_key) {
                Response::error(ApiError::unauthorized())
            } else {
                submit::handle_submit(
                    ctx,
                    &mut reader,
                    SubmitParams {
                        process,
                        file_name,
                        script_name,
                        params,
                        name,
                        config,
                    },
                )
                .await
            };
            wire::write_response(&mut writer, &response, DEFAULT_TIMEOUT).await?;
        }

        Request::FetchOutput { api_key, uuid, path } => {
            if !authed(ctx, &api_key, &mut writer).await? {
                return Ok(());
            }
            match resolve_output(ctx, &uuid, &path) {
                Ok(file) => stream_file(&mut writer, &file).await?,
                Err(error) => {
                    wire::write_response(&mut writer, &Response::error(error), DEFAULT_TIMEOUT)
                        .await?
                }
            }
        }

        Request::FetchArchive { api_key, uuid } => {
            if !authed(ctx, &api_key, &mut writer).await? {
                return Ok(());
            }
            match resolve_archive(ctx, &uuid) {
                Ok(file) => stream_file(&mut writer, &file).await?,
                Err(error) => {
                    wire::write_response(&mut writer, &Response::error(error), DEFAULT_TIMEOUT)
                        .await?
                }
            }
        }

        other => {
            let response = handle_request(other, ctx);
            wire::write_response(&mut writer, &response, DEFAULT_TIMEOUT).await?;
        }
    }
    Ok(())
}

async fn authed<W: tokio::io::AsyncWriteExt + Unpin>(
    ctx: &DaemonCtx,
    api_key: &str,
    writer: &mut W,
) -> Result<bool, ConnectionError> {
    if auth::verify(ctx.config.api_key_sha256.as_deref(), api_key) {
        return Ok(true);
    }
    wire::write_response(
        writer,
        &Response::error(ApiError::unauthorized()),
        DEFAULT_TIMEOUT,
    )
    .await?;
    Ok(false)
}

async fn stream_file<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    path: &std::path::Path,
) -> Result<(), ConnectionError> {
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    wire::write_response(
        writer,
        &Response::FileHeader { name, size },
        DEFAULT_TIMEOUT,
    )
    .await?;
    wire::write_file_stream(writer, path).await?;
    Ok(())
}

/// Handle the simple request/response operations.
fn handle_request(request: Request, ctx: &DaemonCtx) -> Response {
    // Ping is the only unauthenticated operation.
    if let Request::Ping = request {
        return Response::Pong {
            banner: format!("lathe scheduler {}", PROTOCOL_VERSION),
        };
    }

    let Some(api_key) = request_api_key(&request) else {
        return Response::error(ApiError::bad_request("unsupported request"));
    };
    if !auth::verify(ctx.config.api_key_sha256.as_deref(), api_key) {
        return Response::error(ApiError::unauthorized());
    }

    match request {
        Request::ListProcesses { .. } => Response::Processes {
            processes: submit::list_processes(&ctx.config.process_path),
        },

        Request::ProcessDoc { name, .. } => {
            let path = ctx.config.process_path.join(format!("{}.hcl", name));
            match Script::load(&path) {
                Ok(script) => match script.entrypoint("main") {
                    Some(entry) => Response::Doc {
                        doc: entry.doc.clone().unwrap_or_default(),
                    },
                    None => Response::error(ApiError::not_found(format!(
                        "process '{}' has no main entrypoint",
                        name
                    ))),
                },
                Err(_) => Response::error(ApiError::not_found(format!("process '{}'", name))),
            }
        }

        Request::ListJobs { .. } => match list_jobs(ctx) {
            Ok(jobs) => Response::Jobs { jobs },
            Err(e) => Response::error(ApiError::internal(e)),
        },

        Request::JobStatus { uuid, .. } => match fetch_meta(ctx, &uuid) {
            Ok(Some(meta)) => Response::Job {
                job: JobState::from_meta(&meta),
            },
            Ok(None) => Response::Job {
                job: JobState::unknown(uuid),
            },
            Err(error) => Response::error(error),
        },

        Request::JobDetails { uuid, .. } => match fetch_meta(ctx, &uuid) {
            Ok(Some(meta)) => Response::Details {
                details: JobDetails::from_meta(&meta),
            },
            Ok(None) => Response::error(ApiError::not_found(format!("job '{}'", uuid))),
            Err(error) => Response::error(error),
        },

        Request::ListOutputs { uuid, .. } => match ctx.store.list_outputs(&uuid) {
            Ok(outputs) => Response::Outputs { outputs },
            Err(e @ ShareError::InvalidJobId(_)) | Err(e @ ShareError::InvalidPath(_)) => {
                Response::error(ApiError::bad_request(e.to_string()))
            }
            Err(e @ ShareError::NotFound(_)) => Response::error(ApiError::not_found(e.to_string())),
            Err(e) => Response::error(ApiError::internal(e.to_string())),
        },

        Request::TaskMeta { uuid, .. } => match fetch_meta(ctx, &uuid) {
            Ok(Some(meta)) => Response::Meta { meta },
            Ok(None) => Response::error(ApiError::not_found(format!("job '{}'", uuid))),
            Err(error) => Response::error(error),
        },

        Request::Revoke { uuid, .. } => match fetch_meta(ctx, &uuid) {
            Ok(Some(meta)) => {
                let terminating = ctx.revocations.revoke(&meta.task_id);
                if !terminating && !meta.status.is_terminal() {
                    let _ = ctx.backend.update_state(
                        &meta.task_id,
                        JobStatus::Revoked,
                        ResultMeta::default(),
                    );
                }
                Response::Revoked { terminating }
            }
            Ok(None) => Response::error(ApiError::not_found(format!("job '{}'", uuid))),
            Err(error) => Response::error(error),
        },

        Request::RecoverCrashed { .. } => {
            match lathe_engine::recover_crashed(&ctx.config.beacon_dir, ctx.backend.as_ref()) {
                Ok(tasks) => Response::Recovered {
                    tasks: tasks.iter().map(|t| t.to_string()).collect(),
                },
                Err(e) => Response::error(ApiError::internal(e.to_string())),
            }
        }

        Request::Shutdown { .. } => {
            info!("shutdown requested over the socket");
            ctx.broker.close();
            ctx.shutdown.cancel();
            Response::ShuttingDown
        }

        // handled in handle_connection
        Request::Ping
        | Request::SubmitJob { .. }
        | Request::FetchOutput { .. }
        | Request::FetchArchive { .. } => Response::Ok,
    }
}

fn request_api_key(request: &Request) -> Option<&str> {
    match request {
        Request::Ping => None,
        Request::ListProcesses { api_key }
        | Request::ProcessDoc { api_key, .. }
        | Request::SubmitJob { api_key, .. }
        | Request::ListJobs { api_key }
        | Request::JobStatus { api_key, .. }
        | Request::JobDetails { api_key, .. }
        | Request::ListOutputs { api_key, .. }
        | Request::FetchOutput { api_key, .. }
        | Request::FetchArchive { api_key, .. }
        | Request::TaskMeta { api_key, .. }
        | Request::Revoke { api_key, .. }
        | Request::RecoverCrashed { api_key }
        | Request::Shutdown { api_key } => Some(api_key),
    }
}

fn fetch_meta(ctx: &DaemonCtx, uuid: &str) -> Result<Option<lathe_core::TaskMeta>, ApiError> {
    if !lathe_core::is_valid_job_id(uuid) {
        return Err(ApiError::bad_request(format!("invalid job id '{}'", uuid)));
    }
    ctx.backend
        .get(&TaskId::new(uuid))
        .map_err(|e| ApiError::internal(e.to_string()))
}

fn list_jobs(ctx: &DaemonCtx) -> Result<Vec<JobState>, String> {
    let ids = ctx.backend.list_ids().map_err(|e| e.to_string())?;
    let mut jobs = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(meta) = ctx.backend.get(&id).map_err(|e| e.to_string())? {
            jobs.push(JobState::from_meta(&meta));
        }
    }
    Ok(jobs)
}

fn resolve_output(ctx: &DaemonCtx, uuid: &str, path: &str) -> Result<PathBuf, ApiError> {
    match ctx.store.output_path(uuid, path, true) {
        Ok(file) => Ok(file),
        Err(e @ ShareError::InvalidJobId(_)) | Err(e @ ShareError::InvalidPath(_)) => {
            Err(ApiError::bad_request(e.to_string()))
        }
        Err(e @ ShareError::NotFound(_)) => Err(ApiError::not_found(e.to_string())),
        Err(e) => Err(ApiError::internal(e.to_string())),
    }
}

/// Archive retrieval: stream when built; otherwise gate on job
/// completion and the packaging marker, enqueueing the build once.
fn resolve_archive(ctx: &DaemonCtx, uuid: &str) -> Result<PathBuf, ApiError> {
    let format = ArchiveFormat::Zip;

    if !lathe_core::is_valid_job_id(uuid) {
        return Err(ApiError::bad_request(format!("invalid job id '{}'", uuid)));
    }
    let exists = ctx
        .store
        .job_exists(uuid)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !exists {
        return Err(ApiError::not_found(format!("job '{}' does not exist", uuid)));
    }

    let archive = ctx
        .store
        .archive_path(uuid, format.ext())
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if archive.is_file() {
        return Ok(archive);
    }

    let status = fetch_meta(ctx, uuid)?
        .map(|meta| meta.status)
        .unwrap_or(JobStatus::Unknown);
    if !matches!(status, JobStatus::Success | JobStatus::Failure) {
        return Err(ApiError::too_early(format!(
            "job '{}' is not finished yet",
            uuid
        )));
    }

    let marker = DiskStateMarker::new(&ctx.store, uuid, format.ext(), DEFAULT_MARKER_TTL)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if marker.is_registered() {
        return Err(ApiError::too_early(format!(
            "archive task for job '{}' is already running",
            uuid
        )));
    }

    let task_id = TaskId::new(UuidIdGen.next());
    ctx.broker
        .enqueue(Envelope::new(
            task_id.clone(),
            TaskKind::Package {
                job_id: uuid.to_string(),
                format,
            },
            QueueName::Archive,
        ))
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?;
    info!(job = uuid, task = %task_id, "packaging task enqueued");
    Err(ApiError::too_early(format!(
        "archive task '{}' created for job '{}' outputs",
        task_id, uuid
    )))
}

#[cfg(test)]
#[path = "listener_tests.rs"]
pub(crate) mod tests;
