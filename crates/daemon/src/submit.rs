// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job submission: uploads, validation, routing, enqueue.

use crate::listener::DaemonCtx;
use crate::protocol::{ApiError, Response};
use crate::wire;
use lathe_core::{IdGen, JobStatus, ProgramContext, TaskId, TaskMeta, UuidIdGen};
use lathe_engine::{Envelope, TaskKind};
use lathe_script::inspect;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default job timeout applied at submission when nothing else sets one.
const SUBMIT_TIME_LIMIT: u64 = 3600;

pub struct SubmitParams {
    pub process: String,
    pub file_name: Option<String>,
    pub script_name: Option<String>,
    pub params: Option<String>,
    pub name: Option<String>,
    pub config: Option<String>,
}

/// Handle a job submission. The caller has already authenticated; the
/// reader is positioned at the upload streams the request declared.
pub async fn handle_submit<R: tokio::io::AsyncReadExt + Unpin>(
    ctx: &DaemonCtx,
    reader: &mut R,
    submit: SubmitParams,
) -> Response {
    let uuid = UuidIdGen.next();

    // The declared upload streams follow the request unconditionally, so
    // they are consumed before any validation can bail.
    let input_path = match receive_upload(ctx, reader, &uuid, submit.file_name.as_deref()).await {
        Ok(path) => path,
        Err(error) => return Response::error(error),
    };
    let script_upload =
        match receive_upload(ctx, reader, &uuid, submit.script_name.as_deref()).await {
            Ok(path) => path,
            Err(error) => return Response::error(error),
        };

    match build_and_enqueue(ctx, uuid, input_path, script_upload, &submit) {
        Ok(response) => response,
        Err(error) => Response::error(error),
    }
}

fn build_and_enqueue(
    ctx: &DaemonCtx,
    uuid: String,
    input_path: Option<PathBuf>,
    script_upload: Option<PathBuf>,
    submit: &SubmitParams,
) -> Result<Response, ApiError> {
    let params = parse_json_form("params", submit.params.as_deref())?;
    let config = parse_json_form("config", submit.config.as_deref())?;

    // Resolve the script: a built-in process, or the uploaded custom one.
    let script_path = if submit.process == "custom" {
        script_upload.ok_or_else(|| {
            ApiError::bad_request("'custom' process requires a 'script' file")
        })?
    } else {
        let known = list_processes(&ctx.config.process_path);
        if !known.iter().any(|name| name == &submit.process) {
            return Err(ApiError::bad_request(format!(
                "Invalid process '{}'",
                submit.process
            )));
        }
        ctx.config
            .process_path
            .join(format!("{}.hcl", submit.process))
    };

    info!(process = %submit.process, job = %uuid, "creating job");

    let mut pc = ProgramContext::new(TaskId::new(&uuid), &script_path, chrono::Utc::now());
    pc.data = input_path;
    pc.shadow = submit.name.clone();
    pc.time_limit = Some(SUBMIT_TIME_LIMIT);
    pc.params = params.clone();

    let overrides = config
        .as_object()
        .cloned()
        .unwrap_or_else(serde_json::Map::new);
    pc.apply_overrides(&overrides);

    // The entrypoint must exist before anything is enqueued; its
    // directive fills the gaps, and explicit user config wins over it.
    let directive = inspect(&script_path, &pc.entrypoint)
        .map_err(|e| ApiError::bad_request(e.to_string()))?
        .resolved();
    if pc.queue.is_none() {
        pc.queue = directive.queue;
    }
    if let Some(timeout) = directive.timeout {
        pc.time_limit = Some(timeout);
    }
    let dropped = pc.apply_overrides(&overrides);
    if !dropped.is_empty() {
        warn!(job = %uuid, keys = ?dropped, "submission tried to override immutable keys");
    }

    let queue = pc.routed_queue();
    let time_limit = pc.time_limit;

    let mut meta = TaskMeta::sent(TaskId::new(&uuid));
    meta.result.shadow_name = submit.name.clone();
    ctx.backend
        .put(meta)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    ctx.broker
        .enqueue(Envelope {
            id: TaskId::new(&uuid),
            kind: TaskKind::Execute {
                params,
                pc,
                chain: Vec::new(),
            },
            queue,
            eta: None,
            retries: 0,
            time_limit,
        })
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?;

    Ok(Response::JobAccepted {
        uuid,
        name: submit.name.clone(),
        status: JobStatus::Sent,
    })
}

/// Receive one declared upload into the job's inputs. A declared name
/// that fails validation still drains its stream so the connection stays
/// in sync.
async fn receive_upload<R: tokio::io::AsyncReadExt + Unpin>(
    ctx: &DaemonCtx,
    reader: &mut R,
    uuid: &str,
    declared: Option<&str>,
) -> Result<Option<PathBuf>, ApiError> {
    let Some(declared) = declared else {
        return Ok(None);
    };
    let base_name = Path::new(declared)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let dst = if base_name.is_empty() {
        Err(ApiError::bad_request(format!(
            "invalid upload name '{}'",
            declared
        )))
    } else {
        ctx.store
            .input_path(uuid, &base_name)
            .map_err(|e| ApiError::bad_request(e.to_string()))
    };

    match dst {
        Ok(dst) => {
            let received = wire::read_file_stream(reader, &dst)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;
            info!(job = %uuid, file = %base_name, bytes = received, "upload stored");
            set_world_readable(&dst);
            Ok(Some(dst))
        }
        Err(error) => {
            // drain into a scratch file, then discard
            let scratch = std::env::temp_dir().join(format!("lathe-upload-{}", uuid));
            let _ = wire::read_file_stream(reader, &scratch).await;
            let _ = std::fs::remove_file(&scratch);
            Err(error)
        }
    }
}

#[cfg(unix)]
fn set_world_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644));
}

#[cfg(not(unix))]
fn set_world_readable(_path: &Path) {}

fn parse_json_form(field: &str, raw: Option<&str>) -> Result<Value, ApiError> {
    match raw {
        None | Some("") => Ok(Value::Object(serde_json::Map::new())),
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            ApiError::bad_request(format!("Invalid JSON string for '{}': {}", field, e))
        }),
    }
}

/// Script file stems in the process directory.
pub fn list_processes(process_path: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(process_path)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("hcl") {
                        path.file_stem()
                            .and_then(|s| s.to_str())
                            .map(String::from)
                    } else {
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[cfg(test)]
#[path = "submit_tests.rs"]
mod tests;
