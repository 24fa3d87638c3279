// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol for daemon communication.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload; file
//! transfers follow a `FileHeader` response as raw chunk frames ended by
//! an empty frame (see [`crate::wire`]).

use lathe_core::{JobStatus, Step, TaskMeta, TimeInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Health check ping; the only unauthenticated request.
    Ping,

    /// List the built-in process script names.
    ListProcesses { api_key: String },

    /// Docstring of a process's `main` entrypoint.
    ProcessDoc { api_key: String, name: String },

    /// Submit a job. When `file_name`/`script_name` are set, the request
    /// frame is followed by one chunked upload stream per declared file,
    /// in that order.
    SubmitJob {
        api_key: String,
        /// Built-in process name, or `"custom"` with an uploaded script.
        process: String,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        script_name: Option<String>,
        /// JSON string of process parameters.
        #[serde(default)]
        params: Option<String>,
        /// Display alias for the job.
        #[serde(default)]
        name: Option<String>,
        /// JSON string of worker config overrides.
        #[serde(default)]
        config: Option<String>,
    },

    ListJobs { api_key: String },

    JobStatus { api_key: String, uuid: String },

    JobDetails { api_key: String, uuid: String },

    ListOutputs { api_key: String, uuid: String },

    /// Stream one output file back.
    FetchOutput {
        api_key: String,
        uuid: String,
        path: String,
    },

    /// Stream the packaged outputs archive; enqueues packaging on first
    /// call for a finished job.
    FetchArchive { api_key: String, uuid: String },

    /// Raw task meta, as stored (remote result-backend surface).
    TaskMeta { api_key: String, uuid: String },

    Revoke { api_key: String, uuid: String },

    /// Sweep leftover crash beacons now.
    RecoverCrashed { api_key: String },

    Shutdown { api_key: String },
}

/// Client-facing error body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn bad_request(details: impl Into<String>) -> Self {
        Self {
            code: 400,
            message: "Bad Request".to_string(),
            details: Some(details.into()),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            code: 401,
            message: "Unauthorized".to_string(),
            details: None,
        }
    }

    pub fn not_found(details: impl Into<String>) -> Self {
        Self {
            code: 404,
            message: "Not Found".to_string(),
            details: Some(details.into()),
        }
    }

    pub fn too_early(details: impl Into<String>) -> Self {
        Self {
            code: 425,
            message: "Too early".to_string(),
            details: Some(details.into()),
        }
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self {
            code: 500,
            message: "Internal Server Error".to_string(),
            details: Some(details.into()),
        }
    }

    pub fn service_unavailable(details: impl Into<String>) -> Self {
        Self {
            code: 503,
            message: "Service Unavailable".to_string(),
            details: Some(details.into()),
        }
    }
}

/// Short client view of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobState {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobState {
    pub fn from_meta(meta: &TaskMeta) -> Self {
        Self {
            uuid: meta.task_id.to_string(),
            name: meta.result.shadow_name.clone(),
            status: meta.status,
            progress: meta.result.progress,
            error: meta.error_text(),
        }
    }

    /// The view served for an id the backend has never seen.
    pub fn unknown(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: None,
            status: JobStatus::Pending,
            progress: None,
            error: None,
        }
    }
}

/// Detailed client view: the short state plus timing, steps, retry
/// count, and the result payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDetails {
    #[serde(flatten)]
    pub state: JobState,
    pub time_info: TimeInfo,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub retry: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl JobDetails {
    pub fn from_meta(meta: &TaskMeta) -> Self {
        // normalized(): terminal records missing the tracker's stop stamp
        // borrow date_done
        let meta = meta.normalized();
        Self {
            state: JobState::from_meta(&meta),
            time_info: meta.result.time_info.clone().unwrap_or_default(),
            steps: meta.result.steps.clone(),
            retry: meta.result.retry.unwrap_or(0),
            result: meta.result.result.clone(),
        }
    }
}

/// Response from the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    Pong { banner: String },
    Processes { processes: Vec<String> },
    Doc { doc: String },
    JobAccepted {
        uuid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        status: JobStatus,
    },
    Jobs { jobs: Vec<JobState> },
    Job { job: JobState },
    Details { details: JobDetails },
    Outputs { outputs: Vec<String> },
    /// Followed by raw chunk frames, terminated by an empty frame.
    FileHeader { name: String, size: u64 },
    Meta { meta: TaskMeta },
    Revoked { terminating: bool },
    Recovered { tasks: Vec<String> },
    ShuttingDown,
    Ok,
    Error { error: ApiError },
}

impl Response {
    pub fn error(error: ApiError) -> Self {
        Response::Error { error }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
