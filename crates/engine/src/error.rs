// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine-level error type.

use lathe_storage::{BackendError, MarkerError, ShareError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Share(#[from] ShareError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error(transparent)]
    Script(#[from] lathe_script::ScriptError),

    #[error(transparent)]
    Broker(#[from] crate::broker::BrokerError),

    #[error("'{0}' not found")]
    FileNotFound(String),

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
