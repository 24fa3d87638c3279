// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk state markers serializing long-running per-job operations.
//!
//! A marker at `<share>/<job>/states/.<kind>.state` holds an ISO-8601
//! timestamp. A live (unexpired) marker means an operation of that kind is
//! in flight for the job, so duplicate requests become no-ops instead of
//! racing each other over the archives directory.

use crate::share::{ShareError, SharedStore};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default marker TTL (one hour): a packaging task older than this is
/// presumed dead and its marker stale.
pub const DEFAULT_MARKER_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("state '{kind}' already registered for job {job_id} (ttl={ttl_secs}s)")]
    AlreadyExists {
        job_id: String,
        kind: String,
        ttl_secs: u64,
    },

    #[error(transparent)]
    Share(#[from] ShareError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle on one (job, kind) marker file.
#[derive(Debug)]
pub struct DiskStateMarker {
    job_id: String,
    kind: String,
    path: PathBuf,
    ttl: Duration,
}

impl DiskStateMarker {
    pub fn new(
        store: &SharedStore,
        job_id: &str,
        kind: &str,
        ttl: Duration,
    ) -> Result<Self, MarkerError> {
        let path = store.state_path(job_id, kind)?;
        Ok(Self {
            job_id: job_id.to_string(),
            kind: kind.to_string(),
            path,
            ttl,
        })
    }

    /// Whether a live (unexpired) marker exists.
    pub fn is_registered(&self) -> bool {
        self.path.exists() && !self.is_expired()
    }

    /// Timestamp stored in the marker file, if readable.
    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        let content = fs::read_to_string(&self.path).ok()?;
        DateTime::parse_from_rfc3339(content.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn is_expired(&self) -> bool {
        match self.registered_at() {
            // Unreadable content counts as expired so a corrupt marker
            // cannot block packaging forever.
            None => true,
            Some(at) => {
                let age = Utc::now().signed_duration_since(at);
                age.num_seconds() >= self.ttl.as_secs() as i64
            }
        }
    }

    /// Register the marker, failing when a live one already exists. The
    /// returned guard removes the marker on drop.
    pub fn register(self) -> Result<MarkerGuard, MarkerError> {
        if self.path.exists() && !self.is_expired() {
            return Err(MarkerError::AlreadyExists {
                job_id: self.job_id,
                kind: self.kind,
                ttl_secs: self.ttl.as_secs(),
            });
        }
        let mut file = fs::File::create(&self.path)?;
        file.write_all(Utc::now().to_rfc3339().as_bytes())?;
        file.sync_all()?;
        debug!(job = %self.job_id, kind = %self.kind, "state marker registered");
        Ok(MarkerGuard { marker: self })
    }
}

/// Removes the marker file when dropped.
#[derive(Debug)]
pub struct MarkerGuard {
    marker: DiskStateMarker,
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.marker.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    path = %self.marker.path.display(),
                    error = %e,
                    "failed to release state marker"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "state_marker_tests.rs"]
mod tests;
