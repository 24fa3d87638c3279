// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job watching: poll until terminal, with batch exit codes.

use crate::client::Client;
use anyhow::Result;
use lathe_core::JobStatus;
use lathe_daemon::{JobState, Request, Response};
use std::time::Duration;

/// Poll cadence while watching a job.
const WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Batch exit code for a terminal (or last observed) status.
pub fn exit_code(status: JobStatus) -> i32 {
    match status {
        JobStatus::Success => 0,
        JobStatus::Failure => 10,
        JobStatus::Revoked => 11,
        JobStatus::Retry => 12,
        JobStatus::Pending => 13,
        JobStatus::Started => 14,
        JobStatus::Received => 15,
        // 16 is reserved for rejected submissions
        _ => 17,
    }
}

/// Exit code for a submission the daemon refused.
pub const REJECTED_EXIT_CODE: i32 = 16;

/// Watch a job until it reaches a terminal state, printing status and
/// progress changes unless `quiet`.
pub async fn watch(client: &Client, uuid: &str, quiet: bool) -> Result<JobState> {
    let mut last: Option<(JobStatus, Option<u8>)> = None;
    loop {
        let response = client
            .request(Request::JobStatus {
                api_key: client.api_key(),
                uuid: uuid.to_string(),
            })
            .await?;
        let job = match crate::client::expect_ok(response)? {
            Response::Job { job } => job,
            other => anyhow::bail!("unexpected response: {:?}", other),
        };

        let snapshot = (job.status, job.progress);
        if !quiet && last.as_ref() != Some(&snapshot) {
            match job.progress {
                Some(progress) => println!("{} {} {}%", uuid, job.status, progress),
                None => println!("{} {}", uuid, job.status),
            }
            if let Some(error) = &job.error {
                println!("{} error: {}", uuid, error);
            }
        }
        last = Some(snapshot);

        if job.status.is_terminal() {
            return Ok(job);
        }
        tokio::time::sleep(WATCH_INTERVAL).await;
    }
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod tests;
