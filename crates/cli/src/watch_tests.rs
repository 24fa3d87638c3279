// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    success = { JobStatus::Success, 0 },
    failure = { JobStatus::Failure, 10 },
    revoked = { JobStatus::Revoked, 11 },
    retry = { JobStatus::Retry, 12 },
    pending = { JobStatus::Pending, 13 },
    started = { JobStatus::Started, 14 },
    received = { JobStatus::Received, 15 },
    unknown = { JobStatus::Unknown, 17 },
    sent = { JobStatus::Sent, 17 },
    running = { JobStatus::Running, 17 },
)]
fn batch_exit_codes(status: JobStatus, expected: i32) {
    assert_eq!(exit_code(status), expected);
}

#[test]
fn rejected_code_is_reserved() {
    assert_eq!(REJECTED_EXIT_CODE, 16);
}
