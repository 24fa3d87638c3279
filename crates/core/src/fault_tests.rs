// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    timeout = { ExecutionFault::Timeout { seconds: 60 }, true },
    signal = { ExecutionFault::Signal { signal: 11 }, true },
    exit = { ExecutionFault::Exit { code: 2 }, true },
    oom = { ExecutionFault::OutOfMemory, true },
    worker_lost = { ExecutionFault::WorkerLost, true },
    script = { ExecutionFault::Script { exc_type: "ValueError".into(), message: "bad input".into(), trace: vec![] }, false },
    opaque = { ExecutionFault::Opaque { summary: "kernel.InternalError: boom".into() }, false },
)]
fn retriable_set(fault: ExecutionFault, expected: bool) {
    assert_eq!(fault.is_retriable(), expected);
}

#[test]
fn signal_message() {
    let fault = ExecutionFault::Signal { signal: 11 };
    assert_eq!(fault.to_string(), "child killed by signal 11");
    assert_eq!(fault.exc_type(), "SignalFault");
}

#[test]
fn failure_meta_from_script_fault_keeps_trace() {
    let fault = ExecutionFault::Script {
        exc_type: "ValueError".to_string(),
        message: "no root file".to_string(),
        trace: vec!["line 1".to_string(), "line 2".to_string()],
    };
    let meta = FailureMeta::from_fault(&fault);
    assert_eq!(meta.exc_type, "ValueError");
    assert_eq!(meta.exc_message, "ValueError: no root file");
    assert_eq!(meta.exc_traceback.len(), 2);
}

#[test]
fn worker_crash_record() {
    let meta = FailureMeta::worker_crash();
    assert_eq!(meta.exc_type, "SystemError");
    assert_eq!(meta.exc_message, "Not enough memory or segfault");
}

#[test]
fn fault_serde_is_tagged() {
    let fault = ExecutionFault::Exit { code: 3 };
    let json = serde_json::to_value(&fault).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "exit", "code": 3}));
}
