// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn wait_without_queue_goes_to_control() {
    let directive = ScheduleDirective {
        queue: None,
        wait: true,
        timeout: Some(3600),
    };
    assert_eq!(directive.resolved().queue, Some(QueueName::Control));
}

#[test]
fn wait_with_explicit_queue_is_kept() {
    let directive = ScheduleDirective {
        queue: Some(QueueName::Gpu),
        wait: true,
        timeout: None,
    };
    assert_eq!(directive.resolved().queue, Some(QueueName::Gpu));
}

#[test]
fn non_waiter_queue_untouched() {
    let directive = ScheduleDirective::default();
    assert_eq!(directive.resolved().queue, None);
}
