// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    seconds = { 5, "5s" },
    minutes = { 150, "2m" },
    hours_flat = { 7200, "2h" },
    hours_minutes = { 5400, "1h30m" },
    days = { 259200, "3d" },
)]
fn elapsed_formatting(secs: u64, expected: &str) {
    assert_eq!(format_elapsed(secs), expected);
}

#[parameterized(
    finished = { 11.7032, "11.7s" },
    zero = { 0.0, "0.0s" },
    in_flight = { -1.0, "-" },
)]
fn step_duration_formatting(duration: f64, expected: &str) {
    assert_eq!(format_step_duration(duration), expected);
}
