// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fake_clock_advances_monotonic() {
    let clock = FakeClock::new();
    let t0 = clock.now();
    clock.advance(Duration::from_secs(5));
    assert_eq!(clock.now().duration_since(t0), Duration::from_secs(5));
}

#[test]
fn fake_clock_advances_utc() {
    let clock = FakeClock::new();
    let t0 = clock.utc_now();
    clock.advance(Duration::from_millis(1500));
    assert_eq!((clock.utc_now() - t0).num_milliseconds(), 1500);
}

#[test]
fn fake_clock_set_utc() {
    let clock = FakeClock::new();
    let at = DateTime::parse_from_rfc3339("2024-02-19T20:10:19Z")
        .unwrap()
        .with_timezone(&Utc);
    clock.set_utc(at);
    assert_eq!(clock.utc_now(), at);
}

#[test]
fn system_clock_is_monotonic() {
    let clock = SystemClock;
    let t0 = clock.now();
    assert!(clock.now() >= t0);
}
