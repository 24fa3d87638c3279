// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn digest_matches_known_vector() {
    // sha256("secret")
    assert_eq!(
        digest("secret"),
        "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
    );
}

#[test]
fn verify_accepts_matching_key() {
    let stored = digest("hunter2");
    assert!(verify(Some(&stored), "hunter2"));
    assert!(!verify(Some(&stored), "hunter3"));
}

#[test]
fn verify_is_case_insensitive_on_the_digest() {
    let stored = digest("hunter2").to_uppercase();
    assert!(verify(Some(&stored), "hunter2"));
}

#[test]
fn missing_digest_disables_auth() {
    assert!(verify(None, "anything"));
}
