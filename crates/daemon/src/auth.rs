// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-shared-key authentication.
//!
//! The daemon never stores the key itself, only its SHA-256 hex digest;
//! a request is accepted when the digest of its `api_key` matches.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of a key.
pub fn digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Check a presented key against the configured digest. A missing
/// configuration disables authentication.
pub fn verify(configured_digest: Option<&str>, presented_key: &str) -> bool {
    match configured_digest {
        None => true,
        Some(expected) => digest(presented_key).eq_ignore_ascii_case(expected),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
