// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn starts_uncancelled() {
    let flag = CancelFlag::new();
    assert!(!flag.is_cancelled());
}

#[tokio::test]
async fn cancel_wakes_waiter() {
    let flag = Arc::new(CancelFlag::new());
    let waiter = {
        let flag = Arc::clone(&flag);
        tokio::spawn(async move { flag.cancelled_wait().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    flag.cancel();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn wait_after_cancel_returns_immediately() {
    let flag = CancelFlag::new();
    flag.cancel();
    tokio::time::timeout(Duration::from_millis(50), flag.cancelled_wait())
        .await
        .unwrap();
}
