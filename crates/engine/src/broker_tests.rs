// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeDelta;
use std::path::PathBuf;
use std::sync::Arc;

fn task(n: u8) -> TaskId {
    TaskId::new(format!("ab6d6726-f630-4467-9e44-c57df6010{:02x}", n))
}

fn cleanup_envelope(n: u8, queue: QueueName) -> Envelope {
    Envelope::new(
        task(n),
        TaskKind::Cleanup {
            path: PathBuf::from("/share/job"),
            is_dir: true,
        },
        queue,
    )
}

#[tokio::test]
async fn fifo_within_a_queue() {
    let broker = Broker::new();
    broker.enqueue(cleanup_envelope(1, QueueName::Cpu)).unwrap();
    broker.enqueue(cleanup_envelope(2, QueueName::Cpu)).unwrap();

    let first = broker.pop(&[QueueName::Cpu]).await.unwrap();
    let second = broker.pop(&[QueueName::Cpu]).await.unwrap();
    assert_eq!(first.id, task(1));
    assert_eq!(second.id, task(2));
}

#[tokio::test]
async fn pop_only_sees_served_queues() {
    let broker = Broker::new();
    broker.enqueue(cleanup_envelope(1, QueueName::Gpu)).unwrap();
    broker
        .enqueue(cleanup_envelope(2, QueueName::Maintenance))
        .unwrap();

    let popped = broker.pop(&[QueueName::Maintenance]).await.unwrap();
    assert_eq!(popped.id, task(2));
    assert_eq!(broker.depth(QueueName::Gpu), 1);
}

#[tokio::test]
async fn future_eta_is_not_due() {
    let broker = Broker::new();
    let mut later = cleanup_envelope(1, QueueName::Maintenance);
    later.eta = Some(Utc::now() + TimeDelta::hours(1));
    broker.enqueue(later).unwrap();
    broker
        .enqueue(cleanup_envelope(2, QueueName::Maintenance))
        .unwrap();

    // the due envelope jumps the queue
    let popped = broker.pop(&[QueueName::Maintenance]).await.unwrap();
    assert_eq!(popped.id, task(2));
    assert_eq!(broker.depth(QueueName::Maintenance), 1);
}

#[tokio::test]
async fn past_eta_is_delivered() {
    let broker = Broker::new();
    let mut due = cleanup_envelope(1, QueueName::Maintenance);
    due.eta = Some(Utc::now() - TimeDelta::seconds(5));
    broker.enqueue(due).unwrap();

    let popped = broker.pop(&[QueueName::Maintenance]).await.unwrap();
    assert_eq!(popped.id, task(1));
}

#[tokio::test]
async fn pop_wakes_on_enqueue() {
    let broker = Arc::new(Broker::new());
    let popper = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.pop(&[QueueName::Cpu]).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    broker.enqueue(cleanup_envelope(1, QueueName::Cpu)).unwrap();

    let popped = tokio::time::timeout(Duration::from_secs(2), popper)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(popped.id, task(1));
}

#[tokio::test]
async fn closed_broker_rejects_enqueue() {
    let broker = Broker::new();
    broker.close();
    assert!(matches!(
        broker.enqueue(cleanup_envelope(1, QueueName::Cpu)),
        Err(BrokerError::Unavailable)
    ));
}

#[tokio::test]
async fn closed_broker_drains_then_ends() {
    let broker = Broker::new();
    broker.enqueue(cleanup_envelope(1, QueueName::Cpu)).unwrap();
    broker.close();

    assert!(broker.pop(&[QueueName::Cpu]).await.is_some());
    assert!(broker.pop(&[QueueName::Cpu]).await.is_none());
}

#[test]
fn nack_redelivers_with_countdown() {
    let broker = Broker::new();
    let envelope = cleanup_envelope(1, QueueName::Maintenance);
    assert!(broker.nack(envelope));

    let queues = broker.queues.lock();
    let redelivered = queues
        .get(&QueueName::Maintenance)
        .and_then(|q| q.front())
        .unwrap();
    assert_eq!(redelivered.retries, 1);
    let eta = redelivered.eta.unwrap();
    let countdown = (eta - Utc::now()).num_seconds();
    assert!((55..=60).contains(&countdown), "countdown {}", countdown);
}

#[test]
fn nack_drops_after_max_retries() {
    let broker = Broker::new();
    let mut envelope = cleanup_envelope(1, QueueName::Maintenance);
    envelope.retries = MGMT_MAX_RETRIES;
    assert!(!broker.nack(envelope));
    assert_eq!(broker.depth(QueueName::Maintenance), 0);
}

#[test]
fn execute_is_early_ack_management_is_late() {
    let execute = TaskKind::Execute {
        params: serde_json::Value::Null,
        pc: lathe_core::ProgramContext::new(task(1), "/srv/p.hcl", Utc::now()),
        chain: Vec::new(),
    };
    assert_eq!(execute.ack_mode(), AckMode::Early);
    assert_eq!(
        TaskKind::Cleanup {
            path: PathBuf::from("/x"),
            is_dir: false
        }
        .ack_mode(),
        AckMode::Late
    );
}
