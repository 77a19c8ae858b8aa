// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::protocol::MessageKind;

fn tracked(label: &str) -> Message {
    Message::new(MessageKind::ChatStream, serde_json::json!({ "content": label }))
}

#[tokio::test]
async fn sequence_numbers_are_gap_free() {
    let queue = MessageQueue::new();
    for expected in 1..=5u64 {
        let seq = queue.enqueue(tracked("m")).await;
        assert_eq!(seq, expected);
    }
    let drained = queue.drain_pending().await;
    let seqs: Vec<u64> = drained.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn dequeue_moves_tracked_messages_in_flight() {
    let queue = MessageQueue::new();
    queue.enqueue(tracked("a")).await;
    let msg = queue.dequeue().await;
    assert!(msg.is_some());
    assert_eq!(queue.pending_len().await, 0);
    assert_eq!(queue.in_flight_len().await, 1);
}

#[tokio::test]
async fn untracked_messages_are_fire_and_forget() {
    let queue = MessageQueue::new();
    let pong = Message::new(MessageKind::Pong, serde_json::Value::Null);
    queue.enqueue(pong).await;
    let _ = queue.dequeue().await;
    assert_eq!(queue.in_flight_len().await, 0);
}

#[tokio::test]
async fn ack_is_idempotent_and_tolerates_unknown_ids() {
    let queue = MessageQueue::new();
    queue.enqueue(tracked("a")).await;
    let msg = match queue.dequeue().await {
        Some(m) => m,
        None => unreachable!("message was enqueued"),
    };

    assert!(queue.ack(&msg.id).await);
    assert!(!queue.ack(&msg.id).await);
    assert!(!queue.ack("never-sent").await);
    assert_eq!(queue.in_flight_len().await, 0);
}

#[tokio::test]
async fn overflow_evicts_oldest_pending() {
    let queue = MessageQueue::with_limits(3, DEFAULT_RETRY_TIMEOUT, DEFAULT_RETRY_CAP);
    for _ in 0..5 {
        queue.enqueue(tracked("m")).await;
    }
    assert_eq!(queue.pending_len().await, 3);
    let drained = queue.drain_pending().await;
    let seqs: Vec<u64> = drained.iter().map(|m| m.seq).collect();
    // 1 and 2 were evicted; the counter kept going.
    assert_eq!(seqs, vec![3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn retries_capped_then_dropped_silently() {
    let timeout = Duration::from_secs(30);
    let queue = MessageQueue::with_limits(DEFAULT_CAPACITY, timeout, 3);
    queue.enqueue(tracked("m1")).await;
    let _ = queue.dequeue().await;

    for round in 1..=3u32 {
        tokio::time::advance(timeout).await;
        let due = queue.check_retries().await;
        assert_eq!(due.len(), 1, "round {round}");
        assert_eq!(due[0].retry_count, round);
    }

    // Fourth window: past the cap, dropped without resend.
    tokio::time::advance(timeout).await;
    let due = queue.check_retries().await;
    assert!(due.is_empty());
    assert_eq!(queue.in_flight_len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn fresh_entries_are_not_retried_early() {
    let queue = MessageQueue::new();
    queue.enqueue(tracked("m")).await;
    let _ = queue.dequeue().await;

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(queue.check_retries().await.is_empty());
    assert_eq!(queue.in_flight_len().await, 1);
}

#[tokio::test]
async fn messages_after_spans_pending_and_in_flight() {
    let queue = MessageQueue::new();
    for _ in 0..5 {
        queue.enqueue(tracked("m")).await;
    }
    // Send (and thereby track) the first three; leave 4 and 5 pending.
    for _ in 0..3 {
        let _ = queue.dequeue().await;
    }
    // Client saw through seq 2.
    let replay = queue.messages_after(2).await;
    let seqs: Vec<u64> = replay.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![3, 4, 5]);
}

#[tokio::test]
async fn messages_after_skips_acked() {
    let queue = MessageQueue::new();
    for _ in 0..3 {
        queue.enqueue(tracked("m")).await;
    }
    let sent = queue.drain_pending().await;
    queue.ack(&sent[0].id).await;
    queue.ack(&sent[1].id).await;

    let replay = queue.messages_after(0).await;
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].seq, 3);
}
