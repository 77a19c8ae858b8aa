// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection outbound queue: sequence assignment, ack tracking,
//! retry scheduling, and replay-after-reconnect.
//!
//! The queue is a data structure, not a scheduler: the session runtime's
//! pumps decide when to drain it and when to scan for retries. All state
//! lives under one mutex with bounded hold times.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::protocol::Message;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_CAP: u32 = 3;

/// A sent-but-unacked message awaiting ack or retry.
struct InFlight {
    msg: Message,
    sent_at: Instant,
    retries: u32,
}

struct Inner {
    next_seq: u64,
    pending: VecDeque<Message>,
    in_flight: HashMap<String, InFlight>,
}

/// Sequenced FIFO with an in-flight map keyed by message id.
///
/// Every message is in at most one of `pending` / `in_flight`; sequence
/// numbers are assigned at enqueue time and are gap-free per queue.
pub struct MessageQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    retry_timeout: Duration,
    retry_cap: u32,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_RETRY_TIMEOUT, DEFAULT_RETRY_CAP)
    }

    pub fn with_limits(capacity: usize, retry_timeout: Duration, retry_cap: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_seq: 0,
                pending: VecDeque::new(),
                in_flight: HashMap::new(),
            }),
            capacity,
            retry_timeout,
            retry_cap,
        }
    }

    /// Assign the next sequence number and append to pending.
    ///
    /// On overflow the oldest pending message is evicted; the sequence
    /// counter never rewinds.
    pub async fn enqueue(&self, mut msg: Message) -> u64 {
        let mut inner = self.inner.lock().await;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        msg.seq = seq;
        inner.pending.push_back(msg);
        if inner.pending.len() > self.capacity {
            inner.pending.pop_front();
        }
        seq
    }

    /// Pop the head of pending, moving it in-flight when it needs an ack.
    pub async fn dequeue(&self) -> Option<Message> {
        let mut inner = self.inner.lock().await;
        let msg = inner.pending.pop_front()?;
        if msg.requires_ack {
            inner.in_flight.insert(
                msg.id.clone(),
                InFlight { msg: msg.clone(), sent_at: Instant::now(), retries: 0 },
            );
        }
        Some(msg)
    }

    /// Drain everything currently pending, in sequence order.
    pub async fn drain_pending(&self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(msg) = self.dequeue().await {
            out.push(msg);
        }
        out
    }

    /// Remove an in-flight entry. Idempotent; unknown ids are a no-op.
    pub async fn ack(&self, id: &str) -> bool {
        self.inner.lock().await.in_flight.remove(id).is_some()
    }

    /// Scan in-flight entries for retry candidates.
    ///
    /// Entries older than the retry timeout have their counter bumped and
    /// their timer reset; entries past the retry cap are dropped silently.
    /// Returns the messages due for resend, in sequence order.
    pub async fn check_retries(&self) -> Vec<Message> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let mut due = Vec::new();
        let mut expired = Vec::new();

        for (id, item) in inner.in_flight.iter_mut() {
            if now.duration_since(item.sent_at) < self.retry_timeout {
                continue;
            }
            item.retries += 1;
            if item.retries > self.retry_cap {
                expired.push(id.clone());
                continue;
            }
            item.sent_at = now;
            let mut msg = item.msg.clone();
            msg.retry_count = item.retries;
            due.push(msg);
        }

        for id in expired {
            inner.in_flight.remove(&id);
        }

        due.sort_by_key(|m| m.seq);
        due
    }

    /// Everything pending or in-flight with a sequence past `seq`, in
    /// sequence order. Used to replay after reconnect.
    pub async fn messages_after(&self, seq: u64) -> Vec<Message> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Message> = inner
            .pending
            .iter()
            .chain(inner.in_flight.values().map(|item| &item.msg))
            .filter(|m| m.seq > seq)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.seq);
        out
    }

    /// Highest sequence number assigned so far.
    pub async fn last_seq(&self) -> u64 {
        self.inner.lock().await.next_seq
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.inner.lock().await.in_flight.len()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
