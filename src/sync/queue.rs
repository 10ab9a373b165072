//! Offline mutation queue.
//!
//! Every mutation is queued with an idempotency key and sent strictly in
//! enqueue order, one at a time. An entry leaves the queue when the server
//! acknowledges or definitively rejects it, or when the user cancels it
//! before it is sent.

use chrono::{DateTime, Utc};
use kinsync_proto::{Operation, Request};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::oneshot;

use crate::error::ActionError;

pub type MutationReply = oneshot::Sender<Result<Value, ActionError>>;

/// A mutation waiting for acknowledgement.
#[derive(Debug)]
pub struct QueuedUpdate {
    pub idempotency_key: String,
    pub operation: Operation,
    pub input: Value,
    pub enqueued_at: DateTime<Utc>,
    /// Times this entry was sent without a definitive answer.
    pub attempts: u32,
    reply: Option<MutationReply>,
}

impl QueuedUpdate {
    pub fn new(
        idempotency_key: String,
        operation: Operation,
        input: Value,
        reply: Option<MutationReply>,
    ) -> Self {
        Self {
            idempotency_key,
            operation,
            input,
            enqueued_at: Utc::now(),
            attempts: 0,
            reply,
        }
    }

    /// The request envelope. Retries reuse the same idempotency key.
    pub fn request(&self) -> Request {
        Request::mutation(self.operation, self.input.clone(), self.idempotency_key.clone())
    }

    /// Deliver the outcome to whoever submitted this entry.
    pub fn complete(mut self, outcome: Result<Value, ActionError>) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(outcome);
        }
    }
}

#[derive(Debug, Default)]
pub struct OfflineQueue {
    entries: VecDeque<QueuedUpdate>,
    /// The head has been handed to the request channel.
    head_in_flight: bool,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueuedUpdate) {
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight(&self) -> bool {
        self.head_in_flight
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.idempotency_key.clone()).collect()
    }

    /// Mark the head as sent and return its request. `None` if empty or already in flight.
    pub fn begin_head(&mut self) -> Option<(String, Request)> {
        if self.head_in_flight {
            return None;
        }
        let head = self.entries.front_mut()?;
        head.attempts += 1;
        self.head_in_flight = true;
        Some((head.idempotency_key.clone(), head.request()))
    }

    /// The head was not answered definitively; keep it for another try.
    pub fn retry_head(&mut self, key: &str) {
        if self.head_key() == Some(key) {
            self.head_in_flight = false;
        }
    }

    /// The head was acknowledged or rejected; remove it.
    pub fn finish_head(&mut self, key: &str) -> Option<QueuedUpdate> {
        if self.head_key() != Some(key) {
            return None;
        }
        self.head_in_flight = false;
        self.entries.pop_front()
    }

    /// Remove an entry that has not been sent yet.
    pub fn cancel(&mut self, key: &str) -> Option<QueuedUpdate> {
        let index = self.entries.iter().position(|e| e.idempotency_key == key)?;
        if index == 0 && self.head_in_flight {
            return None;
        }
        self.entries.remove(index)
    }

    /// Empty the queue, e.g. on shutdown.
    pub fn drain(&mut self) -> Vec<QueuedUpdate> {
        self.head_in_flight = false;
        self.entries.drain(..).collect()
    }

    fn head_key(&self) -> Option<&str> {
        self.entries.front().map(|e| e.idempotency_key.as_str())
    }
}
