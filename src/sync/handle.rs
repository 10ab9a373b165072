//! Cloneable front door to the sync client actor.

use kinsync_proto::{Operation, StreamKey};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use uuid::Uuid;

use crate::error::ActionError;
use crate::state::{StoreChange, Stores};
use crate::sync::client::{Command, SyncStatus};
use crate::sync::queue::QueuedUpdate;

#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SyncStatus>,
    changes: broadcast::Sender<StoreChange>,
    stores: Stores,
}

/// A mutation accepted into the offline queue.
#[derive(Debug)]
pub struct QueuedMutation {
    key: String,
    operation: Operation,
    outcome: oneshot::Receiver<Result<Value, ActionError>>,
}

impl QueuedMutation {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Wait until the server acknowledges or rejects it, or it is canceled.
    pub async fn outcome(self) -> Result<Value, ActionError> {
        self.outcome
            .await
            .unwrap_or(Err(ActionError::ClientStopped))
    }
}

impl SyncHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        status: watch::Receiver<SyncStatus>,
        changes: broadcast::Sender<StoreChange>,
        stores: Stores,
    ) -> Self {
        Self {
            commands,
            status,
            changes,
            stores,
        }
    }

    async fn send(&self, command: Command) -> Result<(), ActionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ActionError::ClientStopped)
    }

    /// Start receiving a stream. Idempotent.
    pub async fn subscribe(&self, stream: StreamKey) -> Result<(), ActionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe { stream, reply }).await?;
        rx.await.map_err(|_| ActionError::ClientStopped)
    }

    /// Stop receiving a stream. Idempotent; in-flight mutations are unaffected.
    pub async fn unsubscribe(&self, stream: StreamKey) -> Result<(), ActionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unsubscribe { stream, reply }).await?;
        rx.await.map_err(|_| ActionError::ClientStopped)
    }

    /// Queue a mutation under a fresh idempotency key.
    pub async fn submit(
        &self,
        operation: Operation,
        input: Value,
    ) -> Result<QueuedMutation, ActionError> {
        self.submit_with_key(operation, input, Uuid::new_v4().to_string())
            .await
    }

    /// Queue a mutation under a caller-chosen idempotency key.
    pub async fn submit_with_key(
        &self,
        operation: Operation,
        input: Value,
        idempotency_key: String,
    ) -> Result<QueuedMutation, ActionError> {
        if !operation.is_mutation() {
            return Err(ActionError::Validation(format!(
                "{operation} is a query, not a mutation"
            )));
        }
        let (reply, outcome) = oneshot::channel();
        let entry = QueuedUpdate::new(idempotency_key.clone(), operation, input, Some(reply));
        self.send(Command::Submit(entry)).await?;
        Ok(QueuedMutation {
            key: idempotency_key,
            operation,
            outcome,
        })
    }

    /// Queue a mutation and wait for its outcome.
    pub async fn execute(&self, operation: Operation, input: Value) -> Result<Value, ActionError> {
        self.submit(operation, input).await?.outcome().await
    }

    /// Remove a queued mutation that has not been sent yet.
    ///
    /// Returns false if it was already sent or is unknown.
    pub async fn cancel_queued(&self, idempotency_key: &str) -> Result<bool, ActionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CancelQueued {
            key: idempotency_key.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ActionError::ClientStopped)
    }

    /// Skip any backoff or degraded wait and try now.
    pub async fn retry_now(&self) -> Result<(), ActionError> {
        self.send(Command::RetryNow).await
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Applied store changes, for the UI layer.
    pub fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Tear down: no reconnection, queued mutations fail with `ClientStopped`.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}
