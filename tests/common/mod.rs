//! Integration test common infrastructure.
//!
//! Provides an in-memory sync service and a harness that runs a real
//! `SyncClient` against it.

#![allow(dead_code)]

pub mod server;

#[allow(unused_imports)]
pub use server::{member, presence_update, FakeServer};

use kinsync::config::SyncConfig;
use kinsync::credentials::{Credential, CredentialProvider};
use kinsync::state::{StoreChange, Stores};
use kinsync::sync::{ConnectionState, SyncClient, SyncClientParams, SyncHandle, SyncStatus};
use std::sync::Arc;
use std::time::Duration;

/// Generous upper bound; with a paused clock it only bounds virtual time.
pub const WAIT: Duration = Duration::from_secs(120);

/// Short timeouts and intervals so tests move quickly.
pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        handshake_timeout_ms: 1_000,
        request_timeout_ms: 1_000,
        max_reconnect_attempts: 5,
        backoff_min_ms: 100,
        backoff_max_ms: 1_000,
        degraded_poll_interval_ms: 500,
        degraded_retry_interval_ms: 5_000,
        protocol_error_threshold: 3,
        protocol_error_window_ms: 10_000,
    }
}

pub struct TestClient {
    pub handle: SyncHandle,
    pub credentials: CredentialProvider,
}

impl TestClient {
    /// Start a client against `server`. `token` of `None` starts signed out.
    pub fn spawn(server: &FakeServer, device_id: &str, token: Option<&str>) -> Self {
        Self::spawn_with(server, device_id, token, test_sync_config())
    }

    pub fn spawn_with(
        server: &FakeServer,
        device_id: &str,
        token: Option<&str>,
        config: SyncConfig,
    ) -> Self {
        let credentials = CredentialProvider::new(token.map(Credential::new));
        let handle = SyncClient::spawn(SyncClientParams {
            config,
            device_id: device_id.to_string(),
            stores: Stores::default(),
            connector: Arc::new(server.clone()),
            requests: Arc::new(server.clone()),
            credentials: credentials.subscribe(),
        });
        Self {
            handle,
            credentials,
        }
    }

    pub fn stores(&self) -> &Stores {
        self.handle.stores()
    }

    /// Wait until the status satisfies `pred`.
    pub async fn wait_for(&self, pred: impl FnMut(&SyncStatus) -> bool) -> SyncStatus {
        let mut status = self.handle.status();
        let current = tokio::time::timeout(WAIT, status.wait_for(pred))
            .await
            .expect("timed out waiting for status")
            .expect("client stopped");
        current.clone()
    }

    pub async fn wait_for_state(&self, state: ConnectionState) -> SyncStatus {
        self.wait_for(|s| s.state == state).await
    }
}

/// Poll `cond` until it holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}

/// Wait for a store change matching `pred`.
pub async fn next_change(
    changes: &mut tokio::sync::broadcast::Receiver<StoreChange>,
    mut pred: impl FnMut(&StoreChange) -> bool,
) -> StoreChange {
    tokio::time::timeout(WAIT, async {
        loop {
            match changes.recv().await {
                Ok(change) if pred(&change) => return change,
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("change channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for store change")
}
