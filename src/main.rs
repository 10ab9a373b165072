//! kinsync - headless sync client.
//!
//! Connects one device to the family sync service, keeps the local stores
//! current and logs connection status until interrupted.

use kinsync::config::Config;
use kinsync::credentials::{Credential, CredentialProvider};
use kinsync::state::Stores;
use kinsync::sync::{HttpRequestChannel, SyncClient, SyncClientParams, WebSocketConnector};
use kinsync::{metrics, telemetry};
use kinsync_proto::StreamKey;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    telemetry::init(config.logging.format);
    metrics::init();

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!(path = %config_path, error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path);
    }

    info!(
        device = %config.client.device_id,
        user = %config.client.user_id,
        stream = %config.endpoints.stream_url,
        "Starting kinsync"
    );

    let credentials = CredentialProvider::new(
        std::env::var("KINSYNC_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .map(Credential::new),
    );
    if credentials.current().is_none() {
        warn!("KINSYNC_TOKEN is not set; waiting for a credential");
    }

    let stores = Stores::new(config.invitations.ttl(), config.presence.liveness_window());
    let requests = HttpRequestChannel::new(&config.endpoints.request_url)?;
    let client = SyncClient::spawn(SyncClientParams {
        config: config.sync.clone(),
        device_id: config.client.device_id.clone(),
        stores,
        connector: Arc::new(WebSocketConnector::new(config.endpoints.stream_url.clone())),
        requests: Arc::new(requests),
        credentials: credentials.subscribe(),
    });

    if let Some(family_id) = &config.client.family_id {
        client
            .subscribe(StreamKey::Family(family_id.to_string()))
            .await?;
        client
            .subscribe(StreamKey::Presence(family_id.to_string()))
            .await?;
    }

    let mut status = client.status();
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!(
                    state = %current.state,
                    failures = current.consecutive_failures,
                    queued = current.queued,
                    error = current.last_error.as_deref().unwrap_or(""),
                    "Sync status"
                );
            }
            _ = &mut interrupted => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    client.shutdown().await;
    drop(credentials);
    debug!(metrics = %metrics::gather_text(), "Final metrics");
    info!("Goodbye");
    Ok(())
}
