//! Degraded-mode polling.
//!
//! While the event stream is unavailable, every subscribed stream is read
//! through the request channel. Each query result is an [`UpdateBatch`] that
//! goes through the same dispatcher as pushed events.

use kinsync_proto::{Operation, Request, StreamKey, UpdateBatch};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::credentials::Credential;
use crate::error::TransportError;
use crate::sync::transport::RequestChannel;

/// The queries that read the current state of one stream.
pub fn queries_for(stream: &StreamKey) -> Vec<Request> {
    match stream {
        StreamKey::Family(family_id) => {
            let input = json!({ "family_id": family_id });
            vec![
                Request::query(Operation::FetchFamily, input.clone()),
                Request::query(Operation::FetchMembers, input.clone()),
                Request::query(Operation::FetchInvitations, input),
            ]
        }
        StreamKey::Presence(family_id) => vec![Request::query(
            Operation::FetchPresence,
            json!({ "family_id": family_id }),
        )],
        StreamKey::Order(order_id) => vec![Request::query(
            Operation::FetchOrder,
            json!({ "order_id": order_id }),
        )],
        StreamKey::Prediction(channel_id) => vec![Request::query(
            Operation::FetchPrediction,
            json!({ "channel_id": channel_id }),
        )],
    }
}

/// Poll one stream. Stops at the first query that fails.
pub async fn poll_stream(
    requests: &dyn RequestChannel,
    credential: Option<&Credential>,
    stream: &StreamKey,
    timeout: Duration,
) -> Result<UpdateBatch, TransportError> {
    let mut batch = UpdateBatch::default();
    for request in queries_for(stream) {
        let response = tokio::time::timeout(timeout, requests.call(&request, credential))
            .await
            .map_err(|_| TransportError::Timeout("poll"))??;
        match response.into_result() {
            Ok(value) if value.is_null() => {}
            Ok(value) => {
                let part: UpdateBatch = serde_json::from_value(value)
                    .map_err(|e| TransportError::Protocol(e.into()))?;
                batch.updates.extend(part.updates);
            }
            Err(api) => {
                // A rejected read leaves the local copy as it is.
                debug!(operation = %request.operation, code = %api.code, "Poll query rejected");
            }
        }
    }
    Ok(batch)
}

/// Poll every stream in order.
pub(crate) async fn poll_all(
    requests: Arc<dyn RequestChannel>,
    credential: Option<Credential>,
    streams: Vec<StreamKey>,
    timeout: Duration,
) -> Vec<(StreamKey, Result<UpdateBatch, TransportError>)> {
    let mut results = Vec::with_capacity(streams.len());
    for stream in streams {
        let result = poll_stream(requests.as_ref(), credential.as_ref(), &stream, timeout).await;
        results.push((stream, result));
    }
    results
}
