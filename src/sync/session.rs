//! One event-stream connection: connect, handshake, then pump frames.
//!
//! The session runs on its own task and reports back to the client actor
//! through its inbox. Every report carries the session's epoch so the actor
//! can ignore a session it has already given up on.

use kinsync_proto::{ClientFrame, HandshakeAction, HandshakeError, HandshakeMachine, ServerFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::credentials::Credential;
use crate::error::TransportError;
use crate::sync::client::Inbox;
use crate::sync::transport::{StreamConnector, StreamTransport};
use crate::telemetry::spans;

pub(crate) struct SessionParams {
    pub epoch: u64,
    pub attempt: u32,
    pub device_id: String,
    pub credential: Credential,
    pub handshake_timeout: Duration,
    pub connector: Arc<dyn StreamConnector>,
    pub outbound: mpsc::Receiver<ClientFrame>,
    pub inbox: mpsc::Sender<Inbox>,
    pub cancel: CancellationToken,
}

pub(crate) fn spawn(params: SessionParams) {
    let span = spans::connection(&params.device_id, params.attempt);
    tokio::spawn(run(params).instrument(span));
}

async fn run(params: SessionParams) {
    let SessionParams {
        epoch,
        device_id,
        credential,
        handshake_timeout,
        connector,
        mut outbound,
        inbox,
        cancel,
        ..
    } = params;

    let established = tokio::select! {
        _ = cancel.cancelled() => return,
        result = tokio::time::timeout(
            handshake_timeout,
            open(connector.as_ref(), &device_id, &credential),
        ) => match result {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout("handshake")),
        },
    };
    drop(credential);

    let mut transport = match established {
        Ok((transport, session_id)) => {
            info!(session = %session_id, "Stream session established");
            if inbox.send(Inbox::SessionUp { epoch, session_id }).await.is_err() {
                return;
            }
            transport
        }
        Err(error) => {
            debug!(error = %error, "Connection attempt failed");
            let _ = inbox.send(Inbox::AttemptFailed { epoch, error }).await;
            return;
        }
    };

    let error = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                transport.close().await;
                return;
            }
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    let text = match frame.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, frame = frame.name(), "Failed to encode frame");
                            continue;
                        }
                    };
                    if let Err(e) = transport.send(text).await {
                        break Some(e);
                    }
                }
                None => {
                    transport.close().await;
                    return;
                }
            },
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => {
                    let message = match ServerFrame::decode(&text) {
                        Ok(frame) => Inbox::Frame { epoch, frame },
                        Err(error) => Inbox::Malformed { epoch, error },
                    };
                    if inbox.send(message).await.is_err() {
                        return;
                    }
                }
                Some(Err(e)) => break Some(e),
                None => break None,
            },
        }
    };

    match &error {
        Some(e) => info!(error = %e, "Stream session lost"),
        None => info!("Stream closed by server"),
    }
    let _ = inbox.send(Inbox::SessionDown { epoch, error }).await;
}

/// Connect and run the `init` / `init_ack` exchange.
async fn open(
    connector: &dyn StreamConnector,
    device_id: &str,
    credential: &Credential,
) -> Result<(Box<dyn StreamTransport>, String), TransportError> {
    let mut transport = connector.connect().await?;
    let mut machine = HandshakeMachine::new(device_id);

    let HandshakeAction::Send(init) = machine.start(credential.expose()) else {
        return Err(TransportError::Protocol(
            kinsync_proto::ProtocolError::Unexpected("handshake did not start".into()),
        ));
    };
    transport.send(init.encode()?).await?;

    loop {
        let text = match transport.recv().await {
            Some(result) => result?,
            None => return Err(TransportError::Closed),
        };
        let frame = ServerFrame::decode(&text)?;
        match machine.feed(&frame) {
            Some(HandshakeAction::Complete { session_id }) => return Ok((transport, session_id)),
            Some(HandshakeAction::Fail(HandshakeError::Rejected { code, message })) => {
                transport.close().await;
                return Err(TransportError::AuthRejected { code, message });
            }
            Some(HandshakeAction::Fail(other)) => {
                transport.close().await;
                return Err(TransportError::Connect(other.to_string()));
            }
            Some(HandshakeAction::Send(_)) | None => continue,
        }
    }
}
