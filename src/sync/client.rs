//! Sync client actor.
//!
//! A single task owns the connection state machine, the offline queue and
//! every write to the stores. The stream session, request calls and polling
//! run on their own tasks and post results back into the actor's inbox, so
//! waiting on an acknowledgement never blocks inbound dispatch.

use kinsync_proto::{
    ClientFrame, ProtocolError, Response, ServerFrame, StreamKey, UpdateBatch, codes,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::config::SyncConfig;
use crate::credentials::Credential;
use crate::error::{ActionError, TransportError};
use crate::state::Stores;
use crate::sync::backoff::Backoff;
use crate::sync::dispatch::{UpdateDispatcher, UpdateSource};
use crate::sync::guard::ProtocolErrorWindow;
use crate::sync::handle::SyncHandle;
use crate::sync::machine::{ConnectionEvent, ConnectionState, SyncConnection, Transition};
use crate::sync::poller;
use crate::sync::queue::{OfflineQueue, QueuedUpdate};
use crate::sync::session::{self, SessionParams};
use crate::sync::transport::{RequestChannel, StreamConnector};
use crate::telemetry::spans;

const COMMAND_CAPACITY: usize = 64;
const INBOX_CAPACITY: usize = 256;
const OUTBOUND_CAPACITY: usize = 64;

/// Connection status for the connected/offline indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    /// Mutations waiting in the offline queue, including one in flight.
    pub queued: usize,
    pub last_error: Option<String>,
    /// Set while connected.
    pub session_id: Option<String>,
    /// The server rejected the credential; nothing happens until it changes.
    pub awaiting_credentials: bool,
}

/// Requests from [`SyncHandle`].
pub(crate) enum Command {
    Subscribe {
        stream: StreamKey,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        stream: StreamKey,
        reply: oneshot::Sender<()>,
    },
    Submit(QueuedUpdate),
    CancelQueued {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    RetryNow,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Results posted by the tasks the actor spawned.
pub(crate) enum Inbox {
    SessionUp {
        epoch: u64,
        session_id: String,
    },
    AttemptFailed {
        epoch: u64,
        error: TransportError,
    },
    SessionDown {
        epoch: u64,
        error: Option<TransportError>,
    },
    Frame {
        epoch: u64,
        frame: ServerFrame,
    },
    Malformed {
        epoch: u64,
        error: ProtocolError,
    },
    RequestDone {
        key: String,
        result: Result<Response, TransportError>,
    },
    PollDone {
        results: Vec<(StreamKey, Result<UpdateBatch, TransportError>)>,
    },
}

/// Everything the client needs to run.
pub struct SyncClientParams {
    pub config: SyncConfig,
    pub device_id: String,
    pub stores: Stores,
    pub connector: Arc<dyn StreamConnector>,
    pub requests: Arc<dyn RequestChannel>,
    pub credentials: watch::Receiver<Option<Credential>>,
}

pub struct SyncClient;

impl SyncClient {
    /// Spawn the client actor and start connecting.
    pub fn spawn(params: SyncClientParams) -> SyncHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (status_tx, status_rx) = watch::channel(SyncStatus::default());

        let dispatcher = UpdateDispatcher::new(params.stores.clone());
        let handle = SyncHandle::new(command_tx, status_rx, dispatcher.changes(), params.stores);

        let config = params.config;
        let actor = ClientActor {
            machine: SyncConnection::new(config.max_reconnect_attempts),
            backoff: Backoff::new(config.backoff_min(), config.backoff_max()),
            request_backoff: Backoff::new(config.backoff_min(), config.backoff_max()),
            errors: ProtocolErrorWindow::new(
                config.protocol_error_threshold,
                config.protocol_error_window(),
            ),
            config,
            device_id: params.device_id,
            connector: params.connector,
            requests: params.requests,
            credentials: params.credentials,
            credentials_open: true,
            queue: OfflineQueue::new(),
            dispatcher,
            status: status_tx,
            inbox: inbox_tx,
            session: None,
            epoch: 0,
            attempt: 0,
            session_id: None,
            last_error: None,
            reconnect_at: None,
            poll_at: None,
            drain_at: None,
            polling: false,
        };

        tokio::spawn(actor.run(command_rx, inbox_rx));
        handle
    }
}

struct ActiveSession {
    epoch: u64,
    outbound: mpsc::Sender<ClientFrame>,
    cancel: CancellationToken,
}

struct ClientActor {
    config: SyncConfig,
    device_id: String,
    connector: Arc<dyn StreamConnector>,
    requests: Arc<dyn RequestChannel>,
    credentials: watch::Receiver<Option<Credential>>,
    credentials_open: bool,

    machine: SyncConnection,
    backoff: Backoff,
    request_backoff: Backoff,
    errors: ProtocolErrorWindow,
    queue: OfflineQueue,
    dispatcher: UpdateDispatcher,

    status: watch::Sender<SyncStatus>,
    inbox: mpsc::Sender<Inbox>,

    session: Option<ActiveSession>,
    epoch: u64,
    attempt: u32,
    session_id: Option<String>,
    last_error: Option<String>,

    // Timers
    reconnect_at: Option<Instant>,
    poll_at: Option<Instant>,
    drain_at: Option<Instant>,
    polling: bool,
}

impl ClientActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbox: mpsc::Receiver<Inbox>,
    ) {
        info!(device = %self.device_id, "Sync client starting");
        if self.transition(ConnectionEvent::Start).is_some() {
            self.connect();
        }
        self.publish_status();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(message) = inbox.recv() => self.handle_inbox(message),
                changed = self.credentials.changed(), if self.credentials_open => {
                    if changed.is_err() {
                        debug!("Credential provider dropped");
                        self.credentials_open = false;
                    } else {
                        self.on_credentials_changed();
                    }
                }
                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.on_reconnect_timer();
                }
                _ = sleep_until(self.poll_at) => {
                    self.poll_at = None;
                    self.poll();
                }
                _ = sleep_until(self.drain_at) => {
                    self.drain_at = None;
                    self.drain();
                }
            }
            self.publish_status();
        }

        info!(device = %self.device_id, "Sync client stopped");
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Subscribe { stream, reply } => {
                if self.dispatcher.subscribe(stream.clone()) {
                    debug!(stream = %stream, "Subscribed");
                    let seq = self.machine.next_seq();
                    self.send_frame(ClientFrame::Subscribe { seq, stream });
                }
                let _ = reply.send(());
            }
            Command::Unsubscribe { stream, reply } => {
                if self.dispatcher.unsubscribe(&stream) {
                    debug!(stream = %stream, "Unsubscribed");
                    let seq = self.machine.next_seq();
                    self.send_frame(ClientFrame::Unsubscribe { seq, stream });
                }
                let _ = reply.send(());
            }
            Command::Submit(entry) => {
                debug!(
                    key = %entry.idempotency_key,
                    operation = %entry.operation,
                    "Mutation queued"
                );
                self.queue.push(entry);
                self.drain();
            }
            Command::CancelQueued { key, reply } => {
                let canceled = match self.queue.cancel(&key) {
                    Some(entry) => {
                        info!(key = %key, operation = %entry.operation, "Queued mutation canceled");
                        crate::metrics::record_action(entry.operation.as_str(), "canceled");
                        entry.complete(Err(ActionError::Canceled));
                        true
                    }
                    None => false,
                };
                let _ = reply.send(canceled);
            }
            Command::RetryNow => self.retry_now(),
            // Handled by the run loop.
            Command::Shutdown { .. } => {}
        }
    }

    fn retry_now(&mut self) {
        info!(state = %self.machine.state(), "Manual retry");
        self.drain_at = None;
        self.request_backoff.reset();

        match self.machine.state() {
            ConnectionState::Reconnecting if self.session.is_none() => {
                self.reconnect_at = None;
                self.connect();
            }
            ConnectionState::Degraded | ConnectionState::Disconnected => {
                if self.transition(ConnectionEvent::ManualRetry).is_some() {
                    self.reconnect_at = None;
                    self.connect();
                }
            }
            _ => {}
        }
        self.drain();
    }

    // ------------------------------------------------------------------
    // Inbox
    // ------------------------------------------------------------------

    fn handle_inbox(&mut self, message: Inbox) {
        match message {
            Inbox::SessionUp { epoch, session_id } if self.is_current(epoch) => {
                self.on_session_up(session_id);
            }
            Inbox::AttemptFailed { epoch, error } if self.is_current(epoch) => {
                self.on_attempt_failed(error);
            }
            Inbox::SessionDown { epoch, error } if self.is_current(epoch) => {
                self.session = None;
                self.session_id = None;
                self.last_error = Some(
                    error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "closed by server".to_string()),
                );
                self.connection_lost();
            }
            Inbox::Frame { epoch, frame } if self.is_current(epoch) => self.on_frame(frame),
            Inbox::Malformed { epoch, error } if self.is_current(epoch) => {
                self.protocol_error(error);
            }
            Inbox::RequestDone { key, result } => self.on_request_done(key, result),
            Inbox::PollDone { results } => self.on_poll_done(results),
            _ => debug!("Dropping message from a stale session"),
        }
    }

    fn on_session_up(&mut self, session_id: String) {
        if self.transition(ConnectionEvent::HandshakeAcked).is_none() {
            return;
        }
        self.backoff.reset();
        self.errors.clear();
        self.attempt = 0;
        self.reconnect_at = None;
        self.poll_at = None;
        self.last_error = None;
        self.session_id = Some(session_id);

        let streams: Vec<StreamKey> = self.dispatcher.subscriptions().cloned().collect();
        for stream in streams {
            let seq = self.machine.next_seq();
            self.send_frame(ClientFrame::Subscribe { seq, stream });
        }
        self.drain();
    }

    fn on_attempt_failed(&mut self, error: TransportError) {
        self.session = None;
        self.last_error = Some(error.to_string());

        if let TransportError::AuthRejected { code, .. } = &error {
            warn!(code = %code, "Credential rejected, waiting for a new one");
            self.transition(ConnectionEvent::AuthRejected);
            self.reconnect_at = None;
            return;
        }

        self.transition(ConnectionEvent::AttemptFailed);
        warn!(
            error = %error,
            failures = self.machine.consecutive_failures(),
            "Connection attempt failed"
        );
        self.schedule_reconnect();
    }

    fn on_frame(&mut self, frame: ServerFrame) {
        crate::metrics::record_frame(frame.name());
        if frame.is_auth_rejection() {
            warn!("Credential rejected by server");
            self.stop_session();
            self.last_error = Some("credential rejected".to_string());
            self.transition(ConnectionEvent::AuthRejected);
            return;
        }

        match frame {
            ServerFrame::Event { stream, update } => {
                if let Err(e) = self.dispatcher.apply(update, &UpdateSource::Stream(stream)) {
                    self.protocol_error(e);
                }
            }
            ServerFrame::Error { code, message, .. } if code == codes::GOING_AWAY => {
                info!(message = %message, "Server going away, reconnecting");
                self.stop_session();
                self.last_error = Some(message);
                self.connection_lost();
            }
            ServerFrame::Error { code, message, seq } => {
                warn!(code = %code, message = %message, seq = ?seq, "Server reported an error");
            }
            ServerFrame::InitAck { .. } => {
                self.protocol_error(ProtocolError::Unexpected("init_ack after handshake".into()));
            }
        }
    }

    fn protocol_error(&mut self, error: ProtocolError) {
        warn!(error = %error, "Dropping malformed message");
        crate::metrics::record_protocol_error(error.error_code());
        if self.errors.record(Instant::now()) && self.machine.state() == ConnectionState::Connected
        {
            warn!("Too many protocol errors, reconnecting");
            self.errors.clear();
            self.stop_session();
            self.last_error = Some(error.to_string());
            self.connection_lost();
        }
    }

    fn on_request_done(&mut self, key: String, result: Result<Response, TransportError>) {
        match result {
            Err(error) => {
                warn!(key = %key, error = %error, "Request failed, keeping it queued");
                self.queue.retry_head(&key);
                let delay = self.request_backoff.next_delay();
                self.drain_at = Some(Instant::now() + delay);
            }
            Ok(response) => {
                self.request_backoff.reset();
                let Some(entry) = self.queue.finish_head(&key) else {
                    debug!(key = %key, "Response for an entry no longer queued");
                    return;
                };
                let outcome = match response.into_result() {
                    Ok(value) => {
                        self.apply_confirmed(&value);
                        Ok(value)
                    }
                    Err(api) => {
                        info!(key = %key, code = %api.code, "Mutation rejected");
                        Err(ActionError::Rejected(api))
                    }
                };
                let label = match &outcome {
                    Ok(_) => "ok",
                    Err(e) => e.error_code(),
                };
                crate::metrics::record_action(entry.operation.as_str(), label);
                entry.complete(outcome);
                self.drain();
            }
        }
    }

    /// Mutation results carry the updates the server applied.
    fn apply_confirmed(&mut self, value: &serde_json::Value) {
        if value.get("updates").is_none() {
            return;
        }
        match serde_json::from_value::<UpdateBatch>(value.clone()) {
            Ok(batch) => {
                self.dispatcher.apply_batch(batch, &UpdateSource::Confirmed);
            }
            Err(e) => {
                let error = ProtocolError::from(e);
                warn!(error = %error, "Dropping undecodable mutation result");
                crate::metrics::record_protocol_error(error.error_code());
            }
        }
    }

    fn on_poll_done(&mut self, results: Vec<(StreamKey, Result<UpdateBatch, TransportError>)>) {
        self.polling = false;
        for (stream, result) in results {
            match result {
                Ok(batch) => {
                    let applied = self
                        .dispatcher
                        .apply_batch(batch, &UpdateSource::Poll(stream.clone()));
                    debug!(stream = %stream, applied, "Polled stream");
                }
                Err(e) => debug!(stream = %stream, error = %e, "Poll failed"),
            }
        }
        if self.machine.state() == ConnectionState::Degraded && self.poll_at.is_none() {
            self.poll_at = Some(Instant::now() + self.config.degraded_poll_interval());
        }
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    fn on_credentials_changed(&mut self) {
        if self.credentials.borrow_and_update().is_none() {
            debug!("Credential cleared");
            return;
        }
        match self.machine.state() {
            ConnectionState::Connected => {
                info!("Credential changed, re-handshaking");
                self.stop_session();
                self.transition(ConnectionEvent::CredentialsChanged);
                self.connect();
            }
            ConnectionState::Disconnected | ConnectionState::Degraded => {
                if self.transition(ConnectionEvent::CredentialsChanged).is_some() {
                    self.backoff.reset();
                    self.reconnect_at = None;
                    self.connect();
                }
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                // Restart with the new credential.
                self.reconnect_at = None;
                self.connect();
            }
        }
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    fn transition(&mut self, event: ConnectionEvent) -> Option<Transition> {
        let transition = self.machine.apply(event)?;
        info!(
            from = %transition.from,
            to = %transition.to,
            event = ?event,
            "Connection state changed"
        );
        crate::metrics::record_state(transition.to.as_str());
        if transition.to == ConnectionState::Degraded {
            warn!(
                failures = self.machine.consecutive_failures(),
                "Event stream unavailable, falling back to polling"
            );
        }
        Some(transition)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.epoch == epoch)
    }

    /// Start a connection attempt with the current credential.
    fn connect(&mut self) {
        self.stop_session();

        let Some(credential) = self.credentials.borrow_and_update().clone() else {
            warn!("No credential available");
            self.last_error = Some("no credential available".to_string());
            self.transition(ConnectionEvent::AuthRejected);
            return;
        };

        self.epoch += 1;
        self.attempt += 1;
        if self.attempt > 1 {
            crate::metrics::record_reconnect_attempt();
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let cancel = CancellationToken::new();
        session::spawn(SessionParams {
            epoch: self.epoch,
            attempt: self.attempt,
            device_id: self.device_id.clone(),
            credential,
            handshake_timeout: self.config.handshake_timeout(),
            connector: self.connector.clone(),
            outbound: outbound_rx,
            inbox: self.inbox.clone(),
            cancel: cancel.clone(),
        });
        self.session = Some(ActiveSession {
            epoch: self.epoch,
            outbound: outbound_tx,
            cancel,
        });
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
        self.session_id = None;
    }

    fn connection_lost(&mut self) {
        if self.transition(ConnectionEvent::ConnectionLost).is_some() {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let now = Instant::now();
        match self.machine.state() {
            ConnectionState::Reconnecting => {
                let delay = self.backoff.next_delay();
                debug!(delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                self.reconnect_at = Some(now + delay);
            }
            ConnectionState::Degraded => {
                self.reconnect_at = Some(now + self.config.degraded_retry_interval());
                if !self.polling {
                    self.poll_at = Some(now);
                }
                self.drain();
            }
            _ => {}
        }
    }

    fn on_reconnect_timer(&mut self) {
        match self.machine.state() {
            ConnectionState::Reconnecting => self.connect(),
            ConnectionState::Degraded => {
                if self.transition(ConnectionEvent::DegradedRetry).is_some() {
                    self.connect();
                }
            }
            _ => {}
        }
    }

    /// Send a frame on an established session. Dropped otherwise; the
    /// subscription set is re-sent after the next handshake.
    fn send_frame(&mut self, frame: ClientFrame) {
        if self.machine.state() != ConnectionState::Connected {
            return;
        }
        let Some(session) = &self.session else {
            return;
        };
        if let Err(e) = session.outbound.try_send(frame) {
            warn!(error = %e, "Outbound frame dropped");
        }
    }

    // ------------------------------------------------------------------
    // Queue and polling
    // ------------------------------------------------------------------

    /// Send the queue head if the request channel is usable.
    fn drain(&mut self) {
        if !self.machine.can_send() || self.drain_at.is_some() {
            return;
        }
        let Some((key, request)) = self.queue.begin_head() else {
            return;
        };

        let requests = self.requests.clone();
        let credential = self.credentials.borrow().clone();
        let inbox = self.inbox.clone();
        let timeout = self.config.request_timeout();
        let span = spans::action(request.operation.as_str(), &key);

        tokio::spawn(
            async move {
                debug!("Sending mutation");
                let result =
                    match tokio::time::timeout(timeout, requests.call(&request, credential.as_ref()))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(TransportError::Timeout("request")),
                    };
                let _ = inbox.send(Inbox::RequestDone { key, result }).await;
            }
            .instrument(span),
        );
    }

    fn poll(&mut self) {
        if self.machine.state() != ConnectionState::Degraded || self.polling {
            return;
        }
        let streams: Vec<StreamKey> = self.dispatcher.subscriptions().cloned().collect();
        if streams.is_empty() {
            self.poll_at = Some(Instant::now() + self.config.degraded_poll_interval());
            return;
        }

        self.polling = true;
        let requests = self.requests.clone();
        let credential = self.credentials.borrow().clone();
        let inbox = self.inbox.clone();
        let timeout = self.config.request_timeout();
        tokio::spawn(async move {
            let results = poller::poll_all(requests, credential, streams, timeout).await;
            let _ = inbox.send(Inbox::PollDone { results }).await;
        });
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    fn shutdown(&mut self) {
        info!("Sync client shutting down");
        self.stop_session();
        self.transition(ConnectionEvent::Shutdown);
        for entry in self.queue.drain() {
            crate::metrics::record_action(entry.operation.as_str(), "client_stopped");
            entry.complete(Err(ActionError::ClientStopped));
        }
        self.reconnect_at = None;
        self.poll_at = None;
        self.drain_at = None;
        self.dispatcher.stores().presence.clear();
        self.publish_status();
    }

    fn publish_status(&self) {
        crate::metrics::set_queue_depth(self.queue.len());
        let status = SyncStatus {
            state: self.machine.state(),
            consecutive_failures: self.machine.consecutive_failures(),
            queued: self.queue.len(),
            last_error: self.last_error.clone(),
            session_id: self.session_id.clone(),
            awaiting_credentials: self.machine.awaiting_credentials(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
