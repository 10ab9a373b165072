//! Connection state machine.
//!
//! ```text
//!   Disconnected ──start──► Connecting ──init_ack──► Connected
//!        ▲                      │                        │ lost, new credential
//!        │ auth rejected        │ failure                ▼
//!        └────────────────── Reconnecting ◄──────────────┘
//!                               │ failures > max
//!                               ▼
//!                           Degraded ──retry interval──► Connecting
//! ```
//!
//! The machine is pure: the client actor feeds it events and acts on the
//! transitions it reports.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Degraded,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Begin connecting.
    Start,
    /// `init_ack` received in time.
    HandshakeAcked,
    /// A connection attempt failed (transport error or handshake timeout).
    AttemptFailed,
    /// An established connection dropped.
    ConnectionLost,
    /// The server rejected the credential.
    AuthRejected,
    /// A new credential was published.
    CredentialsChanged,
    /// The degraded retry interval elapsed.
    DegradedRetry,
    /// The user asked to try again now.
    ManualRetry,
    /// Explicit teardown.
    Shutdown,
}

/// A state change reported by [`SyncConnection::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

#[derive(Debug, Clone)]
pub struct SyncConnection {
    state: ConnectionState,
    consecutive_failures: u32,
    max_reconnect_attempts: u32,
    /// The current attempt was started from degraded mode.
    probing_from_degraded: bool,
    /// Waiting for a new credential after a rejection.
    awaiting_credentials: bool,
    stopped: bool,
    seq: u64,
}

impl SyncConnection {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            max_reconnect_attempts,
            probing_from_degraded: false,
            awaiting_credentials: false,
            stopped: false,
            seq: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn awaiting_credentials(&self) -> bool {
        self.awaiting_credentials
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether queued mutations may be sent through the request channel.
    pub fn can_send(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Degraded
        )
    }

    /// Next local sequence number. Strictly increasing for the client's lifetime.
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Feed an event. Returns the transition if the state changed.
    pub fn apply(&mut self, event: ConnectionEvent) -> Option<Transition> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        if self.stopped {
            return None;
        }

        let next = match (self.state, event) {
            (_, E::Shutdown) => {
                self.stopped = true;
                S::Disconnected
            }

            (S::Disconnected, E::Start) if !self.awaiting_credentials => S::Connecting,
            (S::Disconnected, E::CredentialsChanged | E::ManualRetry) => {
                self.awaiting_credentials = false;
                self.consecutive_failures = 0;
                S::Connecting
            }

            (S::Connecting | S::Reconnecting, E::HandshakeAcked) => {
                self.consecutive_failures = 0;
                self.probing_from_degraded = false;
                S::Connected
            }

            (S::Connecting | S::Reconnecting, E::AttemptFailed) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.probing_from_degraded
                    || self.consecutive_failures > self.max_reconnect_attempts
                {
                    self.probing_from_degraded = false;
                    S::Degraded
                } else {
                    S::Reconnecting
                }
            }

            (S::Connected, E::ConnectionLost | E::CredentialsChanged) => S::Reconnecting,
            (S::Connecting | S::Reconnecting, E::CredentialsChanged | E::ManualRetry) => {
                self.state
            }

            (S::Connecting | S::Connected | S::Reconnecting, E::AuthRejected) => {
                self.awaiting_credentials = true;
                self.probing_from_degraded = false;
                S::Disconnected
            }

            (S::Degraded, E::DegradedRetry | E::ManualRetry | E::CredentialsChanged) => {
                self.probing_from_degraded = true;
                S::Connecting
            }

            _ => return None,
        };

        if next == self.state {
            return None;
        }
        let transition = Transition {
            from: self.state,
            to: next,
        };
        self.state = next;
        Some(transition)
    }
}
