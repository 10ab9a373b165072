//! Sans-IO state machine for the stream handshake.
//!
//! The machine performs no I/O. The caller sends whatever [`HandshakeAction::Send`]
//! carries, feeds every received [`ServerFrame`] back in, and owns the timeout.
//!
//! ```
//! use kinsync_proto::{HandshakeAction, HandshakeMachine, HandshakeState, ServerFrame};
//!
//! let mut machine = HandshakeMachine::new("phone-1");
//! let HandshakeAction::Send(_init) = machine.start("bearer-token") else { unreachable!() };
//!
//! let ack = ServerFrame::InitAck { session_id: "s-9".into() };
//! let action = machine.feed(&ack);
//! assert!(matches!(action, Some(HandshakeAction::Complete { .. })));
//! assert_eq!(machine.state(), HandshakeState::Established);
//! ```

use std::fmt;

use crate::frame::{ClientFrame, ServerFrame};

/// Progress of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// `init` sent, waiting for `init_ack`.
    AwaitingAck,
    /// `init_ack` received.
    Established,
    /// The server refused the session or broke protocol.
    Failed,
}

/// Actions produced by the handshake state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeAction {
    /// Send this frame to the server.
    Send(ClientFrame),
    /// The session is open.
    Complete {
        /// Server-assigned session id.
        session_id: String,
    },
    /// The handshake failed.
    Fail(HandshakeError),
}

/// Errors that can end a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The server rejected the credential. Retrying with the same credential is pointless.
    Rejected {
        /// Server error code.
        code: String,
        /// Server message.
        message: String,
    },
    /// The server reported a non-authentication error.
    Server {
        /// Server error code.
        code: String,
        /// Server message.
        message: String,
    },
    /// The server sent something other than `init_ack` or `error`.
    Protocol(String),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { code, message } => write!(f, "credential rejected ({}): {}", code, message),
            Self::Server { code, message } => write!(f, "server error ({}): {}", code, message),
            Self::Protocol(detail) => write!(f, "protocol error: {}", detail),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Drives the `init` / `init_ack` exchange.
#[derive(Debug, Clone)]
pub struct HandshakeMachine {
    device_id: String,
    state: HandshakeState,
    session_id: Option<String>,
}

impl HandshakeMachine {
    /// Create a machine for the given device.
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            state: HandshakeState::Idle,
            session_id: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Session id, once established.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Start the handshake. Returns the `init` frame to send.
    #[must_use]
    pub fn start(&mut self, credential: &str) -> HandshakeAction {
        self.state = HandshakeState::AwaitingAck;
        self.session_id = None;
        HandshakeAction::Send(ClientFrame::Init {
            credential: credential.to_string(),
            device_id: self.device_id.clone(),
        })
    }

    /// Feed a received frame. Returns `None` when the frame needs no action.
    #[must_use]
    pub fn feed(&mut self, frame: &ServerFrame) -> Option<HandshakeAction> {
        if self.state != HandshakeState::AwaitingAck {
            return None;
        }

        let action = match frame {
            ServerFrame::InitAck { session_id } => {
                self.state = HandshakeState::Established;
                self.session_id = Some(session_id.clone());
                HandshakeAction::Complete {
                    session_id: session_id.clone(),
                }
            }
            ServerFrame::Error { code, message, .. } => {
                self.state = HandshakeState::Failed;
                if frame.is_auth_rejection() {
                    HandshakeAction::Fail(HandshakeError::Rejected {
                        code: code.clone(),
                        message: message.clone(),
                    })
                } else {
                    HandshakeAction::Fail(HandshakeError::Server {
                        code: code.clone(),
                        message: message.clone(),
                    })
                }
            }
            ServerFrame::Event { .. } => {
                self.state = HandshakeState::Failed;
                HandshakeAction::Fail(HandshakeError::Protocol(
                    "event received before init_ack".to_string(),
                ))
            }
        };
        Some(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, EntityUpdate, StreamKey};
    use crate::frame::codes;

    #[test]
    fn test_start_sends_init_with_credential() {
        let mut machine = HandshakeMachine::new("tablet");
        match machine.start("secret") {
            HandshakeAction::Send(ClientFrame::Init {
                credential,
                device_id,
            }) => {
                assert_eq!(credential, "secret");
                assert_eq!(device_id, "tablet");
            }
            other => panic!("expected init, got {:?}", other),
        }
        assert_eq!(machine.state(), HandshakeState::AwaitingAck);
    }

    #[test]
    fn test_unauthorized_is_rejection() {
        let mut machine = HandshakeMachine::new("tablet");
        let _ = machine.start("stale");
        let action = machine.feed(&ServerFrame::error(codes::UNAUTHORIZED, "no"));
        assert!(matches!(
            action,
            Some(HandshakeAction::Fail(HandshakeError::Rejected { .. }))
        ));
        assert_eq!(machine.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_other_error_is_server_error() {
        let mut machine = HandshakeMachine::new("tablet");
        let _ = machine.start("tok");
        let action = machine.feed(&ServerFrame::error(codes::GOING_AWAY, "restart"));
        assert!(matches!(
            action,
            Some(HandshakeAction::Fail(HandshakeError::Server { .. }))
        ));
    }

    #[test]
    fn test_event_before_ack_is_protocol_error() {
        let mut machine = HandshakeMachine::new("tablet");
        let _ = machine.start("tok");
        let event = ServerFrame::Event {
            stream: StreamKey::Order("o".into()),
            update: EntityUpdate::new(EntityKind::Order, "o", 1, serde_json::Value::Null),
        };
        assert!(matches!(
            machine.feed(&event),
            Some(HandshakeAction::Fail(HandshakeError::Protocol(_)))
        ));
    }

    #[test]
    fn test_frames_ignored_outside_handshake() {
        let mut machine = HandshakeMachine::new("tablet");
        let ack = ServerFrame::InitAck {
            session_id: "s".into(),
        };
        assert!(machine.feed(&ack).is_none());

        let _ = machine.start("tok");
        assert!(machine.feed(&ack).is_some());
        assert_eq!(machine.session_id(), Some("s"));
        // A duplicate ack after establishment needs no action.
        assert!(machine.feed(&ack).is_none());
    }
}
