//! Event-stream frames.
//!
//! Every frame is a JSON object tagged by `"type"`:
//!
//! ```text
//! client -> server   init, subscribe, unsubscribe, error
//! server -> client   init_ack, event, error
//! ```

use serde::{Deserialize, Serialize};

use crate::entity::{EntityUpdate, StreamKey};
use crate::error::Result;

/// Error codes carried by `error` frames and API errors.
pub mod codes {
    /// The credential in `init` was rejected.
    pub const UNAUTHORIZED: &str = "unauthorized";
    /// The credential expired; the client must refresh it.
    pub const CREDENTIAL_EXPIRED: &str = "credential_expired";
    /// The peer could not parse a frame.
    pub const MALFORMED: &str = "malformed";
    /// The caller lacks the capability for the operation.
    pub const FORBIDDEN: &str = "forbidden";
    /// The referenced entity does not exist.
    pub const NOT_FOUND: &str = "not_found";
    /// The entity is in a state that makes the operation not actionable.
    pub const CONFLICT: &str = "conflict";
    /// A pending invitation already exists for the family/email pair.
    pub const DUPLICATE_PENDING: &str = "duplicate_pending_invitation";
    /// The invitation expired.
    pub const EXPIRED: &str = "expired";
    /// The invitee identity does not match the invitation target.
    pub const EMAIL_MISMATCH: &str = "email_mismatch";
    /// Input failed validation.
    pub const INVALID_INPUT: &str = "invalid_input";
    /// The server is going away; the client should reconnect.
    pub const GOING_AWAY: &str = "going_away";
    /// Unclassified server failure.
    pub const INTERNAL: &str = "internal";
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Opens the session with the current bearer credential.
    Init {
        /// Bearer credential.
        credential: String,
        /// Stable identifier of this device.
        device_id: String,
    },
    /// Start receiving events for a stream.
    Subscribe {
        /// Local sequence number of the request.
        seq: u64,
        /// Stream to subscribe to.
        stream: StreamKey,
    },
    /// Stop receiving events for a stream.
    Unsubscribe {
        /// Local sequence number of the request.
        seq: u64,
        /// Stream to release.
        stream: StreamKey,
    },
    /// Client-side error report.
    Error {
        /// Error code from [`codes`].
        code: String,
        /// Human readable detail.
        message: String,
    },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Acknowledges `init`; subscriptions may be sent after this.
    InitAck {
        /// Server-assigned session id.
        session_id: String,
    },
    /// A state change on a subscribed stream.
    Event {
        /// Stream the event was delivered for.
        stream: StreamKey,
        /// The change itself.
        update: EntityUpdate,
    },
    /// Server-side error report.
    Error {
        /// Error code from [`codes`].
        code: String,
        /// Human readable detail.
        message: String,
        /// Sequence number of the client frame this refers to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

impl ClientFrame {
    /// Short frame name for logging and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize into a text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerFrame {
    /// Short frame name for logging and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitAck { .. } => "init_ack",
            Self::Event { .. } => "event",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize into a text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Shorthand for an `error` frame.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
            seq: None,
        }
    }

    /// Whether this is an authentication rejection.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Error { code, .. }
            if code == codes::UNAUTHORIZED || code == codes::CREDENTIAL_EXPIRED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use crate::error::ProtocolError;
    use serde_json::json;

    #[test]
    fn test_init_wire_shape() {
        let frame = ClientFrame::Init {
            credential: "tok".into(),
            device_id: "phone".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "init", "credential": "tok", "device_id": "phone"})
        );
    }

    #[test]
    fn test_decode_event() {
        let raw = r#"{
            "type": "event",
            "stream": {"kind": "order", "id": "o-1"},
            "update": {"kind": "order", "id": "o-1", "timestamp": 100, "payload": {"state": "packed"}}
        }"#;
        match ServerFrame::decode(raw).unwrap() {
            ServerFrame::Event { stream, update } => {
                assert_eq!(stream, StreamKey::Order("o-1".into()));
                assert_eq!(update.kind, EntityKind::Order);
                assert_eq!(update.timestamp, 100);
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_error_without_seq_omits_field() {
        let text = ServerFrame::error(codes::UNAUTHORIZED, "bad token")
            .encode()
            .unwrap();
        assert!(!text.contains("seq"));
        assert!(ServerFrame::decode(&text).unwrap().is_auth_rejection());
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let err = ServerFrame::decode(r#"{"type":"teleport"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert!(ServerFrame::decode("not json").is_err());
    }
}
