//! Error types for the kinsync wire protocol.

use thiserror::Error;

use crate::entity::EntityKind;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The frame was not valid JSON or did not match any known shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A well-formed frame arrived where the protocol does not allow it.
    #[error("unexpected frame: {0}")]
    Unexpected(String),

    /// The request named an operation this contract does not define.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// An entity update carried a payload that does not decode as its kind.
    #[error("invalid {kind} payload for {id}: {reason}")]
    InvalidPayload {
        /// Entity kind the payload claimed to be.
        kind: EntityKind,
        /// Entity id from the envelope.
        id: String,
        /// Decoder message.
        reason: String,
    },
}

impl ProtocolError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::Unexpected(_) => "unexpected",
            Self::UnknownOperation(_) => "unknown_operation",
            Self::InvalidPayload { .. } => "invalid_payload",
        }
    }
}
