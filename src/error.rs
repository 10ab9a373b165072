//! Unified error handling for kinsync.
//!
//! Every error maps onto one [`ErrorKind`] and exposes a static
//! `error_code()` for metric labels.

use kinsync_proto::{codes, ApiError, ProtocolError};
use thiserror::Error;

/// Error taxonomy shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input. Never retried.
    Validation,
    /// The target changed under us or is no longer actionable. Never retried.
    Conflict,
    /// The caller lacks the capability. Never retried.
    Authorization,
    /// The target does not exist. Never retried.
    NotFound,
    /// Network failure. Drives reconnection; surfaces as status only.
    Transport,
    /// Undecodable or unexpected data. Logged and dropped.
    Protocol,
}

impl ErrorKind {
    /// Classify a server error code.
    pub fn from_code(code: &str) -> Self {
        match code {
            codes::INVALID_INPUT => Self::Validation,
            codes::CONFLICT | codes::DUPLICATE_PENDING | codes::EXPIRED => Self::Conflict,
            codes::FORBIDDEN
            | codes::UNAUTHORIZED
            | codes::CREDENTIAL_EXPIRED
            | codes::EMAIL_MISMATCH => Self::Authorization,
            codes::NOT_FOUND => Self::NotFound,
            codes::GOING_AWAY => Self::Transport,
            _ => Self::Protocol,
        }
    }

    /// Terminal kinds go back to the caller as-is.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Transport)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
        }
    }
}

// ============================================================================
// Action Errors (mutations submitted through the sync client)
// ============================================================================

/// Outcome of a mutation that did not succeed.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// The server definitively rejected the request.
    #[error("rejected: {0}")]
    Rejected(ApiError),

    #[error("invalid input: {0}")]
    Validation(String),

    /// Removed from the offline queue before it was sent.
    #[error("canceled before it was sent")]
    Canceled,

    /// The sync client shut down with the action still queued.
    #[error("sync client stopped")]
    ClientStopped,

    /// The response could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Rejected(err) => ErrorKind::from_code(&err.code),
            Self::Validation(_) => ErrorKind::Validation,
            Self::Canceled => ErrorKind::Conflict,
            Self::ClientStopped => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Get a static error code string for metrics labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Rejected(_) => match self.kind() {
                ErrorKind::Validation => "rejected_validation",
                ErrorKind::Conflict => "rejected_conflict",
                ErrorKind::Authorization => "rejected_authorization",
                ErrorKind::NotFound => "rejected_not_found",
                ErrorKind::Transport => "rejected_transport",
                ErrorKind::Protocol => "rejected_other",
            },
            Self::Validation(_) => "validation",
            Self::Canceled => "canceled",
            Self::ClientStopped => "client_stopped",
            Self::Protocol(_) => "protocol",
        }
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Canceled => "You canceled this before it was sent.",
            Self::ClientStopped => "Sync stopped before this could be sent.",
            _ => match self.kind() {
                ErrorKind::Validation => "Please check the details and try again.",
                ErrorKind::Conflict => "Someone else already changed this.",
                ErrorKind::Authorization => "You don't have permission to do that.",
                ErrorKind::NotFound => "That item doesn't exist.",
                ErrorKind::Transport => "You're offline. We'll retry when the connection is back.",
                ErrorKind::Protocol => "Something went wrong. Please try again.",
            },
        }
    }
}

impl From<ProtocolError> for ActionError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

// ============================================================================
// Invitation Errors
// ============================================================================

/// Invitation lifecycle failures.
#[derive(Debug, Clone, Error)]
pub enum InvitationError {
    #[error("invitation token not found")]
    TokenNotFound,

    /// Already accepted, declined, canceled, or another action is in flight.
    #[error("invitation already resolved")]
    AlreadyResolved,

    #[error("invitation expired")]
    Expired,

    #[error("invitation was issued to a different email")]
    EmailMismatch,

    #[error("a pending invitation already exists for {0}")]
    DuplicatePendingInvitation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("canceled before it was sent")]
    Canceled,

    #[error("sync unavailable: {0}")]
    Unavailable(String),

    /// A server error that maps onto no invitation-specific case.
    #[error("server error: {0}")]
    Server(ApiError),
}

impl InvitationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TokenNotFound => ErrorKind::NotFound,
            Self::AlreadyResolved
            | Self::Expired
            | Self::DuplicatePendingInvitation(_)
            | Self::Canceled => ErrorKind::Conflict,
            Self::EmailMismatch | Self::PermissionDenied(_) => ErrorKind::Authorization,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unavailable(_) => ErrorKind::Transport,
            Self::Server(err) => ErrorKind::from_code(&err.code),
        }
    }

    /// Get a static error code string for metrics labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TokenNotFound => "token_not_found",
            Self::AlreadyResolved => "already_resolved",
            Self::Expired => "expired",
            Self::EmailMismatch => "email_mismatch",
            Self::DuplicatePendingInvitation(_) => "duplicate_pending_invitation",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Validation(_) => "validation",
            Self::Canceled => "canceled",
            Self::Unavailable(_) => "unavailable",
            Self::Server(_) => "server",
        }
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::TokenNotFound => "That invitation doesn't exist.",
            Self::AlreadyResolved => "Someone already resolved this invitation.",
            Self::Expired => "This invitation has expired. Ask for a new one.",
            Self::EmailMismatch => "This invitation was sent to a different email address.",
            Self::DuplicatePendingInvitation(_) => "An invitation to that email is already pending.",
            Self::PermissionDenied(_) => "You don't have permission to do that.",
            Self::Validation(_) => "Please check the details and try again.",
            Self::Canceled => "You canceled this before it was sent.",
            Self::Unavailable(_) => "Sync is unavailable right now.",
            Self::Server(_) => "Something went wrong. Please try again.",
        }
    }
}

impl From<ActionError> for InvitationError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::Rejected(api) => match api.code.as_str() {
                codes::NOT_FOUND => Self::TokenNotFound,
                codes::CONFLICT => Self::AlreadyResolved,
                codes::EXPIRED => Self::Expired,
                codes::EMAIL_MISMATCH => Self::EmailMismatch,
                codes::DUPLICATE_PENDING => Self::DuplicatePendingInvitation(api.message),
                codes::FORBIDDEN | codes::UNAUTHORIZED => Self::PermissionDenied(api.message),
                codes::INVALID_INPUT => Self::Validation(api.message),
                _ => Self::Server(api),
            },
            ActionError::Validation(msg) => Self::Validation(msg),
            ActionError::Canceled => Self::Canceled,
            ActionError::ClientStopped => Self::Unavailable("sync client stopped".into()),
            ActionError::Protocol(msg) => Self::Unavailable(msg),
        }
    }
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Event-stream and request-channel failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection closed")]
    Closed,

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected http status {0}")]
    Status(u16),

    /// The server refused the credential during the handshake.
    #[error("authentication rejected ({code}): {message}")]
    AuthRejected { code: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthRejected { .. } => ErrorKind::Authorization,
            Self::Protocol(_) => ErrorKind::Protocol,
            _ => ErrorKind::Transport,
        }
    }

    /// Get a static error code string for metrics labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Closed => "closed",
            Self::Timeout(_) => "timeout",
            Self::WebSocket(_) => "websocket",
            Self::Http(_) => "http",
            Self::Status(_) => "http_status",
            Self::AuthRejected { .. } => "auth_rejected",
            Self::Protocol(_) => "protocol",
        }
    }
}
