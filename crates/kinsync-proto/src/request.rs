//! Request/response envelopes for the mutation and query channel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Operations understood by the request channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Create an invitation.
    #[serde(rename = "invitation.create")]
    InviteMember,
    /// Accept an invitation by token.
    #[serde(rename = "invitation.accept")]
    AcceptInvitation,
    /// Decline an invitation by token.
    #[serde(rename = "invitation.decline")]
    DeclineInvitation,
    /// Re-deliver an invitation.
    #[serde(rename = "invitation.resend")]
    ResendInvitation,
    /// Cancel an invitation.
    #[serde(rename = "invitation.cancel")]
    CancelInvitation,
    /// Fetch a family record.
    #[serde(rename = "family.get")]
    FetchFamily,
    /// Fetch the members of a family.
    #[serde(rename = "family.members")]
    FetchMembers,
    /// Fetch the invitations of a family.
    #[serde(rename = "family.invitations")]
    FetchInvitations,
    /// Fetch caregiver presence of a family.
    #[serde(rename = "presence.list")]
    FetchPresence,
    /// Fetch an order.
    #[serde(rename = "order.get")]
    FetchOrder,
    /// Fetch the latest predictions of a channel.
    #[serde(rename = "prediction.get")]
    FetchPrediction,
}

impl Operation {
    /// All operations, in declaration order.
    pub const ALL: [Operation; 11] = [
        Self::InviteMember,
        Self::AcceptInvitation,
        Self::DeclineInvitation,
        Self::ResendInvitation,
        Self::CancelInvitation,
        Self::FetchFamily,
        Self::FetchMembers,
        Self::FetchInvitations,
        Self::FetchPresence,
        Self::FetchOrder,
        Self::FetchPrediction,
    ];

    /// Wire name of the operation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InviteMember => "invitation.create",
            Self::AcceptInvitation => "invitation.accept",
            Self::DeclineInvitation => "invitation.decline",
            Self::ResendInvitation => "invitation.resend",
            Self::CancelInvitation => "invitation.cancel",
            Self::FetchFamily => "family.get",
            Self::FetchMembers => "family.members",
            Self::FetchInvitations => "family.invitations",
            Self::FetchPresence => "presence.list",
            Self::FetchOrder => "order.get",
            Self::FetchPrediction => "prediction.get",
        }
    }

    /// Whether the operation changes server state (and so needs an idempotency key).
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::InviteMember
                | Self::AcceptInvitation
                | Self::DeclineInvitation
                | Self::ResendInvitation
                | Self::CancelInvitation
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownOperation(s.to_string()))
    }
}

/// A call on the request channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Operation to run.
    pub operation: Operation,
    /// Operation-specific input object.
    pub input: Value,
    /// Key that lets the server discard a replayed mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Request {
    /// A query (no idempotency key).
    pub fn query(operation: Operation, input: Value) -> Self {
        Self {
            operation,
            input,
            idempotency_key: None,
        }
    }

    /// A mutation carrying its idempotency key.
    pub fn mutation(operation: Operation, input: Value, idempotency_key: impl Into<String>) -> Self {
        Self {
            operation,
            input,
            idempotency_key: Some(idempotency_key.into()),
        }
    }
}

/// Structured error returned by the request channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code from [`crate::codes`].
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// Input field the error refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ApiError {
    /// Create an error without a field reference.
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: None,
        }
    }

    /// Attach a field reference.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} ({}): {}", self.code, field, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// Response to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl Response {
    /// Successful response.
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response.
    pub fn err(error: ApiError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Collapse into a `Result`. A failure without an error body becomes an
    /// `internal` error.
    pub fn into_result(self) -> Result<Value, ApiError> {
        if self.success {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| ApiError::new(crate::codes::INTERNAL, "request failed without detail")))
        }
    }
}
