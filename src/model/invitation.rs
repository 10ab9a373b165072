//! Invitations and invitation tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use subtle::ConstantTimeEq;

use crate::model::ids::{EmailAddress, FamilyId, UserId};
use crate::permissions::{PermissionSet, Role};

const TOKEN_BYTES: usize = 32;

/// Opaque single-use invitation token.
///
/// Compared in constant time. `Debug` only shows a short prefix.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvitationToken(String);

impl InvitationToken {
    /// Fresh random token: 32 bytes, URL-safe base64.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl PartialEq for InvitationToken {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for InvitationToken {}

impl Hash for InvitationToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Debug for InvitationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "InvitationToken({prefix}..)")
    }
}

/// Stored invitation status. `Expired` is normally derived at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Canceled,
    Expired,
}

impl InvitationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
        }
    }
}

/// How an invitation relates to the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationDirection {
    /// The current user issued it.
    Sent,
    /// It targets the current user's email.
    Received,
    /// Visible through family membership only.
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub token: InvitationToken,
    pub family_id: FamilyId,
    pub email: EmailAddress,
    pub inviter_id: UserId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<PermissionSet>,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
    pub last_notified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who accepted, declined or canceled it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<UserId>,
    #[serde(default)]
    pub version: u64,
}

impl Invitation {
    /// Status as observed at `now`: a pending invitation past its TTL reads as expired.
    pub fn status_at(&self, now: DateTime<Utc>, ttl: Duration) -> InvitationStatus {
        let past_deadline = self
            .created_at
            .checked_add_signed(ttl)
            .is_some_and(|deadline| now > deadline);
        if self.status == InvitationStatus::Pending && past_deadline {
            InvitationStatus::Expired
        } else {
            self.status
        }
    }

    pub fn is_actionable(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.status_at(now, ttl) == InvitationStatus::Pending
    }

    pub fn direction(&self, user_id: &UserId, email: &EmailAddress) -> InvitationDirection {
        if &self.inviter_id == user_id {
            InvitationDirection::Sent
        } else if &self.email == email {
            InvitationDirection::Received
        } else {
            InvitationDirection::Other
        }
    }
}
