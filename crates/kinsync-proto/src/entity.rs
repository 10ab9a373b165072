//! Entity update envelopes and stream keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kinds of entity the sync service replicates to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A family record (name, description).
    Family,
    /// A membership record within a family.
    Member,
    /// An invitation, keyed by its token.
    Invitation,
    /// A caregiver presence status.
    Presence,
    /// An order placed for the household.
    Order,
    /// A prediction delivered on a prediction channel.
    Prediction,
    /// Subscription / billing status of a family.
    Subscription,
}

impl EntityKind {
    /// Wire name of the kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Family => "family",
            Self::Member => "member",
            Self::Invitation => "invitation",
            Self::Presence => "presence",
            Self::Order => "order",
            Self::Prediction => "prediction",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single state change for one entity.
///
/// `timestamp` is monotonic per `(kind, id)`: the server never reuses a value
/// for the same entity, so a receiver keeps only strictly newer updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity id, unique within its kind.
    pub id: String,
    /// Per-entity monotonic timestamp or sequence number.
    pub timestamp: u64,
    /// Kind-specific record, decoded by the receiver.
    pub payload: Value,
}

impl EntityUpdate {
    /// Create a new update envelope.
    pub fn new(kind: EntityKind, id: impl Into<String>, timestamp: u64, payload: Value) -> Self {
        Self {
            kind,
            id: id.into(),
            timestamp,
            payload,
        }
    }
}

/// A list of updates returned by a mutation or a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    /// Updates in server order.
    #[serde(default)]
    pub updates: Vec<EntityUpdate>,
}

/// A subscribable entity stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StreamKey {
    /// Family record, its members, invitations and subscription status.
    Family(String),
    /// Caregiver presence within a family.
    Presence(String),
    /// A single order.
    Order(String),
    /// A prediction channel.
    Prediction(String),
}

impl StreamKey {
    /// The id part of the key.
    pub fn id(&self) -> &str {
        match self {
            Self::Family(id) | Self::Presence(id) | Self::Order(id) | Self::Prediction(id) => id,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Family(id) => write!(f, "family:{}", id),
            Self::Presence(id) => write!(f, "presence:{}", id),
            Self::Order(id) => write!(f, "order:{}", id),
            Self::Prediction(id) => write!(f, "prediction:{}", id),
        }
    }
}
