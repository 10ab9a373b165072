//! Caregiver presence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{FamilyId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Caring,
    Away,
    Offline,
}

impl PresenceStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Online | Self::Caring)
    }
}

/// A presence change as carried by the event stream.
///
/// `timestamp` is milliseconds since the Unix epoch on the server clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub family_id: FamilyId,
    pub user_id: UserId,
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    pub timestamp: u64,
}

/// Latest known presence of one caregiver in one family.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaregiverPresence {
    pub family_id: FamilyId,
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub activity: Option<String>,
    pub timestamp: u64,
    pub last_seen: DateTime<Utc>,
}

impl From<PresenceEvent> for CaregiverPresence {
    fn from(event: PresenceEvent) -> Self {
        let last_seen = i64::try_from(event.timestamp)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            family_id: event.family_id,
            user_id: event.user_id,
            status: event.status,
            activity: event.activity,
            timestamp: event.timestamp,
            last_seen,
        }
    }
}
