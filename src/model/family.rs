//! Families and memberships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{EmailAddress, FamilyId, UserId};
use crate::permissions::{effective_permissions, PermissionSet, Role};

/// A household group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Family {
    pub id: FamilyId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Inactive,
    Suspended,
    Expired,
}

/// A user's membership in one family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub family_id: FamilyId,
    pub user_id: UserId,
    pub role: Role,
    pub status: MemberStatus,
    pub display_name: String,
    pub email: EmailAddress,
    /// Narrows the role template; never widens it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<PermissionSet>,
    pub joined_at: DateTime<Utc>,
}

impl Member {
    pub fn permissions(&self) -> PermissionSet {
        effective_permissions(self.role, self.restrictions.as_ref())
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}
