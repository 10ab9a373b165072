//! Family registry: families, members and invitations as last seen from the server.
//!
//! Writes are crate-private and come only from the update dispatcher. Every
//! read returns an owned snapshot.
//!
//! Invitation writes go through [`FamilyRegistry::apply_invitation`], which
//! holds the family's shard lock while it checks the stored status, swaps in
//! the new record and (for an acceptance) inserts the member. An invitation
//! therefore leaves `Pending` exactly once and an acceptance yields exactly
//! one member.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use thiserror::Error;

use crate::model::{
    EmailAddress, Family, FamilyId, Invitation, InvitationStatus, InvitationToken, Member, UserId,
};
use crate::state::dashmap_ext::DashMapExt;

#[derive(Debug, Default)]
struct FamilyRecord {
    family: Option<Family>,
    members: HashMap<UserId, Member>,
    invitations: HashMap<InvitationToken, Invitation>,
}

/// Owned copy of everything known about one family.
#[derive(Debug, Clone, Default)]
pub struct FamilySnapshot {
    pub family: Option<Family>,
    pub members: Vec<Member>,
    pub invitations: Vec<Invitation>,
}

/// What [`FamilyRegistry::apply_invitation`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationApplied {
    /// First time this token was seen.
    Inserted,
    /// Still pending; details such as `last_notified_at` changed.
    Updated,
    /// Left `Pending`.
    Resolved { member_created: bool },
    /// Identical to what is stored.
    Unchanged,
}

/// Invitation writes the registry refuses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryConflict {
    #[error("invitation already resolved as {}", .0.as_str())]
    AlreadyResolved(InvitationStatus),
    #[error("stale invitation version {incoming} (stored {stored})")]
    StaleVersion { incoming: u64, stored: u64 },
    #[error("accepted invitation carries no member")]
    MissingMember,
    #[error("member {user} does not belong to family {family}")]
    WrongFamily { family: FamilyId, user: UserId },
}

pub struct FamilyRegistry {
    families: DashMap<FamilyId, FamilyRecord>,
    tokens: DashMap<InvitationToken, FamilyId>,
    invitation_ttl: Duration,
}

impl FamilyRegistry {
    pub fn new(invitation_ttl: Duration) -> Self {
        Self {
            families: DashMap::new(),
            tokens: DashMap::new(),
            invitation_ttl,
        }
    }

    pub fn invitation_ttl(&self) -> Duration {
        self.invitation_ttl
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn family(&self, id: &FamilyId) -> Option<Family> {
        self.families.get(id).and_then(|r| r.family.clone())
    }

    pub fn family_ids(&self) -> Vec<FamilyId> {
        self.families.iter().map(|e| e.key().clone()).collect()
    }

    pub fn members(&self, family_id: &FamilyId) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .families
            .get(family_id)
            .map(|r| r.members.values().cloned().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        members
    }

    pub fn member(&self, family_id: &FamilyId, user_id: &UserId) -> Option<Member> {
        self.families
            .get(family_id)
            .and_then(|r| r.members.get(user_id).cloned())
    }

    /// Families in which `user_id` has a membership record.
    pub fn memberships(&self, user_id: &UserId) -> Vec<Member> {
        self.families
            .iter()
            .filter_map(|e| e.members.get(user_id).cloned())
            .collect()
    }

    pub fn invitations(&self, family_id: &FamilyId) -> Vec<Invitation> {
        let mut invitations: Vec<Invitation> = self
            .families
            .get(family_id)
            .map(|r| r.invitations.values().cloned().collect())
            .unwrap_or_default();
        invitations.sort_by_key(|inv| inv.created_at);
        invitations
    }

    pub fn invitation(&self, token: &InvitationToken) -> Option<Invitation> {
        let family_id = self.tokens.get_cloned(token)?;
        self.families
            .get(&family_id)
            .and_then(|r| r.invitations.get(token).cloned())
    }

    /// The pending, unexpired invitation for `email` in `family_id`, if any.
    pub fn pending_invitation(
        &self,
        family_id: &FamilyId,
        email: &EmailAddress,
        now: DateTime<Utc>,
    ) -> Option<Invitation> {
        let record = self.families.get(family_id)?;
        record
            .invitations
            .values()
            .find(|inv| &inv.email == email && inv.is_actionable(now, self.invitation_ttl))
            .cloned()
    }

    /// Invitations addressed to `email` in any family.
    pub fn received_invitations(&self, email: &EmailAddress) -> Vec<Invitation> {
        self.families
            .iter()
            .flat_map(|e| {
                e.invitations
                    .values()
                    .filter(|inv| &inv.email == email)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn snapshot(&self, family_id: &FamilyId) -> FamilySnapshot {
        FamilySnapshot {
            family: self.family(family_id),
            members: self.members(family_id),
            invitations: self.invitations(family_id),
        }
    }

    // ------------------------------------------------------------------
    // Writes (dispatcher only)
    // ------------------------------------------------------------------

    pub(crate) fn upsert_family(&self, family: Family) {
        let id = family.id.clone();
        self.families.entry(id).or_default().family = Some(family);
    }

    pub(crate) fn upsert_member(&self, member: Member) {
        self.families
            .entry(member.family_id.clone())
            .or_default()
            .members
            .insert(member.user_id.clone(), member);
    }

    /// Store an invitation record, enforcing the single exit from `Pending`.
    pub(crate) fn apply_invitation(
        &self,
        invitation: Invitation,
        member: Option<Member>,
    ) -> Result<InvitationApplied, RegistryConflict> {
        if let Some(m) = &member {
            if m.family_id != invitation.family_id {
                return Err(RegistryConflict::WrongFamily {
                    family: invitation.family_id.clone(),
                    user: m.user_id.clone(),
                });
            }
        }
        let accepting = invitation.status == InvitationStatus::Accepted;
        if accepting && member.is_none() {
            return Err(RegistryConflict::MissingMember);
        }

        let token = invitation.token.clone();
        let family_id = invitation.family_id.clone();
        let mut record = self.families.entry(family_id.clone()).or_default();

        let outcome = match record.invitations.get(&token) {
            None => {
                if invitation.status.is_terminal() {
                    InvitationApplied::Resolved {
                        member_created: accepting,
                    }
                } else {
                    InvitationApplied::Inserted
                }
            }
            Some(stored) if stored.status == InvitationStatus::Pending => {
                if invitation.version < stored.version {
                    return Err(RegistryConflict::StaleVersion {
                        incoming: invitation.version,
                        stored: stored.version,
                    });
                }
                if invitation.status == InvitationStatus::Pending {
                    if stored == &invitation {
                        InvitationApplied::Unchanged
                    } else {
                        InvitationApplied::Updated
                    }
                } else if invitation.version == stored.version {
                    return Err(RegistryConflict::StaleVersion {
                        incoming: invitation.version,
                        stored: stored.version,
                    });
                } else {
                    InvitationApplied::Resolved {
                        member_created: accepting,
                    }
                }
            }
            Some(stored) => {
                if stored == &invitation {
                    InvitationApplied::Unchanged
                } else {
                    return Err(RegistryConflict::AlreadyResolved(stored.status));
                }
            }
        };

        if outcome == InvitationApplied::Unchanged {
            return Ok(outcome);
        }
        if let (true, Some(member)) = (accepting, member) {
            record.members.insert(member.user_id.clone(), member);
        }
        record.invitations.insert(token.clone(), invitation);
        drop(record);
        self.tokens.insert(token, family_id);
        Ok(outcome)
    }

    pub(crate) fn clear(&self) {
        self.families.clear();
        self.tokens.clear();
    }
}

impl Default for FamilyRegistry {
    fn default() -> Self {
        Self::new(Duration::hours(168))
    }
}
