//! Role-scoped permission evaluation.
//!
//! A member's effective permissions are the role template intersected with
//! any per-member restriction. Restrictions can only narrow a template.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::model::{Member, MemberStatus};

/// Fixed role assigned to every member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    FamilyCore,
    ExtendedFamily,
    Professional,
    Institutional,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::FamilyCore,
        Role::ExtendedFamily,
        Role::Professional,
        Role::Institutional,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FamilyCore => "family_core",
            Self::ExtendedFamily => "extended_family",
            Self::Professional => "professional",
            Self::Institutional => "institutional",
        }
    }

    /// Permission template for this role.
    pub fn template(&self) -> PermissionSet {
        use Grant::*;
        match self {
            Self::FamilyCore => PermissionSet::new(Grant::ALL, ActivityType::ALL),
            Self::ExtendedFamily => {
                PermissionSet::new([ViewAllData, EditOwnActivities], ActivityType::ROUTINE)
            }
            Self::Professional => PermissionSet::new(
                [ViewAllData, EditOwnActivities, BulkLog],
                ActivityType::ROUTINE,
            ),
            Self::Institutional => PermissionSet::new(
                [
                    ViewAllData,
                    ExportData,
                    AccessHistoricalData,
                    EditOwnActivities,
                    EditOthersActivities,
                    BulkLog,
                ],
                ActivityType::ALL,
            ),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of care activity a member may log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Feeding,
    Sleep,
    Diaper,
    Play,
    Note,
    Pumping,
    Bath,
    Medication,
    Growth,
    Milestone,
    Health,
}

impl ActivityType {
    pub const ALL: [ActivityType; 11] = [
        ActivityType::Feeding,
        ActivityType::Sleep,
        ActivityType::Diaper,
        ActivityType::Play,
        ActivityType::Note,
        ActivityType::Pumping,
        ActivityType::Bath,
        ActivityType::Medication,
        ActivityType::Growth,
        ActivityType::Milestone,
        ActivityType::Health,
    ];

    /// Everyday activities open to limited roles.
    pub const ROUTINE: [ActivityType; 5] = [
        ActivityType::Feeding,
        ActivityType::Sleep,
        ActivityType::Diaper,
        ActivityType::Play,
        ActivityType::Note,
    ];
}

/// Capabilities that are either granted or not, independent of activity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grant {
    ViewAllData,
    EditChildProfiles,
    InviteMembers,
    ManageSettings,
    ExportData,
    AccessHistoricalData,
    EditOwnActivities,
    EditOthersActivities,
    BulkLog,
}

impl Grant {
    pub const ALL: [Grant; 9] = [
        Grant::ViewAllData,
        Grant::EditChildProfiles,
        Grant::InviteMembers,
        Grant::ManageSettings,
        Grant::ExportData,
        Grant::AccessHistoricalData,
        Grant::EditOwnActivities,
        Grant::EditOthersActivities,
        Grant::BulkLog,
    ];
}

/// A question asked of the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ViewAllData,
    EditChildProfiles,
    InviteMembers,
    ManageSettings,
    ExportData,
    AccessHistoricalData,
    EditOwnActivities,
    EditOthersActivities,
    BulkLog,
    LogActivity(ActivityType),
}

impl Capability {
    /// Every capability the evaluator knows about.
    pub fn all() -> impl Iterator<Item = Capability> {
        Grant::ALL
            .into_iter()
            .map(Capability::from)
            .chain(ActivityType::ALL.into_iter().map(Capability::LogActivity))
    }
}

impl From<Grant> for Capability {
    fn from(grant: Grant) -> Self {
        match grant {
            Grant::ViewAllData => Self::ViewAllData,
            Grant::EditChildProfiles => Self::EditChildProfiles,
            Grant::InviteMembers => Self::InviteMembers,
            Grant::ManageSettings => Self::ManageSettings,
            Grant::ExportData => Self::ExportData,
            Grant::AccessHistoricalData => Self::AccessHistoricalData,
            Grant::EditOwnActivities => Self::EditOwnActivities,
            Grant::EditOthersActivities => Self::EditOthersActivities,
            Grant::BulkLog => Self::BulkLog,
        }
    }
}

/// A set of grants plus the activity types that may be logged.
///
/// Used both for role templates and for per-member restrictions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default)]
    grants: BTreeSet<Grant>,
    #[serde(default)]
    activity_types: BTreeSet<ActivityType>,
}

impl PermissionSet {
    pub fn new(
        grants: impl IntoIterator<Item = Grant>,
        activity_types: impl IntoIterator<Item = ActivityType>,
    ) -> Self {
        Self {
            grants: grants.into_iter().collect(),
            activity_types: activity_types.into_iter().collect(),
        }
    }

    /// The empty set.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::LogActivity(activity) => self.activity_types.contains(&activity),
            Capability::ViewAllData => self.grants.contains(&Grant::ViewAllData),
            Capability::EditChildProfiles => self.grants.contains(&Grant::EditChildProfiles),
            Capability::InviteMembers => self.grants.contains(&Grant::InviteMembers),
            Capability::ManageSettings => self.grants.contains(&Grant::ManageSettings),
            Capability::ExportData => self.grants.contains(&Grant::ExportData),
            Capability::AccessHistoricalData => {
                self.grants.contains(&Grant::AccessHistoricalData)
            }
            Capability::EditOwnActivities => self.grants.contains(&Grant::EditOwnActivities),
            Capability::EditOthersActivities => {
                self.grants.contains(&Grant::EditOthersActivities)
            }
            Capability::BulkLog => self.grants.contains(&Grant::BulkLog),
        }
    }

    pub fn intersect(&self, other: &PermissionSet) -> PermissionSet {
        PermissionSet {
            grants: self.grants.intersection(&other.grants).copied().collect(),
            activity_types: self
                .activity_types
                .intersection(&other.activity_types)
                .copied()
                .collect(),
        }
    }

    pub fn is_subset(&self, other: &PermissionSet) -> bool {
        self.grants.is_subset(&other.grants) && self.activity_types.is_subset(&other.activity_types)
    }
}

/// Effective permissions for a role with an optional restriction applied.
pub fn effective_permissions(role: Role, restriction: Option<&PermissionSet>) -> PermissionSet {
    let template = role.template();
    match restriction {
        Some(restriction) => template.intersect(restriction),
        None => template,
    }
}

/// Whether `member` may exercise `capability`.
///
/// Members that are not active can do nothing.
pub fn can_perform(member: &Member, capability: Capability) -> bool {
    if member.status != MemberStatus::Active {
        return false;
    }
    effective_permissions(member.role, member.restrictions.as_ref()).allows(capability)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EmailAddress, FamilyId, UserId};
    use chrono::Utc;

    fn member(role: Role, restrictions: Option<PermissionSet>) -> Member {
        Member {
            family_id: FamilyId::new("f-1"),
            user_id: UserId::new("u-1"),
            role,
            status: MemberStatus::Active,
            display_name: "Sam".into(),
            email: EmailAddress::parse("sam@example.com").unwrap(),
            restrictions,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn test_family_core_has_everything() {
        let m = member(Role::FamilyCore, None);
        assert!(Capability::all().all(|cap| can_perform(&m, cap)));
    }

    #[test]
    fn test_extended_family_routine_only() {
        let m = member(Role::ExtendedFamily, None);
        assert!(can_perform(&m, Capability::ViewAllData));
        assert!(can_perform(&m, Capability::LogActivity(ActivityType::Feeding)));
        assert!(!can_perform(&m, Capability::LogActivity(ActivityType::Medication)));
        assert!(!can_perform(&m, Capability::InviteMembers));
        assert!(!can_perform(&m, Capability::BulkLog));
    }

    #[test]
    fn test_professional_and_institutional_templates() {
        let pro = member(Role::Professional, None);
        assert!(can_perform(&pro, Capability::BulkLog));
        assert!(!can_perform(&pro, Capability::ExportData));
        assert!(!can_perform(&pro, Capability::LogActivity(ActivityType::Health)));

        let inst = member(Role::Institutional, None);
        assert!(can_perform(&inst, Capability::ExportData));
        assert!(can_perform(&inst, Capability::EditOthersActivities));
        assert!(can_perform(&inst, Capability::LogActivity(ActivityType::Health)));
        assert!(!can_perform(&inst, Capability::InviteMembers));
        assert!(!can_perform(&inst, Capability::ManageSettings));
    }

    #[test]
    fn test_restriction_never_widens_template() {
        let everything = PermissionSet::new(Grant::ALL, ActivityType::ALL);
        let narrow = PermissionSet::new([Grant::ViewAllData, Grant::InviteMembers], [ActivityType::Sleep]);
        for role in Role::ALL {
            for restriction in [None, Some(everything.clone()), Some(narrow.clone()), Some(PermissionSet::none())] {
                let m = member(role, restriction);
                for cap in Capability::all() {
                    if can_perform(&m, cap) {
                        assert!(
                            role.template().allows(cap),
                            "{role} with restriction granted {cap:?} beyond template"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_restriction_narrows() {
        let restriction = PermissionSet::new([Grant::ViewAllData], [ActivityType::Feeding]);
        let m = member(Role::FamilyCore, Some(restriction));
        assert!(can_perform(&m, Capability::ViewAllData));
        assert!(can_perform(&m, Capability::LogActivity(ActivityType::Feeding)));
        assert!(!can_perform(&m, Capability::InviteMembers));
        assert!(!can_perform(&m, Capability::LogActivity(ActivityType::Sleep)));
    }

    #[test]
    fn test_inactive_member_can_do_nothing() {
        for status in [MemberStatus::Inactive, MemberStatus::Suspended, MemberStatus::Expired] {
            let mut m = member(Role::FamilyCore, None);
            m.status = status;
            assert!(Capability::all().all(|cap| !can_perform(&m, cap)));
        }
    }

    #[test]
    fn test_effective_is_subset_of_template() {
        let restriction = PermissionSet::new([Grant::BulkLog, Grant::ExportData], ActivityType::ALL);
        for role in Role::ALL {
            let eff = effective_permissions(role, Some(&restriction));
            assert!(eff.is_subset(&role.template()));
        }
    }

    #[test]
    fn test_permission_set_serde() {
        let set: PermissionSet = serde_json::from_str(
            r#"{"grants": ["view_all_data"], "activity_types": ["feeding", "note"]}"#,
        )
        .unwrap();
        assert!(set.allows(Capability::ViewAllData));
        assert!(set.allows(Capability::LogActivity(ActivityType::Note)));
        assert!(!set.allows(Capability::BulkLog));
    }
}
