//! Domain records replicated to the device.
//!
//! - [`ids`]: identifier newtypes and email normalization
//! - [`family`]: families and memberships
//! - [`invitation`]: invitations and their single-use tokens
//! - [`presence`]: caregiver presence events and records

pub mod family;
pub mod ids;
pub mod invitation;
pub mod presence;

pub use family::{Family, Member, MemberStatus};
pub use ids::{EmailAddress, FamilyId, OrderId, PredictionChannelId, UserId};
pub use invitation::{Invitation, InvitationDirection, InvitationStatus, InvitationToken};
pub use presence::{CaregiverPresence, PresenceEvent, PresenceStatus};
