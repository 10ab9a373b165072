//! State management module.
//!
//! Holds the stores the dispatcher writes and the UI reads:
//! - [`registry`]: families, members, invitations
//! - [`presence`]: latest presence per caregiver
//! - [`projection`]: orders, predictions, subscription status

mod dashmap_ext;
pub mod presence;
pub mod projection;
pub mod registry;

pub use presence::{PresenceAggregator, PresenceSummary};
pub use projection::{Projected, ProjectionKind, Projections};
pub use registry::{FamilyRegistry, FamilySnapshot, InvitationApplied, RegistryConflict};

use std::sync::Arc;
use std::time::Duration;

use crate::model::{FamilyId, InvitationToken, UserId};

/// A change applied to one of the stores, published for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Family(FamilyId),
    Member { family_id: FamilyId, user_id: UserId },
    Invitation { family_id: FamilyId, token: InvitationToken },
    Presence { family_id: FamilyId, user_id: UserId },
    Order(String),
    Prediction(String),
    Subscription(String),
}

/// The set of stores owned by one client.
#[derive(Clone)]
pub struct Stores {
    pub registry: Arc<FamilyRegistry>,
    pub presence: Arc<PresenceAggregator>,
    pub projections: Arc<Projections>,
}

impl Stores {
    pub fn new(invitation_ttl: chrono::Duration, liveness_window: Duration) -> Self {
        Self {
            registry: Arc::new(FamilyRegistry::new(invitation_ttl)),
            presence: Arc::new(PresenceAggregator::new(liveness_window)),
            projections: Arc::new(Projections::new()),
        }
    }

    /// Drop everything held for the session.
    pub fn clear(&self) {
        self.registry.clear();
        self.presence.clear();
        self.projections.clear();
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::new(chrono::Duration::hours(168), Duration::from_secs(300))
    }
}
