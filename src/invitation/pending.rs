//! In-flight invitation actions.
//!
//! An action is pending from the moment it is submitted until the server
//! confirms or rejects it. Only one action may be pending per invitation;
//! pending state is tracked beside the registry and never written into it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;

use crate::model::{EmailAddress, FamilyId, InvitationToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Accept,
    Decline,
    Resend,
    Cancel,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::Resend => "resend",
            Self::Cancel => "cancel",
        }
    }
}

/// What an action is pending on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PendingKey {
    /// An existing invitation.
    Token(InvitationToken),
    /// An invitation being created for a (family, email) pair.
    Create {
        family_id: FamilyId,
        email: EmailAddress,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub kind: ActionKind,
    /// Key of the queued mutation; usable with `SyncHandle::cancel_queued`.
    pub idempotency_key: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct PendingActions {
    actions: Arc<DashMap<PendingKey, PendingAction>>,
}

impl PendingActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for `action`. `None` if another action already holds it.
    ///
    /// The claim is released when the returned guard drops.
    pub(crate) fn reserve(&self, key: PendingKey, action: PendingAction) -> Option<PendingGuard> {
        match self.actions.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(action);
                Some(PendingGuard {
                    actions: Arc::clone(&self.actions),
                    key,
                })
            }
        }
    }

    pub fn get(&self, key: &PendingKey) -> Option<PendingAction> {
        self.actions.get(key).map(|a| a.value().clone())
    }

    /// All pending actions, oldest first.
    pub fn list(&self) -> Vec<(PendingKey, PendingAction)> {
        let mut all: Vec<_> = self
            .actions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by_key(|(_, action)| action.submitted_at);
        all
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Releases a pending claim on drop.
pub(crate) struct PendingGuard {
    actions: Arc<DashMap<PendingKey, PendingAction>>,
    key: PendingKey,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.actions.remove(&self.key);
    }
}
