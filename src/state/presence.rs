//! Presence aggregation.
//!
//! Keeps the latest presence per (family, user). A record is replaced only
//! by a strictly newer timestamp. Staleness is judged when reading: a
//! record last seen longer ago than the liveness window reads as offline,
//! but storage is left untouched.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::model::{CaregiverPresence, FamilyId, PresenceEvent, PresenceStatus, UserId};

/// Presence counts for one family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PresenceSummary {
    /// Online or caring.
    pub active: Vec<UserId>,
    /// Caring only.
    pub caring: Vec<UserId>,
    pub away: Vec<UserId>,
}

pub struct PresenceAggregator {
    records: RwLock<HashMap<(FamilyId, UserId), CaregiverPresence>>,
    liveness_window: chrono::Duration,
}

impl PresenceAggregator {
    pub fn new(liveness_window: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            liveness_window: chrono::Duration::from_std(liveness_window)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Store `event` unless an equal or newer record exists. Returns whether it was stored.
    pub(crate) fn apply(&self, event: PresenceEvent) -> bool {
        let key = (event.family_id.clone(), event.user_id.clone());
        let mut records = self.records.write();
        match records.get(&key) {
            Some(existing) if existing.timestamp >= event.timestamp => false,
            _ => {
                records.insert(key, CaregiverPresence::from(event));
                true
            }
        }
    }

    /// Raw stored record, ignoring staleness.
    pub fn get(&self, family_id: &FamilyId, user_id: &UserId) -> Option<CaregiverPresence> {
        self.records
            .read()
            .get(&(family_id.clone(), user_id.clone()))
            .cloned()
    }

    /// Status as observed at `now`.
    pub fn status_at(
        &self,
        family_id: &FamilyId,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> PresenceStatus {
        self.get(family_id, user_id)
            .map(|record| self.effective_status(&record, now))
            .unwrap_or(PresenceStatus::Offline)
    }

    pub fn active_set(&self, family_id: &FamilyId) -> Vec<UserId> {
        self.summary_at(family_id, Utc::now()).active
    }

    pub fn caring_set(&self, family_id: &FamilyId) -> Vec<UserId> {
        self.summary_at(family_id, Utc::now()).caring
    }

    pub fn summary(&self, family_id: &FamilyId) -> PresenceSummary {
        self.summary_at(family_id, Utc::now())
    }

    pub fn summary_at(&self, family_id: &FamilyId, now: DateTime<Utc>) -> PresenceSummary {
        let mut summary = PresenceSummary::default();
        for ((family, user), record) in self.records.read().iter() {
            if family != family_id {
                continue;
            }
            match self.effective_status(record, now) {
                PresenceStatus::Online => summary.active.push(user.clone()),
                PresenceStatus::Caring => {
                    summary.active.push(user.clone());
                    summary.caring.push(user.clone());
                }
                PresenceStatus::Away => summary.away.push(user.clone()),
                PresenceStatus::Offline => {}
            }
        }
        summary.active.sort();
        summary.caring.sort();
        summary.away.sort();
        summary
    }

    /// Drop every record. Presence does not outlive a session.
    pub fn clear(&self) {
        self.records.write().clear();
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn effective_status(&self, record: &CaregiverPresence, now: DateTime<Utc>) -> PresenceStatus {
        let fresh = record
            .last_seen
            .checked_add_signed(self.liveness_window)
            .is_none_or(|deadline| now <= deadline);
        if fresh {
            record.status
        } else {
            PresenceStatus::Offline
        }
    }
}
