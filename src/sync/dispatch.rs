//! Update dispatcher.
//!
//! Decodes entity updates and applies them to the stores through the
//! ordering gate: for each `(kind, id)` only a strictly newer timestamp is
//! applied. Presence goes through the aggregator, which applies the same
//! rule per caregiver.
//!
//! Updates that arrived on a stream (or from polling a stream) are dropped
//! once that stream is unsubscribed. Confirmed mutation results are always
//! applied.

use kinsync_proto::{EntityKind, EntityUpdate, ProtocolError, StreamKey, UpdateBatch};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::model::{Family, FamilyId, Invitation, Member, PresenceEvent, PresenceStatus, UserId};
use crate::state::{InvitationApplied, ProjectionKind, StoreChange, Stores};
use crate::telemetry::spans;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Where an update came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSource {
    /// Pushed on the event stream for a subscription.
    Stream(StreamKey),
    /// Fetched by degraded-mode polling of a subscribed stream.
    Poll(StreamKey),
    /// Returned by the server as the result of one of our mutations.
    Confirmed,
}

impl UpdateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream(_) => "stream",
            Self::Poll(_) => "poll",
            Self::Confirmed => "confirmed",
        }
    }

    fn stream(&self) -> Option<&StreamKey> {
        match self {
            Self::Stream(key) | Self::Poll(key) => Some(key),
            Self::Confirmed => None,
        }
    }
}

/// What happened to one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    /// Not newer than what was already applied.
    Stale,
    /// Its stream is no longer subscribed.
    Unsubscribed,
    /// The registry refused it (an invitation cannot leave `Pending` twice).
    Conflict(String),
}

impl DispatchOutcome {
    fn discard_reason(&self) -> Option<&'static str> {
        match self {
            Self::Applied => None,
            Self::Stale => Some("stale"),
            Self::Unsubscribed => Some("unsubscribed"),
            Self::Conflict(_) => Some("conflict"),
        }
    }
}

/// Payload of a presence update; the timestamp comes from the envelope.
#[derive(Debug, Deserialize)]
struct PresencePayload {
    family_id: FamilyId,
    user_id: UserId,
    status: PresenceStatus,
    #[serde(default)]
    activity: Option<String>,
}

/// Payload of an invitation update. An acceptance carries the new membership.
#[derive(Debug, Deserialize)]
struct InvitationPayload {
    #[serde(flatten)]
    invitation: Invitation,
    #[serde(default)]
    member: Option<Member>,
}

pub struct UpdateDispatcher {
    stores: Stores,
    subscriptions: BTreeSet<StreamKey>,
    applied: HashMap<(EntityKind, String), u64>,
    changes: broadcast::Sender<StoreChange>,
}

impl UpdateDispatcher {
    pub fn new(stores: Stores) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            stores,
            subscriptions: BTreeSet::new(),
            applied: HashMap::new(),
            changes,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn changes(&self) -> broadcast::Sender<StoreChange> {
        self.changes.clone()
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Returns true if the stream was not already subscribed.
    pub fn subscribe(&mut self, stream: StreamKey) -> bool {
        self.subscriptions.insert(stream)
    }

    /// Returns true if the stream was subscribed.
    pub fn unsubscribe(&mut self, stream: &StreamKey) -> bool {
        self.subscriptions.remove(stream)
    }

    pub fn is_subscribed(&self, stream: &StreamKey) -> bool {
        self.subscriptions.contains(stream)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &StreamKey> {
        self.subscriptions.iter()
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Last applied timestamp for an entity.
    pub fn last_applied(&self, kind: EntityKind, id: &str) -> Option<u64> {
        self.applied.get(&(kind, id.to_string())).copied()
    }

    /// Apply every update in `batch`, logging and skipping undecodable ones.
    pub fn apply_batch(&mut self, batch: UpdateBatch, source: &UpdateSource) -> usize {
        let mut applied = 0;
        for update in batch.updates {
            match self.apply(update, source) {
                Ok(DispatchOutcome::Applied) => applied += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, source = source.as_str(), "Dropping undecodable update");
                    crate::metrics::record_protocol_error(e.error_code());
                }
            }
        }
        applied
    }

    /// Apply one update.
    ///
    /// Returns `Err` only when the payload cannot be decoded.
    pub fn apply(
        &mut self,
        update: EntityUpdate,
        source: &UpdateSource,
    ) -> Result<DispatchOutcome, ProtocolError> {
        let span = spans::dispatch(update.kind.as_str(), &update.id, source.as_str());
        let _enter = span.enter();

        let (kind, timestamp) = (update.kind, update.timestamp);
        let outcome = self.route(update, source)?;
        match outcome.discard_reason() {
            None => crate::metrics::record_applied(kind.as_str()),
            Some(reason) => {
                debug!(reason, timestamp, "Update discarded");
                crate::metrics::record_discarded(kind.as_str(), reason);
            }
        }
        Ok(outcome)
    }

    fn route(
        &mut self,
        update: EntityUpdate,
        source: &UpdateSource,
    ) -> Result<DispatchOutcome, ProtocolError> {
        if let Some(stream) = source.stream() {
            if !self.subscriptions.contains(stream) {
                return Ok(DispatchOutcome::Unsubscribed);
            }
        }

        if update.kind == EntityKind::Presence {
            return self.apply_presence(update);
        }

        let key = (update.kind, update.id.clone());
        if self
            .applied
            .get(&key)
            .is_some_and(|&last| update.timestamp <= last)
        {
            return Ok(DispatchOutcome::Stale);
        }

        let change = match update.kind {
            EntityKind::Family => {
                let family: Family = decode(&update)?;
                let id = family.id.clone();
                self.stores.registry.upsert_family(family);
                StoreChange::Family(id)
            }
            EntityKind::Member => {
                let member: Member = decode(&update)?;
                let change = StoreChange::Member {
                    family_id: member.family_id.clone(),
                    user_id: member.user_id.clone(),
                };
                self.stores.registry.upsert_member(member);
                change
            }
            EntityKind::Invitation => {
                let payload: InvitationPayload = decode(&update)?;
                let family_id = payload.invitation.family_id.clone();
                let token = payload.invitation.token.clone();
                let member = payload.member.as_ref().map(|m| m.user_id.clone());
                match self
                    .stores
                    .registry
                    .apply_invitation(payload.invitation, payload.member)
                {
                    Ok(InvitationApplied::Resolved {
                        member_created: true,
                    }) => {
                        if let Some(user_id) = member {
                            let _ = self.changes.send(StoreChange::Member {
                                family_id: family_id.clone(),
                                user_id,
                            });
                        }
                    }
                    Ok(_) => {}
                    Err(conflict) => {
                        warn!(error = %conflict, "Invitation update refused");
                        return Ok(DispatchOutcome::Conflict(conflict.to_string()));
                    }
                }
                StoreChange::Invitation { family_id, token }
            }
            EntityKind::Order | EntityKind::Prediction | EntityKind::Subscription => {
                let (projection, change): (_, fn(String) -> StoreChange) = match update.kind {
                    EntityKind::Order => (ProjectionKind::Order, StoreChange::Order),
                    EntityKind::Prediction => (ProjectionKind::Prediction, StoreChange::Prediction),
                    _ => (ProjectionKind::Subscription, StoreChange::Subscription),
                };
                match self.project(projection, &update, change)? {
                    Some(change) => change,
                    None => return Ok(DispatchOutcome::Stale),
                }
            }
            EntityKind::Presence => return self.apply_presence(update),
        };

        self.applied.insert(key, update.timestamp);
        let _ = self.changes.send(change);
        Ok(DispatchOutcome::Applied)
    }

    fn apply_presence(&mut self, update: EntityUpdate) -> Result<DispatchOutcome, ProtocolError> {
        let payload: PresencePayload = decode(&update)?;
        let change = StoreChange::Presence {
            family_id: payload.family_id.clone(),
            user_id: payload.user_id.clone(),
        };
        let event = PresenceEvent {
            family_id: payload.family_id,
            user_id: payload.user_id,
            status: payload.status,
            activity: payload.activity,
            timestamp: update.timestamp,
        };
        if self.stores.presence.apply(event) {
            let _ = self.changes.send(change);
            Ok(DispatchOutcome::Applied)
        } else {
            Ok(DispatchOutcome::Stale)
        }
    }

    fn project(
        &self,
        kind: ProjectionKind,
        update: &EntityUpdate,
        change: fn(String) -> StoreChange,
    ) -> Result<Option<StoreChange>, ProtocolError> {
        if !update.payload.is_object() {
            return Err(ProtocolError::InvalidPayload {
                kind: update.kind,
                id: update.id.clone(),
                reason: "expected an object".into(),
            });
        }
        let written = self
            .stores
            .projections
            .set(kind, &update.id, update.payload.clone(), update.timestamp);
        Ok(written.then(|| change(update.id.clone())))
    }
}

fn decode<T: serde::de::DeserializeOwned>(update: &EntityUpdate) -> Result<T, ProtocolError> {
    serde_json::from_value(update.payload.clone()).map_err(|e| ProtocolError::InvalidPayload {
        kind: update.kind,
        id: update.id.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dispatcher() -> UpdateDispatcher {
        let mut d = UpdateDispatcher::new(Stores::default());
        d.subscribe(StreamKey::Order("o-1".into()));
        d.subscribe(StreamKey::Family("f-1".into()));
        d.subscribe(StreamKey::Presence("f-1".into()));
        d
    }

    fn order(ts: u64, state: &str) -> EntityUpdate {
        EntityUpdate::new(EntityKind::Order, "o-1", ts, json!({"state": state}))
    }

    fn order_stream() -> UpdateSource {
        UpdateSource::Stream(StreamKey::Order("o-1".into()))
    }

    #[test]
    fn test_older_update_is_discarded() {
        let mut d = dispatcher();
        assert_eq!(d.apply(order(100, "shipped"), &order_stream()).unwrap(), DispatchOutcome::Applied);
        assert_eq!(d.apply(order(99, "packed"), &order_stream()).unwrap(), DispatchOutcome::Stale);
        assert_eq!(d.apply(order(100, "shipped"), &order_stream()).unwrap(), DispatchOutcome::Stale);
        let stored = d.stores().projections.order("o-1").unwrap();
        assert_eq!(stored.value, json!({"state": "shipped"}));
        assert_eq!(d.last_applied(EntityKind::Order, "o-1"), Some(100));
    }

    #[test]
    fn test_first_update_at_timestamp_zero_is_stored() {
        let mut d = dispatcher();
        let mut changes = d.changes().subscribe();
        assert_eq!(d.apply(order(0, "placed"), &order_stream()).unwrap(), DispatchOutcome::Applied);
        assert_eq!(d.last_applied(EntityKind::Order, "o-1"), Some(0));
        let stored = d.stores().projections.order("o-1").unwrap();
        assert_eq!(stored.value, json!({"state": "placed"}));
        assert_eq!(changes.try_recv().unwrap(), StoreChange::Order("o-1".into()));

        assert_eq!(d.apply(order(0, "draft"), &order_stream()).unwrap(), DispatchOutcome::Stale);
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribed_stream_is_ignored_but_confirmed_is_not() {
        let mut d = dispatcher();
        let stream = StreamKey::Order("o-1".into());
        assert!(d.unsubscribe(&stream));
        assert!(!d.unsubscribe(&stream));

        assert_eq!(
            d.apply(order(5, "packed"), &UpdateSource::Stream(stream.clone())).unwrap(),
            DispatchOutcome::Unsubscribed
        );
        assert_eq!(
            d.apply(order(6, "packed"), &UpdateSource::Poll(stream)).unwrap(),
            DispatchOutcome::Unsubscribed
        );
        assert_eq!(d.apply(order(7, "packed"), &UpdateSource::Confirmed).unwrap(), DispatchOutcome::Applied);
    }

    #[test]
    fn test_presence_uses_aggregator_ordering() {
        let mut d = dispatcher();
        let stream = UpdateSource::Stream(StreamKey::Presence("f-1".into()));
        let online = EntityUpdate::new(
            EntityKind::Presence,
            "f-1/u-1",
            10,
            json!({"family_id": "f-1", "user_id": "u-1", "status": "online"}),
        );
        let caring = EntityUpdate::new(
            EntityKind::Presence,
            "f-1/u-1",
            8,
            json!({"family_id": "f-1", "user_id": "u-1", "status": "caring"}),
        );
        assert_eq!(d.apply(online, &stream).unwrap(), DispatchOutcome::Applied);
        assert_eq!(d.apply(caring, &stream).unwrap(), DispatchOutcome::Stale);
        let record = d
            .stores()
            .presence
            .get(&FamilyId::new("f-1"), &UserId::new("u-1"))
            .unwrap();
        assert_eq!(record.status, PresenceStatus::Online);
    }

    #[test]
    fn test_undecodable_payload_is_protocol_error() {
        let mut d = dispatcher();
        let bad = EntityUpdate::new(EntityKind::Member, "m-1", 1, json!({"nonsense": true}));
        let err = d
            .apply(bad, &UpdateSource::Stream(StreamKey::Family("f-1".into())))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { kind: EntityKind::Member, .. }));

        let not_object = EntityUpdate::new(EntityKind::Order, "o-1", 1, json!("shipped"));
        assert!(d.apply(not_object, &order_stream()).is_err());
        assert_eq!(d.last_applied(EntityKind::Order, "o-1"), None);
    }

    #[test]
    fn test_accepted_invitation_creates_member() {
        let mut d = dispatcher();
        let mut rx = d.changes().subscribe();
        let source = UpdateSource::Stream(StreamKey::Family("f-1".into()));
        let invitation = json!({
            "token": "t-1",
            "family_id": "f-1",
            "email": "b@example.com",
            "inviter_id": "u-a",
            "role": "extended_family",
            "status": "pending",
            "created_at": "2026-01-01T00:00:00Z",
            "last_notified_at": "2026-01-01T00:00:00Z",
            "version": 1
        });
        d.apply(EntityUpdate::new(EntityKind::Invitation, "t-1", 1, invitation.clone()), &source)
            .unwrap();

        let mut accepted = invitation;
        accepted["status"] = json!("accepted");
        accepted["version"] = json!(2);
        accepted["resolved_by"] = json!("u-b");
        accepted["member"] = json!({
            "family_id": "f-1",
            "user_id": "u-b",
            "role": "extended_family",
            "status": "active",
            "display_name": "Bea",
            "email": "b@example.com",
            "joined_at": "2026-01-02T00:00:00Z"
        });
        let outcome = d
            .apply(EntityUpdate::new(EntityKind::Invitation, "t-1", 2, accepted), &source)
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Applied);

        let members = d.stores().registry.members(&FamilyId::new("f-1"));
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, UserId::new("u-b"));

        let mut seen = Vec::new();
        while let Ok(change) = rx.try_recv() {
            seen.push(change);
        }
        assert!(seen.contains(&StoreChange::Member {
            family_id: FamilyId::new("f-1"),
            user_id: UserId::new("u-b"),
        }));
    }

    #[test]
    fn test_apply_batch_counts_applied() {
        let mut d = dispatcher();
        let batch = UpdateBatch {
            updates: vec![
                order(1, "new"),
                order(3, "packed"),
                order(2, "late"),
                EntityUpdate::new(EntityKind::Order, "o-1", 4, json!(null)),
            ],
        };
        assert_eq!(d.apply_batch(batch, &UpdateSource::Confirmed), 2);
        assert_eq!(d.stores().projections.order("o-1").unwrap().value, json!({"state": "packed"}));
    }
}
