//! Read models for entities this core only delivers: orders, prediction
//! channels and subscription/billing status.
//!
//! Payloads are kept as JSON; interpreting them belongs to the UI layer.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kinsync_proto::LwwRegister;
use serde_json::Value;

use crate::state::dashmap_ext::DashMapExt;

/// A projected value with the timestamp it was written at.
#[derive(Debug, Clone, PartialEq)]
pub struct Projected {
    pub value: Value,
    pub timestamp: u64,
}

#[derive(Default)]
pub struct Projections {
    orders: DashMap<String, LwwRegister<Value>>,
    predictions: DashMap<String, LwwRegister<Value>>,
    subscriptions: DashMap<String, LwwRegister<Value>>,
}

/// Which projection a write goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionKind {
    Order,
    Prediction,
    Subscription,
}

impl Projections {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: ProjectionKind) -> &DashMap<String, LwwRegister<Value>> {
        match kind {
            ProjectionKind::Order => &self.orders,
            ProjectionKind::Prediction => &self.predictions,
            ProjectionKind::Subscription => &self.subscriptions,
        }
    }

    /// Write `value` if `timestamp` is newer than what is stored.
    pub(crate) fn set(&self, kind: ProjectionKind, id: &str, value: Value, timestamp: u64) -> bool {
        match self.map(kind).entry(id.to_string()) {
            Entry::Occupied(mut held) => held.get_mut().set(value, timestamp),
            Entry::Vacant(slot) => {
                slot.insert(LwwRegister::new(value, timestamp));
                true
            }
        }
    }

    pub fn get(&self, kind: ProjectionKind, id: &str) -> Option<Projected> {
        self.map(kind).get_cloned(id).map(|reg| Projected {
            timestamp: reg.timestamp(),
            value: reg.into_inner(),
        })
    }

    pub fn order(&self, id: &str) -> Option<Projected> {
        self.get(ProjectionKind::Order, id)
    }

    pub fn prediction(&self, channel: &str) -> Option<Projected> {
        self.get(ProjectionKind::Prediction, channel)
    }

    pub fn subscription(&self, id: &str) -> Option<Projected> {
        self.get(ProjectionKind::Subscription, id)
    }

    /// Every stored order value.
    pub fn orders(&self) -> Vec<Value> {
        self.orders
            .values_where(|_, _| true)
            .into_iter()
            .map(LwwRegister::into_inner)
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.orders.clear();
        self.predictions.clear();
        self.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_older_write_is_discarded() {
        let projections = Projections::new();
        assert!(projections.set(ProjectionKind::Order, "o-1", json!({"state": "shipped"}), 100));
        assert!(!projections.set(ProjectionKind::Order, "o-1", json!({"state": "packed"}), 99));
        let order = projections.order("o-1").unwrap();
        assert_eq!(order.value, json!({"state": "shipped"}));
        assert_eq!(order.timestamp, 100);
    }

    #[test]
    fn test_kinds_are_separate() {
        let projections = Projections::new();
        projections.set(ProjectionKind::Prediction, "x", json!(1), 5);
        assert!(projections.order("x").is_none());
        assert_eq!(projections.prediction("x").unwrap().value, json!(1));
        assert!(projections.subscription("x").is_none());
        assert!(projections.orders().is_empty());
    }

    #[test]
    fn test_first_write_at_timestamp_zero_is_kept() {
        let projections = Projections::new();
        assert!(projections.set(ProjectionKind::Order, "o-1", json!({"state": "placed"}), 0));
        let order = projections.order("o-1").unwrap();
        assert_eq!(order.value, json!({"state": "placed"}));
        assert_eq!(order.timestamp, 0);
        assert!(!projections.set(ProjectionKind::Order, "o-1", json!({"state": "draft"}), 0));
        assert_eq!(projections.orders(), vec![json!({"state": "placed"})]);
    }
}
