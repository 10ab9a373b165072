use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;

/// Snapshot reads over a `DashMap`.
///
/// Readers clone what they need so shard guards are released before the
/// caller does anything else with the data.
pub trait DashMapExt<K, V> {
    /// Clone the value stored under `key`.
    fn get_cloned<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone;

    /// Clone every value accepted by `keep`.
    fn values_where<F>(&self, keep: F) -> Vec<V>
    where
        V: Clone,
        F: FnMut(&K, &V) -> bool;
}

impl<K, V> DashMapExt<K, V> for DashMap<K, V>
where
    K: Eq + Hash,
{
    fn get_cloned<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.get(key).map(|r| r.value().clone())
    }

    fn values_where<F>(&self, mut keep: F) -> Vec<V>
    where
        V: Clone,
        F: FnMut(&K, &V) -> bool,
    {
        self.iter()
            .filter(|e| keep(e.key(), e.value()))
            .map(|e| e.value().clone())
            .collect()
    }
}
