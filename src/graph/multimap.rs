use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hash;

use dashmap::{DashMap, DashSet};

/// Concurrent key → set-of-values map. Buckets that become empty are dropped.
#[derive(Debug)]
pub struct MultiMap<K, V>
where
    K: Eq + Hash,
    V: Eq + Hash,
{
    buckets: DashMap<K, DashSet<V>>,
}

impl<K, V> Default for MultiMap<K, V>
where
    K: Eq + Hash,
    V: Eq + Hash,
{
    fn default() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }
}

impl<K, V> MultiMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + Clone,
{
    /// Returns true when the value was not present yet.
    pub fn put(&self, key: K, value: V) -> bool {
        self.buckets.entry(key).or_default().insert(value)
    }

    /// Returns true when the value was present.
    pub fn remove(&self, key: &K, value: &V) -> bool {
        let removed = match self.buckets.get(key) {
            Some(bucket) => bucket.remove(value).is_some(),
            None => return false,
        };
        if removed {
            self.buckets.remove_if(key, |_, bucket| bucket.is_empty());
        }
        removed
    }

    pub fn contains(&self, key: &K, value: &V) -> bool {
        self.buckets
            .get(key)
            .is_some_and(|bucket| bucket.contains(value))
    }

    pub fn get(&self, key: &K) -> Vec<V> {
        self.buckets
            .get(key)
            .map(|bucket| bucket.iter().map(|value| value.key().clone()).collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<K> {
        self.buckets.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Keep only the values matching `keep`, dropping emptied buckets.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.buckets.retain(|key, bucket| {
            bucket.retain(|value| keep(key, value));
            !bucket.is_empty()
        });
    }

    /// Total number of values across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl<K, V> MultiMap<K, V>
where
    K: Eq + Hash + Clone + Ord,
    V: Eq + Hash + Clone + Ord,
{
    pub fn snapshot(&self) -> BTreeMap<K, BTreeSet<V>> {
        self.buckets
            .iter()
            .map(|entry| {
                let values = entry.value().iter().map(|value| value.key().clone()).collect();
                (entry.key().clone(), values)
            })
            .collect()
    }
}
