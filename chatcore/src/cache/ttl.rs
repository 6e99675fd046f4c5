//! Existence cache validated against the sync version.
//!
//! A positive answer ("exists") is permanent. A negative answer is only
//! trusted while no authoritative refresh has happened since it was
//! computed: media that is missing locally may show up once the external
//! store syncs new data, so the entry goes stale when the version moves.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

/// Outcome of an existence check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence<V> {
    Exists(V),
    Missing,
}

impl<V> Presence<V> {
    pub fn exists(&self) -> bool {
        matches!(self, Presence::Exists(_))
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            Presence::Exists(v) => Some(v),
            Presence::Missing => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TtlEntry<V> {
    pub presence: Presence<V>,
    pub cached_at_version: u64,
    pub computed_at: DateTime<Utc>,
}

/// Answer of [`TtlCache::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    Fresh(Presence<V>),
    /// A negative entry outlived its version; it has been removed
    Stale,
    Absent,
}

#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, TtlEntry<V>>,
    /// Wall-clock bound on negative entries, independent of sync bumps
    max_age: Option<Duration>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            max_age: None,
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_age: Some(max_age),
        }
    }

    /// Look up `key` as of `current_version`.
    ///
    /// A negative entry recorded before `current_version` is dropped and
    /// reported as [`Lookup::Stale`]; the caller recomputes it.
    pub fn get(&mut self, key: &K, current_version: u64) -> Lookup<V> {
        self.get_at(key, current_version, Utc::now())
    }

    fn get_at(&mut self, key: &K, current_version: u64, now: DateTime<Utc>) -> Lookup<V> {
        let Some(entry) = self.entries.get(key) else {
            return Lookup::Absent;
        };

        if entry.presence.exists() {
            return Lookup::Fresh(entry.presence.clone());
        }

        let outdated = current_version > entry.cached_at_version;
        let expired = self
            .max_age
            .is_some_and(|max_age| now - entry.computed_at > max_age);

        if outdated || expired {
            self.entries.remove(key);
            Lookup::Stale
        } else {
            Lookup::Fresh(Presence::Missing)
        }
    }

    pub fn set(&mut self, key: K, presence: Presence<V>, version: u64) {
        self.entries.insert(
            key,
            TtlEntry {
                presence,
                cached_at_version: version,
                computed_at: Utc::now(),
            },
        );
    }

    pub fn set_exists(&mut self, key: K, value: V, version: u64) {
        self.set(key, Presence::Exists(value), version);
    }

    pub fn set_missing(&mut self, key: K, version: u64) {
        self.set(key, Presence::Missing, version);
    }

    pub fn entry(&self, key: &K) -> Option<&TtlEntry<V>> {
        self.entries.get(key)
    }

    pub fn delete(&mut self, key: &K) -> Option<TtlEntry<V>> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
