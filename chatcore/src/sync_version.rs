use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter bumped on every authoritative full refresh.
///
/// One instance per application session, shared by `Arc`. Consumers remember
/// the value they last saw and compare it to decide whether a cached
/// negative result may be retried.
#[derive(Debug, Default)]
pub struct SyncVersionCounter {
    value: AtomicU64,
}

impl SyncVersionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Advance the counter, returning the new value.
    pub fn bump(&self) -> u64 {
        let next = self.value.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("Sync version advanced to {}", next);
        next
    }

    /// Whether the counter moved past `seen`
    pub fn advanced_since(&self, seen: u64) -> bool {
        self.current() > seen
    }
}

/// Per-key memory of failed attempts, so a failed resolution is retried
/// once per sync version instead of on every render.
///
/// Each entry keeps the failure `F` it ended with, so a blocked caller gets
/// the same answer as the attempt that failed.
#[derive(Debug)]
pub struct RetryGate<K, F = ()> {
    failed: HashMap<K, (u64, F)>,
    /// Highest version seen by [`RetryGate::prune`]
    pruned_at: u64,
}

impl<K, F> Default for RetryGate<K, F> {
    fn default() -> Self {
        Self {
            failed: HashMap::new(),
            pruned_at: 0,
        }
    }
}

impl<K: Eq + Hash, F> RetryGate<K, F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_attempt(&self, key: &K, current_version: u64) -> bool {
        self.blocked(key, current_version).is_none()
    }

    /// The failure that still blocks `key` at `current_version`, if any.
    pub fn blocked(&self, key: &K, current_version: u64) -> Option<&F> {
        self.failed
            .get(key)
            .filter(|(version, _)| *version >= current_version)
            .map(|(_, failure)| failure)
    }

    pub fn record_failure(&mut self, key: K, version: u64, failure: F) {
        self.failed.insert(key, (version, failure));
    }

    /// Drop entries recorded before `current_version`; they no longer block
    /// anything. Runs at most once per version. Returns the number removed.
    pub fn prune(&mut self, current_version: u64) -> usize {
        if current_version <= self.pruned_at {
            return 0;
        }
        self.pruned_at = current_version;
        let before = self.failed.len();
        self.failed.retain(|_, (version, _)| *version >= current_version);
        before - self.failed.len()
    }

    pub fn clear(&mut self, key: &K) {
        self.failed.remove(key);
    }

    pub fn clear_all(&mut self) {
        self.failed.clear();
    }

    pub fn len(&self) -> usize {
        self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counter_is_monotonic() {
        let counter = SyncVersionCounter::new();
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.bump(), 1);
        assert_eq!(counter.bump(), 2);
        assert!(counter.advanced_since(1));
        assert!(!counter.advanced_since(2));
    }

    #[test]
    fn test_counter_shared_across_threads() {
        let counter = Arc::new(SyncVersionCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        counter.bump();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.current(), 400);
    }

    #[test]
    fn test_gate_allows_one_retry_per_bump() {
        let mut gate = RetryGate::new();
        assert!(gate.should_attempt(&"img", 0));

        gate.record_failure("img", 3, ());
        assert!(!gate.should_attempt(&"img", 3));
        assert!(gate.should_attempt(&"img", 4));

        gate.record_failure("img", 4, ());
        assert!(!gate.should_attempt(&"img", 4));

        gate.clear(&"img");
        assert!(gate.should_attempt(&"img", 4));
        assert!(gate.is_empty());
    }

    #[test]
    fn test_gate_returns_recorded_failure() {
        let mut gate: RetryGate<&str, String> = RetryGate::new();
        gate.record_failure("voice", 2, "io glitch".to_string());

        assert_eq!(gate.blocked(&"voice", 2).map(String::as_str), Some("io glitch"));
        assert_eq!(gate.blocked(&"voice", 3), None);
        assert_eq!(gate.blocked(&"other", 2), None);
    }

    #[test]
    fn test_prune_drops_entries_from_older_versions() {
        let mut gate = RetryGate::new();
        gate.record_failure("a", 1, ());
        gate.record_failure("b", 2, ());
        gate.record_failure("c", 3, ());

        assert_eq!(gate.prune(3), 2);
        assert_eq!(gate.len(), 1);
        assert!(!gate.should_attempt(&"c", 3));

        // Same version again is a no-op
        gate.record_failure("d", 1, ());
        assert_eq!(gate.prune(3), 0);
        assert_eq!(gate.prune(4), 2);
        assert!(gate.is_empty());
    }
}
