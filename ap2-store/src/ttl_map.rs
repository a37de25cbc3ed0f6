//! A concurrency-safe bounded map with per-entry expiry (§4.3).
//!
//! Every transient record table in §3 (nonce ledger, WebAuthn challenges,
//! payment-method tokens, step-up sessions, agent tokens) is an instance of
//! this one structure. It is built on `dashmap::DashMap`, whose `entry` API
//! locks only the shard containing a given key for the duration of a
//! closure — no `.await` ever happens while that shard lock is held, so this
//! is safe to use from any number of concurrent async tasks without the
//! "mutex held across a suspension point" bug called out in the design notes.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A TTL-bounded concurrent map.
pub struct TtlMap<K, V> {
    entries: DashMap<K, (V, Instant)>,
}

impl<K, V> Default for TtlMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Atomically test whether `key` is already present and unexpired, and if
    /// not, record it with the given value and expiry.
    ///
    /// Returns `true` if this call inserted a fresh entry (the caller's
    /// message should be admitted), or `false` if an unexpired entry already
    /// existed (the caller's message is a replay). This is the single
    /// critical section required by §4.3 and exercised by §8's concurrent
    /// nonce test: exactly one of N concurrent calls with the same key
    /// returns `true`.
    pub fn check_and_insert(&self, key: K, value: V, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().1 <= now {
                    // Expired: the slot is free again.
                    occupied.insert((value, now + ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert((value, now + ttl));
                true
            }
        }
    }

    /// Fetch a value if present and not expired. Lazily evicts an expired
    /// entry found along the way.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                if occupied.get().1 <= now {
                    occupied.remove();
                    None
                } else {
                    Some(occupied.get().0.clone())
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Insert or overwrite `key` unconditionally with a fresh TTL.
    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(key, (value, Instant::now() + ttl));
    }

    /// Remove `key` regardless of expiry state.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, (v, _))| v)
    }

    /// Sweep all expired entries. Safe to call on a timer or never — access
    /// methods already evict lazily.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expiry)| *expiry > now);
    }

    /// Number of entries currently stored, including not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    #[test]
    fn fresh_key_is_admitted_once() {
        let map: TtlMap<String, ()> = TtlMap::new();
        assert!(map.check_and_insert("n1".to_string(), (), StdDuration::from_secs(300)));
        assert!(!map.check_and_insert("n1".to_string(), (), StdDuration::from_secs(300)));
    }

    #[test]
    fn expired_key_is_admitted_again() {
        let map: TtlMap<String, ()> = TtlMap::new();
        assert!(map.check_and_insert("n1".to_string(), (), StdDuration::from_millis(10)));
        std::thread::sleep(StdDuration::from_millis(30));
        assert!(map.check_and_insert("n1".to_string(), (), StdDuration::from_secs(300)));
    }

    #[test]
    fn concurrent_duplicates_admit_exactly_once_per_distinct_nonce() {
        let map: Arc<TtlMap<String, ()>> = Arc::new(TtlMap::new());
        let nonce_count = 1_000;
        let duplication = 10;

        let mut handles = Vec::new();
        for i in 0..(nonce_count * duplication) {
            let map = map.clone();
            let nonce = format!("nonce-{}", i % nonce_count);
            handles.push(std::thread::spawn(move || {
                map.check_and_insert(nonce, (), StdDuration::from_secs(300))
            }));
        }

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();
        assert_eq!(admitted, nonce_count);
    }
}
