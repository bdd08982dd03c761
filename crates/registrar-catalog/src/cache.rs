//! Generic TTL cache that distinguishes "cached as empty" from "not cached".

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<V> {
    /// Nothing cached (or the entry expired).
    Miss,
    /// A negative result is cached: the value is known not to exist.
    Empty,
    Found(V),
}

enum Slot<V> {
    Empty,
    Value(V),
}

struct Entry<V> {
    slot: Slot<V>,
    expires_at: Instant,
}

/// Key-value cache with per-entry expiry. Expired entries are dropped lazily on read.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> CacheLookup<V> {
        let now = Instant::now();
        {
            let guard = self.entries.read().await;
            match guard.get(key) {
                None => return CacheLookup::Miss,
                Some(entry) if entry.expires_at > now => {
                    return match &entry.slot {
                        Slot::Empty => CacheLookup::Empty,
                        Slot::Value(v) => CacheLookup::Found(v.clone()),
                    };
                }
                Some(_) => {}
            }
        }
        let mut guard = self.entries.write().await;
        if guard.get(key).is_some_and(|e| e.expires_at <= now) {
            guard.remove(key);
        }
        CacheLookup::Miss
    }

    pub async fn put(&self, key: K, value: V, ttl: Duration) {
        self.insert(key, Slot::Value(value), ttl).await;
    }

    /// Cache a negative result for `ttl`.
    pub async fn put_empty(&self, key: K, ttl: Duration) {
        self.insert(key, Slot::Empty, ttl).await;
    }

    pub async fn invalidate<'a, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let mut guard = self.entries.write().await;
        for key in keys {
            guard.remove(key);
        }
    }

    async fn insert(&self, key: K, slot: Slot<V>, ttl: Duration) {
        let entry = Entry {
            slot,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key, entry);
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
