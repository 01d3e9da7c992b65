//! Sharded cache with per-entry expiration
//!
//! Entries expire `ttl` after their last write. The cache never expires
//! entries on its own: callers trim explicitly, either by dropping expired
//! entries or by evicting the entry closest to expiry.
//!
//! # Design
//!
//! - Shards: `Mutex<Shard>` selected by FxHash of the key
//! - Per shard: entry map plus an expiration queue ordered by
//!   `(expiration, sequence)`, so equal readings still evict in write order
//! - Length: one atomic counter updated under the owning shard's lock
//!
//! # Thread Safety
//!
//! Every operation on one key happens under that key's shard lock. Global
//! eviction peeks each shard in turn and may race with concurrent writers;
//! the loser of such a race simply evicts a slightly younger entry.

use crate::clock::{duration_nanos, Clock};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SHARD_COUNT: usize = 16;

struct Entry<V> {
    value: V,
    expiration: i64,
    sequence: u64,
}

struct Shard<K, V> {
    entries: FxHashMap<K, Entry<V>>,
    expirations: BTreeMap<(i64, u64), K>,
}

impl<K: Eq + Hash + Clone, V> Shard<K, V> {
    fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            expirations: BTreeMap::new(),
        }
    }

    /// Replace or insert, returning true if the key is new
    fn put(&mut self, key: K, value: V, expiration: i64, sequence: u64) -> bool {
        let previous = self.entries.insert(
            key.clone(),
            Entry {
                value,
                expiration,
                sequence,
            },
        );
        if let Some(old) = &previous {
            self.expirations.remove(&(old.expiration, old.sequence));
        }
        self.expirations.insert((expiration, sequence), key);
        previous.is_none()
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some(old) => {
                self.expirations.remove(&(old.expiration, old.sequence));
                true
            }
            None => false,
        }
    }

    fn eldest(&self) -> Option<(i64, u64)> {
        self.expirations.keys().next().copied()
    }
}

/// Concurrent map whose entries expire `ttl` after their last write
pub struct ExpiringCache<K, V> {
    shards: Box<[Mutex<Shard<K, V>>]>,
    len: AtomicUsize,
    sequence: AtomicU64,
    ttl_nanos: i64,
    clock: Arc<dyn Clock>,
    eviction: Mutex<()>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty cache
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(Shard::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            len: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
            ttl_nanos: duration_nanos(ttl),
            clock,
            eviction: Mutex::new(()),
        }
    }

    #[inline]
    fn shard(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    #[inline]
    fn next_expiration(&self) -> (i64, u64) {
        let expiration = self.clock.now_nanos().saturating_add(self.ttl_nanos);
        (expiration, self.sequence.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of entries, expired ones included until trimmed
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// True if there are no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value for a key, whether or not it has expired
    pub fn get(&self, key: &K) -> Option<V> {
        self.shard(key)
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
    }

    /// Check whether a key is present
    pub fn contains_key(&self, key: &K) -> bool {
        self.shard(key).lock().entries.contains_key(key)
    }

    /// Atomically replace the value of `key` with `f(current)` and renew its
    /// expiration, returning the stored value.
    pub fn upsert_with<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let mut shard = self.shard(&key).lock();
        let value = f(shard.entries.get(&key).map(|entry| &entry.value));
        let (expiration, sequence) = self.next_expiration();
        if shard.put(key, value.clone(), expiration, sequence) {
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        value
    }

    /// Insert `key` unless a live entry exists. Returns true if inserted.
    ///
    /// An entry whose expiration has been reached counts as absent even if
    /// it has not been trimmed yet.
    pub fn insert_if_vacant(&self, key: K, value: V) -> bool {
        let now = self.clock.now_nanos();
        let mut shard = self.shard(&key).lock();
        if let Some(entry) = shard.entries.get(&key) {
            if entry.expiration > now {
                return false;
            }
        }
        let (expiration, sequence) = self.next_expiration();
        if shard.put(key, value, expiration, sequence) {
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        true
    }

    /// Remove a key. Returns true if it was present.
    pub fn remove(&self, key: &K) -> bool {
        let removed = self.shard(key).lock().remove(key);
        if removed {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Drop every entry
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            let dropped = shard.entries.len();
            shard.entries.clear();
            shard.expirations.clear();
            self.len.fetch_sub(dropped, Ordering::AcqRel);
        }
    }

    /// Drop entries whose expiration has been reached. Returns the count.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_nanos();
        let mut purged = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            while let Some(&(expiration, sequence)) = shard.expirations.keys().next() {
                if expiration > now {
                    break;
                }
                if let Some(key) = shard.expirations.remove(&(expiration, sequence)) {
                    shard.entries.remove(&key);
                    purged += 1;
                }
            }
        }
        if purged > 0 {
            self.len.fetch_sub(purged, Ordering::AcqRel);
        }
        purged
    }

    /// Evict the entry closest to expiry. Returns false if empty.
    pub fn evict_eldest(&self) -> bool {
        let eldest_shard = self
            .shards
            .iter()
            .enumerate()
            .filter_map(|(i, shard)| shard.lock().eldest().map(|order| (order, i)))
            .min()
            .map(|(_, i)| i);

        let Some(index) = eldest_shard else {
            return false;
        };
        let mut shard = self.shards[index].lock();
        // lost a race: another thread emptied this shard, let the caller retry
        let Some((_, key)) = shard.expirations.pop_first() else {
            return !self.is_empty();
        };
        shard.entries.remove(&key);
        self.len.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Evict eldest entries until at most `bound` remain.
    ///
    /// Concurrent callers are serialized, so racing trims never take the
    /// cache below `bound`.
    pub fn evict_to(&self, bound: usize) {
        let _guard = self.eviction.lock();
        while self.len() > bound {
            if !self.evict_eldest() {
                break;
            }
        }
    }

    /// Drop expired entries, then evict eldest entries until at most
    /// `cardinality` remain.
    pub fn trim(&self, cardinality: usize) {
        self.purge_expired();
        self.evict_to(cardinality);
    }
}

impl<K, V> std::fmt::Debug for ExpiringCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("len", &self.len.load(Ordering::Relaxed))
            .field("ttl_nanos", &self.ttl_nanos)
            .finish()
    }
}
