//! Bounded key-value cache with TTL expiry and pluggable eviction
//!
//! All bookkeeping lives under one lock: the entry map, the victim index
//! ordered by the eviction policy, and an expiry index ordered by deadline.
//! Expired entries are dropped lazily on access and eagerly by the
//! maintenance sweep.

use crate::config::{CacheConfigUpdate, CacheConfiguration};
use crate::errors::ConfigError;
use crate::eviction::{EvictionIndex, Usage};
use crate::maintenance::{self, MaintenanceHandle, Sweep};
use crate::metrics::CacheStats;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Entries removed per lock acquisition during a sweep
const SWEEP_BATCH: usize = 128;

/// Expiry index key: deadline, then the write tick to keep keys unique
type ExpiryKey = (Instant, u64);

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_accessed_at: Instant,
    expires_at: Instant,
    usage: Usage,
    footprint: usize,
    sized: bool,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    fn expiry_key(&self) -> ExpiryKey {
        (self.expires_at, self.usage.insert_tick)
    }
}

struct CacheState<K, V> {
    config: CacheConfiguration,
    entries: HashMap<K, CacheEntry<V>>,
    order: EvictionIndex<K>,
    expiry: BTreeMap<ExpiryKey, K>,
    tick: u64,
    stats: CacheStats,
    memory_bytes: usize,
    unsized_entries: usize,
}

impl<K, V> CacheState<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new(config: CacheConfiguration) -> Self {
        Self {
            order: EvictionIndex::new(config.eviction_policy),
            config,
            entries: HashMap::new(),
            expiry: BTreeMap::new(),
            tick: 0,
            stats: CacheStats::new(),
            memory_bytes: 0,
            unsized_entries: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn attach(&mut self, key: K, entry: CacheEntry<V>) {
        self.order.insert(&entry.usage, key.clone());
        self.expiry.insert(entry.expiry_key(), key.clone());
        self.memory_bytes += entry.footprint;
        if !entry.sized {
            self.unsized_entries += 1;
        }
        self.entries.insert(key, entry);
    }

    fn detach<Q>(&mut self, key: &Q) -> Option<CacheEntry<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.usage);
        self.expiry.remove(&entry.expiry_key());
        self.memory_bytes -= entry.footprint;
        if !entry.sized {
            self.unsized_entries -= 1;
        }
        Some(entry)
    }

    /// Drop the entry if its deadline passed. Returns true when it did.
    fn expire_if_due<Q>(&mut self, key: &Q, now: Instant) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let due = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(now));
        if due {
            self.detach(key);
            self.stats.record_expiration();
        }
        due
    }

    /// Remove up to `limit` expired entries, earliest deadline first.
    fn purge_batch(&mut self, now: Instant, limit: usize) -> usize {
        let mut removed = 0;
        while removed < limit {
            let Some((&(deadline, _), _)) = self.expiry.first_key_value() else {
                break;
            };
            if deadline >= now {
                break;
            }
            if let Some((_, key)) = self.expiry.pop_first() {
                self.detach(&key);
                self.stats.record_expiration();
                removed += 1;
            }
        }
        removed
    }

    /// Free one slot: an already expired entry if there is one, otherwise
    /// the policy's victim.
    fn make_room(&mut self, now: Instant) -> bool {
        if self.purge_batch(now, 1) == 1 {
            return true;
        }
        match self.order.pop_victim() {
            Some(victim) => {
                // The victim index entry is gone already; detach the rest
                if let Some(entry) = self.entries.remove(&victim) {
                    self.expiry.remove(&entry.expiry_key());
                    self.memory_bytes -= entry.footprint;
                    if !entry.sized {
                        self.unsized_entries -= 1;
                    }
                }
                self.stats.record_eviction();
                true
            }
            None => false,
        }
    }

    fn live_len(&self, now: Instant) -> usize {
        let expired = self.expiry.range(..(now, 0)).count();
        self.entries.len() - expired
    }
}

struct CacheShared<K, V> {
    state: Mutex<CacheState<K, V>>,
}

#[async_trait]
impl<K, V> Sweep for CacheShared<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn interval(&self) -> Duration {
        self.state.lock().config.sweep_interval
    }

    async fn sweep(&self) {
        let mut removed = 0;
        loop {
            let batch = self.state.lock().purge_batch(Instant::now(), SWEEP_BATCH);
            removed += batch;
            if batch < SWEEP_BATCH {
                break;
            }
            tokio::task::yield_now().await;
        }

        if removed > 0 {
            info!(removed, "cache sweep removed expired entries");
        } else {
            debug!("cache sweep found no expired entries");
        }
    }
}

/// Bounded cache with TTL expiry and LRU, LFU or FIFO eviction
///
/// Cloning is cheap and yields another handle to the same cache.
///
/// # Examples
///
/// ```
/// use resource_lifecycle::{Cache, CacheConfiguration, EvictionPolicy};
///
/// let cache = Cache::new(
///     CacheConfiguration::new()
///         .with_max_entries(2)
///         .with_eviction_policy(EvictionPolicy::Lru),
/// )
/// .unwrap();
///
/// cache.set("a".to_string(), 1);
/// cache.set("b".to_string(), 2);
/// assert_eq!(cache.get("a"), Some(1));
///
/// // "b" is now the least recently used entry
/// cache.set("c".to_string(), 3);
/// assert!(!cache.has("b"));
/// assert_eq!(cache.stats().evictions, 1);
/// ```
pub struct Cache<K, V> {
    shared: Arc<CacheShared<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Serialize + Send + Sync + 'static,
    V: Clone + Serialize + Send + Sync + 'static,
{
    pub fn new(config: CacheConfiguration) -> Result<Self, ConfigError> {
        config.validate()?;
        debug!(
            max_entries = config.max_entries,
            policy = %config.eviction_policy,
            ttl = ?config.ttl,
            "cache created"
        );
        Ok(Self {
            shared: Arc::new(CacheShared {
                state: Mutex::new(CacheState::new(config)),
            }),
        })
    }

    /// Look up a live entry
    ///
    /// A hit refreshes the entry's access metadata. Absent and expired keys
    /// are misses; an expired entry is removed on the spot.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        if state.expire_if_due(key, now) {
            state.stats.record_miss();
            return None;
        }

        let tick = state.next_tick();
        let Some(entry) = state.entries.get_mut(key) else {
            state.stats.record_miss();
            return None;
        };

        let before = entry.usage;
        entry.usage.touch(tick);
        entry.last_accessed_at = now;
        state.order.reposition(&before, &entry.usage);
        state.stats.record_hit();
        Some(entry.value.clone())
    }

    /// Insert or overwrite an entry
    ///
    /// Writing a new key into a full cache first frees a slot, preferring
    /// expired entries over the policy's victim. Overwriting restarts the
    /// entry's TTL and insertion order but keeps its access count.
    pub fn set(&self, key: K, value: V) {
        let payload = estimate_payload(&key, &value);
        let now = Instant::now();
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let tick = state.next_tick();

        let (footprint, sized) = match payload {
            Ok(bytes) => (bytes + state.config.entry_overhead_bytes, true),
            Err(err) => {
                warn!(error = %err, "could not estimate cache entry size");
                (state.config.entry_overhead_bytes, false)
            }
        };

        let access_count = match state.detach(&key) {
            Some(previous) => previous.usage.access_count,
            None => {
                while state.entries.len() >= state.config.max_entries {
                    if !state.make_room(now) {
                        break;
                    }
                }
                0
            }
        };

        let entry = CacheEntry {
            value,
            inserted_at: now,
            last_accessed_at: now,
            expires_at: maintenance::deadline_after(now, state.config.ttl),
            usage: Usage {
                access_count,
                ..Usage::new(tick)
            },
            footprint,
            sized,
        };
        state.attach(key, entry);
        state.stats.record_set();
    }

    /// Remove an entry. Returns whether a live entry was removed.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let mut state = self.shared.state.lock();
        if state.expire_if_due(key, now) {
            return false;
        }
        let removed = state.detach(key).is_some();
        if removed {
            state.stats.record_delete();
        }
        removed
    }

    /// Whether a live entry exists. Not counted as a hit or miss.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let mut state = self.shared.state.lock();
        if state.expire_if_due(key, now) {
            return false;
        }
        state.entries.contains_key(key)
    }

    /// Remove every entry and reset the statistics
    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        let removed = state.entries.len();
        state.entries.clear();
        state.order.clear();
        state.expiry.clear();
        state.memory_bytes = 0;
        state.unsized_entries = 0;
        state.stats = CacheStats::new();
        debug!(removed, "cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        CacheStats {
            size: state.entries.len(),
            capacity: state.config.max_entries,
            memory_bytes: state.memory_bytes,
            unsized_entries: state.unsized_entries,
            ..state.stats.clone()
        }
    }

    /// Snapshot of the keys of all live entries
    pub fn keys(&self) -> std::vec::IntoIter<K> {
        let now = Instant::now();
        let state = self.shared.state.lock();
        state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.shared.state.lock().live_len(Instant::now())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value or compute, store and return it
    ///
    /// `init` runs outside the lock; concurrent callers racing on the same
    /// missing key may each compute, and the last write wins.
    pub fn get_or_insert_with<F>(&self, key: K, init: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = init();
        self.set(key, value.clone());
        value
    }

    /// Apply a partial configuration update
    ///
    /// A new TTL applies to future writes. A policy change re-ranks every
    /// entry; a lower capacity evicts down to the new bound immediately.
    pub fn update_config(&self, update: CacheConfigUpdate) -> Result<(), ConfigError> {
        let now = Instant::now();
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let next = state.config.apply(&update);
        next.validate()?;

        if next.eviction_policy != state.order.policy() {
            let ranked = state
                .entries
                .iter()
                .map(|(key, entry)| (entry.usage, key.clone()))
                .collect::<Vec<_>>();
            state.order.rebuild(next.eviction_policy, ranked);
        }

        state.config = next;
        while state.entries.len() > state.config.max_entries {
            if !state.make_room(now) {
                break;
            }
        }

        info!(
            max_entries = state.config.max_entries,
            policy = %state.config.eviction_policy,
            ttl = ?state.config.ttl,
            "cache configuration updated"
        );
        Ok(())
    }

    pub fn config(&self) -> CacheConfiguration {
        self.shared.state.lock().config.clone()
    }

    /// Remove every expired entry now. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let mut removed = 0;
        loop {
            let batch = self
                .shared
                .state
                .lock()
                .purge_batch(Instant::now(), SWEEP_BATCH);
            removed += batch;
            if batch < SWEEP_BATCH {
                return removed;
            }
        }
    }

    /// Start the background expiry sweep
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        maintenance::spawn("cache-sweeper", Arc::downgrade(&self.shared))
    }

    /// Access metadata of a live entry, without touching it
    pub fn entry_info<Q>(&self, key: &Q) -> Option<EntryInfo>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let state = self.shared.state.lock();
        state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| EntryInfo {
                inserted_at: entry.inserted_at,
                last_accessed_at: entry.last_accessed_at,
                expires_at: entry.expires_at,
                access_count: entry.usage.access_count,
                footprint: entry.footprint,
            })
    }
}

/// Metadata of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub inserted_at: Instant,
    pub last_accessed_at: Instant,
    pub expires_at: Instant,
    pub access_count: u64,

    /// Estimated bytes, including the per-entry overhead
    pub footprint: usize,
}

fn estimate_payload<K: Serialize, V: Serialize>(
    key: &K,
    value: &V,
) -> Result<usize, serde_json::Error> {
    Ok(serde_json::to_vec(key)?.len() + serde_json::to_vec(value)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eviction::EvictionPolicy;

    fn cache(max_entries: usize, policy: EvictionPolicy) -> Cache<String, i32> {
        Cache::new(
            CacheConfiguration::new()
                .with_max_entries(max_entries)
                .with_eviction_policy(policy)
                .with_ttl(Duration::from_secs(60)),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_refreshes_metadata() {
        let cache = cache(4, EvictionPolicy::Lru);
        cache.set("a".to_string(), 1);
        let written = cache.entry_info("a").unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("a"), Some(1));

        let read = cache.entry_info("a").unwrap();
        assert_eq!(read.access_count, 1);
        assert_eq!(read.inserted_at, written.inserted_at);
        assert!(read.last_accessed_at > written.last_accessed_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_restarts_ttl_keeps_count() {
        let cache = cache(4, EvictionPolicy::Lfu);
        cache.set("a".to_string(), 1);
        cache.get("a");
        cache.get("a");

        tokio::time::advance(Duration::from_secs(50)).await;
        cache.set("a".to_string(), 2);
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.entry_info("a").unwrap().access_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_prefers_expired_slot() {
        let cache: Cache<String, i32> = Cache::new(
            CacheConfiguration::new()
                .with_max_entries(2)
                .with_ttl(Duration::from_secs(1)),
        )
        .unwrap();
        cache.set("old".to_string(), 1);
        tokio::time::advance(Duration::from_secs(2)).await;
        cache.update_config(CacheConfigUpdate {
            ttl: Some(Duration::from_secs(60)),
            ..CacheConfigUpdate::default()
        })
        .unwrap();

        cache.set("fresh".to_string(), 2);
        cache.set("new".to_string(), 3);

        let stats = cache.stats();
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.expirations, 1);
        assert!(cache.has("fresh"));
        assert!(cache.has("new"));
    }

    #[test]
    fn test_delete_and_double_delete() {
        let cache = cache(4, EvictionPolicy::Lru);
        cache.set("a".to_string(), 1);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.stats().deletes, 1);
    }

    #[test]
    fn test_has_does_not_count() {
        let cache = cache(4, EvictionPolicy::Lru);
        cache.set("a".to_string(), 1);
        assert!(cache.has("a"));
        assert!(!cache.has("b"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_clear_resets_stats_and_memory() {
        let cache = cache(4, EvictionPolicy::Lru);
        cache.set("a".to_string(), 1);
        cache.get("a");
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.sets, 0);
        assert_eq!(stats.memory_bytes, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_memory_estimate() {
        let cache: Cache<String, String> =
            Cache::new(CacheConfiguration::new().with_entry_overhead(10)).unwrap();
        // "\"k\"" is 3 bytes, "\"abc\"" is 5 bytes
        cache.set("k".to_string(), "abc".to_string());
        assert_eq!(cache.stats().memory_bytes, 18);

        cache.set("k".to_string(), "a".to_string());
        assert_eq!(cache.stats().memory_bytes, 16);

        cache.delete("k");
        assert_eq!(cache.stats().memory_bytes, 0);
    }

    #[test]
    fn test_policy_switch_rebuilds_order() {
        let cache = cache(2, EvictionPolicy::Lru);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.get("a");

        cache
            .update_config(CacheConfigUpdate {
                eviction_policy: Some(EvictionPolicy::Fifo),
                ..CacheConfigUpdate::default()
            })
            .unwrap();
        cache.set("c".to_string(), 3);

        assert!(!cache.has("a"));
        assert!(cache.has("b"));
    }

    #[test]
    fn test_lower_capacity_evicts() {
        let cache = cache(3, EvictionPolicy::Fifo);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            cache.set(key.to_string(), i as i32);
        }

        cache
            .update_config(CacheConfigUpdate {
                max_entries: Some(1),
                ..CacheConfigUpdate::default()
            })
            .unwrap();

        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["c".to_string()]);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_invalid_update_is_rejected() {
        let cache = cache(3, EvictionPolicy::Lru);
        let result = cache.update_config(CacheConfigUpdate {
            max_entries: Some(0),
            ..CacheConfigUpdate::default()
        });
        assert_eq!(result, Err(ConfigError::ZeroCapacity));
        assert_eq!(cache.config().max_entries, 3);
    }

    #[test]
    fn test_get_or_insert_with_memoizes() {
        let cache = cache(4, EvictionPolicy::Lru);
        let mut calls = 0;
        let first = cache.get_or_insert_with("a".to_string(), || {
            calls += 1;
            7
        });
        let second = cache.get_or_insert_with("a".to_string(), || {
            calls += 1;
            8
        });

        assert_eq!((first, second), (7, 7));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_and_len() {
        let cache = cache(500, EvictionPolicy::Lru);
        for i in 0..300 {
            cache.set(format!("k{i}"), i);
        }
        assert_eq!(cache.len(), 300);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().size, 300);

        assert_eq!(cache.purge_expired(), 300);
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.stats().expirations, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_never_expires() {
        let cache: Cache<String, i32> =
            Cache::new(CacheConfiguration::new().with_ttl(Duration::MAX)).unwrap();
        cache.set("k".to_string(), 1);

        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert_eq!(cache.get("k"), Some(1));
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.len(), 1);
    }
}
