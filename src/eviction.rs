//! Eviction policies for capacity-bound cache entries

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Rule used to pick a victim when the cache is full
///
/// TTL expiry is independent of the policy: expired entries are always
/// removed, whichever policy is selected.
///
/// # Examples
///
/// ```
/// use resource_lifecycle::EvictionPolicy;
///
/// let policy: EvictionPolicy = "lfu".parse().unwrap();
/// assert_eq!(policy, EvictionPolicy::Lfu);
/// assert_eq!(policy.to_string(), "lfu");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used: oldest access goes first
    #[default]
    Lru,

    /// Least frequently used: fewest reads go first, oldest access breaks ties
    Lfu,

    /// First in, first out: insertion order, access pattern ignored
    Fifo,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
        };
        f.write_str(name)
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

/// Position of an entry in the victim order. Lower ranks are evicted first.
pub(crate) type Rank = (u64, u64);

/// Usage metadata kept for every cache entry.
///
/// Ticks come from a per-cache monotonic counter, so no two entries ever
/// share an access or insertion tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Usage {
    pub insert_tick: u64,
    pub access_tick: u64,
    pub access_count: u64,
}

impl Usage {
    pub fn new(tick: u64) -> Self {
        Self {
            insert_tick: tick,
            access_tick: tick,
            access_count: 0,
        }
    }

    pub fn touch(&mut self, tick: u64) {
        self.access_tick = tick;
        self.access_count += 1;
    }
}

impl EvictionPolicy {
    pub(crate) fn rank(self, usage: &Usage) -> Rank {
        match self {
            EvictionPolicy::Lru => (usage.access_tick, 0),
            EvictionPolicy::Lfu => (usage.access_count, usage.access_tick),
            EvictionPolicy::Fifo => (usage.insert_tick, 0),
        }
    }
}

/// Ordered victim index: O(log n) insert, reposition and eviction.
pub(crate) struct EvictionIndex<K> {
    policy: EvictionPolicy,
    order: BTreeMap<Rank, K>,
}

impl<K> EvictionIndex<K> {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            order: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn insert(&mut self, usage: &Usage, key: K) {
        self.order.insert(self.policy.rank(usage), key);
    }

    pub fn remove(&mut self, usage: &Usage) -> Option<K> {
        self.order.remove(&self.policy.rank(usage))
    }

    /// Move an entry after its usage changed from `before` to `after`.
    pub fn reposition(&mut self, before: &Usage, after: &Usage) {
        if let Some(key) = self.remove(before) {
            self.insert(after, key);
        }
    }

    pub fn pop_victim(&mut self) -> Option<K> {
        self.order.pop_first().map(|(_, key)| key)
    }

    /// Re-rank every entry under a new policy.
    pub fn rebuild<I>(&mut self, policy: EvictionPolicy, entries: I)
    where
        I: IntoIterator<Item = (Usage, K)>,
    {
        self.policy = policy;
        self.order = entries
            .into_iter()
            .map(|(usage, key)| (policy.rank(&usage), key))
            .collect();
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(insert_tick: u64, access_tick: u64, access_count: u64) -> Usage {
        Usage {
            insert_tick,
            access_tick,
            access_count,
        }
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("LRU".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lru));
        assert_eq!(" fifo ".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Fifo));
        assert!("random".parse::<EvictionPolicy>().is_err());
    }

    #[test]
    fn test_lru_picks_oldest_access() {
        let mut index = EvictionIndex::new(EvictionPolicy::Lru);
        index.insert(&usage(1, 5, 2), "a");
        index.insert(&usage(2, 3, 9), "b");
        index.insert(&usage(3, 4, 0), "c");

        assert_eq!(index.pop_victim(), Some("b"));
        assert_eq!(index.pop_victim(), Some("c"));
    }

    #[test]
    fn test_lfu_breaks_ties_by_oldest_access() {
        let mut index = EvictionIndex::new(EvictionPolicy::Lfu);
        index.insert(&usage(1, 7, 1), "a");
        index.insert(&usage(2, 6, 1), "b");
        index.insert(&usage(3, 2, 4), "c");

        assert_eq!(index.pop_victim(), Some("b"));
        assert_eq!(index.pop_victim(), Some("a"));
    }

    #[test]
    fn test_fifo_ignores_access() {
        let mut index = EvictionIndex::new(EvictionPolicy::Fifo);
        index.insert(&usage(1, 9, 50), "a");
        index.insert(&usage(2, 3, 0), "b");

        assert_eq!(index.pop_victim(), Some("a"));
    }

    #[test]
    fn test_reposition_after_touch() {
        let mut index = EvictionIndex::new(EvictionPolicy::Lru);
        let mut first = Usage::new(1);
        index.insert(&first, "a");
        index.insert(&Usage::new(2), "b");

        let before = first;
        first.touch(3);
        index.reposition(&before, &first);

        assert_eq!(index.len(), 2);
        assert_eq!(index.pop_victim(), Some("b"));
    }

    #[test]
    fn test_rebuild_switches_policy() {
        let mut index = EvictionIndex::new(EvictionPolicy::Lru);
        let a = usage(1, 10, 5);
        let b = usage(2, 3, 1);
        index.insert(&a, "a");
        index.insert(&b, "b");

        index.rebuild(EvictionPolicy::Fifo, vec![(a, "a"), (b, "b")]);
        assert_eq!(index.policy(), EvictionPolicy::Fifo);
        assert_eq!(index.pop_victim(), Some("a"));
    }
}
