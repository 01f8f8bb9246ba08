use std::fmt;
use std::sync::Mutex;

use lru::LruCache;

use crate::key::ResourceKey;

struct Entry<R> {
    resource: R,
    cost: u32,
}

/// The in-memory tier: a bounded, cost-aware LRU map from key to decoded
/// resource.
///
/// All operations are synchronous, complete without suspension, and are safe
/// to call from any number of concurrent callers; the map is mutated through
/// one internal mutex. A [`get`](Self::get) refreshes the entry's recency. A
/// [`put`](Self::put) evicts least-recently-used entries until both the
/// count and the total-cost budget hold again, so the tier never stays over
/// budget after an insert returns.
///
/// Cost is supplied by the caller (an approximate decoded byte size); the
/// tier never inspects resource internals.
pub struct MemoryCache<R> {
    inner: Mutex<Inner<R>>,
    max_entries: Option<usize>,
    max_total_cost: Option<u64>,
}

struct Inner<R> {
    entries: LruCache<ResourceKey, Entry<R>>,
    total_cost: u64,
}

impl<R> fmt::Debug for MemoryCache<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("MemoryCache")
            .field("entries", &inner.entries.len())
            .field("total_cost", &inner.total_cost)
            .field("max_entries", &self.max_entries)
            .field("max_total_cost", &self.max_total_cost)
            .finish()
    }
}

impl<R: Clone> MemoryCache<R> {
    /// Creates a tier with the given budgets. `None` disables the respective
    /// limit.
    pub fn new(max_entries: Option<usize>, max_total_cost: Option<u64>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_cost: 0,
            }),
            max_entries,
            max_total_cost,
        }
    }

    /// Looks up a resource, refreshing its recency on a hit.
    pub fn get(&self, key: &ResourceKey) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.get(key).map(|entry| entry.resource.clone())
    }

    /// Inserts a resource, then evicts LRU entries until within budget.
    pub fn put(&self, key: ResourceKey, resource: R, cost: u32) {
        let mut inner = self.inner.lock().unwrap();

        // The cache is unbounded at the `LruCache` level, so the only way
        // `push` returns an entry is a same-key replacement.
        if let Some((_, replaced)) = inner.entries.push(key, Entry { resource, cost }) {
            inner.total_cost -= replaced.cost as u64;
        }
        inner.total_cost += cost as u64;

        while self.max_entries.is_some_and(|limit| inner.entries.len() > limit)
            || self.max_total_cost.is_some_and(|limit| inner.total_cost > limit)
        {
            let Some((evicted_key, evicted)) = inner.entries.pop_lru() else {
                break;
            };
            inner.total_cost -= evicted.cost as u64;
            tracing::trace!("Evicted `{evicted_key}` from the in-memory cache");
            metric!(counter("caches.memory.eviction") += 1);
        }

        metric!(gauge("caches.memory.size") = inner.total_cost);
    }

    /// Removes all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.total_cost = 0;
    }

    /// The number of entries currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The summed cost of all entries currently held.
    pub fn total_cost(&self) -> u64 {
        self.inner.lock().unwrap().total_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ResourceKey {
        ResourceKey::from_locator(name)
    }

    #[test]
    fn test_get_put_clear() {
        let cache = MemoryCache::new(None, None);

        assert_eq!(cache.get(&key("a")), None);

        cache.put(key("a"), "artwork".to_string(), 7);
        assert_eq!(cache.get(&key("a")).as_deref(), Some("artwork"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 7);

        cache.clear();
        assert_eq!(cache.get(&key("a")), None);
        assert!(cache.is_empty());
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_count_budget() {
        let cache = MemoryCache::new(Some(2), None);

        cache.put(key("a"), (), 1);
        cache.put(key("b"), (), 1);
        cache.put(key("c"), (), 1);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.get(&key("b")), Some(()));
        assert_eq!(cache.get(&key("c")), Some(()));
    }

    #[test]
    fn test_cost_budget() {
        let cache = MemoryCache::new(None, Some(100));

        cache.put(key("a"), (), 60);
        cache.put(key("b"), (), 30);
        assert_eq!(cache.total_cost(), 90);

        cache.put(key("c"), (), 40);
        assert_eq!(cache.total_cost(), 70);
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.get(&key("b")), Some(()));
        assert_eq!(cache.get(&key("c")), Some(()));
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = MemoryCache::new(Some(2), None);

        cache.put(key("a"), (), 1);
        cache.put(key("b"), (), 1);
        assert_eq!(cache.get(&key("a")), Some(()));

        cache.put(key("c"), (), 1);

        assert_eq!(cache.get(&key("a")), Some(()));
        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.get(&key("c")), Some(()));
    }

    #[test]
    fn test_oversized_entry_is_not_held() {
        let cache = MemoryCache::new(None, Some(10));

        cache.put(key("a"), (), 50);

        assert!(cache.is_empty());
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_same_key_replacement() {
        let cache = MemoryCache::new(None, None);

        cache.put(key("a"), 1u8, 10);
        cache.put(key("a"), 2u8, 30);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 30);
        assert_eq!(cache.get(&key("a")), Some(2));
    }

    #[test]
    fn test_budgets_hold_under_churn() {
        let cache = MemoryCache::new(Some(8), Some(1000));

        for i in 0..100u32 {
            cache.put(key(&format!("res-{i}")), (), (i * 37) % 300);

            assert!(cache.len() <= 8);
            assert!(cache.total_cost() <= 1000);
        }
    }
}
