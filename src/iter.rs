//! The lazily-expiring cache iterator.
//!
//! Walks a point-in-time snapshot of keys, skipping any that turn out
//! absent or expired by the time they're reached (another thread may
//! have removed or replaced them since the snapshot was taken), cleaning
//! up expired entries exactly as `get`/`contains_key`
//! do along the way. `remove()` removes the most recently yielded key
//! through the ordinary `remove` path, so it still goes through
//! write-through and fires REMOVED.

use std::hash::Hash;
use std::time::Instant;

use crate::cache::Cache;
use crate::error::Error;

/// Snapshot-then-filter iterator over live entries.
///
/// Borrows the cache for its lifetime; entries observed expired while
/// iterating are evicted (EXPIRED fired, eviction counted) but no
/// hit/miss is recorded, matching `contains_key`.
pub struct CacheIter<'a, K, V> {
    cache: &'a Cache<K, V>,
    keys: std::vec::IntoIter<K>,
    last_yielded: Option<K>,
}

impl<'a, K, V> CacheIter<'a, K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(cache: &'a Cache<K, V>) -> Self {
        Self {
            cache,
            keys: cache.snapshot_keys().into_iter(),
            last_yielded: None,
        }
    }

    /// Removes the key most recently returned by `next()`, via the
    /// ordinary [`Cache::remove`] path (write-through runs, REMOVED
    /// fires, removals++). A no-op if nothing has been yielded yet, or
    /// if the key was already gone by the time this is called.
    pub fn remove(&mut self) -> Result<bool, Error> {
        match self.last_yielded.take() {
            Some(key) => self.cache.remove_via_iterator(&key),
            None => Ok(false),
        }
    }
}

impl<'a, K, V> Iterator for CacheIter<'a, K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        for key in self.keys.by_ref() {
            let now = Instant::now();
            if let Some(value) = self.cache.peek_live_for_iteration(&key, now) {
                let Ok(value) = self.cache.copy_for_caller(&value) else {
                    continue;
                };
                self.last_yielded = Some(key.clone());
                return Some((key, value));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfigBuilder;
    use std::collections::HashSet;
    use std::time::Duration;

    #[test]
    fn iterates_every_live_entry() {
        let config: crate::config::CacheConfiguration<i32, String> =
            CacheConfigBuilder::new().build().unwrap();
        let cache = Cache::new(config);
        cache.put(1, "a".to_string()).unwrap();
        cache.put(2, "b".to_string()).unwrap();

        let seen: HashSet<i32> = cache.iter().map(|(k, _)| k).collect();
        assert_eq!(HashSet::from([1, 2]), seen);
    }

    #[test]
    fn skips_expired_entries_and_evicts_them() {
        let config: crate::config::CacheConfiguration<i32, String> = CacheConfigBuilder::new()
            .constant_ttl(Duration::from_millis(1))
            .statistics_enabled(true)
            .build()
            .unwrap();
        let cache = Cache::new(config);
        cache.put(1, "a".to_string()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let seen: Vec<_> = cache.iter().collect();
        assert!(seen.is_empty());
        assert_eq!(1, cache.statistics().evictions());
    }

    #[test]
    fn remove_deletes_the_last_yielded_key() {
        let config: crate::config::CacheConfiguration<i32, String> =
            CacheConfigBuilder::new().build().unwrap();
        let cache = Cache::new(config);
        cache.put(1, "a".to_string()).unwrap();

        let mut iter = cache.iter();
        assert!(iter.next().is_some());
        assert!(iter.remove().unwrap());
        drop(iter);

        assert_eq!(None, cache.get(&1).unwrap());
    }
}
