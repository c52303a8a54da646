//! End-to-end coverage of eviction, read-through races, write-through
//! partial failure, entry-processor reentrancy and atomicity, and
//! iterator expiry cleanup, driven entirely through the public API.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serial_test::serial;

use jcache::{
    Cache, CacheEntryEvent, CacheEntryListener, CacheLoader, CacheWriter, EntryProcessor, Error,
    EventType, ExpiryPolicy, MutableEntry, Ttl,
};

/// Scenario 1: lazy eviction via access.
#[test]
#[serial]
fn lazy_eviction_emits_expired_and_counts_miss_and_eviction() {
    let expired_log: Arc<Mutex<Vec<CacheEntryEvent<String, String>>>> =
        Arc::new(Mutex::new(Vec::new()));

    struct RecordingListener {
        expired: Arc<Mutex<Vec<CacheEntryEvent<String, String>>>>,
    }
    impl CacheEntryListener<String, String> for RecordingListener {
        fn on_expired(&self, events: &[CacheEntryEvent<String, String>]) {
            self.expired.lock().unwrap().extend_from_slice(events);
        }
    }

    let listener = RecordingListener {
        expired: Arc::clone(&expired_log),
    };
    let config = Cache::builder()
        .constant_ttl(Duration::from_millis(50))
        .statistics_enabled(true)
        .add_listener(listener, [EventType::Expired], true, true)
        .build()
        .unwrap();
    let cache: Cache<String, String> = Cache::new(config);

    cache.put("k".to_string(), "v".to_string()).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(None, cache.get(&"k".to_string()).unwrap());
    assert_eq!(1, cache.statistics().evictions());
    assert_eq!(1, cache.statistics().misses());

    let events = expired_log.lock().unwrap();
    assert_eq!(1, events.len());
    assert_eq!(Some("v".to_string()), events[0].old_value);
}

/// Scenario 2: a read-through load racing a concurrent write is
/// discarded; the caller still observes the loaded value locally, but
/// the store keeps whatever the concurrent write installed.
#[test]
fn read_through_discards_loaded_value_on_concurrent_write() {
    struct RacingLoader {
        cache_cell: Arc<OnceLock<Arc<Cache<String, String>>>>,
    }
    impl CacheLoader<String, String> for RacingLoader {
        type Error = Infallible;
        fn load(&self, _key: &String) -> Result<Option<String>, Infallible> {
            // Simulates another thread's write landing between this
            // cache's read-through probe and its install phase.
            if let Some(cache) = self.cache_cell.get() {
                cache.put("k".to_string(), "B".to_string()).unwrap();
            }
            Ok(Some("loaded".to_string()))
        }
    }

    let cell = Arc::new(OnceLock::new());
    let loader = RacingLoader {
        cache_cell: Arc::clone(&cell),
    };
    let config = Cache::builder().read_through(loader).build().unwrap();
    let cache = Arc::new(Cache::new(config));
    cell.set(Arc::clone(&cache)).ok();

    let observed = cache.get(&"k".to_string()).unwrap();
    assert_eq!(Some("loaded".to_string()), observed);
    assert_eq!(Some("B".to_string()), cache.get(&"k".to_string()).unwrap());
}

/// Scenario 3: a batch write-through failure on one key excludes only
/// that key from the mutation, and the raised error names it.
#[test]
fn put_all_partial_writer_failure_excludes_failed_key() {
    struct PartialWriter;
    impl CacheWriter<String, i32> for PartialWriter {
        type Error = std::fmt::Error;
        fn write(&self, key: &String, _value: &i32) -> Result<(), std::fmt::Error> {
            if key == "b" {
                Err(std::fmt::Error)
            } else {
                Ok(())
            }
        }
        fn delete(&self, _key: &String) -> Result<(), std::fmt::Error> {
            Ok(())
        }
    }

    let config = Cache::builder()
        .write_through(PartialWriter)
        .statistics_enabled(true)
        .build()
        .unwrap();
    let cache: Cache<String, i32> = Cache::new(config);

    let mut entries = HashMap::new();
    entries.insert("a".to_string(), 1);
    entries.insert("b".to_string(), 2);
    entries.insert("c".to_string(), 3);

    let err = cache.put_all(entries).unwrap_err();
    match err {
        Error::WriterFailed { failed_keys, .. } => {
            assert_eq!(1, failed_keys.len());
            assert!(failed_keys[0].contains('b'));
        }
        other => panic!("expected WriterFailed, got {other:?}"),
    }

    assert_eq!(Some(1), cache.get(&"a".to_string()).unwrap());
    assert_eq!(Some(3), cache.get(&"c".to_string()).unwrap());
    assert_eq!(None, cache.get(&"b".to_string()).unwrap());
    assert_eq!(2, cache.statistics().puts());
}

/// Scenario 4: a cache call from inside an entry processor body is
/// rejected, and the processor can recover from that and still commit.
#[test]
fn entry_processor_rejects_reentrant_cache_call() {
    let config = Cache::builder().build().unwrap();
    let cache: Cache<String, i32> = Cache::new(config);
    cache.put("k2".to_string(), 7).unwrap();

    let processor = |entry: &mut MutableEntry<i32>, _key: &String, _args: &()| -> Result<(), Error> {
        match cache.get(&"k2".to_string()) {
            Err(Error::Reentrant) => {
                entry.set_value(Some(99))?;
                Ok(())
            }
            other => panic!("expected Reentrant, got {other:?}"),
        }
    };

    cache.invoke("k".to_string(), &processor, &()).unwrap();
    assert_eq!(Some(99), cache.get(&"k".to_string()).unwrap());
    // the reentrant probe never touched "k2"
    assert_eq!(Some(7), cache.get(&"k2".to_string()).unwrap());
}

fn counter_processor(entry: &mut MutableEntry<i32>, _key: &String, _args: &()) -> Result<(), Infallible> {
    let next = entry.get_value().copied().unwrap_or(0) + 1;
    entry.set_value(Some(next)).unwrap();
    Ok(())
}

/// Scenario 5, sequential: 1000 invocations of an increment processor
/// land exactly once each.
#[test]
fn invoke_counter_sequential_has_no_lost_updates() {
    let config = Cache::builder().build().unwrap();
    let cache: Cache<String, i32> = Cache::new(config);
    for _ in 0..1000 {
        cache.invoke("c".to_string(), &counter_processor, &()).unwrap();
    }
    assert_eq!(Some(1000), cache.get(&"c".to_string()).unwrap());
}

/// Scenario 5, concurrent: the same processor run from many threads
/// still lands every increment, since each `invoke` is atomic per key.
#[test]
fn invoke_counter_concurrent_has_no_lost_updates() {
    let config = Cache::builder().build().unwrap();
    let cache = Arc::new(Cache::new(config));
    let threads = 8;
    let per_thread = 250;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for _ in 0..per_thread {
                    cache.invoke("c".to_string(), &counter_processor, &()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(Some(threads * per_thread), cache.get(&"c".to_string()).unwrap());
}

/// Scenario 6: the iterator skips an entry that expired since the key
/// snapshot was taken, evicting it along the way.
#[test]
#[serial]
fn iterator_skips_expired_entries_and_counts_eviction() {
    struct PerKeyExpiry;
    impl ExpiryPolicy<String, String> for PerKeyExpiry {
        fn expiry_for_creation(&self, key: &String, _value: &String) -> Ttl {
            if key == "k2" {
                Ttl::After(Duration::from_millis(10))
            } else {
                Ttl::Eternal
            }
        }
    }

    let config = Cache::builder()
        .expiry_policy(PerKeyExpiry)
        .statistics_enabled(true)
        .build()
        .unwrap();
    let cache: Cache<String, String> = Cache::new(config);
    cache.put("k1".to_string(), "v1".to_string()).unwrap();
    cache.put("k2".to_string(), "v2".to_string()).unwrap();
    std::thread::sleep(Duration::from_millis(60));

    let remaining: Vec<_> = cache.iter().collect();
    assert_eq!(vec![("k1".to_string(), "v1".to_string())], remaining);
    assert_eq!(1, cache.statistics().evictions());
}

/// Round-trip invariant: clearing leaves no trace and fires no events.
#[test]
fn clear_leaves_no_removed_or_expired_events() {
    struct RecordingListener {
        saw_any: Arc<Mutex<bool>>,
    }
    impl CacheEntryListener<String, String> for RecordingListener {
        fn on_removed(&self, _events: &[CacheEntryEvent<String, String>]) {
            *self.saw_any.lock().unwrap() = true;
        }
        fn on_expired(&self, _events: &[CacheEntryEvent<String, String>]) {
            *self.saw_any.lock().unwrap() = true;
        }
    }

    let saw_any = Arc::new(Mutex::new(false));
    let listener = RecordingListener {
        saw_any: Arc::clone(&saw_any),
    };
    let config = Cache::builder()
        .add_listener(listener, [EventType::Removed, EventType::Expired], true, false)
        .build()
        .unwrap();
    let cache: Cache<String, String> = Cache::new(config);

    cache.put("k".to_string(), "v".to_string()).unwrap();
    cache.clear().unwrap();

    assert_eq!(None, cache.get(&"k".to_string()).unwrap());
    assert!(!*saw_any.lock().unwrap());
}
