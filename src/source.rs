//! Read-through loader and write-through writer hooks.
//!
//! Shaped the same way as this crate's other collaborator traits
//! ([`crate::copier::Copier`], [`crate::expiry::ExpiryPolicy`]): a small
//! trait with a required single-item method and a default batch method
//! that falls back to repeated single-item calls, so callers that only
//! have a single-item source don't have to implement a batch variant.

use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;

/// Read-through source. `load` is required; `load_all` defaults to one
/// `load` per key but should be overridden whenever the backing source
/// has a genuine batch API, since `Cache::get_all`/`Cache::load_all`
/// prefer it when present.
pub trait CacheLoader<K, V>: Send + Sync {
    type Error: StdError + Send + Sync + 'static;

    fn load(&self, key: &K) -> Result<Option<V>, Self::Error>;

    fn load_all(
        &self,
        keys: &HashSet<K>,
    ) -> Result<HashMap<K, V>, Self::Error>
    where
        K: Eq + std::hash::Hash + Clone,
    {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(v) = self.load(key)? {
                out.insert(key.clone(), v);
            }
        }
        Ok(out)
    }
}

/// The detail a batch write/delete reports back when only some keys
/// succeeded: the subset that is *still* failed.
pub struct PartialFailure<K, E> {
    pub failed_keys: HashSet<K>,
    pub cause: E,
}

/// Write-through sink. `write`/`delete` are required; `write_all`/
/// `delete_all` default to sequential single-key calls, collecting every
/// key whose single-key call failed into a [`PartialFailure`].
pub trait CacheWriter<K, V>: Send + Sync {
    type Error: StdError + Send + Sync + 'static;

    fn write(&self, key: &K, value: &V) -> Result<(), Self::Error>;

    fn delete(&self, key: &K) -> Result<(), Self::Error>;

    #[allow(clippy::type_complexity)]
    fn write_all(
        &self,
        entries: &[(K, V)],
    ) -> Result<(), PartialFailure<K, Self::Error>>
    where
        K: Eq + std::hash::Hash + Clone,
    {
        let mut failed = HashSet::new();
        let mut last_cause = None;
        for (k, v) in entries {
            if let Err(e) = self.write(k, v) {
                failed.insert(k.clone());
                last_cause = Some(e);
            }
        }
        match last_cause {
            Some(cause) => Err(PartialFailure {
                failed_keys: failed,
                cause,
            }),
            None => Ok(()),
        }
    }

    fn delete_all(
        &self,
        keys: &HashSet<K>,
    ) -> Result<(), PartialFailure<K, Self::Error>>
    where
        K: Eq + std::hash::Hash + Clone,
    {
        let mut failed = HashSet::new();
        let mut last_cause = None;
        for k in keys {
            if let Err(e) = self.delete(k) {
                failed.insert(k.clone());
                last_cause = Some(e);
            }
        }
        match last_cause {
            Some(cause) => Err(PartialFailure {
                failed_keys: failed,
                cause,
            }),
            None => Ok(()),
        }
    }
}

/// A listener notified exactly once when [`crate::Cache::load_all`]'s
/// background task finishes, successfully or not.
pub trait CompletionListener: Send + Sync {
    fn on_completion(&self);
    fn on_exception(&self, error: &(dyn StdError + Send + Sync + 'static));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    struct MapLoader(HashMap<i32, String>);
    impl CacheLoader<i32, String> for MapLoader {
        type Error = Infallible;
        fn load(&self, key: &i32) -> Result<Option<String>, Infallible> {
            Ok(self.0.get(key).cloned())
        }
    }

    #[test]
    fn default_load_all_falls_back_to_load() {
        let mut map = HashMap::new();
        map.insert(1, "a".to_string());
        let loader = MapLoader(map);
        let keys: HashSet<i32> = [1, 2].into_iter().collect();
        let loaded = loader.load_all(&keys).unwrap();
        assert_eq!(Some(&"a".to_string()), loaded.get(&1));
        assert_eq!(None, loaded.get(&2));
    }

    struct FailingWriter;
    impl CacheWriter<i32, String> for FailingWriter {
        type Error = std::fmt::Error;
        fn write(&self, key: &i32, _value: &String) -> Result<(), std::fmt::Error> {
            if *key == 2 {
                Err(std::fmt::Error)
            } else {
                Ok(())
            }
        }
        fn delete(&self, _key: &i32) -> Result<(), std::fmt::Error> {
            Ok(())
        }
    }

    #[test]
    fn default_write_all_reports_failed_keys() {
        let writer = FailingWriter;
        let entries = vec![(1, "a".to_string()), (2, "b".to_string()), (3, "c".to_string())];
        let err = writer.write_all(&entries).unwrap_err();
        assert_eq!(HashSet::from([2]), err.failed_keys);
    }
}
