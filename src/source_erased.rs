//! Type-erased wrappers over [`CacheLoader`]/[`CacheWriter`] so
//! [`crate::cache::Cache`] can hold `Arc<dyn ErasedLoader<K, V>>` without
//! threading each collaborator's associated `Error` type through the
//! whole adapter. Every error is boxed into [`crate::error::BoxError`]
//! right at the crossing, matching how [`crate::error::Error`] wraps
//! collaborator failures elsewhere.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::error::BoxError;
use crate::source::{CacheLoader, CacheWriter, PartialFailure};

pub trait ErasedLoader<K, V>: Send + Sync {
    fn load(&self, key: &K) -> Result<Option<V>, BoxError>;

    fn load_all(&self, keys: &HashSet<K>) -> Result<HashMap<K, V>, BoxError>;
}

impl<K, V, L> ErasedLoader<K, V> for L
where
    K: Eq + Hash + Clone,
    L: CacheLoader<K, V>,
{
    fn load(&self, key: &K) -> Result<Option<V>, BoxError> {
        CacheLoader::load(self, key).map_err(|e| Box::new(e) as BoxError)
    }

    fn load_all(&self, keys: &HashSet<K>) -> Result<HashMap<K, V>, BoxError> {
        CacheLoader::load_all(self, keys).map_err(|e| Box::new(e) as BoxError)
    }
}

/// A batch write/delete outcome with boxed failure details, the erased
/// counterpart of [`PartialFailure`].
pub struct ErasedPartialFailure<K> {
    pub failed_keys: HashSet<K>,
    pub cause: BoxError,
}

impl<K, E: std::error::Error + Send + Sync + 'static> From<PartialFailure<K, E>>
    for ErasedPartialFailure<K>
{
    fn from(value: PartialFailure<K, E>) -> Self {
        Self {
            failed_keys: value.failed_keys,
            cause: Box::new(value.cause),
        }
    }
}

pub trait ErasedWriter<K, V>: Send + Sync {
    fn write(&self, key: &K, value: &V) -> Result<(), BoxError>;

    fn delete(&self, key: &K) -> Result<(), BoxError>;

    fn write_all(&self, entries: &[(K, V)]) -> Result<(), ErasedPartialFailure<K>>;

    fn delete_all(&self, keys: &HashSet<K>) -> Result<(), ErasedPartialFailure<K>>;
}

impl<K, V, W> ErasedWriter<K, V> for W
where
    K: Eq + Hash + Clone,
    W: CacheWriter<K, V>,
{
    fn write(&self, key: &K, value: &V) -> Result<(), BoxError> {
        CacheWriter::write(self, key, value).map_err(|e| Box::new(e) as BoxError)
    }

    fn delete(&self, key: &K) -> Result<(), BoxError> {
        CacheWriter::delete(self, key).map_err(|e| Box::new(e) as BoxError)
    }

    fn write_all(&self, entries: &[(K, V)]) -> Result<(), ErasedPartialFailure<K>> {
        CacheWriter::write_all(self, entries).map_err(ErasedPartialFailure::from)
    }

    fn delete_all(&self, keys: &HashSet<K>) -> Result<(), ErasedPartialFailure<K>> {
        CacheWriter::delete_all(self, keys).map_err(ErasedPartialFailure::from)
    }
}
