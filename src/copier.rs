//! Value isolation strategies, applied at every boundary between the
//! store and the caller (put, get, iterator yield, listener old/new
//! value, entry-adapter `get_value`).

use std::sync::Arc;

use crate::error::Error;

/// Isolates a value crossing a cache boundary.
///
/// `IdentityCopier` models "store-by-reference" (`storeByValue = false`)
/// via `Arc` sharing, since Rust has no safe way to alias a bare `V`
/// across threads without one. `CloneCopier` models "store-by-value"
/// (the contract default) by cloning the value outright.
pub trait Copier<V>: Send + Sync {
    fn copy(&self, value: &V) -> Result<V, Error>;
}

/// Store-by-value: every boundary crossing clones.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneCopier;

impl<V: Clone> Copier<V> for CloneCopier {
    fn copy(&self, value: &V) -> Result<V, Error> {
        Ok(value.clone())
    }
}

/// Store-by-reference: the "copy" is a cheap `Arc` clone of a shared
/// value. Requires values to already be wrapped in `Arc<T>` by the
/// caller - this crate does not implicitly wrap `V` in `Arc` since doing
/// so would change the cache's value type underneath it.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCopier;

impl<T: ?Sized> Copier<Arc<T>> for IdentityCopier {
    fn copy(&self, value: &Arc<T>) -> Result<Arc<T>, Error> {
        Ok(Arc::clone(value))
    }
}

/// Deep copy through a serialize/deserialize round trip, for values where
/// a structural copy through a different representation is wanted rather
/// than relying on a (possibly shallow) `Clone` impl.
#[cfg(feature = "serde")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeCopier;

#[cfg(feature = "serde")]
impl<V> Copier<V> for SerdeCopier
where
    V: serde::Serialize + serde::de::DeserializeOwned,
{
    fn copy(&self, value: &V) -> Result<V, Error> {
        let bytes = serde_json::to_vec(value).map_err(|e| Error::Serialization(Box::new(e)))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Serialization(Box::new(e)))
    }
}
