//! The concurrent map backend: key → [`Expirable`] storage with atomic
//! single-key compute.
//!
//! Treated as an external collaborator - the adapter never reaches inside
//! a slot except through [`Store::compute`]. Backed by `dashmap`, whose
//! per-shard locking gives exactly the "no cross-key locking, per-key
//! atomicity" model this crate needs.

use std::hash::{BuildHasher, Hash};

use dashmap::mapref::entry::Entry as DEntry;
use dashmap::DashMap;

use crate::expirable::Expirable;

#[cfg(feature = "ahash")]
pub type DefaultHashBuilder = ahash::RandomState;
#[cfg(not(feature = "ahash"))]
pub type DefaultHashBuilder = std::collections::hash_map::RandomState;

/// What an atomic compute decides to do with a slot.
pub enum Decision<V> {
    /// Leave the slot exactly as it was observed.
    Keep,
    /// Install this value (creating or replacing the slot).
    Insert(Expirable<V>),
    /// Remove the slot if present.
    Remove,
}

/// A single-key atomic compute-and-commit, plus the handful of
/// uncontended read/scan operations the adapter needs. The function
/// passed to `compute` must be pure: no I/O, no loader/writer/listener
/// calls, no statistics, no copying - only the expiration check, value
/// comparison, and the `Decision`.
pub trait Store<K, V>: Send + Sync
where
    K: Eq + Hash + Clone,
{
    /// Atomically observes the current slot (or absence) and commits
    /// whatever `f` decides, returning `f`'s auxiliary result `R`.
    fn compute<F, R>(&self, key: &K, f: F) -> R
    where
        F: FnOnce(Option<&Expirable<V>>) -> (Decision<V>, R);

    /// A cloned snapshot of the current slot, if any. Never expiration-
    /// aware by itself - callers decide what "expired" means.
    fn get(&self, key: &K) -> Option<Expirable<V>>;

    /// Unconditionally discards every slot. No per-key decision, no
    /// return value - used only by `clear()`, which the contract defines
    /// as firing no events and counting no evictions/removals.
    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A point-in-time snapshot of the current keys, used by operations
    /// that must enumerate the whole store (`remove_all()`, the
    /// iterator). Snapshotting avoids holding any shard lock while the
    /// adapter walks keys and re-enters `compute` per key.
    fn snapshot_keys(&self) -> Vec<K>;
}

/// `dashmap`-backed [`Store`] implementation.
pub struct DashMapStore<K, V, S = DefaultHashBuilder> {
    map: DashMap<K, Expirable<V>, S>,
}

impl<K, V> DashMapStore<K, V, DefaultHashBuilder>
where
    K: Eq + Hash + Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: DashMap::default(),
        }
    }
}

impl<K, V> Default for DashMapStore<K, V, DefaultHashBuilder>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Store<K, V> for DashMapStore<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
    S: BuildHasher + Clone + Send + Sync + Default,
{
    fn compute<F, R>(&self, key: &K, f: F) -> R
    where
        F: FnOnce(Option<&Expirable<V>>) -> (Decision<V>, R),
    {
        match self.map.entry(key.clone()) {
            DEntry::Occupied(mut occupied) => {
                let (decision, ret) = f(Some(occupied.get()));
                match decision {
                    Decision::Keep => {}
                    Decision::Insert(e) => {
                        occupied.insert(e);
                    }
                    Decision::Remove => {
                        occupied.remove();
                    }
                }
                ret
            }
            DEntry::Vacant(vacant) => {
                let (decision, ret) = f(None);
                if let Decision::Insert(e) = decision {
                    vacant.insert(e);
                }
                ret
            }
        }
    }

    fn get(&self, key: &K) -> Option<Expirable<V>> {
        self.map.get(key).map(|r| r.value().clone())
    }

    fn clear(&self) {
        self.map.clear();
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn snapshot_keys(&self) -> Vec<K> {
        self.map.iter().map(|r| r.key().clone()).collect()
    }
}
