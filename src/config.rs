//! Cache configuration: the immutable snapshot of options plus the
//! fluent builder that validates and assembles it.
//!
//! Fluent setters consumed by a `build()` that returns a `Result`.

use std::collections::HashSet;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::copier::{CloneCopier, Copier};
use crate::error::Error;
use crate::event::{CacheEntryListener, EventType, ListenerRegistration};
use crate::expiry::{ExpiryPolicy, TouchedExpiryPolicy};
use crate::source::{CacheLoader, CacheWriter};
use crate::source_erased::{ErasedLoader, ErasedWriter};

/// Size/weight eviction configuration. Accepted and validated for
/// forward compatibility with a weighted backend; this crate's `dashmap`
/// backend does not itself enforce either bound (see DESIGN.md).
#[derive(Clone)]
pub enum CapacityLimit<V> {
    MaximumSize(u64),
    MaximumWeight {
        max_weight: u64,
        weigher: Arc<dyn Fn(&V) -> u64 + Send + Sync>,
    },
}

/// A plain-data snapshot of the recognized options, independent of the
/// trait-object collaborators, so it can carry `serde` derives.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub name: String,
    pub store_by_value: bool,
    pub statistics_enabled: bool,
    pub read_through: bool,
    pub write_through: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "cache".to_string(),
            store_by_value: true,
            statistics_enabled: false,
            read_through: false,
            write_through: false,
        }
    }
}

/// The fully assembled configuration, including collaborators that can't
/// be `serde`-derived (they're behind trait objects).
pub struct CacheConfiguration<K, V> {
    pub(crate) plain: CacheConfig,
    pub(crate) copier: Arc<dyn Copier<V>>,
    pub(crate) expiry_policy: Arc<dyn ExpiryPolicy<K, V>>,
    pub(crate) loader: Option<Arc<dyn ErasedLoader<K, V>>>,
    pub(crate) writer: Option<Arc<dyn ErasedWriter<K, V>>>,
    pub(crate) listeners: Vec<ListenerRegistration<K, V>>,
    pub(crate) capacity: Option<CapacityLimit<V>>,
}

/// Fluent builder for [`CacheConfiguration`], the entry point a
/// surrounding factory/manager would otherwise own.
pub struct CacheConfigBuilder<K, V> {
    plain: CacheConfig,
    copier: Option<Arc<dyn Copier<V>>>,
    expiry_policy: Option<Arc<dyn ExpiryPolicy<K, V>>>,
    loader: Option<Arc<dyn ErasedLoader<K, V>>>,
    writer: Option<Arc<dyn ErasedWriter<K, V>>>,
    listeners: Vec<ListenerRegistration<K, V>>,
    capacity: Option<CapacityLimit<V>>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> Default for CacheConfigBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            plain: CacheConfig::default(),
            copier: None,
            expiry_policy: None,
            loader: None,
            writer: None,
            listeners: Vec::new(),
            capacity: None,
            _marker: PhantomData,
        }
    }
}

impl<K, V> CacheConfigBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.plain.name = name.into();
        self
    }

    #[must_use]
    pub fn store_by_value(mut self, store_by_value: bool) -> Self {
        self.plain.store_by_value = store_by_value;
        self
    }

    #[must_use]
    pub fn statistics_enabled(mut self, enabled: bool) -> Self {
        self.plain.statistics_enabled = enabled;
        self
    }

    #[must_use]
    pub fn copier(mut self, copier: impl Copier<V> + 'static) -> Self {
        self.copier = Some(Arc::new(copier));
        self
    }

    #[must_use]
    pub fn expiry_policy(mut self, policy: impl ExpiryPolicy<K, V> + 'static) -> Self {
        self.expiry_policy = Some(Arc::new(policy));
        self
    }

    #[must_use]
    pub fn constant_ttl(self, ttl: Duration) -> Self {
        self.expiry_policy(TouchedExpiryPolicy::constant(ttl))
    }

    #[must_use]
    pub fn read_through(mut self, loader: impl CacheLoader<K, V> + 'static) -> Self {
        self.plain.read_through = true;
        self.loader = Some(Arc::new(loader));
        self
    }

    #[must_use]
    pub fn write_through(mut self, writer: impl CacheWriter<K, V> + 'static) -> Self {
        self.plain.write_through = true;
        self.writer = Some(Arc::new(writer));
        self
    }

    #[must_use]
    pub fn maximum_size(mut self, max_entries: u64) -> Self {
        self.capacity = Some(CapacityLimit::MaximumSize(max_entries));
        self
    }

    #[must_use]
    pub fn maximum_weight(
        mut self,
        max_weight: u64,
        weigher: impl Fn(&V) -> u64 + Send + Sync + 'static,
    ) -> Self {
        self.capacity = Some(CapacityLimit::MaximumWeight {
            max_weight,
            weigher: Arc::new(weigher),
        });
        self
    }

    #[must_use]
    pub fn add_listener(
        mut self,
        listener: impl CacheEntryListener<K, V> + 'static,
        event_types: impl Into<HashSet<EventType>>,
        synchronous: bool,
        old_value_required: bool,
    ) -> Self {
        let event_types: Vec<EventType> = event_types.into().into_iter().collect();
        self.listeners.push(ListenerRegistration::new(
            Arc::new(listener),
            event_types,
            synchronous,
            old_value_required,
        ));
        self
    }

    /// Validates the mutually-exclusive/required-pair invariants and
    /// assembles the final [`CacheConfiguration`].
    pub fn build(self) -> Result<CacheConfiguration<K, V>, Error> {
        if self.plain.read_through && self.loader.is_none() {
            return Err(Error::Configuration(
                "read_through requires a loader".to_string(),
            ));
        }
        if self.plain.write_through && self.writer.is_none() {
            return Err(Error::Configuration(
                "write_through requires a writer".to_string(),
            ));
        }

        let copier = self
            .copier
            .unwrap_or_else(|| Arc::new(CloneCopierAdapter) as Arc<dyn Copier<V>>);
        let expiry_policy = self
            .expiry_policy
            .unwrap_or_else(|| Arc::new(TouchedExpiryPolicy::new()));

        Ok(CacheConfiguration {
            plain: self.plain,
            copier,
            expiry_policy,
            loader: self.loader,
            writer: self.writer,
            listeners: self.listeners,
            capacity: self.capacity,
        })
    }
}

/// `CloneCopier` requires `V: Clone`; this wrapper exists only so
/// `build()` can supply a default copier without requiring every `V` in
/// the crate to be `Clone` at the type level (the bound is enforced where
/// `Cache::put`/`get` etc. actually need it).
struct CloneCopierAdapter;
impl<V: Clone> Copier<V> for CloneCopierAdapter {
    fn copy(&self, value: &V) -> Result<V, Error> {
        CloneCopier.copy(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_loader_when_read_through_flagged() {
        let result: Result<CacheConfiguration<i32, String>, _> = {
            let mut builder = CacheConfigBuilder::<i32, String>::new();
            builder.plain.read_through = true;
            builder.build()
        };
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn build_succeeds_with_defaults() {
        let config: CacheConfiguration<i32, String> =
            CacheConfigBuilder::new().name("test").build().unwrap();
        assert_eq!("test", config.plain.name);
        assert!(!config.plain.read_through);
    }
}
