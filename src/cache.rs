//! The cache adapter - the hard core that orchestrates every operation
//! across the components in the sibling modules.
//!
//! Built bottom-up from `expirable`, `expiry`, `copier`, `stats`, `event`,
//! `processor`, `source` and `store`; every public operation is an
//! unprefixed inherent method (`get`/`put`, not `cache_get`/`cache_set`),
//! since this crate has exactly one cache type and needs no trait-level
//! indirection.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::config::CacheConfiguration;
use crate::copier::Copier;
use crate::error::{BoxError, Error};
use crate::event::{CacheEntryEvent, EventDispatcher, EventType};
use crate::expirable::{ExpireAt, Expirable};
use crate::expiry::{ExpiryCalculator, ExpiryOutcome, ExpiryPolicy};
use crate::processor::{EntryIntent, EntryProcessor, MutableEntry};
use crate::source::CompletionListener;
use crate::source_erased::{ErasedLoader, ErasedPartialFailure, ErasedWriter};
use crate::stats::CacheStatistics;
use crate::store::{DashMapStore, Decision, Store};

thread_local! {
    static REENTRANT: Cell<bool> = Cell::new(false);
}

/// RAII guard around an entry processor body: sets the per-thread
/// reentrancy flag on construction, clears it on every exit path -
/// including a panic unwinding out of the processor.
struct ReentrancyGuard;

impl ReentrancyGuard {
    fn enter() -> Self {
        REENTRANT.with(|flag| flag.set(true));
        Self
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        REENTRANT.with(|flag| flag.set(false));
    }
}

/// The in-process, contract-conformant key/value cache.
///
/// Construct via [`Cache::builder`]; operate through the inherent methods
/// below. Every fallible method returns [`crate::error::Error`].
pub struct Cache<K, V> {
    name: String,
    store: DashMapStore<K, V>,
    copier: Arc<dyn Copier<V>>,
    expiry_policy: Arc<dyn ExpiryPolicy<K, V>>,
    loader: Option<Arc<dyn ErasedLoader<K, V>>>,
    writer: Option<Arc<dyn ErasedWriter<K, V>>>,
    dispatcher: EventDispatcher<K, V>,
    stats: CacheStatistics,
    closed: AtomicBool,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Entry point into the fluent configuration builder.
    #[must_use]
    pub fn builder() -> crate::config::CacheConfigBuilder<K, V> {
        crate::config::CacheConfigBuilder::new()
    }

    /// Assembles a cache from a validated [`CacheConfiguration`]. Use
    /// [`Cache::builder`] rather than constructing one by hand.
    #[must_use]
    pub fn new(configuration: CacheConfiguration<K, V>) -> Self {
        let CacheConfiguration {
            plain,
            copier,
            expiry_policy,
            loader,
            writer,
            listeners,
            capacity: _,
        } = configuration;

        let dispatcher = EventDispatcher::new();
        for registration in listeners {
            dispatcher.register(registration);
        }

        tracing::debug!(name = %plain.name, "constructing cache");
        Self {
            stats: CacheStatistics::new(plain.statistics_enabled),
            name: plain.name,
            store: DashMapStore::new(),
            copier,
            expiry_policy,
            loader,
            writer,
            dispatcher,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn statistics(&self) -> &CacheStatistics {
        &self.stats
    }

    /// Flips the closed flag exactly once (idempotent on repeat calls).
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(name = %self.name, "cache closed");
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_not_reentrant(&self) -> Result<(), Error> {
        if REENTRANT.with(Cell::get) {
            Err(Error::Reentrant)
        } else {
            Ok(())
        }
    }

    /// Validation common to every operation: closed and reentrancy checks.
    /// Key/value null checks are meaningless in Rust (there is no null
    /// `K`/`V`) except where a required value is itself optional at the
    /// API boundary - see [`MutableEntry::set_value`] for the one place
    /// the null-value error is reachable.
    fn guard(&self) -> Result<(), Error> {
        self.ensure_open()?;
        self.ensure_not_reentrant()
    }

    fn wrap_writer_err(cause: BoxError) -> Error {
        Error::WriterFailed {
            source: cause,
            failed_keys: Vec::new(),
        }
    }

    fn write_through_put(&self, key: &K, value: &V) -> Result<(), Error> {
        if let Some(writer) = &self.writer {
            writer
                .write(key, value)
                .map_err(Self::wrap_writer_err)?;
        }
        Ok(())
    }

    fn write_through_delete(&self, key: &K) -> Result<(), Error> {
        if let Some(writer) = &self.writer {
            writer.delete(key).map_err(Self::wrap_writer_err)?;
        }
        Ok(())
    }

    fn creation_expire_at(&self, key: &K, value: &V, now: Instant) -> ExpireAt {
        match ExpiryCalculator::resolve(self.expiry_policy.expiry_for_creation(key, value), now, true) {
            ExpiryOutcome::Absolute(expire_at) => expire_at,
            ExpiryOutcome::Unchanged => ExpireAt::Eternal,
        }
    }

    fn update_expire_at(&self, key: &K, value: &V, now: Instant, prior: ExpireAt) -> ExpireAt {
        match ExpiryCalculator::resolve(self.expiry_policy.expiry_for_update(key, value), now, false) {
            ExpiryOutcome::Absolute(expire_at) => expire_at,
            ExpiryOutcome::Unchanged => prior,
        }
    }

    fn emit_created(&self, key: &K, value: V) {
        self.dispatcher.dispatch(
            EventType::Created,
            vec![CacheEntryEvent {
                event_type: EventType::Created,
                key: key.clone(),
                old_value: None,
                new_value: Some(value),
            }],
        );
    }

    fn emit_updated(&self, key: &K, old_value: V, new_value: V) {
        self.dispatcher.dispatch(
            EventType::Updated,
            vec![CacheEntryEvent {
                event_type: EventType::Updated,
                key: key.clone(),
                old_value: Some(old_value),
                new_value: Some(new_value),
            }],
        );
    }

    fn emit_removed(&self, key: &K, old_value: V) {
        self.dispatcher.dispatch(
            EventType::Removed,
            vec![CacheEntryEvent {
                event_type: EventType::Removed,
                key: key.clone(),
                old_value: Some(old_value),
                new_value: None,
            }],
        );
    }

    fn emit_expired(&self, key: &K, old_value: V) {
        tracing::trace!("entry lazily expired on access");
        self.dispatcher.dispatch(
            EventType::Expired,
            vec![CacheEntryEvent {
                event_type: EventType::Expired,
                key: key.clone(),
                old_value: Some(old_value),
                new_value: None,
            }],
        );
    }

    /// Phase B of the read-through two-phase protocol: rereads the slot
    /// and either discards `loaded` (a concurrent write
    /// won the race) or installs it with creation-expiry. Returns
    /// whether it was actually installed.
    fn install_loaded(&self, key: &K, loaded: V, now: Instant) -> bool {
        enum Outcome<V> {
            Installed(V),
            Discarded,
        }
        let outcome = self.store.compute(key, |existing| match existing {
            Some(e) if !e.is_expired_at(now) => (Decision::Keep, Outcome::Discarded),
            _ => {
                let expire_at = self.creation_expire_at(key, &loaded, now);
                let for_event = loaded.clone();
                (
                    Decision::Insert(Expirable::new(loaded, expire_at)),
                    Outcome::Installed(for_event),
                )
            }
        });
        match outcome {
            Outcome::Installed(v) => {
                self.emit_created(key, v);
                true
            }
            Outcome::Discarded => {
                tracing::trace!("read-through load discarded by concurrent write");
                false
            }
        }
    }

    fn finish_miss_with_read_through(&self, key: &K, now: Instant) -> Result<Option<V>, Error> {
        match &self.loader {
            None => {
                self.stats.record_miss();
                Ok(None)
            }
            Some(loader) => {
                let loaded = loader.load(key).map_err(Error::LoaderFailed)?;
                match loaded {
                    None => {
                        self.stats.record_miss();
                        Ok(None)
                    }
                    Some(v) => {
                        let installed = self.install_loaded(key, v.clone(), now);
                        self.stats.record_miss();
                        if installed {
                            self.stats.record_put();
                        }
                        Ok(Some(self.copier.copy(&v)?))
                    }
                }
            }
        }
    }

    /// A non-mutating-to-the-caller peek that nonetheless lazily cleans
    /// up an observed-expired slot, emitting EXPIRED and counting an
    /// eviction. Used by `contains_key` and the iterator, neither of
    /// which records a hit or miss.
    fn peek_live(&self, key: &K, now: Instant) -> Option<V> {
        enum Peek<V> {
            Live(V),
            Expired(V),
            Absent,
        }
        let outcome = self.store.compute(key, |existing| match existing {
            None => (Decision::Keep, Peek::Absent),
            Some(e) if e.is_expired_at(now) => {
                let old = e.value().clone();
                (Decision::Remove, Peek::Expired(old))
            }
            Some(e) => (Decision::Keep, Peek::Live(e.value().clone())),
        });
        match outcome {
            Peek::Live(v) => Some(v),
            Peek::Expired(old) => {
                self.stats.record_eviction();
                self.emit_expired(key, old);
                None
            }
            Peek::Absent => None,
        }
    }

    // -- reads -----------------------------------------------------------

    /// Returns a copy of the live value for `key`, touching access-expiry
    /// on a hit and running read-through on a miss.
    pub fn get(&self, key: &K) -> Result<Option<V>, Error> {
        self.guard()?;
        let now = Instant::now();

        enum Outcome<V> {
            Hit(V),
            Expired(V),
            Miss,
        }
        let outcome = self.store.compute(key, |existing| match existing {
            None => (Decision::Keep, Outcome::Miss),
            Some(e) if e.is_expired_at(now) => {
                let old = e.value().clone();
                (Decision::Remove, Outcome::Expired(old))
            }
            Some(e) => {
                let value = e.value().clone();
                let decision = match ExpiryCalculator::resolve(
                    self.expiry_policy.expiry_for_access(key),
                    now,
                    false,
                ) {
                    ExpiryOutcome::Unchanged => Decision::Keep,
                    ExpiryOutcome::Absolute(expire_at) => {
                        Decision::Insert(Expirable::new(value.clone(), expire_at))
                    }
                };
                (decision, Outcome::Hit(value))
            }
        });

        match outcome {
            Outcome::Hit(v) => {
                self.stats.record_hit();
                Ok(Some(self.copier.copy(&v)?))
            }
            Outcome::Expired(old) => {
                self.stats.record_eviction();
                self.emit_expired(key, old);
                self.finish_miss_with_read_through(key, now)
            }
            Outcome::Miss => self.finish_miss_with_read_through(key, now),
        }
    }

    /// Per-key `get`, no cross-key atomicity, no merging.
    pub fn get_all(&self, keys: &HashSet<K>) -> Result<HashMap<K, V>, Error> {
        self.guard()?;
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(v) = self.get(key)? {
                out.insert(key.clone(), v);
            }
        }
        Ok(out)
    }

    /// No hit/miss recorded; an expired entry observed is still counted
    /// as an eviction.
    pub fn contains_key(&self, key: &K) -> Result<bool, Error> {
        self.guard()?;
        Ok(self.peek_live(key, Instant::now()).is_some())
    }

    // -- upsert ------------------------------------------------------------

    /// Shared create/update transition for `put`/`get_and_put`/`put_all`.
    /// Always records exactly one `puts++` and, if an expired slot was
    /// replaced, one eviction; the caller adds its own hit/miss
    /// accounting on top (plain `put` records none, `get_and_put`
    /// records hit-on-update / miss-on-create).
    fn upsert(&self, key: &K, value: V, now: Instant) -> UpsertResult<V> {
        let value_for_event = value.clone();
        let (pre_existing, expired_observed, is_create) = self.store.compute(key, |existing| {
            match existing {
                None => {
                    let expire_at = self.creation_expire_at(key, &value, now);
                    (
                        Decision::Insert(Expirable::new(value.clone(), expire_at)),
                        (None, None, true),
                    )
                }
                Some(e) if e.is_expired_at(now) => {
                    let old = e.value().clone();
                    let expire_at = self.creation_expire_at(key, &value, now);
                    (
                        Decision::Insert(Expirable::new(value.clone(), expire_at)),
                        (None, Some(old), true),
                    )
                }
                Some(e) => {
                    let old = e.value().clone();
                    let expire_at = self.update_expire_at(key, &value, now, e.expire_at());
                    (
                        Decision::Insert(Expirable::new(value.clone(), expire_at)),
                        (Some(old), None, false),
                    )
                }
            }
        });

        if let Some(old) = expired_observed.clone() {
            self.stats.record_eviction();
            self.emit_expired(key, old);
        }
        if is_create {
            self.emit_created(key, value_for_event);
        } else {
            self.emit_updated(
                key,
                pre_existing.clone().expect("update transition carries old value"),
                value_for_event,
            );
        }
        self.stats.record_put();

        UpsertResult { pre_existing }
    }

    /// Inserts or overwrites `key`, write-through first.
    pub fn put(&self, key: K, value: V) -> Result<(), Error> {
        self.guard()?;
        self.write_through_put(&key, &value)?;
        let now = Instant::now();
        self.upsert(&key, value, now);
        Ok(())
    }

    /// Batch `put`, write-through first; a partial writer failure
    /// excludes only the keys the writer reported as still-failed.
    pub fn put_all(&self, entries: HashMap<K, V>) -> Result<(), Error>
    where
        K: fmt::Debug,
    {
        self.guard()?;
        let now = Instant::now();

        let mut failed: HashSet<K> = HashSet::new();
        let mut writer_err: Option<BoxError> = None;
        if let Some(writer) = &self.writer {
            let pairs: Vec<(K, V)> = entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            if let Err(ErasedPartialFailure { failed_keys, cause }) = writer.write_all(&pairs) {
                failed = failed_keys;
                writer_err = Some(cause);
            }
        }

        for (key, value) in entries {
            if failed.contains(&key) {
                continue;
            }
            self.upsert(&key, value, now);
        }

        match writer_err {
            Some(cause) => Err(Error::writer_failed(cause, &failed)),
            None => Ok(()),
        }
    }

    /// Inserts or overwrites `key`, returning the prior value if any.
    pub fn get_and_put(&self, key: K, value: V) -> Result<Option<V>, Error> {
        self.guard()?;
        self.write_through_put(&key, &value)?;
        let now = Instant::now();
        let result = self.upsert(&key, value, now);
        match result.pre_existing {
            Some(old) => {
                self.stats.record_hit();
                Ok(Some(self.copier.copy(&old)?))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// Inserts `key` only if absent or expired. Probes first, then calls
    /// the writer when the probe says the slot is absent or expired,
    /// accepting a wasted writer call under rare contention (DESIGN.md).
    pub fn put_if_absent(&self, key: K, value: V) -> Result<bool, Error> {
        self.guard()?;
        let now = Instant::now();

        let probe_will_insert = match self.store.get(&key) {
            None => true,
            Some(e) => e.is_expired_at(now),
        };
        if probe_will_insert {
            self.write_through_put(&key, &value)?;
        }

        let value_for_event = value.clone();
        enum Outcome<V> {
            Inserted { expired_old: Option<V> },
            AlreadyPresent,
        }
        let outcome = self.store.compute(&key, |existing| match existing {
            None => {
                let expire_at = self.creation_expire_at(&key, &value, now);
                (
                    Decision::Insert(Expirable::new(value.clone(), expire_at)),
                    Outcome::Inserted { expired_old: None },
                )
            }
            Some(e) if e.is_expired_at(now) => {
                let old = e.value().clone();
                let expire_at = self.creation_expire_at(&key, &value, now);
                (
                    Decision::Insert(Expirable::new(value.clone(), expire_at)),
                    Outcome::Inserted { expired_old: Some(old) },
                )
            }
            Some(_) => (Decision::Keep, Outcome::AlreadyPresent),
        });

        match outcome {
            Outcome::Inserted { expired_old } => {
                if let Some(old) = expired_old {
                    self.stats.record_eviction();
                    self.emit_expired(&key, old);
                }
                self.emit_created(&key, value_for_event);
                self.stats.record_put();
                self.stats.record_miss();
                Ok(true)
            }
            Outcome::AlreadyPresent => {
                self.stats.record_hit();
                Ok(false)
            }
        }
    }

    // -- remove --------------------------------------------------------

    fn remove_matching(
        &self,
        key: &K,
        now: Instant,
        predicate: impl Fn(&V) -> bool,
    ) -> ConditionalOutcome<V> {
        self.store.compute(key, |existing| match existing {
            None => (Decision::Keep, ConditionalOutcome::Absent),
            Some(e) if e.is_expired_at(now) => {
                let old = e.value().clone();
                (Decision::Remove, ConditionalOutcome::Expired(old))
            }
            Some(e) if predicate(e.value()) => {
                let old = e.value().clone();
                (Decision::Remove, ConditionalOutcome::Removed(old))
            }
            Some(e) => {
                let old = e.value().clone();
                (Decision::Keep, ConditionalOutcome::Mismatch(old))
            }
        })
    }

    /// Unconditional remove: removals++ on hit, evictions++ on an
    /// observed-expired slot, nothing on a miss.
    pub fn remove(&self, key: K) -> Result<bool, Error> {
        self.guard()?;
        self.write_through_delete(&key)?;
        let now = Instant::now();
        match self.remove_matching(&key, now, |_| true) {
            ConditionalOutcome::Removed(old) => {
                self.emit_removed(&key, old);
                self.stats.record_removal();
                Ok(true)
            }
            ConditionalOutcome::Expired(old) => {
                self.stats.record_eviction();
                self.emit_expired(&key, old);
                Ok(false)
            }
            ConditionalOutcome::Absent | ConditionalOutcome::Mismatch(_) => Ok(false),
        }
    }

    /// Removes `key` only if its current value equals `expected`. Probes
    /// before calling the writer so a mismatch never triggers a delete.
    pub fn remove_if(&self, key: K, expected: &V) -> Result<bool, Error>
    where
        V: PartialEq,
    {
        self.guard()?;
        let now = Instant::now();
        let probe_matches = matches!(self.store.get(&key), Some(e) if !e.is_expired_at(now) && e.value() == expected);
        if probe_matches {
            self.write_through_delete(&key)?;
        }
        match self.remove_matching(&key, now, |v| v == expected) {
            ConditionalOutcome::Removed(old) => {
                self.emit_removed(&key, old);
                self.stats.record_removal();
                self.stats.record_hit();
                Ok(true)
            }
            ConditionalOutcome::Expired(old) => {
                self.stats.record_eviction();
                self.emit_expired(&key, old);
                self.stats.record_miss();
                Ok(false)
            }
            ConditionalOutcome::Mismatch(_) | ConditionalOutcome::Absent => {
                self.stats.record_miss();
                Ok(false)
            }
        }
    }

    /// Removes `key` unconditionally, returning its prior value if any.
    pub fn get_and_remove(&self, key: K) -> Result<Option<V>, Error> {
        self.guard()?;
        self.write_through_delete(&key)?;
        let now = Instant::now();
        match self.remove_matching(&key, now, |_| true) {
            ConditionalOutcome::Removed(old) => {
                self.emit_removed(&key, old.clone());
                self.stats.record_removal();
                self.stats.record_hit();
                Ok(Some(self.copier.copy(&old)?))
            }
            ConditionalOutcome::Expired(old) => {
                self.stats.record_eviction();
                self.emit_expired(&key, old);
                self.stats.record_miss();
                Ok(None)
            }
            ConditionalOutcome::Absent | ConditionalOutcome::Mismatch(_) => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// Batch remove: the batch write-through hook runs once before
    /// per-key removal; failed keys are excluded from mutation.
    pub fn remove_all_keys(&self, keys: &HashSet<K>) -> Result<(), Error>
    where
        K: fmt::Debug,
    {
        self.guard()?;
        let now = Instant::now();

        let mut failed: HashSet<K> = HashSet::new();
        let mut writer_err: Option<BoxError> = None;
        if let Some(writer) = &self.writer {
            if let Err(ErasedPartialFailure { failed_keys, cause }) = writer.delete_all(keys) {
                failed = failed_keys;
                writer_err = Some(cause);
            }
        }

        for key in keys {
            if failed.contains(key) {
                continue;
            }
            match self.remove_matching(key, now, |_| true) {
                ConditionalOutcome::Removed(old) => {
                    self.emit_removed(key, old);
                    self.stats.record_removal();
                }
                ConditionalOutcome::Expired(old) => {
                    self.stats.record_eviction();
                    self.emit_expired(key, old);
                }
                ConditionalOutcome::Absent | ConditionalOutcome::Mismatch(_) => {}
            }
        }

        match writer_err {
            Some(cause) => Err(Error::writer_failed(cause, &failed)),
            None => Ok(()),
        }
    }

    /// Enumerates every current key and removes each, firing REMOVED per
    /// live entry.
    pub fn remove_all(&self) -> Result<(), Error>
    where
        K: fmt::Debug,
    {
        self.guard()?;
        let keys: HashSet<K> = self.store.snapshot_keys().into_iter().collect();
        self.remove_all_keys(&keys)
    }

    /// Atomic bulk discard. No write-through, no events, no counters -
    /// clearing is deliberately not treated as eviction.
    pub fn clear(&self) -> Result<(), Error> {
        self.guard()?;
        self.store.clear();
        Ok(())
    }

    // -- replace ---------------------------------------------------------

    /// Replaces the value for `key`, only if it is currently present and
    /// not expired.
    pub fn replace(&self, key: K, value: V) -> Result<bool, Error> {
        self.guard()?;
        let now = Instant::now();
        let probe_present = matches!(self.store.get(&key), Some(e) if !e.is_expired_at(now));
        if probe_present {
            self.write_through_put(&key, &value)?;
        }

        let value_for_event = value.clone();
        enum Outcome<V> {
            Replaced { old: V },
            Expired(V),
            Absent,
        }
        let outcome = self.store.compute(&key, |existing| match existing {
            None => (Decision::Keep, Outcome::Absent),
            Some(e) if e.is_expired_at(now) => {
                let old = e.value().clone();
                (Decision::Remove, Outcome::Expired(old))
            }
            Some(e) => {
                let old = e.value().clone();
                let expire_at = self.update_expire_at(&key, &value, now, e.expire_at());
                (
                    Decision::Insert(Expirable::new(value.clone(), expire_at)),
                    Outcome::Replaced { old },
                )
            }
        });

        match outcome {
            Outcome::Replaced { old } => {
                self.emit_updated(&key, old, value_for_event);
                self.stats.record_put();
                self.stats.record_hit();
                Ok(true)
            }
            Outcome::Expired(old) => {
                self.stats.record_eviction();
                self.emit_expired(&key, old);
                self.stats.record_miss();
                Ok(false)
            }
            Outcome::Absent => {
                self.stats.record_miss();
                Ok(false)
            }
        }
    }

    /// Replaces `key`'s value with `new_value` only if its current value
    /// equals `expected`.
    pub fn replace_if(&self, key: K, expected: &V, new_value: V) -> Result<bool, Error>
    where
        V: PartialEq,
    {
        self.guard()?;
        let now = Instant::now();
        let probe_matches = matches!(self.store.get(&key), Some(e) if !e.is_expired_at(now) && e.value() == expected);
        if probe_matches {
            self.write_through_put(&key, &new_value)?;
        }

        let value_for_event = new_value.clone();
        enum Outcome<V> {
            Replaced { old: V },
            Expired(V),
            Mismatch,
            Absent,
        }
        let outcome = self.store.compute(&key, |existing| match existing {
            None => (Decision::Keep, Outcome::Absent),
            Some(e) if e.is_expired_at(now) => {
                let old = e.value().clone();
                (Decision::Remove, Outcome::Expired(old))
            }
            Some(e) if e.value() == expected => {
                let old = e.value().clone();
                let expire_at = self.update_expire_at(&key, &new_value, now, e.expire_at());
                (
                    Decision::Insert(Expirable::new(new_value.clone(), expire_at)),
                    Outcome::Replaced { old },
                )
            }
            Some(_) => (Decision::Keep, Outcome::Mismatch),
        });

        match outcome {
            Outcome::Replaced { old } => {
                self.emit_updated(&key, old, value_for_event);
                self.stats.record_put();
                self.stats.record_hit();
                Ok(true)
            }
            Outcome::Expired(old) => {
                self.stats.record_eviction();
                self.emit_expired(&key, old);
                self.stats.record_miss();
                Ok(false)
            }
            Outcome::Mismatch | Outcome::Absent => {
                self.stats.record_miss();
                Ok(false)
            }
        }
    }

    /// Replaces `key`'s value if present and not expired, returning the
    /// prior value.
    pub fn get_and_replace(&self, key: K, value: V) -> Result<Option<V>, Error> {
        self.guard()?;
        let now = Instant::now();
        let probe_present = matches!(self.store.get(&key), Some(e) if !e.is_expired_at(now));
        if probe_present {
            self.write_through_put(&key, &value)?;
        }

        let value_for_event = value.clone();
        enum Outcome<V> {
            Replaced { old: V },
            Expired(V),
            Absent,
        }
        let outcome = self.store.compute(&key, |existing| match existing {
            None => (Decision::Keep, Outcome::Absent),
            Some(e) if e.is_expired_at(now) => {
                let old = e.value().clone();
                (Decision::Remove, Outcome::Expired(old))
            }
            Some(e) => {
                let old = e.value().clone();
                let expire_at = self.update_expire_at(&key, &value, now, e.expire_at());
                (
                    Decision::Insert(Expirable::new(value.clone(), expire_at)),
                    Outcome::Replaced { old },
                )
            }
        });

        match outcome {
            Outcome::Replaced { old } => {
                self.emit_updated(&key, old.clone(), value_for_event);
                self.stats.record_put();
                self.stats.record_hit();
                Ok(Some(self.copier.copy(&old)?))
            }
            Outcome::Expired(old) => {
                self.stats.record_eviction();
                self.emit_expired(&key, old);
                self.stats.record_miss();
                Ok(None)
            }
            Outcome::Absent => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    // -- entry processor ---------------------------------------------------

    /// Atomically reads and optionally mutates a single key via a
    /// [`MutableEntry`]. The processor runs *inside* the atomic compute -
    /// a deliberate exception to the general "compute closures are pure"
    /// rule, since entry-processor atomicity is the entire point of the
    /// feature - and the reentrancy guard exists precisely because the
    /// per-key lock is held while the processor body runs.
    pub fn invoke<A, T, P>(&self, key: K, processor: &P, args: &A) -> Result<T, Error>
    where
        P: EntryProcessor<K, V, A, T>,
    {
        self.guard()?;
        let now = Instant::now();

        let loaded: Option<V> = if self.loader.is_some() {
            let needs_load = match self.store.get(&key) {
                None => true,
                Some(e) => e.is_expired_at(now),
            };
            if needs_load {
                self.loader.as_ref().unwrap().load(&key).map_err(Error::LoaderFailed)?
            } else {
                None
            }
        } else {
            None
        };
        let used_load = loaded.is_some();

        enum IntentResult<V> {
            None,
            Wrote(V),
            Removed,
        }
        enum Step<V, T> {
            Processed {
                expired_observed: Option<V>,
                pre_existing: Option<V>,
                intent_result: IntentResult<V>,
                value: T,
            },
            ProcessorFailed(BoxError),
        }

        let step = self.store.compute(&key, |existing| {
            let (pre_existing, expired_observed) = match existing {
                None => (None, None),
                Some(e) if e.is_expired_at(now) => (None, Some(e.value().clone())),
                Some(e) => (Some(e.value().clone()), None),
            };
            let original_value = if pre_existing.is_none() && used_load {
                loaded.clone()
            } else {
                pre_existing.clone()
            };

            let mut entry = MutableEntry::new(original_value);
            let result = {
                let _guard = ReentrancyGuard::enter();
                processor.process(&mut entry, &key, args)
            };

            match result {
                Err(e) => (Decision::Keep, Step::ProcessorFailed(Box::new(e))),
                Ok(value) => {
                    let is_update = pre_existing.is_some();
                    let (decision, intent_result) = match entry.into_intent() {
                        EntryIntent::Remove => {
                            let decision = if existing.is_some() {
                                Decision::Remove
                            } else {
                                Decision::Keep
                            };
                            (decision, IntentResult::Removed)
                        }
                        EntryIntent::Write(new_value) => {
                            let expire_at = if is_update {
                                self.update_expire_at(&key, &new_value, now, existing.unwrap().expire_at())
                            } else {
                                self.creation_expire_at(&key, &new_value, now)
                            };
                            let for_event = new_value.clone();
                            (
                                Decision::Insert(Expirable::new(new_value, expire_at)),
                                IntentResult::Wrote(for_event),
                            )
                        }
                        EntryIntent::None => {
                            if used_load {
                                let v = loaded.clone().expect("used_load implies a loaded value");
                                let expire_at = self.creation_expire_at(&key, &v, now);
                                let for_event = v.clone();
                                (
                                    Decision::Insert(Expirable::new(v, expire_at)),
                                    IntentResult::Wrote(for_event),
                                )
                            } else if expired_observed.is_some() {
                                // The processor left an already-expired slot
                                // untouched; evict it now so a later read
                                // doesn't observe the same stale entry and
                                // double-count the expiry.
                                (Decision::Remove, IntentResult::None)
                            } else {
                                (Decision::Keep, IntentResult::None)
                            }
                        }
                    };
                    (
                        decision,
                        Step::Processed {
                            expired_observed,
                            pre_existing,
                            intent_result,
                            value,
                        },
                    )
                }
            }
        });

        match step {
            Step::ProcessorFailed(cause) => Err(Error::ProcessorFailed(cause)),
            Step::Processed {
                expired_observed,
                pre_existing,
                intent_result,
                value,
            } => {
                if let Some(old) = expired_observed {
                    self.stats.record_eviction();
                    self.emit_expired(&key, old);
                }
                match intent_result {
                    IntentResult::Removed => {
                        if let Some(old) = pre_existing.clone() {
                            self.emit_removed(&key, old);
                            self.stats.record_removal();
                        }
                    }
                    IntentResult::Wrote(new_value) => {
                        match pre_existing.clone() {
                            Some(old) => self.emit_updated(&key, old, new_value),
                            None => self.emit_created(&key, new_value),
                        }
                        self.stats.record_put();
                    }
                    IntentResult::None => {}
                }
                // get_value-only access counts as a hit iff the
                // pre-processor probe found a live entry (see DESIGN.md).
                if pre_existing.is_some() {
                    self.stats.record_hit();
                } else {
                    self.stats.record_miss();
                }
                Ok(value)
            }
        }
    }

    /// Independent per-key `invoke`, one key's failure does not stop the
    /// batch.
    pub fn invoke_all<A, T, P>(
        &self,
        keys: &HashSet<K>,
        processor: &P,
        args: &A,
    ) -> HashMap<K, Result<T, Error>>
    where
        P: EntryProcessor<K, V, A, T>,
    {
        keys.iter()
            .map(|key| (key.clone(), self.invoke(key.clone(), processor, args)))
            .collect()
    }

    /// Fires a background task that loads every key not already present
    /// (or every key, if `replace_existing`), installing
    /// each via the same discard-on-race logic as ordinary read-through.
    /// Takes `Arc<Self>` by value since the background task must outlive
    /// this call.
    pub fn load_all(
        self: Arc<Self>,
        keys: HashSet<K>,
        replace_existing: bool,
        completion_listener: Option<Arc<dyn CompletionListener>>,
    ) -> Result<(), Error> {
        self.guard()?;
        let loader = self.loader.clone().ok_or_else(|| {
            Error::Configuration("load_all requires a configured loader".to_string())
        })?;

        thread::spawn(move || {
            let now = Instant::now();
            let to_load: HashSet<K> = if replace_existing {
                keys
            } else {
                keys.into_iter()
                    .filter(|k| match self.store.get(k) {
                        None => true,
                        Some(e) => e.is_expired_at(now),
                    })
                    .collect()
            };

            match loader.load_all(&to_load) {
                Ok(loaded) => {
                    for (key, value) in loaded {
                        if self.install_loaded(&key, value, Instant::now()) {
                            self.stats.record_put();
                        }
                    }
                    if let Some(listener) = completion_listener {
                        listener.on_completion();
                    }
                }
                Err(cause) => {
                    tracing::warn!(error = %cause, "load_all background load failed");
                    if let Some(listener) = completion_listener {
                        listener.on_exception(cause.as_ref());
                    }
                }
            }
        });

        Ok(())
    }

    // -- iteration ---------------------------------------------------------

    /// Returns an iterator over a point-in-time snapshot of live entries.
    #[must_use]
    pub fn iter(&self) -> crate::iter::CacheIter<'_, K, V> {
        crate::iter::CacheIter::new(self)
    }

    pub(crate) fn snapshot_keys(&self) -> Vec<K> {
        self.store.snapshot_keys()
    }

    pub(crate) fn peek_live_for_iteration(&self, key: &K, now: Instant) -> Option<V> {
        self.peek_live(key, now)
    }

    pub(crate) fn copy_for_caller(&self, value: &V) -> Result<V, Error> {
        self.copier.copy(value)
    }

    pub(crate) fn remove_via_iterator(&self, key: &K) -> Result<bool, Error> {
        self.remove(key.clone())
    }
}

/// Outcome of [`Cache::upsert`]: the slot's value before the transition,
/// from the caller's perspective - `None` if the slot was absent or
/// expired (a miss), `Some` if it held a live value (a hit).
struct UpsertResult<V> {
    pre_existing: Option<V>,
}

/// Outcome of [`Cache::remove_matching`].
enum ConditionalOutcome<V> {
    Removed(V),
    Expired(V),
    Mismatch(V),
    Absent,
}
