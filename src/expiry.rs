//! Expiry policy callbacks and the calculator that maps them to absolute
//! instants: three independently configurable durations, one per event
//! kind (creation/update/access).

use std::time::{Duration, Instant};

use crate::expirable::ExpireAt;

/// What an expiry policy callback returns for one event.
///
/// `Unchanged` means "do not modify the expiry" - the calculator must not
/// coerce it to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Leave the current expiry alone (or, on creation, treat as eternal).
    Unchanged,
    /// The entry never expires.
    Eternal,
    /// The entry is instantly expired.
    Zero,
    /// The entry expires `d` from now.
    After(Duration),
}

/// User-supplied expiry policy, queried once per event kind.
///
/// Default methods return [`Ttl::Unchanged`], matching a policy that only
/// cares about a subset of the three events.
pub trait ExpiryPolicy<K, V>: Send + Sync {
    fn expiry_for_creation(&self, _key: &K, _value: &V) -> Ttl {
        Ttl::Unchanged
    }
    fn expiry_for_update(&self, _key: &K, _value: &V) -> Ttl {
        Ttl::Unchanged
    }
    fn expiry_for_access(&self, _key: &K) -> Ttl {
        Ttl::Unchanged
    }
}

/// The result of applying a [`Ttl`] to "now", ready to install (or not) on
/// a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// Preserve whatever expiry the slot already has.
    Unchanged,
    Absolute(ExpireAt),
}

/// Maps policy outcomes to absolute timestamps. Never consults the
/// existing expiry and never rounds - purely a function of `(ttl, now,
/// is_creation)`.
pub struct ExpiryCalculator;

impl ExpiryCalculator {
    /// `is_creation` distinguishes the contract's "unchanged on creation
    /// means eternal" rule from "unchanged on update/access means
    /// preserve prior expiry".
    #[must_use]
    pub fn resolve(ttl: Ttl, now: Instant, is_creation: bool) -> ExpiryOutcome {
        match ttl {
            Ttl::Unchanged if is_creation => ExpiryOutcome::Absolute(ExpireAt::Eternal),
            Ttl::Unchanged => ExpiryOutcome::Unchanged,
            Ttl::Eternal => ExpiryOutcome::Absolute(ExpireAt::Eternal),
            Ttl::Zero => ExpiryOutcome::Absolute(ExpireAt::At(now)),
            Ttl::After(d) => match now.checked_add(d) {
                Some(t) => ExpiryOutcome::Absolute(ExpireAt::At(t)),
                None => ExpiryOutcome::Absolute(ExpireAt::Eternal),
            },
        }
    }
}

/// A ready-to-use policy with one fixed duration per event.
///
/// `None` for a given event means "leave it unchanged" (preserve on
/// update/access, eternal on creation), matching [`Ttl::Unchanged`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TouchedExpiryPolicy {
    creation: Option<Duration>,
    update: Option<Duration>,
    access: Option<Duration>,
}

impl TouchedExpiryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_creation(mut self, d: Duration) -> Self {
        self.creation = Some(d);
        self
    }

    #[must_use]
    pub fn with_update(mut self, d: Duration) -> Self {
        self.update = Some(d);
        self
    }

    #[must_use]
    pub fn with_access(mut self, d: Duration) -> Self {
        self.access = Some(d);
        self
    }

    /// A single duration applied uniformly to creation, update and access
    /// - the common case, and the direct analogue of `TimedCache::ttl`.
    #[must_use]
    pub fn constant(d: Duration) -> Self {
        Self {
            creation: Some(d),
            update: Some(d),
            access: Some(d),
        }
    }

    fn ttl_or_unchanged(d: Option<Duration>) -> Ttl {
        d.map_or(Ttl::Unchanged, Ttl::After)
    }
}

impl<K, V> ExpiryPolicy<K, V> for TouchedExpiryPolicy {
    fn expiry_for_creation(&self, _key: &K, _value: &V) -> Ttl {
        Self::ttl_or_unchanged(self.creation)
    }
    fn expiry_for_update(&self, _key: &K, _value: &V) -> Ttl {
        Self::ttl_or_unchanged(self.update)
    }
    fn expiry_for_access(&self, _key: &K) -> Ttl {
        Self::ttl_or_unchanged(self.access)
    }
}

/// A policy under which entries never expire.
#[derive(Debug, Clone, Copy, Default)]
pub struct EternalExpiryPolicy;

impl<K, V> ExpiryPolicy<K, V> for EternalExpiryPolicy {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_on_creation_is_eternal() {
        let now = Instant::now();
        match ExpiryCalculator::resolve(Ttl::Unchanged, now, true) {
            ExpiryOutcome::Absolute(ExpireAt::Eternal) => {}
            other => panic!("expected eternal, got {other:?}"),
        }
    }

    #[test]
    fn unchanged_on_access_preserves() {
        let now = Instant::now();
        assert_eq!(
            ExpiryOutcome::Unchanged,
            ExpiryCalculator::resolve(Ttl::Unchanged, now, false)
        );
    }

    #[test]
    fn zero_is_immediate() {
        let now = Instant::now();
        match ExpiryCalculator::resolve(Ttl::Zero, now, true) {
            ExpiryOutcome::Absolute(ExpireAt::At(t)) => assert_eq!(t, now),
            other => panic!("expected immediate, got {other:?}"),
        }
    }

    #[test]
    fn touched_policy_defaults_to_unchanged() {
        let policy = TouchedExpiryPolicy::new();
        assert_eq!(Ttl::Unchanged, policy.expiry_for_creation(&1, &"v"));
    }

    #[test]
    fn touched_policy_constant_applies_everywhere() {
        let policy = TouchedExpiryPolicy::constant(Duration::from_millis(50));
        assert_eq!(
            Ttl::After(Duration::from_millis(50)),
            policy.expiry_for_creation(&1, &"v")
        );
        assert_eq!(
            Ttl::After(Duration::from_millis(50)),
            policy.expiry_for_update(&1, &"v")
        );
        assert_eq!(
            Ttl::After(Duration::from_millis(50)),
            policy.expiry_for_access(&1)
        );
    }
}
