//! The immutable `(value, expiry)` pair stored behind every cache slot.

use std::time::Instant;

/// A slot's absolute expiry instant.
///
/// `Eternal` is a sentinel standing in for "no expiry": an entry tagged
/// `Eternal` is never expired regardless of wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireAt {
    Eternal,
    At(Instant),
}

impl ExpireAt {
    /// `true` iff `now` is strictly past this expiry. Eternal entries are
    /// never expired.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self {
            ExpireAt::Eternal => false,
            ExpireAt::At(t) => now > *t,
        }
    }
}

/// Immutable pair of `(value, expireAt)`.
///
/// Owned exclusively by the backend map slot. A new `Expirable` replaces
/// the old one under atomic compute; it is never mutated in place, except
/// that [`Expirable::with_expire_at`] rewraps the existing value without
/// copying it.
#[derive(Debug, Clone)]
pub struct Expirable<V> {
    value: V,
    expire_at: ExpireAt,
}

impl<V> Expirable<V> {
    #[must_use]
    pub fn new(value: V, expire_at: ExpireAt) -> Self {
        Self { value, expire_at }
    }

    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    #[must_use]
    pub fn expire_at(&self) -> ExpireAt {
        self.expire_at
    }

    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expire_at.is_expired_at(now)
    }

    /// Rewraps the current value under a new expiry without copying it -
    /// used for the access-expiry "touch" transition, where the value
    /// itself never changes.
    #[must_use]
    pub fn with_expire_at(self, expire_at: ExpireAt) -> Self {
        Self {
            value: self.value,
            expire_at,
        }
    }
}
