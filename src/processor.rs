//! The entry-processor staging adapter: records a processor's intent
//! without touching the backend until the processor body returns.

use crate::error::Error;

/// The processor's logical view of one key: original value, whether it
/// was read, and what the processor finally decided to do with it. The
/// backend is untouched until the processor returns; [`MutableEntry`] is
/// the only view the processor ever sees.
pub struct MutableEntry<V> {
    original_value: Option<V>,
    original_exists: bool,
    value_accessed: bool,
    value_set: Option<V>,
    removed: bool,
}

impl<V> MutableEntry<V> {
    /// `original_value`/`original_exists` is the view presented when the
    /// processor starts: the slot's current value (possibly loaded via
    /// read-through), or absent.
    #[must_use]
    pub fn new(original_value: Option<V>) -> Self {
        let original_exists = original_value.is_some();
        Self {
            original_value,
            original_exists,
            value_accessed: false,
            value_set: None,
            removed: false,
        }
    }

    /// `true` iff the processor started with a present, non-expired
    /// entry (used to resolve the hit/miss accounting open question).
    #[must_use]
    pub fn existed(&self) -> bool {
        self.original_exists
    }

    /// `true` iff the processor called [`MutableEntry::get_value`] at
    /// least once.
    #[must_use]
    pub fn value_accessed(&self) -> bool {
        self.value_accessed
    }

    /// `true` iff the processor requested removal.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// `true` iff the processor requested a write.
    #[must_use]
    pub fn is_value_set(&self) -> bool {
        self.value_set.is_some()
    }

    /// Returns `newValue` if set, `None` if removed, else the original
    /// value. Marks the entry as accessed regardless of which branch is
    /// taken.
    pub fn get_value(&mut self) -> Option<&V> {
        self.value_accessed = true;
        if self.removed {
            None
        } else if let Some(v) = &self.value_set {
            Some(v)
        } else {
            self.original_value.as_ref()
        }
    }

    /// Requests a write. `None` is rejected with [`Error::NullValue`].
    /// Clears any prior `remove()`.
    pub fn set_value(&mut self, value: Option<V>) -> Result<(), Error> {
        match value {
            None => Err(Error::NullValue),
            Some(v) => {
                self.value_set = Some(v);
                self.removed = false;
                Ok(())
            }
        }
    }

    /// Requests removal. Clears any prior `set_value()`.
    pub fn remove(&mut self) {
        self.removed = true;
        self.value_set = None;
    }

    /// Consumes the adapter, returning its final intent for the cache
    /// adapter to apply.
    pub fn into_intent(self) -> EntryIntent<V> {
        if self.removed {
            EntryIntent::Remove
        } else if let Some(v) = self.value_set {
            EntryIntent::Write(v)
        } else {
            EntryIntent::None
        }
    }
}

/// The processor's final, resolved intent.
pub enum EntryIntent<V> {
    None,
    Write(V),
    Remove,
}

/// A caller-supplied function that atomically reads and optionally
/// mutates a single key via a [`MutableEntry`].
///
/// A blanket impl over `Fn(&mut MutableEntry<V>, &K, &A) -> Result<T, E>`
/// closures covers the common ad hoc case without requiring a dedicated
/// type for every processor.
pub trait EntryProcessor<K, V, A = (), T = ()> {
    type Error: std::error::Error + Send + Sync + 'static;

    fn process(&self, entry: &mut MutableEntry<V>, key: &K, args: &A) -> Result<T, Self::Error>;
}

impl<K, V, A, T, E, F> EntryProcessor<K, V, A, T> for F
where
    F: Fn(&mut MutableEntry<V>, &K, &A) -> Result<T, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    fn process(&self, entry: &mut MutableEntry<V>, key: &K, args: &A) -> Result<T, E> {
        self(entry, key, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_value_reflects_original_when_untouched() {
        let mut entry = MutableEntry::new(Some(5));
        assert_eq!(Some(&5), entry.get_value());
        assert!(entry.value_accessed());
        assert!(entry.existed());
    }

    #[test]
    fn set_value_overrides_and_clears_remove() {
        let mut entry = MutableEntry::new(Some(5));
        entry.remove();
        entry.set_value(Some(9)).unwrap();
        assert!(!entry.is_removed());
        assert_eq!(Some(&9), entry.get_value());
    }

    #[test]
    fn remove_clears_set_value() {
        let mut entry: MutableEntry<i32> = MutableEntry::new(None);
        entry.set_value(Some(1)).unwrap();
        entry.remove();
        assert!(entry.is_removed());
        assert_eq!(None, entry.get_value());
    }

    #[test]
    fn set_value_none_is_rejected() {
        let mut entry: MutableEntry<i32> = MutableEntry::new(None);
        assert!(matches!(entry.set_value(None), Err(Error::NullValue)));
    }

    #[test]
    fn intent_reflects_last_action() {
        let mut entry = MutableEntry::new(Some(1));
        entry.set_value(Some(2)).unwrap();
        match entry.into_intent() {
            EntryIntent::Write(v) => assert_eq!(2, v),
            _ => panic!("expected write intent"),
        }
    }
}
