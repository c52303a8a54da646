//! Error taxonomy shared by every fallible cache operation.
//!
//! A single `thiserror`-derived enum, one `#[error]` message per variant,
//! collaborator errors wrapped with `#[from]` or a boxed `source`.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

/// Boxed collaborator error: loaders, writers, processors and copiers are
/// all user-supplied and may fail with an arbitrary error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The single error type returned by every fallible [`crate::Cache`] method.
#[derive(Error, Debug)]
pub enum Error {
    /// A `None`/null key was passed where a key is required.
    #[error("cache key must not be null")]
    NullKey,

    /// A `None`/null value was passed where a value is required.
    #[error("cache value must not be null")]
    NullValue,

    /// The cache has been closed and no longer accepts operations.
    #[error("cache has been closed")]
    Closed,

    /// A cache operation was attempted from inside an entry processor body.
    #[error("cache operations may not be invoked reentrantly from an entry processor")]
    Reentrant,

    /// The configured [`crate::source::CacheLoader`] raised an error.
    #[error("cache loader failed")]
    LoaderFailed(#[source] BoxError),

    /// The configured [`crate::source::CacheWriter`] raised an error.
    ///
    /// `failed_keys` carries the subset of a batch write/delete that the
    /// writer reported as not applied, formatted via `Debug` since the key
    /// type is not known to this error type.
    #[error("cache writer failed for {} key(s): {failed_keys:?}", failed_keys.len())]
    WriterFailed {
        #[source]
        source: BoxError,
        failed_keys: Vec<String>,
    },

    /// An [`crate::processor::EntryProcessor`] body raised an error.
    #[error("entry processor failed")]
    ProcessorFailed(#[source] BoxError),

    /// The configured [`crate::copier::Copier`] could not clone a value.
    #[error("value could not be copied")]
    Serialization(#[source] BoxError),

    /// The cache configuration is invalid (mutually exclusive or missing
    /// required options).
    #[error("invalid cache configuration: {0}")]
    Configuration(String),
}

impl Error {
    /// Builds [`Error::WriterFailed`] from a set of keys that a batch
    /// writer reported as still-failed, using each key's `Debug`
    /// representation so this error type stays generic over `K`.
    pub fn writer_failed<K: fmt::Debug>(source: BoxError, failed_keys: &HashSet<K>) -> Self {
        Error::WriterFailed {
            source,
            failed_keys: failed_keys.iter().map(|k| format!("{k:?}")).collect(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
