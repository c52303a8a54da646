//! `jcache`: an in-process, contract-conformant key/value cache with
//! per-entry expiration, by-value semantics, event notification,
//! statistics, read-through loading, write-through persistence and
//! atomic entry-processor operations.
//!
//! There is no wire protocol and no persistent store here - the backing
//! associative map is `dashmap`, an external collaborator this crate
//! layers contract semantics on top of (expiration, atomicity, events,
//! statistics, read/write-through composition, reentrancy guarding).
//!
//! ```
//! use jcache::Cache;
//!
//! let cache: Cache<String, i32> = Cache::new(Cache::builder().build().unwrap());
//! cache.put("a".to_string(), 1).unwrap();
//! assert_eq!(Some(1), cache.get(&"a".to_string()).unwrap());
//! ```

mod cache;
mod config;
mod copier;
mod error;
mod event;
mod expirable;
mod expiry;
mod iter;
mod processor;
mod source;
mod source_erased;
mod stats;
mod store;

pub use cache::Cache;
pub use config::{CacheConfig, CacheConfigBuilder, CacheConfiguration, CapacityLimit};
pub use copier::{CloneCopier, Copier, IdentityCopier};
#[cfg(feature = "serde")]
pub use copier::SerdeCopier;
pub use error::{BoxError, Error};
pub use event::{
    CacheEntryEvent, CacheEntryListener, EventDispatcher, EventType, ListenerId,
    ListenerRegistration,
};
pub use expirable::ExpireAt;
pub use expiry::{EternalExpiryPolicy, ExpiryCalculator, ExpiryOutcome, ExpiryPolicy, Ttl, TouchedExpiryPolicy};
pub use iter::CacheIter;
pub use processor::{EntryIntent, EntryProcessor, MutableEntry};
pub use source::{CacheLoader, CacheWriter, CompletionListener, PartialFailure};
pub use source_erased::{ErasedLoader, ErasedPartialFailure, ErasedWriter};
pub use stats::CacheStatistics;
pub use store::{DashMapStore, Decision, Store};
