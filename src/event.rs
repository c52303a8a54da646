//! Event kinds, listener registration and dispatch.
//!
//! The registration list is copy-on-write behind a `parking_lot::RwLock`
//! so registration churn never blocks concurrent dispatch.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;

/// The four event kinds the contract defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    Removed,
    Expired,
}

/// A single event delivered to listeners: `old_value` is present for
/// `Updated`, `Removed` and `Expired`; absent for `Created`. Both values
/// are copies per the configured [`crate::copier::Copier`].
#[derive(Debug, Clone)]
pub struct CacheEntryEvent<K, V> {
    pub event_type: EventType,
    pub key: K,
    pub old_value: Option<V>,
    pub new_value: Option<V>,
}

/// User-supplied listener. Implementors typically only override the
/// methods for event kinds they registered for; defaults are no-ops.
pub trait CacheEntryListener<K, V>: Send + Sync {
    fn on_created(&self, _events: &[CacheEntryEvent<K, V>]) {}
    fn on_updated(&self, _events: &[CacheEntryEvent<K, V>]) {}
    fn on_removed(&self, _events: &[CacheEntryEvent<K, V>]) {}
    fn on_expired(&self, _events: &[CacheEntryEvent<K, V>]) {}
}

/// A registration token returned by [`EventDispatcher::register`], used
/// to deregister a listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// One listener's subscription: which event kinds it wants, whether
/// delivery is synchronous, and whether old values must be supplied.
pub struct ListenerRegistration<K, V> {
    id: ListenerId,
    listener: Arc<dyn CacheEntryListener<K, V>>,
    event_types: Vec<EventType>,
    synchronous: bool,
    old_value_required: bool,
}

impl<K, V> ListenerRegistration<K, V> {
    #[must_use]
    pub fn new(
        listener: Arc<dyn CacheEntryListener<K, V>>,
        event_types: Vec<EventType>,
        synchronous: bool,
        old_value_required: bool,
    ) -> Self {
        Self {
            id: ListenerId(0),
            listener,
            event_types,
            synchronous,
            old_value_required,
        }
    }

    #[must_use]
    pub fn accepts(&self, event_type: EventType) -> bool {
        self.event_types.contains(&event_type)
    }

    #[must_use]
    pub fn old_value_required(&self) -> bool {
        self.old_value_required
    }
}

/// Registers listeners by event kind and delivers events in registration
/// order per operation. Never reaches back into the owning cache itself.
pub struct EventDispatcher<K, V> {
    registrations: RwLock<Vec<ListenerRegistration<K, V>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for EventDispatcher<K, V> {
    fn default() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<K, V> EventDispatcher<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, mut registration: ListenerRegistration<K, V>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        registration.id = id;
        self.registrations.write().push(registration);
        id
    }

    pub fn deregister(&self, id: ListenerId) {
        self.registrations.write().retain(|r| r.id != id);
    }

    /// `true` if any registered listener wants old values for this event
    /// kind - lets the adapter skip copying an old value nobody will see.
    #[must_use]
    pub fn any_requires_old_value(&self, event_type: EventType) -> bool {
        self.registrations
            .read()
            .iter()
            .any(|r| r.accepts(event_type) && r.old_value_required())
    }

    /// Delivers a batch of same-kind events to every matching listener,
    /// in registration order. Synchronous listeners run inline; a
    /// listener panic is caught and logged, never propagated or rolled
    /// back.
    pub fn dispatch(&self, event_type: EventType, events: Vec<CacheEntryEvent<K, V>>) {
        if events.is_empty() {
            return;
        }
        let registrations: Vec<_> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.accepts(event_type))
            .map(|r| (Arc::clone(&r.listener), r.synchronous))
            .collect();

        for (listener, synchronous) in registrations {
            if synchronous {
                deliver(listener.as_ref(), event_type, &events);
            } else {
                let events = events.clone();
                let listener = Arc::clone(&listener);
                thread::spawn(move || deliver(listener.as_ref(), event_type, &events));
            }
        }
    }
}

fn deliver<K, V>(
    listener: &(dyn CacheEntryListener<K, V> + '_),
    event_type: EventType,
    events: &[CacheEntryEvent<K, V>],
) {
    let result = catch_unwind(AssertUnwindSafe(|| match event_type {
        EventType::Created => listener.on_created(events),
        EventType::Updated => listener.on_updated(events),
        EventType::Removed => listener.on_removed(events),
        EventType::Expired => listener.on_expired(events),
    }));
    if result.is_err() {
        tracing::warn!(?event_type, "cache entry listener panicked; event swallowed");
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Created => "Created",
            EventType::Updated => "Updated",
            EventType::Removed => "Removed",
            EventType::Expired => "Expired",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingListener {
        created: AtomicUsize,
        expired: AtomicUsize,
    }

    impl CacheEntryListener<i32, String> for CountingListener {
        fn on_created(&self, events: &[CacheEntryEvent<i32, String>]) {
            self.created.fetch_add(events.len(), Ordering::SeqCst);
        }
        fn on_expired(&self, events: &[CacheEntryEvent<i32, String>]) {
            self.expired.fetch_add(events.len(), Ordering::SeqCst);
        }
    }

    #[test]
    fn dispatch_routes_by_event_type() {
        let dispatcher: EventDispatcher<i32, String> = EventDispatcher::new();
        let listener = Arc::new(CountingListener {
            created: AtomicUsize::new(0),
            expired: AtomicUsize::new(0),
        });
        dispatcher.register(ListenerRegistration::new(
            listener.clone(),
            vec![EventType::Created, EventType::Expired],
            true,
            true,
        ));

        dispatcher.dispatch(
            EventType::Created,
            vec![CacheEntryEvent {
                event_type: EventType::Created,
                key: 1,
                old_value: None,
                new_value: Some("v".to_string()),
            }],
        );
        dispatcher.dispatch(EventType::Updated, vec![]);

        assert_eq!(1, listener.created.load(Ordering::SeqCst));
        assert_eq!(0, listener.expired.load(Ordering::SeqCst));
    }

    #[test]
    fn deregister_stops_delivery() {
        let dispatcher: EventDispatcher<i32, String> = EventDispatcher::new();
        let listener = Arc::new(CountingListener {
            created: AtomicUsize::new(0),
            expired: AtomicUsize::new(0),
        });
        let id = dispatcher.register(ListenerRegistration::new(
            listener.clone(),
            vec![EventType::Created],
            true,
            false,
        ));
        dispatcher.deregister(id);
        dispatcher.dispatch(
            EventType::Created,
            vec![CacheEntryEvent {
                event_type: EventType::Created,
                key: 1,
                old_value: None,
                new_value: Some("v".to_string()),
            }],
        );
        assert_eq!(0, listener.created.load(Ordering::SeqCst));
    }

    struct PanickingListener;
    impl CacheEntryListener<i32, String> for PanickingListener {
        fn on_created(&self, _events: &[CacheEntryEvent<i32, String>]) {
            panic!("boom");
        }
    }

    #[test]
    fn listener_panic_is_swallowed() {
        let dispatcher: EventDispatcher<i32, String> = EventDispatcher::new();
        dispatcher.register(ListenerRegistration::new(
            Arc::new(PanickingListener),
            vec![EventType::Created],
            true,
            false,
        ));
        // Must not propagate the panic out of dispatch().
        dispatcher.dispatch(
            EventType::Created,
            vec![CacheEntryEvent {
                event_type: EventType::Created,
                key: 1,
                old_value: None,
                new_value: Some("v".to_string()),
            }],
        );
    }
}
