//! Fan-out registry for push events.
//!
//! One bucket receives every [`DomainEvent`], one bucket per [`EventKind`]
//! receives only that kind, and a separate bucket receives [`ErrorRecord`]s.
//! Buckets keep registration order and never deduplicate: registering the
//! same handler twice makes it fire twice.

use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use tracing::{error, trace};

use crate::event::{DomainEvent, ErrorRecord, EventKind};

/// A registered callback.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by every registration, used to remove that registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Ordered collection of listeners sharing a dispatch key.
pub struct ListenerBucket<T> {
    entries: Vec<(ListenerId, Listener<T>)>,
}

impl<T> Default for ListenerBucket<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> ListenerBucket<T> {
    pub fn add(&mut self, id: ListenerId, listener: Listener<T>) {
        self.entries.push((id, listener));
    }

    /// Remove one registration. Returns `false` if `id` is not in the bucket.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the listeners in registration order.
    ///
    /// Dispatch works on a snapshot so listeners may (un)register while
    /// being invoked without deadlocking on the bucket lock.
    fn snapshot(&self) -> Vec<Listener<T>> {
        self.entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

/// Multiplexes one inbound event stream to independent consumers.
pub struct EventDispatcher {
    next_id: AtomicU64,
    any: RwLock<ListenerBucket<DomainEvent>>,
    by_kind: RwLock<HashMap<EventKind, ListenerBucket<DomainEvent>>>,
    errors: RwLock<ListenerBucket<ErrorRecord>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            any: RwLock::new(ListenerBucket::default()),
            by_kind: RwLock::new(HashMap::new()),
            errors: RwLock::new(ListenerBucket::default()),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    // ========================================================================
    // Domain events
    // ========================================================================

    /// Receive every event regardless of kind.
    pub fn register_any<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.any.write().add(id, Arc::new(handler));
        id
    }

    pub fn unregister_any(&self, id: ListenerId) -> bool {
        self.any.write().remove(id)
    }

    pub fn clear_any(&self) {
        self.any.write().clear();
    }

    /// Receive only events of `kind`.
    ///
    /// The kind's bucket is created on first registration and kept (possibly
    /// empty) afterwards.
    pub fn register_for<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.by_kind
            .write()
            .entry(kind)
            .or_default()
            .add(id, Arc::new(handler));
        id
    }

    pub fn unregister_for(&self, kind: EventKind, id: ListenerId) -> bool {
        self.by_kind
            .write()
            .get_mut(&kind)
            .is_some_and(|bucket| bucket.remove(id))
    }

    pub fn clear_for(&self, kind: EventKind) {
        if let Some(bucket) = self.by_kind.write().get_mut(&kind) {
            bucket.clear();
        }
    }

    /// Number of listeners registered for `kind` (not counting "any").
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.by_kind.read().get(&kind).map_or(0, ListenerBucket::len)
    }

    pub fn any_listener_count(&self) -> usize {
        self.any.read().len()
    }

    /// Kinds that have a bucket, empty or not.
    pub fn known_kinds(&self) -> Vec<EventKind> {
        self.by_kind.read().keys().copied().collect()
    }

    /// Deliver `event` to the "any" bucket, then to its kind's bucket.
    pub fn dispatch(&self, event: &DomainEvent) {
        let any = self.any.read().snapshot();
        invoke(&any, event, "any");

        if let Some(kind) = event.kind() {
            let matching = self
                .by_kind
                .read()
                .get(&kind)
                .map(ListenerBucket::snapshot)
                .unwrap_or_default();
            invoke(&matching, event, kind.as_str());
        }
    }

    // ========================================================================
    // Error records
    // ========================================================================

    pub fn register_error<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ErrorRecord) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.errors.write().add(id, Arc::new(handler));
        id
    }

    pub fn unregister_error(&self, id: ListenerId) -> bool {
        self.errors.write().remove(id)
    }

    pub fn clear_errors(&self) {
        self.errors.write().clear();
    }

    pub fn error_listener_count(&self) -> usize {
        self.errors.read().len()
    }

    pub fn dispatch_error(&self, record: &ErrorRecord) {
        let listeners = self.errors.read().snapshot();
        invoke(&listeners, record, "error");
    }
}

/// Run each listener, containing panics so one misbehaving consumer cannot
/// starve the rest.
fn invoke<T>(listeners: &[Listener<T>], value: &T, bucket: &str) {
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
            error!(bucket, "Push listener panicked; continuing with remaining listeners");
        }
    }
    trace!(bucket, delivered = listeners.len(), "Dispatched to bucket");
}
