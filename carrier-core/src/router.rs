//! Event router: turns native callbacks into records and hands them to the current sink.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::event::{Event, EventRecord};
use crate::handle::Handle;
use crate::listener::ListenerRegistry;

/// Routing tag captured when a callback is created: which object raised the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub handle: Handle,
    pub handler_id: Option<i64>,
    pub group_id: Option<String>,
}

impl Origin {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            handler_id: None,
            group_id: None,
        }
    }

    pub fn with_handler(mut self, handler_id: i64) -> Self {
        self.handler_id = Some(handler_id);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}

/// Callback handed to the native library. Cheap to clone.
pub struct Callback<E> {
    inner: Arc<dyn Fn(E) + Send + Sync>,
}

impl<E> Callback<E> {
    pub fn new(f: impl Fn(E) + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    /// Callback that discards everything.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn call(&self, event: E) {
        (self.inner)(event)
    }
}

impl<E> Clone for Callback<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for Callback<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// Counters for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub delivered: u64,
    /// No sink was registered for the category.
    pub dropped: u64,
    /// Payload construction failed or a sink panicked.
    pub failed: u64,
}

pub struct EventRouter {
    listeners: Arc<ListenerRegistry>,
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl EventRouter {
    pub fn new(listeners: Arc<ListenerRegistry>) -> Self {
        Self {
            listeners,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// Build the record for `event` and deliver it. Never panics into the caller, which
    /// is usually a native callback thread.
    pub fn route<E: Event>(&self, origin: &Origin, event: E) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            match EventRecord::from_event(origin, &event) {
                Ok(record) => {
                    self.deliver(&record);
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        category = %E::CATEGORY,
                        handle = %origin.handle,
                        error = %e,
                        "dropping event with bad payload"
                    );
                }
            }
        }));
        if outcome.is_err() {
            self.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                category = %E::CATEGORY,
                handle = %origin.handle,
                "panic while routing event"
            );
        }
    }

    /// Hand `record` to whatever sink is registered for its category right now.
    /// Returns false when there is none; the record is dropped.
    pub fn deliver(&self, record: &EventRecord) -> bool {
        let Some(sink) = self.listeners.get_listener(record.category) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(category = %record.category, name = %record.name, "no listener, event dropped");
            return false;
        };
        sink.deliver(record);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Context-tagged callback for the native library. Holds the router weakly, so a
    /// native object outliving the bridge just stops delivering.
    pub fn callback<E: Event>(self: &Arc<Self>, origin: Origin) -> Callback<E> {
        let router: Weak<EventRouter> = Arc::downgrade(self);
        Callback::new(move |event: E| {
            if let Some(router) = router.upgrade() {
                router.route(&origin, event);
            }
        })
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("stats", &self.stats())
            .finish()
    }
}
