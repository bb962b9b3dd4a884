//! Topic-keyed event bus.
//!
//! The external broker consumer is the sole publisher. Handlers are
//! broadcast targets: every handler registered on a topic receives every
//! event published on that topic. Handler invocation must not block; the
//! session handler only does an owner check and a queue push, so dispatch
//! is O(handlers) regardless of how slow any consumer is.

use crate::event::TopicEvent;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Error a handler may report for one dispatch. Contained and logged per
/// handler; never propagated to the publisher or to sibling handlers.
#[derive(Debug, Error)]
#[error("handler error: {0}")]
pub struct HandlerError(pub String);

/// A registered topic handler.
///
/// Must not block and must not call back into the bus.
pub type HandlerFn = Arc<dyn Fn(&TopicEvent) -> Result<(), HandlerError> + Send + Sync>;

struct RegisteredHandler {
    id: u64,
    handler: HandlerFn,
}

struct BusInner {
    /// Topic → handlers. The only shared mutable structure in the system.
    registry: DashMap<String, Vec<RegisteredHandler>>,
    next_id: AtomicU64,
    stopped: AtomicBool,
    events_published: AtomicU64,
}

/// Handle identifying one registration. Plain data; unsubscribing through
/// a stale or repeated handle is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    topic: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Process-wide in-memory dispatcher with bounded lifecycle: constructed at
/// startup, injected into components that need it, torn down via [`stop`].
///
/// Cheap to clone; clones share the same registry.
///
/// [`stop`]: EventBus::stop
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.inner.registry.len())
            .field(
                "stopped",
                &self.inner.stopped.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: DashMap::new(),
                next_id: AtomicU64::new(1),
                stopped: AtomicBool::new(false),
                events_published: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an event to every handler registered on its topic.
    ///
    /// Returns the number of handlers reached. A failing handler is logged
    /// and skipped; it does not affect the publisher or other handlers.
    pub fn publish(&self, event: TopicEvent) -> usize {
        self.inner.events_published.fetch_add(1, Ordering::Relaxed);

        if self.inner.stopped.load(Ordering::Acquire) {
            debug!(topic = %event.topic, "Event dropped (bus stopped)");
            return 0;
        }

        // Snapshot the handler list so dispatch runs without holding the
        // registry shard lock; concurrent unsubscribe stays lock-free here.
        let handlers: Vec<HandlerFn> = match self.inner.registry.get(&event.topic) {
            Some(entry) => entry.iter().map(|r| Arc::clone(&r.handler)).collect(),
            None => {
                debug!(topic = %event.topic, "Event dropped (no handlers)");
                return 0;
            }
        };

        let mut reached = 0;
        for handler in &handlers {
            match handler(&event) {
                Ok(()) => reached += 1,
                Err(e) => {
                    warn!(topic = %event.topic, error = %e, "Bus handler failed; contained");
                }
            }
        }

        debug!(topic = %event.topic, handlers = reached, "Event dispatched");
        reached
    }

    /// Register a handler on a topic.
    pub fn subscribe(&self, topic: &str, handler: HandlerFn) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .registry
            .entry(topic.to_string())
            .or_default()
            .push(RegisteredHandler { id, handler });

        debug!(topic = %topic, handler_id = id, "Handler registered");
        SubscriptionHandle {
            topic: topic.to_string(),
            id,
        }
    }

    /// Remove a registration. Idempotent: repeated calls, stale handles and
    /// calls after [`stop`] are all no-ops.
    ///
    /// [`stop`]: EventBus::stop
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if let Some(mut entry) = self.inner.registry.get_mut(&handle.topic) {
            let before = entry.len();
            entry.retain(|r| r.id != handle.id);
            if entry.len() < before {
                debug!(topic = %handle.topic, handler_id = handle.id, "Handler removed");
            }
        }
    }

    /// Tear the bus down: drop all registrations and reject further events.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.registry.clear();
        debug!("Event bus stopped");
    }

    /// Number of handlers currently registered on a topic.
    pub fn handler_count(&self, topic: &str) -> usize {
        self.inner
            .registry
            .get(topic)
            .map(|e| e.len())
            .unwrap_or(0)
    }

    /// Total events published since startup (including dropped ones).
    pub fn events_published(&self) -> u64 {
        self.inner.events_published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
