//! Per-subscription pull stream over the event bus.
//!
//! A session registers one bus handler at creation and filters the topic's
//! events down to the ones owned by the subscribing identity (optionally
//! narrowed further by an [`EventScope`]). Delivery follows the
//! deliver-or-buffer algorithm: a matching event wakes a blocked consumer
//! immediately, or joins the buffer if nobody is waiting; the consumer
//! drains the buffer strictly in arrival order before waiting again.
//!
//! Closing a session unregisters the bus handler *before* `close` returns,
//! so no event can be delivered once close has returned control to the
//! caller. `Drop` closes too, which makes cleanup hold on every exit path,
//! including cancelled tasks.

use crate::bus::{EventBus, HandlerFn, SubscriptionHandle};
use crate::event::{EventScope, TopicEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No buffered event, no waiting consumer.
    Idle,
    /// A consumer is blocked waiting for the next event.
    AwaitingEvent,
    /// Events are buffered and no consumer is currently waiting.
    Buffered,
    /// Terminal. The bus handler has been unregistered.
    Closed,
}

/// Buffer policy for one session.
///
/// Unbounded by default: no event is ever lost to a slow consumer. When a
/// capacity is set, overflow drops the *oldest* buffered event; every drop
/// is logged and counted, never silent.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub capacity: Option<usize>,
}

impl SessionConfig {
    pub fn unbounded() -> Self {
        Self { capacity: None }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
        }
    }
}

struct Queue {
    buffer: VecDeque<TopicEvent>,
    waiting: bool,
    closed: bool,
}

struct Shared {
    owner_id: String,
    scope: Option<EventScope>,
    queue: Mutex<Queue>,
    notify: Notify,
    capacity: Option<usize>,
    dropped: AtomicU64,
    bus: EventBus,
    handle: Mutex<Option<SubscriptionHandle>>,
}

impl Shared {
    /// Bus-handler side: filter and enqueue. O(1), never blocks.
    fn offer(&self, event: &TopicEvent) {
        if event.owner_id != self.owner_id {
            return;
        }
        if let Some(scope) = &self.scope {
            if !scope.matches(&event.payload) {
                return;
            }
        }

        let mut queue = self.queue.lock();
        if queue.closed {
            return;
        }
        if let Some(capacity) = self.capacity {
            if queue.buffer.len() >= capacity {
                queue.buffer.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    owner_id = %self.owner_id,
                    capacity,
                    dropped_total = dropped,
                    "Session buffer full, dropped oldest event"
                );
            }
        }
        queue.buffer.push_back(event.clone());
        drop(queue);
        self.notify.notify_one();
    }

    /// Terminal transition: unregister from the bus, then seal the queue.
    /// Idempotent; no event is delivered once this returns.
    fn close(&self) {
        let taken = self.handle.lock().take();
        if let Some(handle) = taken {
            self.bus.unsubscribe(&handle);
            debug!(
                topic = %handle.topic(),
                owner_id = %self.owner_id,
                "Subscription session closed"
            );
        }
        let mut queue = self.queue.lock();
        if !queue.closed {
            queue.closed = true;
            queue.buffer.clear();
        }
        drop(queue);
        self.notify.notify_waiters();
    }
}

/// Detached close handle for one session. The transport layer holds one
/// of these per subscription so a client's cancel frame can close the
/// session from outside the consuming task, with the same
/// unregister-before-return contract as [`SubscriptionSession::close`].
#[derive(Clone)]
pub struct SessionCloser {
    shared: Arc<Shared>,
}

impl SessionCloser {
    pub fn close(&self) {
        self.shared.close();
    }
}

/// One subscription operation's isolated view of a topic, scoped to one
/// owner. Created per subscribe operation, destroyed on cancel, disconnect
/// or error.
pub struct SubscriptionSession {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SubscriptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSession")
            .field("owner_id", &self.shared.owner_id)
            .finish_non_exhaustive()
    }
}

impl SubscriptionSession {
    /// Open a session: registers the filtering handler on the bus.
    pub fn open(
        bus: &EventBus,
        topic: &str,
        owner_id: impl Into<String>,
        scope: Option<EventScope>,
        config: SessionConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            owner_id: owner_id.into(),
            scope,
            queue: Mutex::new(Queue {
                buffer: VecDeque::new(),
                waiting: false,
                closed: false,
            }),
            notify: Notify::new(),
            capacity: config.capacity,
            dropped: AtomicU64::new(0),
            bus: bus.clone(),
            handle: Mutex::new(None),
        });

        // The handler holds only a weak reference: a leaked registration
        // (should close ever be missed) cannot keep the queue alive.
        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let handler: HandlerFn = Arc::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.offer(event);
            }
            Ok(())
        });
        let handle = bus.subscribe(topic, handler);

        debug!(
            topic = %handle.topic(),
            owner_id = %shared.owner_id,
            "Subscription session opened"
        );
        *shared.handle.lock() = Some(handle);

        Self { shared }
    }

    /// Pull the next matching event, in bus arrival order.
    ///
    /// Returns `None` once the session is closed and the backlog at close
    /// time is irrelevant: close short-circuits delivery entirely.
    pub async fn next(&mut self) -> Option<TopicEvent> {
        loop {
            // Arm the notification before checking the queue so an offer
            // racing between check and await still wakes us.
            let notified = self.shared.notify.notified();
            {
                let mut queue = self.shared.queue.lock();
                if queue.closed {
                    return None;
                }
                if let Some(event) = queue.buffer.pop_front() {
                    return Some(event);
                }
                queue.waiting = true;
            }
            notified.await;
            self.shared.queue.lock().waiting = false;
        }
    }

    /// Non-blocking variant: drain one buffered event if present.
    pub fn try_next(&mut self) -> Option<TopicEvent> {
        let mut queue = self.shared.queue.lock();
        if queue.closed {
            return None;
        }
        queue.buffer.pop_front()
    }

    /// Close the session. The bus handler is unregistered before this
    /// method returns; afterwards publishing matching events delivers
    /// nothing to this session. Safe to call more than once.
    pub fn close(&mut self) {
        self.shared.close();
    }

    /// A [`SessionCloser`] targeting this session.
    pub fn closer(&self) -> SessionCloser {
        SessionCloser {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        let queue = self.shared.queue.lock();
        if queue.closed {
            SessionState::Closed
        } else if !queue.buffer.is_empty() {
            SessionState::Buffered
        } else if queue.waiting {
            SessionState::AwaitingEvent
        } else {
            SessionState::Idle
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.shared.owner_id
    }

    /// Events discarded by the bounded drop-oldest policy.
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn buffered_events(&self) -> usize {
        self.shared.queue.lock().buffer.len()
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        self.close();
    }
}
