//! # Relay Bus - Broker Fan-Out and Subscription Streams
//!
//! In-process dispatcher between the external broker consumer (the sole
//! publisher) and many concurrent per-client subscription streams.
//!
//! ```text
//! ┌──────────────────┐   publish()    ┌─────────────┐
//! │ Broker consumer  │ ─────────────→ │  EventBus   │
//! └──────────────────┘                └──────┬──────┘
//!                                            │ fan-out (per topic, per handler)
//!                     ┌──────────────────────┼──────────────────────┐
//!                     ▼                      ▼                      ▼
//!              ┌────────────┐         ┌────────────┐         ┌────────────┐
//!              │ Session u1 │         │ Session u2 │         │ Session u1 │
//!              │ (buffered) │         │ (awaiting) │         │ (scoped)   │
//!              └────────────┘         └────────────┘         └────────────┘
//! ```
//!
//! Guarantees:
//!
//! - **Broadcast fan-out**: every handler registered on a topic receives
//!   every event published on that topic.
//! - **Non-blocking dispatch**: handler invocation on the publish path is an
//!   owner check plus a queue push; a slow consumer never stalls the
//!   publisher or sibling sessions.
//! - **Per-session FIFO**: a session observes its events in bus arrival
//!   order, draining any backlog before waiting for new events.
//! - **Guaranteed cleanup**: closing a session unregisters its bus handler
//!   before `close` returns; `Drop` closes on every exit path.

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod bus;
pub mod event;
pub mod session;

pub use bus::{EventBus, HandlerError, HandlerFn, SubscriptionHandle};
pub use event::{EventScope, TopicEvent};
pub use session::{SessionCloser, SessionConfig, SessionState, SubscriptionSession};
