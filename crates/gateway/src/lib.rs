//! Relay Gateway - unified authenticated API surface over backend services.
//!
//! One gateway process fronts several independent backend services with a
//! single query/mutation/subscription interface. Every inbound HTTP request
//! or WebSocket connection is authenticated once; business operations are
//! forwarded to the owning service through the [`ports::BackendPort`]
//! collaborator.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        RELAY GATEWAY                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │   HTTP /operations            WebSocket /subscriptions        │
//! │         │                              │                      │
//! │  ┌──────┴──────────────────────────────┴──────┐               │
//! │  │            ContextBuilder (+ auth)          │               │
//! │  └──────────────────┬─────────────────────────┘               │
//! │                     │                                         │
//! │  ┌──────────────────┴─────────────────────────┐               │
//! │  │        Woven schema (auth / rate-limit      │               │
//! │  │        guards around field resolvers)       │               │
//! │  └────────┬─────────────────────────┬─────────┘               │
//! │           │                         │                         │
//! │     BackendPort              SubscriptionSession              │
//! │    (pass-through)                   │                         │
//! └─────────────────────────────────────┼─────────────────────────┘
//!                                       │
//!                                   EventBus
//!                                       │
//!                               Broker consumer
//! ```
//!
//! Queries and mutations run through resolvers wrapped at schema-build time
//! by the directive weaver; subscriptions are driven by events arriving
//! through the [`relay_bus::EventBus`]. All failures are classified into a
//! stable client-visible shape by [`domain::error`].

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod auth;
pub mod broker;
pub mod context;
pub mod domain;
pub mod executor;
pub mod modules;
pub mod ports;
pub mod schema;
pub mod server;

// Re-exports for public API
pub use auth::TokenAuthenticator;
pub use context::{ContextBuilder, ExecutionContext};
pub use domain::config::GatewayConfig;
pub use domain::error::{ErrorClassifier, ErrorEnvelope, ErrorKind, GatewayError};
pub use domain::identity::Identity;
pub use executor::{Executor, OperationRequest, OperationResponse};
pub use ports::BackendPort;
pub use server::GatewayService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
