//! Domain types: identity, correlation, errors, configuration.

pub mod config;
pub mod correlation;
pub mod error;
pub mod identity;

pub use config::GatewayConfig;
pub use correlation::CorrelationId;
pub use error::{ErrorClassifier, ErrorEnvelope, ErrorKind, GatewayError};
pub use identity::Identity;
