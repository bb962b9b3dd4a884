//! Failure taxonomy and formatting.
//!
//! Every failure in the gateway is one of five stable kinds. User errors
//! (validation, unauthenticated, forbidden) log at low severity and render
//! to the client with a precise code; system errors (service unavailable,
//! internal) log at error severity, go to the error tracker, and render a
//! generic message in production.

use crate::ports::DownstreamFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Stable client-visible failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationFailure,
    Unauthenticated,
    Forbidden,
    ServiceUnavailable,
    Internal,
}

impl ErrorKind {
    /// Wire code, matching what clients of the original surface expect.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::ValidationFailure => "BAD_USER_INPUT",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// User errors never reach the error tracker and are not the
    /// gateway's fault; everything else is a system error.
    pub fn is_user_error(self) -> bool {
        matches!(
            self,
            ErrorKind::ValidationFailure | ErrorKind::Unauthenticated | ErrorKind::Forbidden
        )
    }
}

/// Gateway failure with a stable kind.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Bad input from the client.
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// No identity where one is required.
    #[error("{0}")]
    Unauthenticated(String),

    /// Identity present but insufficient privilege.
    #[error("{0}")]
    Forbidden(String),

    /// Downstream collaborator unreachable or failing server-side.
    #[error("{service}: {message}")]
    ServiceUnavailable { service: String, message: String },

    /// Anything unclassified.
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn unauthenticated() -> Self {
        Self::Unauthenticated("Authentication required".into())
    }

    pub fn forbidden(required_role: &str) -> Self {
        Self::Forbidden(format!("Requires role {required_role}"))
    }

    pub fn service_unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation { .. } => ErrorKind::ValidationFailure,
            GatewayError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            GatewayError::Forbidden(_) => ErrorKind::Forbidden,
            GatewayError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Classify a downstream collaborator failure.
///
/// Pure function of the failure's observable properties; the same raw
/// failure always classifies identically.
pub fn classify_downstream(service: &str, failure: &DownstreamFailure) -> GatewayError {
    match failure {
        DownstreamFailure::ConnectionRefused | DownstreamFailure::Timeout => {
            GatewayError::service_unavailable(service, failure.to_string())
        }
        DownstreamFailure::Status { code: 401, .. } => GatewayError::unauthenticated(),
        DownstreamFailure::Status { code: 403, .. } => {
            GatewayError::Forbidden("Access denied by downstream service".into())
        }
        DownstreamFailure::Status { code, body } if (400..500).contains(code) => {
            GatewayError::validation(if body.is_empty() {
                format!("Downstream rejected request (status {code})")
            } else {
                body.clone()
            })
        }
        DownstreamFailure::Status { code, .. } if (500..600).contains(code) => {
            GatewayError::service_unavailable(service, format!("upstream status {code}"))
        }
        DownstreamFailure::Status { code, .. } => {
            GatewayError::internal(format!("{service}: unexpected status {code}"))
        }
        DownstreamFailure::Protocol(detail) => {
            GatewayError::internal(format!("{service}: {detail}"))
        }
    }
}

/// Client-visible error shape plus the internal diagnostic detail.
///
/// `internal_detail` is attached to the client payload only outside
/// production mode; the diagnostic log record always carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_detail: Option<String>,
}

impl ErrorEnvelope {
    pub fn from_error(err: &GatewayError, path: Option<&str>) -> Self {
        let kind = err.kind();
        Self {
            kind,
            code: kind.code().to_string(),
            message: err.to_string(),
            path: path.map(str::to_string),
            timestamp: Utc::now(),
            internal_detail: Some(format!("{err:?}")),
        }
    }

    /// The rendering sent to the client. In production, system errors get a
    /// generic message and internal detail is always stripped.
    pub fn client_view(&self, production: bool) -> ErrorEnvelope {
        let mut view = self.clone();
        if production {
            view.internal_detail = None;
            if !view.kind.is_user_error() {
                view.message = match view.kind {
                    ErrorKind::ServiceUnavailable => "Service temporarily unavailable".into(),
                    _ => "Internal server error".into(),
                };
            }
        }
        view
    }
}

/// Sink for system errors (the external error-tracking collaborator).
pub trait ErrorTracker: Send + Sync {
    fn capture(&self, envelope: &ErrorEnvelope);
}

/// Default tracker: emits the envelope on the log stream.
pub struct LogErrorTracker;

impl ErrorTracker for LogErrorTracker {
    fn capture(&self, envelope: &ErrorEnvelope) {
        error!(
            code = %envelope.code,
            path = envelope.path.as_deref().unwrap_or("-"),
            detail = envelope.internal_detail.as_deref().unwrap_or("-"),
            "Captured system error"
        );
    }
}

/// Maps failures to envelopes, logs the diagnostic record, forwards system
/// errors to the tracker and returns the client-safe rendering.
pub struct ErrorClassifier {
    production: bool,
    tracker: Arc<dyn ErrorTracker>,
}

impl ErrorClassifier {
    pub fn new(production: bool, tracker: Arc<dyn ErrorTracker>) -> Self {
        Self {
            production,
            tracker,
        }
    }

    pub fn report(&self, err: &GatewayError, path: Option<&str>) -> ErrorEnvelope {
        let envelope = ErrorEnvelope::from_error(err, path);

        if envelope.kind.is_user_error() {
            debug!(
                code = %envelope.code,
                path = path.unwrap_or("-"),
                message = %envelope.message,
                "Operation failed (user error)"
            );
        } else {
            warn!(
                code = %envelope.code,
                path = path.unwrap_or("-"),
                message = %envelope.message,
                "Operation failed (system error)"
            );
            self.tracker.capture(&envelope);
        }

        envelope.client_view(self.production)
    }

    pub fn production(&self) -> bool {
        self.production
    }
}
