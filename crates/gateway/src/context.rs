//! Per-operation execution context.
//!
//! Built fresh for every HTTP request and every subscription connection.
//! Credential verification happens here, exactly once per context; the
//! guards downstream only inspect the result.

use crate::auth::TokenAuthenticator;
use crate::domain::correlation::CorrelationId;
use crate::domain::identity::Identity;
use crate::ports::CallerMeta;
use axum::http::HeaderMap;
use relay_bus::EventBus;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Transport the operation arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    WebSocket,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::WebSocket => "websocket",
        }
    }
}

/// Everything a resolver may consult about the current caller.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Verified caller, `None` for anonymous.
    pub identity: Option<Identity>,
    pub client_addr: SocketAddr,
    pub transport: Transport,
    /// The caller's `User-Agent`, when the transport carried one.
    pub client_agent: Option<String>,
    /// Shared fan-out bus, used by subscription resolvers.
    pub bus: EventBus,
    pub correlation: CorrelationId,
}

impl ExecutionContext {
    /// The caller's original credential, for forwarding downstream.
    pub fn credential(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.raw_credential.as_str())
    }

    /// Caller material re-attached to every downstream call.
    pub fn caller_meta(&self) -> CallerMeta<'_> {
        CallerMeta {
            credential: self.credential(),
            client_ip: Some(self.client_addr.ip()),
            client_agent: self.client_agent.as_deref(),
        }
    }
}

/// Builds execution contexts from transport-level material.
pub struct ContextBuilder {
    authenticator: Arc<TokenAuthenticator>,
    bus: EventBus,
}

impl ContextBuilder {
    pub fn new(authenticator: Arc<TokenAuthenticator>, bus: EventBus) -> Self {
        Self { authenticator, bus }
    }

    /// Context for one HTTP operation.
    pub fn from_http(&self, headers: &HeaderMap, client_addr: SocketAddr) -> ExecutionContext {
        let credential = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(strip_bearer);
        let agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.build(credential, agent, client_addr, Transport::Http)
    }

    /// Context for one subscription connection, from the client's
    /// `connection_init` payload. The credential key is matched
    /// case-insensitively since clients disagree on casing.
    pub fn from_connection_params(
        &self,
        params: &Value,
        client_addr: SocketAddr,
    ) -> ExecutionContext {
        let credential = params.as_object().and_then(|map| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
                .and_then(|(_, v)| v.as_str())
                .map(strip_bearer)
        });
        self.build(credential, None, client_addr, Transport::WebSocket)
    }

    fn build(
        &self,
        credential: Option<&str>,
        client_agent: Option<String>,
        client_addr: SocketAddr,
        transport: Transport,
    ) -> ExecutionContext {
        let identity = self.authenticator.verify(credential);
        let correlation = CorrelationId::new();
        debug!(
            correlation = %correlation,
            transport = transport.as_str(),
            agent = client_agent.as_deref().unwrap_or(""),
            authenticated = identity.is_some(),
            "Execution context created"
        );
        ExecutionContext {
            identity,
            client_addr,
            transport,
            client_agent,
            bus: self.bus.clone(),
            correlation,
        }
    }
}

fn strip_bearer(value: &str) -> &str {
    value.strip_prefix("Bearer ").unwrap_or(value)
}
