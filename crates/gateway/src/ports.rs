//! Outbound ports: the downstream service collaborators.
//!
//! Resolvers are pass-through glue; the actual business calls go through
//! [`BackendPort`]. The gateway treats these calls as opaque except for
//! classifying their failures.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Observable failure of one downstream call. Classification into a
/// client-visible kind happens in [`crate::domain::error::classify_downstream`].
#[derive(Debug, Clone, Error)]
pub enum DownstreamFailure {
    #[error("connection refused")]
    ConnectionRefused,

    #[error("request timed out")]
    Timeout,

    #[error("upstream returned status {code}")]
    Status { code: u16, body: String },

    /// Malformed response body or other protocol-level surprise.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Caller material re-attached to downstream calls: the original bearer
/// token plus the headers the services use to reconstruct the client.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerMeta<'a> {
    pub credential: Option<&'a str>,
    pub client_ip: Option<IpAddr>,
    pub client_agent: Option<&'a str>,
}

/// Downstream collaborator contract.
///
/// The credential is forwarded verbatim so the backend can re-check it;
/// the gateway does not re-verify here.
#[async_trait]
pub trait BackendPort: Send + Sync {
    async fn call(
        &self,
        service: &str,
        operation: &str,
        payload: Value,
        caller: CallerMeta<'_>,
    ) -> Result<Value, DownstreamFailure>;
}

/// HTTP implementation: POSTs `{operation, payload}` to the service's base
/// URL and expects a JSON body back.
pub struct HttpBackend {
    client: reqwest::Client,
    /// service name → base URL
    services: HashMap<String, String>,
}

impl HttpBackend {
    pub fn new(services: HashMap<String, String>, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("failed to build http client: {e}"))?;
        Ok(Self { client, services })
    }
}

#[async_trait]
impl BackendPort for HttpBackend {
    async fn call(
        &self,
        service: &str,
        operation: &str,
        payload: Value,
        caller: CallerMeta<'_>,
    ) -> Result<Value, DownstreamFailure> {
        let base = self
            .services
            .get(service)
            .ok_or_else(|| DownstreamFailure::Protocol(format!("unknown service: {service}")))?;

        debug!(service = %service, operation = %operation, "Forwarding to downstream service");

        let mut request = self
            .client
            .post(format!("{base}/operations"))
            .json(&serde_json::json!({ "operation": operation, "payload": payload }));
        if let Some(token) = caller.credential {
            request = request.bearer_auth(token);
        }
        if let Some(ip) = caller.client_ip {
            request = request.header("x-forwarded-for", ip.to_string());
        }
        if let Some(agent) = caller.client_agent {
            request = request.header(reqwest::header::USER_AGENT, agent);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DownstreamFailure::Timeout
            } else if e.is_connect() {
                DownstreamFailure::ConnectionRefused
            } else {
                DownstreamFailure::Protocol(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DownstreamFailure::Status {
                code: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| DownstreamFailure::Protocol(e.to_string()))
    }
}
