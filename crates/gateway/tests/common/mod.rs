//! Shared fixtures for gateway integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_gateway::domain::config::GatewayConfig;
use relay_gateway::domain::error::LogErrorTracker;
use relay_gateway::ports::{BackendPort, CallerMeta, DownstreamFailure};
use relay_gateway::{GatewayService, TokenAuthenticator};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_SECRET: &str = "integration-test-secret";

/// Backend double recording every forwarded call.
pub struct RecordingBackend {
    pub calls: Mutex<Vec<(String, String, Value)>>,
    /// Per call: the forwarded (client ip, user agent) pair.
    pub callers: Mutex<Vec<(Option<String>, Option<String>)>>,
    pub response: Mutex<Result<Value, DownstreamFailure>>,
}

impl RecordingBackend {
    pub fn ok(response: Value) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            callers: Mutex::new(Vec::new()),
            response: Mutex::new(Ok(response)),
        })
    }
}

#[async_trait]
impl BackendPort for RecordingBackend {
    async fn call(
        &self,
        service: &str,
        operation: &str,
        payload: Value,
        caller: CallerMeta<'_>,
    ) -> Result<Value, DownstreamFailure> {
        self.calls
            .lock()
            .push((service.to_string(), operation.to_string(), payload));
        self.callers.lock().push((
            caller.client_ip.map(|ip| ip.to_string()),
            caller.client_agent.map(str::to_string),
        ));
        self.response.lock().clone()
    }
}

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.secret = TEST_SECRET.to_string();
    config.production = true;
    config
}

pub fn service_with(backend: Arc<RecordingBackend>, config: GatewayConfig) -> GatewayService {
    GatewayService::with_backend(config, backend, Arc::new(LogErrorTracker)).unwrap()
}

pub fn token_for(id: &str, role: &str) -> String {
    TokenAuthenticator::new(TEST_SECRET.as_bytes()).sign(id, role, Duration::from_secs(300))
}
