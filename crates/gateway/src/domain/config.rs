//! Gateway configuration with validation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP server configuration
    pub http: HttpConfig,
    /// Credential verification configuration
    pub auth: AuthConfig,
    /// Per-connection subscription session configuration
    pub session: SessionConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Request validation limits
    pub limits: LimitsConfig,
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// Downstream service base URLs, keyed by service name
    pub backends: BackendsConfig,
    /// Event broker source configuration
    pub broker: BrokerConfig,
    /// Production mode: strip internal detail from client errors
    pub production: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            auth: AuthConfig::default(),
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutConfig::default(),
            backends: BackendsConfig::default(),
            broker: BrokerConfig::default(),
            production: false,
        }
    }
}

impl GatewayConfig {
    /// Load configuration: the JSON file named by `CONFIG_PATH` (if set),
    /// then environment variable overrides, then validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("CONFIG_PATH") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("read {path}: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Invalid(format!("parse {path}: {e}")))
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.secret = secret;
        }
        if let Ok(port) = std::env::var("PORT") {
            self.http.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("bad PORT: {port}")))?;
        }
        if let Ok(env) = std::env::var("APP_ENV") {
            self.production = env == "production";
        }
        if let Ok(url) = std::env::var("ACCOUNT_SERVICE_URL") {
            self.backends.services.insert("account".into(), url);
        }
        if let Ok(url) = std::env::var("CHAT_SERVICE_URL") {
            self.backends.services.insert("chat".into(), url);
        }
        if let Ok(addr) = std::env::var("BROKER_ADDR") {
            self.broker.addr = addr
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("bad BROKER_ADDR: {addr}")))?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        if self.rate_limit.requests_per_second == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "requests_per_second cannot be 0".into(),
            ));
        }
        if self.rate_limit.burst_size == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "burst_size cannot be 0".into(),
            ));
        }

        if self.limits.max_request_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_request_size cannot be 0".into(),
            ));
        }
        if self.limits.max_message_length == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_message_length cannot be 0".into(),
            ));
        }

        if self.timeouts.request.as_millis() == 0 {
            return Err(ConfigError::InvalidTimeout(
                "request timeout cannot be 0".into(),
            ));
        }
        if self.timeouts.downstream.as_millis() == 0 {
            return Err(ConfigError::InvalidTimeout(
                "downstream timeout cannot be 0".into(),
            ));
        }

        if let Some(capacity) = self.session.buffer_capacity {
            if capacity == 0 {
                return Err(ConfigError::InvalidLimit(
                    "session buffer_capacity cannot be 0".into(),
                ));
            }
        }

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 4000)
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4000,
        }
    }
}

/// Credential verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HMAC secret for bearer token verification
    pub secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            // Dev-only default; overridden by JWT_SECRET in any real deployment.
            secret: "dev-secret-change-me".to_string(),
        }
    }
}

/// Subscription session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Max buffered events per subscription session; `None` is unbounded.
    /// When full, the oldest buffered event is dropped.
    pub buffer_capacity: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: Some(1024),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per second per caller
    pub requests_per_second: u32,
    /// Burst allowance (token bucket)
    pub burst_size: u32,
    /// Enable rate limiting
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 20,
            burst_size: 40,
            enabled: true,
        }
    }
}

/// Request limits configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max request body size in bytes (default: 1MB)
    pub max_request_size: usize,
    /// Max chat message length in characters
    pub max_message_length: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size: 1024 * 1024, // 1MB
            max_message_length: 4000,
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// End-to-end timeout for one HTTP operation
    #[serde(with = "humantime_serde")]
    pub request: Duration,
    /// Timeout for one downstream service call
    #[serde(with = "humantime_serde")]
    pub downstream: Duration,
    /// Grace period for draining on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            downstream: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Downstream service registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    /// service name → base URL
    pub services: HashMap<String, String>,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        let mut services = HashMap::new();
        services.insert("account".to_string(), "http://localhost:4001".to_string());
        services.insert("chat".to_string(), "http://localhost:4002".to_string());
        Self { services }
    }
}

/// Event broker source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Address of the external event broker feed
    pub addr: SocketAddr,
    /// Reconnect backoff after a lost broker connection
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9092),
            reconnect_backoff: Duration::from_secs(2),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// No credential secret configured
    #[error("auth secret is empty (set JWT_SECRET)")]
    MissingSecret,
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.http.port, 4000);
        assert!(config.backends.services.contains_key("account"));
        assert!(config.backends.services.contains_key("chat"));
        assert!(!config.production);
    }

    #[test]
    fn test_empty_secret_rejected() {
        let mut config = GatewayConfig::default();
        config.auth.secret.clear();
        assert!(matches!(config.validate(), Err(ConfigError::MissingSecret)));
    }

    #[test]
    fn test_rate_limit_validation() {
        let mut config = GatewayConfig::default();
        config.rate_limit.requests_per_second = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRateLimit(_))
        ));
    }

    #[test]
    fn test_zero_session_capacity_rejected() {
        let mut config = GatewayConfig::default();
        config.session.buffer_capacity = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimit(_))));
    }

    #[test]
    fn test_duration_parsing() {
        let json = r#"{ "timeouts": { "request": "45s", "downstream": "500ms" } }"#;
        let config: GatewayConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.timeouts.request, Duration::from_secs(45));
        assert_eq!(config.timeouts.downstream, Duration::from_millis(500));
        // Unspecified sections keep defaults.
        assert_eq!(config.timeouts.shutdown_grace, Duration::from_secs(5));
    }
}
