//! The built-in weavers: authorization and rate limiting.

use super::field::DirectiveBinding;
use super::weaver::DirectiveWeaver;
use super::Resolver;
use crate::domain::config::RateLimitConfig;
use crate::domain::error::GatewayError;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, warn};

/// `auth` / `auth(role)`: requires a verified identity, optionally with a
/// specific role. Runs before the wrapped resolver, so a rejected caller
/// never reaches a downstream service.
pub struct AuthWeaver;

impl DirectiveWeaver for AuthWeaver {
    fn name(&self) -> &str {
        "auth"
    }

    fn wrap(&self, field: &str, binding: &DirectiveBinding, inner: Resolver) -> Resolver {
        let required_role = binding.argument.clone();
        let field = field.to_string();
        Arc::new(move |ctx, args| {
            let required_role = required_role.clone();
            let field = field.clone();
            let inner = inner.clone();
            Box::pin(async move {
                let identity = match &ctx.identity {
                    Some(identity) => identity,
                    None => {
                        debug!(field = %field, "Rejected anonymous caller");
                        return Err(GatewayError::unauthenticated());
                    }
                };
                if let Some(role) = &required_role {
                    if !identity.has_role(role) {
                        debug!(
                            field = %field,
                            user_id = %identity.id,
                            required = %role,
                            "Rejected caller with insufficient role"
                        );
                        return Err(GatewayError::forbidden(role));
                    }
                }
                inner(ctx, args).await
            })
        })
    }
}

/// `rateLimit`: token-bucket limiting keyed by caller identity, falling
/// back to the client address for anonymous callers.
pub struct RateLimitWeaver {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
    enabled: bool,
}

impl RateLimitWeaver {
    pub fn new(config: &RateLimitConfig) -> Self {
        let per_second =
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(per_second);
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            enabled: config.enabled,
        }
    }
}

impl DirectiveWeaver for RateLimitWeaver {
    fn name(&self) -> &str {
        "rateLimit"
    }

    fn wrap(&self, field: &str, _binding: &DirectiveBinding, inner: Resolver) -> Resolver {
        if !self.enabled {
            return inner;
        }
        let limiter = self.limiter.clone();
        let field = field.to_string();
        Arc::new(move |ctx, args| {
            let limiter = limiter.clone();
            let field = field.clone();
            let inner = inner.clone();
            Box::pin(async move {
                let key = match &ctx.identity {
                    Some(identity) => identity.id.clone(),
                    None => ctx.client_addr.ip().to_string(),
                };
                if limiter.check_key(&key).is_err() {
                    warn!(field = %field, caller = %key, "Rate limit exceeded");
                    return Err(GatewayError::validation("Rate limit exceeded"));
                }
                inner(ctx, args).await
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ExecutionContext, Transport};
    use crate::domain::correlation::CorrelationId;
    use crate::domain::identity::Identity;
    use crate::schema::field::FieldDefinition;
    use crate::schema::weaver::weave;
    use relay_bus::EventBus;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx_with(identity: Option<Identity>) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext {
            identity,
            client_addr: "127.0.0.1:1".parse().unwrap(),
            transport: Transport::Http,
            client_agent: None,
            bus: EventBus::new(),
            correlation: CorrelationId::new(),
        })
    }

    fn user(id: &str, role: &str) -> Identity {
        Identity {
            id: id.into(),
            role: role.into(),
            issued_at: 0,
            expires_at: i64::MAX,
            raw_credential: "t".into(),
        }
    }

    fn counting_field(name: &str, calls: Arc<AtomicUsize>) -> FieldDefinition {
        FieldDefinition::query(
            name,
            Arc::new(move |_, _| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("ok"))
                })
            }),
        )
    }

    #[tokio::test]
    async fn test_auth_rejects_anonymous_without_side_effects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let field = counting_field("Protected", calls.clone())
            .bind(DirectiveBinding::new("auth"));
        let woven = weave(field, &[&AuthWeaver]).unwrap();

        let err = (woven.resolver)(ctx_with(None), Value::Null).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_accepts_any_identity_without_role_argument() {
        let calls = Arc::new(AtomicUsize::new(0));
        let field = counting_field("Protected", calls.clone())
            .bind(DirectiveBinding::new("auth"));
        let woven = weave(field, &[&AuthWeaver]).unwrap();

        (woven.resolver)(ctx_with(Some(user("u1", "user"))), Value::Null)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_role_mismatch_is_forbidden() {
        let calls = Arc::new(AtomicUsize::new(0));
        let field = counting_field("AdminOnly", calls.clone())
            .bind(DirectiveBinding::with_argument("auth", "admin"));
        let woven = weave(field, &[&AuthWeaver]).unwrap();

        let err = (woven.resolver)(ctx_with(Some(user("u1", "user"))), Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        (woven.resolver)(ctx_with(Some(user("a1", "admin"))), Value::Null)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_trips_after_burst() {
        let config = RateLimitConfig {
            requests_per_second: 1,
            burst_size: 3,
            enabled: true,
        };
        let weaver = RateLimitWeaver::new(&config);
        let field = counting_field("Limited", Arc::new(AtomicUsize::new(0)))
            .bind(DirectiveBinding::new("rateLimit"));
        let woven = weave(field, &[&weaver]).unwrap();

        let ctx = ctx_with(Some(user("u1", "user")));
        for _ in 0..3 {
            (woven.resolver)(ctx.clone(), Value::Null).await.unwrap();
        }
        let err = (woven.resolver)(ctx, Value::Null).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_keys_are_isolated_per_caller() {
        let config = RateLimitConfig {
            requests_per_second: 1,
            burst_size: 1,
            enabled: true,
        };
        let weaver = RateLimitWeaver::new(&config);
        let field = counting_field("Limited", Arc::new(AtomicUsize::new(0)))
            .bind(DirectiveBinding::new("rateLimit"));
        let woven = weave(field, &[&weaver]).unwrap();

        (woven.resolver)(ctx_with(Some(user("u1", "user"))), Value::Null)
            .await
            .unwrap();
        // u1's bucket is empty, u2's is untouched.
        (woven.resolver)(ctx_with(Some(user("u2", "user"))), Value::Null)
            .await
            .unwrap();
        let err = (woven.resolver)(ctx_with(Some(user("u1", "user"))), Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_disabled_is_transparent() {
        let config = RateLimitConfig {
            requests_per_second: 1,
            burst_size: 1,
            enabled: false,
        };
        let weaver = RateLimitWeaver::new(&config);
        let calls = Arc::new(AtomicUsize::new(0));
        let field = counting_field("Open", calls.clone())
            .bind(DirectiveBinding::new("rateLimit"));
        let woven = weave(field, &[&weaver]).unwrap();

        let ctx = ctx_with(None);
        for _ in 0..10 {
            (woven.resolver)(ctx.clone(), Value::Null).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }
}
