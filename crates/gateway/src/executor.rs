//! Operation execution against the woven schema.

use crate::context::ExecutionContext;
use crate::domain::error::{ErrorClassifier, ErrorEnvelope, GatewayError};
use crate::schema::{OperationKind, Schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// One client operation, as posted to `/operations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    /// `query` or `mutation`.
    pub op: String,
    /// Field name, e.g. `AccountLogin`.
    pub field: String,
    /// Field arguments, passed to the resolver as-is.
    #[serde(default)]
    pub args: Value,
}

/// Response envelope: data on success, error list on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<ErrorEnvelope>,
}

impl OperationResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn err(envelope: ErrorEnvelope) -> Self {
        Self {
            data: None,
            errors: vec![envelope],
        }
    }
}

/// Runs request/response operations. Subscriptions go through the
/// socket handler instead; this executor rejects them.
pub struct Executor {
    schema: Arc<Schema>,
    classifier: Arc<ErrorClassifier>,
}

impl Executor {
    pub fn new(schema: Arc<Schema>, classifier: Arc<ErrorClassifier>) -> Self {
        Self { schema, classifier }
    }

    pub async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        request: OperationRequest,
    ) -> OperationResponse {
        let field_name = request.field.clone();
        match self.execute_inner(ctx, request).await {
            Ok(data) => OperationResponse::ok(data),
            Err(err) => OperationResponse::err(self.classifier.report(&err, Some(&field_name))),
        }
    }

    async fn execute_inner(
        &self,
        ctx: Arc<ExecutionContext>,
        request: OperationRequest,
    ) -> Result<Value, GatewayError> {
        let requested_kind = match request.op.as_str() {
            "query" => OperationKind::Query,
            "mutation" => OperationKind::Mutation,
            "subscription" => {
                return Err(GatewayError::validation(
                    "Subscriptions are served over the socket endpoint",
                ))
            }
            other => {
                return Err(GatewayError::validation_field(
                    format!("Unknown operation type: {other}"),
                    "op",
                ))
            }
        };

        let field = self
            .schema
            .field(&request.field)
            .ok_or_else(|| {
                GatewayError::validation_field(
                    format!("Unknown field: {}", request.field),
                    "field",
                )
            })?;

        if field.kind != requested_kind {
            return Err(GatewayError::validation(format!(
                "Field {} is not a {}",
                request.field, request.op
            )));
        }

        debug!(
            correlation = %ctx.correlation,
            field = %request.field,
            "Executing operation"
        );
        (field.resolver)(ctx, request.args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Transport;
    use crate::domain::correlation::CorrelationId;
    use crate::domain::error::LogErrorTracker;
    use crate::schema::{FieldDefinition, SchemaBuilder};
    use relay_bus::EventBus;
    use serde_json::json;

    fn executor() -> Executor {
        let mut builder = SchemaBuilder::new();
        builder.register(FieldDefinition::query(
            "Ping",
            Arc::new(|_, args| Box::pin(async move { Ok(json!({ "echo": args })) })),
        ));
        builder.register(FieldDefinition::mutation(
            "Fail",
            Arc::new(|_, _| {
                Box::pin(async { Err(GatewayError::service_unavailable("chat", "down")) })
            }),
        ));
        let schema = Arc::new(builder.weave(&[]).unwrap());
        let classifier = Arc::new(ErrorClassifier::new(true, Arc::new(LogErrorTracker)));
        Executor::new(schema, classifier)
    }

    fn ctx() -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext {
            identity: None,
            client_addr: "127.0.0.1:1".parse().unwrap(),
            transport: Transport::Http,
            client_agent: None,
            bus: EventBus::new(),
            correlation: CorrelationId::new(),
        })
    }

    fn request(op: &str, field: &str) -> OperationRequest {
        OperationRequest {
            op: op.into(),
            field: field.into(),
            args: json!({ "k": 1 }),
        }
    }

    #[tokio::test]
    async fn test_query_resolves() {
        let response = executor().execute(ctx(), request("query", "Ping")).await;
        assert!(response.errors.is_empty());
        assert_eq!(response.data.unwrap()["echo"]["k"], 1);
    }

    #[tokio::test]
    async fn test_unknown_field() {
        let response = executor().execute(ctx(), request("query", "Nope")).await;
        assert!(response.data.is_none());
        assert_eq!(response.errors[0].code, "BAD_USER_INPUT");
    }

    #[tokio::test]
    async fn test_kind_mismatch() {
        let response = executor().execute(ctx(), request("mutation", "Ping")).await;
        assert_eq!(response.errors[0].code, "BAD_USER_INPUT");
    }

    #[tokio::test]
    async fn test_subscription_rejected_over_http() {
        let response = executor()
            .execute(ctx(), request("subscription", "conversationCreated"))
            .await;
        assert_eq!(response.errors[0].code, "BAD_USER_INPUT");
    }

    #[tokio::test]
    async fn test_resolver_failure_rendered_for_production() {
        let response = executor().execute(ctx(), request("mutation", "Fail")).await;
        let error = &response.errors[0];
        assert_eq!(error.code, "SERVICE_UNAVAILABLE");
        // Production classifier strips detail and genericizes system errors.
        assert_eq!(error.message, "Service temporarily unavailable");
        assert!(error.internal_detail.is_none());
    }
}
