//! Chat operations and the two chat subscriptions.

use super::forward;
use crate::broker::{CONVERSATION_CREATED, MESSAGE_SENT};
use crate::domain::config::{LimitsConfig, SessionConfig as SessionSettings};
use crate::domain::error::{classify_downstream, GatewayError};
use crate::ports::BackendPort;
use crate::schema::{DirectiveBinding, FieldDefinition, SchemaBuilder, SubscribeFn};
use relay_bus::{EventScope, SessionConfig, SubscriptionSession};
use serde_json::Value;
use std::sync::Arc;

const SERVICE: &str = "chat";

pub fn register(
    builder: &mut SchemaBuilder,
    backend: Arc<dyn BackendPort>,
    limits: &LimitsConfig,
    session: &SessionSettings,
) {
    builder.register(
        FieldDefinition::query(
            "ChatConversationGetAll",
            forward(backend.clone(), SERVICE, "ConversationGetAll"),
        )
        .bind(DirectiveBinding::new("auth")),
    );
    builder.register(
        FieldDefinition::query(
            "ChatGetMessages",
            forward(backend.clone(), SERVICE, "GetMessages"),
        )
        .bind(DirectiveBinding::new("auth")),
    );

    builder.register(
        FieldDefinition::mutation(
            "ChatStartConversation",
            forward(backend.clone(), SERVICE, "StartConversation"),
        )
        .bind(DirectiveBinding::new("auth")),
    );
    builder.register(
        FieldDefinition::mutation("ChatSendMessage", send_message(backend.clone(), limits))
            .bind(DirectiveBinding::new("auth")),
    );
    builder.register(
        FieldDefinition::mutation(
            "ChatDeleteConversation",
            forward(backend, SERVICE, "DeleteConversation"),
        )
        .bind(DirectiveBinding::new("auth")),
    );

    let config = session_config(session);
    builder.register(FieldDefinition::subscription(
        "conversationCreated",
        conversation_created(config.clone()),
    ));
    builder.register(FieldDefinition::subscription(
        "messageSent",
        message_sent(config),
    ));
}

fn session_config(settings: &SessionSettings) -> SessionConfig {
    match settings.buffer_capacity {
        Some(capacity) => SessionConfig::bounded(capacity),
        None => SessionConfig::unbounded(),
    }
}

/// Send is validated at the gateway edge before anything is forwarded.
fn send_message(
    backend: Arc<dyn BackendPort>,
    limits: &LimitsConfig,
) -> crate::schema::Resolver {
    let max_len = limits.max_message_length;
    Arc::new(move |ctx, args| {
        let backend = backend.clone();
        Box::pin(async move {
            let conversation = args.get("conversationId").and_then(Value::as_str);
            if conversation.map_or(true, str::is_empty) {
                return Err(GatewayError::validation_field(
                    "conversationId is required",
                    "conversationId",
                ));
            }
            let message = args.get("message").and_then(Value::as_str).unwrap_or("");
            if message.trim().is_empty() {
                return Err(GatewayError::validation_field(
                    "Message content is required",
                    "message",
                ));
            }
            if message.chars().count() > max_len {
                return Err(GatewayError::validation_field(
                    format!("Message exceeds {max_len} characters"),
                    "message",
                ));
            }
            backend
                .call(SERVICE, "SendMessage", args, ctx.caller_meta())
                .await
                .map_err(|e| classify_downstream(SERVICE, &e))
        })
    })
}

/// Fires for every conversation created for the caller.
fn conversation_created(config: SessionConfig) -> SubscribeFn {
    Arc::new(move |ctx, _args| {
        let identity = ctx.identity.as_ref().ok_or_else(GatewayError::unauthenticated)?;
        Ok(SubscriptionSession::open(
            &ctx.bus,
            CONVERSATION_CREATED,
            identity.id.clone(),
            None,
            config.clone(),
        ))
    })
}

/// Fires for the caller's messages in one specific conversation.
fn message_sent(config: SessionConfig) -> SubscribeFn {
    Arc::new(move |ctx, args| {
        let identity = ctx.identity.as_ref().ok_or_else(GatewayError::unauthenticated)?;
        let conversation = args
            .get("conversationId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                GatewayError::validation_field("conversationId is required", "conversationId")
            })?;
        Ok(SubscriptionSession::open(
            &ctx.bus,
            MESSAGE_SENT,
            identity.id.clone(),
            Some(EventScope::new("conversationId", conversation)),
            config.clone(),
        ))
    })
}
