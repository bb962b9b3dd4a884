//! Account operations, forwarded to the account service.

use super::forward;
use crate::domain::error::{classify_downstream, GatewayError};
use crate::ports::BackendPort;
use crate::schema::{DirectiveBinding, FieldDefinition, Resolver, SchemaBuilder};
use serde_json::Value;
use std::sync::Arc;

const SERVICE: &str = "account";

pub fn register(builder: &mut SchemaBuilder, backend: Arc<dyn BackendPort>) {
    builder.register(
        FieldDefinition::query("AccountGetAll", forward(backend.clone(), SERVICE, "GetAll"))
            .bind(DirectiveBinding::with_argument("auth", "admin")),
    );
    builder.register(
        FieldDefinition::query(
            "AccountGetById",
            forward(backend.clone(), SERVICE, "GetById"),
        )
        .bind(DirectiveBinding::new("auth")),
    );

    // The anonymous entry points carry rate limiting instead of auth.
    // Token refresh stays anonymous too: the caller's access token is
    // usually expired by the time it is exchanged.
    builder.register(
        FieldDefinition::mutation("AccountCreate", forward(backend.clone(), SERVICE, "Create"))
            .bind(DirectiveBinding::new("rateLimit")),
    );
    builder.register(
        FieldDefinition::mutation("AccountLogin", forward(backend.clone(), SERVICE, "Login"))
            .bind(DirectiveBinding::new("rateLimit")),
    );
    builder.register(
        FieldDefinition::mutation("AccountTokenGenerate", token_generate(backend.clone()))
            .bind(DirectiveBinding::new("rateLimit")),
    );
    builder.register(
        FieldDefinition::mutation("AccountDelete", forward(backend, SERVICE, "Delete"))
            .bind(DirectiveBinding::new("auth")),
    );
}

/// Exchange a refresh token for a fresh access token.
fn token_generate(backend: Arc<dyn BackendPort>) -> Resolver {
    Arc::new(move |ctx, args| {
        let backend = backend.clone();
        Box::pin(async move {
            let refresh = args.get("refreshToken").and_then(Value::as_str);
            if refresh.map_or(true, str::is_empty) {
                return Err(GatewayError::validation_field(
                    "Valid refresh token is required",
                    "refreshToken",
                ));
            }
            backend
                .call(SERVICE, "TokenGenerate", args, ctx.caller_meta())
                .await
                .map_err(|e| classify_downstream(SERVICE, &e))
        })
    })
}
