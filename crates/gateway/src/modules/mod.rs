//! Feature modules: the operation surface, one module per downstream
//! service. Resolvers are pass-through; cross-cutting behavior arrives
//! via directive bindings at weave time.

pub mod account;
pub mod chat;

use crate::domain::error::classify_downstream;
use crate::ports::BackendPort;
use crate::schema::Resolver;
use std::sync::Arc;

/// Pass-through resolver: forward args to a downstream operation,
/// re-attaching the caller's credential and reconstruction headers.
fn forward(
    backend: Arc<dyn BackendPort>,
    service: &'static str,
    operation: &'static str,
) -> Resolver {
    Arc::new(move |ctx, args| {
        let backend = backend.clone();
        Box::pin(async move {
            backend
                .call(service, operation, args, ctx.caller_meta())
                .await
                .map_err(|e| classify_downstream(service, &e))
        })
    })
}
