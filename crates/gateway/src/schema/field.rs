//! Field definitions and directive bindings.

use crate::context::ExecutionContext;
use crate::domain::error::GatewayError;
use futures::future::BoxFuture;
use relay_bus::SubscriptionSession;
use serde_json::Value;
use std::sync::Arc;

/// Boxed async resolver. Guards wrap this at weave time, so the executor
/// only ever sees one callable per field.
pub type Resolver =
    Arc<dyn Fn(Arc<ExecutionContext>, Value) -> BoxFuture<'static, Result<Value, GatewayError>> + Send + Sync>;

/// Opens a subscription session for one subscriber. Synchronous: session
/// registration on the bus does not await.
pub type SubscribeFn =
    Arc<dyn Fn(Arc<ExecutionContext>, Value) -> Result<SubscriptionSession, GatewayError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// One declarative guard attachment on a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveBinding {
    /// Weaver name, e.g. `auth` or `rateLimit`.
    pub name: String,
    /// Optional argument, e.g. the required role for `auth`.
    pub argument: Option<String>,
}

impl DirectiveBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            argument: None,
        }
    }

    pub fn with_argument(name: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            argument: Some(argument.into()),
        }
    }
}

/// One field of the operation surface.
pub struct FieldDefinition {
    pub name: String,
    pub kind: OperationKind,
    pub resolver: Resolver,
    /// Present only for subscription fields.
    pub subscribe: Option<SubscribeFn>,
    /// Unconsumed bindings. Weaving drains this; a served schema has none.
    pub bindings: Vec<DirectiveBinding>,
}

impl std::fmt::Debug for FieldDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl FieldDefinition {
    pub fn query(name: impl Into<String>, resolver: Resolver) -> Self {
        Self::plain(name, OperationKind::Query, resolver)
    }

    pub fn mutation(name: impl Into<String>, resolver: Resolver) -> Self {
        Self::plain(name, OperationKind::Mutation, resolver)
    }

    pub fn subscription(name: impl Into<String>, subscribe: SubscribeFn) -> Self {
        // Subscription fields resolve events pass-through; the interesting
        // half is `subscribe`.
        let resolver: Resolver = Arc::new(|_, payload| Box::pin(async move { Ok(payload) }));
        Self {
            name: name.into(),
            kind: OperationKind::Subscription,
            resolver,
            subscribe: Some(subscribe),
            bindings: Vec::new(),
        }
    }

    fn plain(name: impl Into<String>, kind: OperationKind, resolver: Resolver) -> Self {
        Self {
            name: name.into(),
            kind,
            resolver,
            subscribe: None,
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, binding: DirectiveBinding) -> Self {
        self.bindings.push(binding);
        self
    }
}
