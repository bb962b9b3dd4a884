//! The weaving step: folding directive bindings into resolvers.
//!
//! Weavers are applied in list order and each wrap puts that weaver
//! outside everything woven before it, so the LAST weaver in the list
//! guards first at execution time. A binding is removed from the field
//! the moment a weaver claims it, which is what makes each guard apply
//! exactly once no matter how the field is later cloned or re-read.

use super::field::FieldDefinition;
use super::DirectiveBinding;
use crate::schema::Resolver;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WeaveError {
    /// A binding named a weaver that is not installed.
    #[error("field {field}: no weaver claims directive `{directive}`")]
    UnclaimedBinding { field: String, directive: String },

    /// Two fields registered under the same name.
    #[error("duplicate field definition: {0}")]
    DuplicateField(String),
}

/// One guard family, e.g. auth or rate limiting.
pub trait DirectiveWeaver: Send + Sync {
    /// The binding name this weaver claims.
    fn name(&self) -> &str;

    /// Wrap `inner` with this guard's behavior for the given binding.
    fn wrap(&self, field: &str, binding: &DirectiveBinding, inner: Resolver) -> Resolver;
}

/// Apply each weaver to the field's matching bindings, consuming them.
pub fn weave(
    mut field: FieldDefinition,
    weavers: &[&dyn DirectiveWeaver],
) -> Result<FieldDefinition, WeaveError> {
    for weaver in weavers {
        // Claim every binding addressed to this weaver, preserving the
        // relative order bindings were declared in.
        let mut claimed = Vec::new();
        field.bindings.retain(|binding| {
            if binding.name == weaver.name() {
                claimed.push(binding.clone());
                false
            } else {
                true
            }
        });

        for binding in claimed {
            debug!(field = %field.name, directive = %binding.name, "Weaving directive");
            field.resolver = weaver.wrap(&field.name, &binding, field.resolver);
        }
    }

    if let Some(leftover) = field.bindings.first() {
        return Err(WeaveError::UnclaimedBinding {
            field: field.name,
            directive: leftover.name.clone(),
        });
    }

    Ok(field)
}
