//! Operation surface: field definitions, directive bindings and the
//! weaving step that folds guard behavior into resolvers.
//!
//! The schema is declared with plain resolvers plus declarative bindings
//! (`auth`, `rateLimit`). Before the schema is served, [`weave`] rewrites
//! each bound field so its resolver carries the guard behavior inline;
//! at execution time there is no separate guard pass.

pub mod field;
pub mod guards;
pub mod weaver;

pub use field::{
    DirectiveBinding, FieldDefinition, OperationKind, Resolver, SubscribeFn,
};
pub use guards::{AuthWeaver, RateLimitWeaver};
pub use weaver::{weave, DirectiveWeaver, WeaveError};

use std::collections::HashMap;

/// The woven operation surface, ready for execution.
pub struct Schema {
    fields: HashMap<String, FieldDefinition>,
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Collects field definitions from the feature modules, then weaves.
#[derive(Default)]
pub struct SchemaBuilder {
    fields: Vec<FieldDefinition>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, field: FieldDefinition) -> &mut Self {
        self.fields.push(field);
        self
    }

    /// Apply the given weavers, in order, to every bound field. Each
    /// binding is consumed by exactly one weaver; a binding no weaver
    /// claims is a wiring bug and fails the build.
    pub fn weave(self, weavers: &[&dyn DirectiveWeaver]) -> Result<Schema, WeaveError> {
        let mut fields = HashMap::with_capacity(self.fields.len());
        for field in self.fields {
            let name = field.name.clone();
            let woven = weaver::weave(field, weavers)?;
            if fields.insert(name.clone(), woven).is_some() {
                return Err(WeaveError::DuplicateField(name));
            }
        }
        Ok(Schema { fields })
    }
}
