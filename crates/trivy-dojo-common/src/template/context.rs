//! Evaluation context exposed to field expressions

use minijinja::{context, Value};

/// Read-only view of a resource event for expression evaluation
///
/// Only `meta` and `body` are visible to expressions; nothing else from the
/// process leaks into the context.
#[derive(Clone, Debug, Default)]
pub struct EvalContext {
    meta: serde_json::Value,
    body: serde_json::Value,
}

impl EvalContext {
    /// Create a context from resource metadata and the full resource body
    pub fn new(meta: serde_json::Value, body: serde_json::Value) -> Self {
        Self { meta, body }
    }

    /// Convert to a minijinja Value for evaluation
    pub fn to_value(&self) -> Value {
        context! {
            meta => Value::from_serialize(&self.meta),
            body => Value::from_serialize(&self.body),
        }
    }
}
