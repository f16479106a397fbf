//! Sandboxed expression evaluation for templated submission fields
//!
//! Configured field values (product name, service, tags, ...) can be computed
//! from the resource being submitted. Expressions are minijinja expressions
//! evaluated in an empty environment: no globals, no functions, and only the
//! filters and tests registered here. The context exposes exactly two names:
//!
//! - `meta` - the resource metadata (`meta.name`, `meta['labels']['app']`)
//! - `body` - the full resource document (`body.report.artifact.repository`)
//!
//! Supported constructs are attribute and subscript access, string
//! concatenation with `~`, inline conditionals (`a if cond else b`) and
//! comparisons. Filters: `default`, `required`, `lower`, `upper`, `trim`,
//! `replace`. Tests: `defined`, `none`.

mod context;
mod engine;
mod error;
mod filters;

pub use context::EvalContext;
pub use engine::ExpressionEngine;
pub use error::TemplateError;
