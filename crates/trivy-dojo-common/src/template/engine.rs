//! Expression engine for templated submission fields

use minijinja::{Environment, UndefinedBehavior};

use super::context::EvalContext;
use super::error::TemplateError;
use super::filters;

/// Upper bound on instructions executed per expression
const EXPRESSION_FUEL: u64 = 10_000;

/// Evaluates field expressions against a resource event
///
/// The underlying environment is empty: no globals, no functions and none of
/// minijinja's builtin filters. Undefined names are strict, and every
/// evaluation runs with a fuel limit.
pub struct ExpressionEngine {
    env: Environment<'static>,
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEngine {
    /// Create a new engine with the sandboxed filter set
    pub fn new() -> Self {
        let mut env = Environment::empty();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_fuel(Some(EXPRESSION_FUEL));

        env.add_filter("default", filters::default_filter);
        env.add_filter("required", filters::required);
        env.add_filter("upper", filters::upper);
        env.add_filter("lower", filters::lower);
        env.add_filter("trim", filters::trim);
        env.add_filter("replace", filters::replace);

        env.add_test("defined", filters::is_defined);
        env.add_test("none", filters::is_none);

        Self { env }
    }

    /// Evaluate an expression to a string
    ///
    /// A `none` result evaluates to the empty string.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` if:
    /// - Expression syntax is invalid
    /// - An attribute is looked up on an undefined value
    /// - The expression itself evaluates to undefined
    /// - A filter fails or the fuel limit is exhausted
    pub fn evaluate(&self, expression: &str, ctx: &EvalContext) -> Result<String, TemplateError> {
        let compiled = self.env.compile_expression(expression)?;
        let value = compiled.eval(ctx.to_value())?;

        if value.is_undefined() {
            return Err(TemplateError::Undefined(expression.to_string()));
        }
        if value.is_none() {
            return Ok(String::new());
        }
        Ok(value.to_string())
    }
}
