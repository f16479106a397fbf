//! Expression error types

use std::fmt;

/// Errors that can occur while evaluating a field expression
#[derive(Debug)]
pub enum TemplateError {
    /// Evaluation failed inside minijinja (syntax, undefined name, fuel)
    Eval(minijinja::Error),
    /// Expression evaluated to an undefined value
    Undefined(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eval(e) => write!(f, "expression error: {}", e),
            Self::Undefined(expr) => write!(f, "expression '{}' is undefined", expr),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Eval(e) => Some(e),
            _ => None,
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        Self::Eval(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_error_names_the_expression() {
        let err = TemplateError::Undefined("meta.missing".to_string());
        assert!(err.to_string().contains("meta.missing"));
        assert!(err.to_string().contains("undefined"));
    }
}
