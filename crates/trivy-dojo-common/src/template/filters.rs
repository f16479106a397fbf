//! Filters and tests registered in the expression environment
//!
//! The environment starts empty, so these are the only callables an
//! expression can reach.

use minijinja::{Error, ErrorKind, Value};

/// Default filter - returns fallback if value is undefined or none
///
/// Usage: `meta.labels.team | default("platform")`
pub fn default_filter(value: Value, fallback: Value) -> Value {
    if value.is_undefined() || value.is_none() {
        fallback
    } else {
        value
    }
}

/// Required filter - fails if value is undefined or none
///
/// Usage: `meta.labels.team | required`
pub fn required(value: Value) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() {
        Err(Error::new(
            ErrorKind::UndefinedError,
            "required value is undefined",
        ))
    } else {
        Ok(value)
    }
}

/// Upper case filter
pub fn upper(value: &str) -> String {
    value.to_uppercase()
}

/// Lower case filter
pub fn lower(value: &str) -> String {
    value.to_lowercase()
}

/// Strip leading and trailing whitespace
pub fn trim(value: &str) -> String {
    value.trim().to_string()
}

/// Replace every occurrence of `from` with `to`
///
/// Usage: `meta.name | replace("-", "_")`
pub fn replace(value: &str, from: &str, to: &str) -> String {
    value.replace(from, to)
}

/// `is defined` test
pub fn is_defined(value: Value) -> bool {
    !value.is_undefined()
}

/// `is none` test
pub fn is_none(value: Value) -> bool {
    value.is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keeps_present_value() {
        let result = default_filter(Value::from("hello"), Value::from("world"));
        assert_eq!(result.to_string(), "hello");
    }

    #[test]
    fn default_replaces_undefined_and_none() {
        let fallback = Value::from("fallback");
        assert_eq!(
            default_filter(Value::UNDEFINED, fallback.clone()).to_string(),
            "fallback"
        );
        assert_eq!(
            default_filter(Value::from(()), fallback).to_string(),
            "fallback"
        );
    }

    #[test]
    fn default_keeps_empty_string() {
        let result = default_filter(Value::from(""), Value::from("fallback"));
        assert_eq!(result.to_string(), "");
    }

    #[test]
    fn required_rejects_missing_values() {
        assert!(required(Value::from("present")).is_ok());
        assert!(required(Value::UNDEFINED).is_err());
        assert!(required(Value::from(())).is_err());
    }

    #[test]
    fn string_filters() {
        assert_eq!(upper("café"), "CAFÉ");
        assert_eq!(lower("Hello World"), "hello world");
        assert_eq!(trim("  padded \n"), "padded");
        assert_eq!(replace("my-app-v1", "-", "_"), "my_app_v1");
    }

    #[test]
    fn definedness_tests() {
        assert!(is_defined(Value::from("x")));
        assert!(is_defined(Value::from(())));
        assert!(!is_defined(Value::UNDEFINED));
        assert!(is_none(Value::from(())));
        assert!(!is_none(Value::from("x")));
    }
}
