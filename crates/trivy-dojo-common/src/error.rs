//! Error types for trivy-dojo
//!
//! Errors carry the context needed to debug a failed submission from logs
//! alone: the DefectDojo endpoint, the HTTP status and a bounded slice of the
//! response body.

use thiserror::Error;

/// Maximum number of response body bytes kept on an HTTP error
pub const MAX_ERROR_BODY_BYTES: usize = 4096;

/// Main error type for trivy-dojo operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid or missing configuration; fatal at startup
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
        /// The setting at fault (e.g., "REPORTS")
        field: Option<String>,
    },

    /// Expression evaluation failed for a templated field
    #[error("template error in '{expression}': {message}")]
    Template {
        /// The expression that failed
        expression: String,
        /// Description of what failed
        message: String,
    },

    /// DefectDojo API call failed (transport failure or non-2xx status)
    #[error("{}", format_http(.endpoint, .status, .message))]
    Http {
        /// Endpoint path that was called (e.g., "/api/v2/reimport-scan/")
        endpoint: String,
        /// HTTP status code, absent for transport failures
        status: Option<u16>,
        /// Description of what failed
        message: String,
        /// Response body, truncated to [`MAX_ERROR_BODY_BYTES`]
        body: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// What was being (de)serialized, if known
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "orchestrator", "event-source")
        context: String,
    },
}

fn format_http(endpoint: &str, status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("http error calling {endpoint}: status {code}: {message}"),
        None => format!("http error calling {endpoint}: {message}"),
    }
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending setting
    pub fn config_for(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a template error for an expression
    pub fn template(expression: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Template {
            expression: expression.into(),
            message: msg.into(),
        }
    }

    /// Create an HTTP transport error (no response was received)
    pub fn http(endpoint: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Http {
            endpoint: endpoint.into(),
            status: None,
            message: msg.into(),
            body: None,
        }
    }

    /// Create an HTTP error for a non-2xx response
    ///
    /// The body is truncated to [`MAX_ERROR_BODY_BYTES`] on a char boundary.
    pub fn http_status(endpoint: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let body = truncate_body(body.into());
        Self::Http {
            endpoint: endpoint.into(),
            status: Some(status),
            message: "unexpected response status".to_string(),
            body: (!body.is_empty()).then_some(body),
        }
    }

    /// Create a serialization error with context on what was being decoded
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status code, if this error came from a DefectDojo response
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => *status,
            _ => None,
        }
    }

    /// Response body detail, if this error came from a DefectDojo response
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Error::Http { body, .. } => body.as_deref(),
            _ => None,
        }
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut end = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
