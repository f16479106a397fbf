//! Kubernetes operator forwarding Trivy Operator reports to DefectDojo

/// DefectDojo API client
pub mod findings;
/// Health and metrics endpoints
pub mod server;
/// Flag and environment configuration
pub mod settings;
/// Report watching and redelivery
pub mod source;
/// Per-report submission pipeline
pub mod submission;
