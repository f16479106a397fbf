//! Common types for trivy-dojo: errors, report kinds, expression evaluation,
//! retry policy and observability plumbing shared by the operator crate.

#![deny(missing_docs)]

pub mod error;
pub mod events;
pub mod metrics;
pub mod report;
pub mod retry;
pub mod telemetry;
pub mod template;

pub use error::Error;

/// API group of the Trivy Operator report CRDs
pub const TRIVY_API_GROUP: &str = "aquasecurity.github.io";

/// API version of the Trivy Operator report CRDs
pub const TRIVY_API_VERSION: &str = "v1alpha1";

/// Annotation written on a report once it has been submitted to DefectDojo.
///
/// Value is the RFC 3339 timestamp of the successful submission.
pub const SUBMITTED_ANNOTATION: &str = "trivy-dojo.io/submitted-at";

/// Scan type identifier DefectDojo uses to pick its Trivy Operator parser
pub const SCAN_TYPE: &str = "Trivy Operator Scan";

/// Default address for the health and metrics server
pub const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:9090";

/// Default delay before a failed submission is redelivered
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

/// Default timeout for each outbound DefectDojo request
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Controller name reported on Kubernetes Events
pub const CONTROLLER_NAME: &str = "trivy-dojo-operator";
