//! Logging and tracing initialization
//!
//! Logs are JSON lines on stdout. When an OTLP endpoint is configured, spans
//! are also exported over gRPC with W3C TraceContext propagation.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize OpenTelemetry tracer
    #[error("failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for traces (e.g., "trivy-dojo-operator")
    pub service_name: String,

    /// OTLP endpoint for span export (e.g., "http://otel-collector:4317")
    pub otlp_endpoint: Option<String>,

    /// Base log level (`LOG_LEVEL`), ignored when `RUST_LOG` is set
    pub log_level: String,
}

impl TelemetryConfig {
    /// Filter directives used when `RUST_LOG` is not set
    pub fn default_directives(&self) -> String {
        format!(
            "{},kube=info,tower=warn,hyper=warn,reqwest=warn",
            normalize_level(&self.log_level)
        )
    }
}

/// Accept syslog-style level names (`WARNING`, `CRITICAL`) as tracing levels
fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        "off" => "off",
        _ => "info",
    }
}

/// Initialize the global tracing subscriber
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let otel_layer = if let Some(endpoint) = &config.otlp_endpoint {
        let provider = init_otlp_tracer(endpoint, build_resource(&config.service_name))?;
        let tracer = provider.tracer(config.service_name.clone());
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    Ok(())
}

fn build_resource(service_name: &str) -> Resource {
    let mut attributes = vec![KeyValue::new(
        opentelemetry_semantic_conventions::resource::SERVICE_NAME,
        service_name.to_string(),
    )];

    // Set via the downward API in the Deployment
    if let Ok(pod_name) = std::env::var("POD_NAME") {
        attributes.push(KeyValue::new("k8s.pod.name", pod_name));
    }
    if let Ok(namespace) = std::env::var("POD_NAMESPACE") {
        attributes.push(KeyValue::new("k8s.namespace.name", namespace));
    }
    if let Ok(node_name) = std::env::var("NODE_NAME") {
        attributes.push(KeyValue::new("k8s.node.name", node_name));
    }

    attributes.push(KeyValue::new(
        opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
        env!("CARGO_PKG_VERSION"),
    ));

    Resource::new(attributes)
}

fn init_otlp_tracer(endpoint: &str, resource: Resource) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syslog_level_names_are_accepted() {
        assert_eq!(normalize_level("INFO"), "info");
        assert_eq!(normalize_level("WARNING"), "warn");
        assert_eq!(normalize_level("CRITICAL"), "error");
        assert_eq!(normalize_level("debug"), "debug");
        assert_eq!(normalize_level("nonsense"), "info");
    }

    #[test]
    fn default_directives_quiet_noisy_crates() {
        let config = TelemetryConfig {
            service_name: "test-service".to_string(),
            otlp_endpoint: None,
            log_level: "DEBUG".to_string(),
        };
        let directives = config.default_directives();
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("hyper=warn"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn telemetry_error_display() {
        let err = TelemetryError::TracerInit("connection failed".to_string());
        assert!(err.to_string().contains("failed to initialize tracer"));
    }
}
