//! Operator configuration
//!
//! Every setting is accepted as a flag or an environment variable. The parsed
//! [`Settings`] value is built once in `main` and handed to the components
//! that need it; nothing reads configuration from globals afterwards.

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use reqwest::Url;
use tracing::{info, warn};

use trivy_dojo_common::report::{validate_reports, ReportKind};
use trivy_dojo_common::retry::RetryPolicy;
use trivy_dojo_common::telemetry::TelemetryConfig;
use trivy_dojo_common::{
    Error, CONTROLLER_NAME, DEFAULT_PROBE_ADDR, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_RETRY_DELAY_SECS,
};

use crate::findings::DojoClientConfig;
use crate::submission::{JiraLink, SubmissionSettings, TemplatedField};

/// DefectDojo API key; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// The raw key, for the Authorization header only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl FromStr for ApiKey {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().to_string()))
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Forwards Trivy Operator reports to DefectDojo
#[derive(Parser, Debug, Clone)]
#[command(name = "trivy-dojo-operator", version, about, long_about = None)]
pub struct Settings {
    /// DefectDojo API v2 key
    #[arg(long, env = "DEFECT_DOJO_API_KEY", hide_env_values = true)]
    pub api_key: ApiKey,

    /// DefectDojo base URL
    #[arg(long, env = "DEFECT_DOJO_URL")]
    pub url: String,

    #[arg(long, env = "DEFECT_DOJO_ACTIVE", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub active: bool,

    #[arg(long, env = "DEFECT_DOJO_VERIFIED", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub verified: bool,

    #[arg(long, env = "DEFECT_DOJO_CLOSE_OLD_FINDINGS", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub close_old_findings: bool,

    #[arg(long, env = "DEFECT_DOJO_CLOSE_OLD_FINDINGS_PRODUCT_SCOPE", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub close_old_findings_product_scope: bool,

    #[arg(long, env = "DEFECT_DOJO_PUSH_TO_JIRA", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub push_to_jira: bool,

    #[arg(long, env = "DEFECT_DOJO_AUTO_CREATE_CONTEXT", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub auto_create_context: bool,

    #[arg(long, env = "DEFECT_DOJO_DEDUPLICATION_ON_ENGAGEMENT", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub deduplication_on_engagement: bool,

    #[arg(long, env = "DEFECT_DOJO_DO_NOT_REACTIVATE", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub do_not_reactivate: bool,

    /// Findings below this severity are ignored by DefectDojo
    #[arg(long, env = "DEFECT_DOJO_MINIMUM_SEVERITY", default_value = "Info")]
    pub minimum_severity: String,

    #[arg(long, env = "DEFECT_DOJO_PRODUCT_NAME", default_value = "product")]
    pub product_name: String,

    #[arg(long, env = "DEFECT_DOJO_EVAL_PRODUCT_NAME", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub eval_product_name: bool,

    #[arg(long, env = "DEFECT_DOJO_PRODUCT_TYPE_NAME", default_value = "")]
    pub product_type_name: String,

    #[arg(long, env = "DEFECT_DOJO_EVAL_PRODUCT_TYPE_NAME", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub eval_product_type_name: bool,

    #[arg(long, env = "DEFECT_DOJO_SERVICE_NAME", default_value = "")]
    pub service_name: String,

    #[arg(long, env = "DEFECT_DOJO_EVAL_SERVICE_NAME", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub eval_service_name: bool,

    #[arg(long, env = "DEFECT_DOJO_ENV_NAME", default_value = "Development")]
    pub env_name: String,

    #[arg(long, env = "DEFECT_DOJO_EVAL_ENV_NAME", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub eval_env_name: bool,

    #[arg(long, env = "DEFECT_DOJO_TEST_TITLE", default_value = "Kubernetes")]
    pub test_title: String,

    #[arg(long, env = "DEFECT_DOJO_EVAL_TEST_TITLE", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub eval_test_title: bool,

    #[arg(long, env = "DEFECT_DOJO_ENGAGEMENT_NAME")]
    pub engagement_name: Option<String>,

    #[arg(long, env = "DEFECT_DOJO_EVAL_ENGAGEMENT_NAME", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub eval_engagement_name: bool,

    /// Comma-separated product tags
    #[arg(long, env = "DEFECT_DOJO_TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    #[arg(long, env = "DEFECT_DOJO_EVAL_TAGS", action = ArgAction::Set,
          value_parser = BoolishValueParser::new(), default_value_t = false)]
    pub eval_tags: bool,

    /// Jira project key linked to each product; linking is off when unset
    #[arg(long, env = "DEFECT_DOJO_JIRA_KEY")]
    pub jira_key: Option<String>,

    /// DefectDojo id of the Jira instance
    #[arg(long, env = "DEFECT_DOJO_JIRA_INSTANCE_ID")]
    pub jira_instance_id: Option<u64>,

    /// Comma-separated report kinds to watch
    #[arg(long, env = "REPORTS", value_delimiter = ',', default_value = "vulnerabilityreports")]
    pub reports: Vec<String>,

    /// Only reports carrying this label are processed
    #[arg(long, env = "LABEL")]
    pub label: Option<String>,

    /// Required value of `LABEL`
    #[arg(long, env = "LABEL_VALUE")]
    pub label_value: Option<String>,

    /// Namespace to watch; all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[arg(long, env = "HTTP_PROXY")]
    pub http_proxy: Option<String>,

    #[arg(long, env = "HTTPS_PROXY")]
    pub https_proxy: Option<String>,

    /// Timeout for each DefectDojo request
    #[arg(long, env = "DEFECT_DOJO_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Delay before a failed submission is redelivered
    #[arg(long, env = "RETRY_DELAY_SECS", default_value_t = DEFAULT_RETRY_DELAY_SECS)]
    pub retry_delay_secs: u64,

    /// Give up on a report after this many failed attempts
    #[arg(long, env = "RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: Option<u32>,

    /// Address for /healthz and /metrics
    #[arg(long, env = "PROBE_ADDR", default_value = DEFAULT_PROBE_ADDR)]
    pub probe_addr: SocketAddr,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// OTLP gRPC endpoint for span export; spans are not exported when unset
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Settings {
    /// Base URL with trailing slashes removed, validated as absolute http(s)
    pub fn dojo_url(&self) -> Result<String, Error> {
        let trimmed = self.url.trim().trim_end_matches('/');
        let parsed = Url::parse(trimmed)
            .map_err(|e| Error::config_for("DEFECT_DOJO_URL", format!("'{}': {}", trimmed, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(Error::config_for(
                "DEFECT_DOJO_URL",
                format!("'{}' is not an http(s) URL", trimmed),
            ));
        }
        Ok(trimmed.to_string())
    }

    /// Validated report kinds
    pub fn report_kinds(&self) -> Result<Vec<ReportKind>, Error> {
        let names: Vec<&str> = self
            .reports
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .collect();
        validate_reports(&names)
    }

    /// Kubernetes label selector built from `LABEL` and `LABEL_VALUE`
    pub fn label_selector(&self) -> Option<String> {
        let label = non_empty(self.label.as_deref())?;
        match non_empty(self.label_value.as_deref()) {
            Some(value) => Some(format!("{}={}", label, value)),
            None => Some(label),
        }
    }

    /// Proxy for plain HTTP, falling back to lower-case `http_proxy`
    pub fn resolved_http_proxy(&self) -> Option<String> {
        non_empty(self.http_proxy.as_deref())
            .or_else(|| non_empty(std::env::var("http_proxy").ok().as_deref()))
    }

    /// Proxy for HTTPS, falling back to lower-case `https_proxy`
    pub fn resolved_https_proxy(&self) -> Option<String> {
        non_empty(self.https_proxy.as_deref())
            .or_else(|| non_empty(std::env::var("https_proxy").ok().as_deref()))
    }

    /// Jira link; a key without an instance id is rejected
    pub fn jira_link(&self) -> Result<Option<JiraLink>, Error> {
        let Some(project_key) = non_empty(self.jira_key.as_deref()) else {
            if self.jira_instance_id.is_some() {
                warn!("DEFECT_DOJO_JIRA_INSTANCE_ID is set without DEFECT_DOJO_JIRA_KEY; Jira linking is disabled");
            }
            return Ok(None);
        };
        let instance_id = self.jira_instance_id.ok_or_else(|| {
            Error::config_for(
                "DEFECT_DOJO_JIRA_INSTANCE_ID",
                "required when DEFECT_DOJO_JIRA_KEY is set",
            )
        })?;
        Ok(Some(JiraLink {
            project_key,
            instance_id,
        }))
    }

    /// Logging and tracing settings
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: CONTROLLER_NAME.to_string(),
            otlp_endpoint: non_empty(self.otlp_endpoint.as_deref()),
            log_level: self.log_level.clone(),
        }
    }

    /// Redelivery policy
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::fixed(Duration::from_secs(self.retry_delay_secs));
        match self.retry_max_attempts {
            Some(max) => policy.with_max_attempts(max),
            None => policy,
        }
    }

    /// HTTP client settings
    pub fn client_config(&self) -> Result<DojoClientConfig, Error> {
        if self.api_key.expose().is_empty() {
            return Err(Error::config_for("DEFECT_DOJO_API_KEY", "must not be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::config_for(
                "DEFECT_DOJO_REQUEST_TIMEOUT_SECS",
                "must be greater than zero",
            ));
        }
        Ok(DojoClientConfig {
            base_url: self.dojo_url()?,
            api_key: self.api_key.expose().to_string(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            http_proxy: self.resolved_http_proxy(),
            https_proxy: self.resolved_https_proxy(),
        })
    }

    /// Static submission settings
    pub fn submission_settings(&self) -> Result<SubmissionSettings, Error> {
        let field = |value: &str, evaluate: bool| TemplatedField {
            value: value.to_string(),
            evaluate,
        };
        Ok(SubmissionSettings {
            active: self.active,
            verified: self.verified,
            close_old_findings: self.close_old_findings,
            close_old_findings_product_scope: self.close_old_findings_product_scope,
            push_to_jira: self.push_to_jira,
            auto_create_context: self.auto_create_context,
            deduplication_on_engagement: self.deduplication_on_engagement,
            do_not_reactivate: self.do_not_reactivate,
            minimum_severity: self.minimum_severity.clone(),
            product_name: field(&self.product_name, self.eval_product_name),
            product_type_name: field(&self.product_type_name, self.eval_product_type_name),
            service: field(&self.service_name, self.eval_service_name),
            environment: field(&self.env_name, self.eval_env_name),
            test_title: field(&self.test_title, self.eval_test_title),
            engagement_name: field(
                self.engagement_name.as_deref().unwrap_or_default(),
                self.eval_engagement_name,
            ),
            tags: self.tags.clone(),
            evaluate_tags: self.eval_tags,
            jira: self.jira_link()?,
        })
    }

    /// Log the effective configuration. The API key is never logged.
    pub fn log_config(&self) {
        match (
            non_empty(self.label.as_deref()),
            non_empty(self.label_value.as_deref()),
        ) {
            (Some(label), Some(value)) => {
                info!(label = %label, value = %value, "Filtering resources with label")
            }
            (Some(label), None) => info!(label = %label, "Filtering resources with label"),
            (None, Some(_)) => warn!("LABEL_VALUE is set without LABEL; processing all resources"),
            (None, None) => info!("Processing all resources"),
        }

        info!(
            url = %self.url.trim().trim_end_matches('/'),
            reports = ?self.reports,
            namespace = self.watch_namespace.as_deref().unwrap_or("<all>"),
            jira_key = self.jira_key.as_deref().unwrap_or("<disabled>"),
            http_proxy = self.resolved_http_proxy().is_some(),
            https_proxy = self.resolved_https_proxy().is_some(),
            retry_delay_secs = self.retry_delay_secs,
            retry_max_attempts = ?self.retry_max_attempts,
            "DefectDojo configuration"
        );
    }
}
