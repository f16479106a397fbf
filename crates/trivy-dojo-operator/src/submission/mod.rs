//! Submission of a report to DefectDojo
//!
//! A [`SubmissionRequest`] is built fresh for every attempt from the resource
//! event and the static [`SubmissionSettings`]; the [`orchestrator`] then
//! drives the three dependent API calls.

pub mod orchestrator;

use std::collections::BTreeMap;

use tracing::warn;

use trivy_dojo_common::template::{EvalContext, ExpressionEngine};
use trivy_dojo_common::{Error, SCAN_TYPE};

use crate::source::ResourceEvent;

pub use orchestrator::{Orchestrator, RetryableFailure, SubmissionOutcome};

/// A metadata value that is either sent literally or evaluated per event
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplatedField {
    /// Literal value, or the expression when `evaluate` is set
    pub value: String,
    /// Evaluate `value` against the event before sending
    pub evaluate: bool,
}

impl TemplatedField {
    /// A field sent as-is
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            evaluate: false,
        }
    }

    /// A field computed from the event
    pub fn expression(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            evaluate: true,
        }
    }
}

/// Jira project link created for each product
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JiraLink {
    /// Jira project key
    pub project_key: String,
    /// DefectDojo id of the Jira instance
    pub instance_id: u64,
}

/// Static submission configuration, built once at startup
#[derive(Clone, Debug)]
pub struct SubmissionSettings {
    /// Mark imported findings active
    pub active: bool,
    /// Mark imported findings verified
    pub verified: bool,
    /// Close findings missing from this scan
    pub close_old_findings: bool,
    /// Close old findings across the whole product
    pub close_old_findings_product_scope: bool,
    /// Push findings to the linked Jira project
    pub push_to_jira: bool,
    /// Create product, product type and engagement when missing
    pub auto_create_context: bool,
    /// Deduplicate within the engagement only
    pub deduplication_on_engagement: bool,
    /// Keep mitigated findings closed when they reappear
    pub do_not_reactivate: bool,
    /// Lowest severity DefectDojo imports
    pub minimum_severity: String,
    /// Product the scan is imported into
    pub product_name: TemplatedField,
    /// Product type, used when the product is auto-created
    pub product_type_name: TemplatedField,
    /// Service name recorded on the test
    pub service: TemplatedField,
    /// Engagement environment
    pub environment: TemplatedField,
    /// Test title
    pub test_title: TemplatedField,
    /// Engagement name; DefectDojo picks one when empty
    pub engagement_name: TemplatedField,
    /// Product tags, or tag expressions when `evaluate_tags` is set
    pub tags: Vec<String>,
    /// Evaluate each entry of `tags` against the event
    pub evaluate_tags: bool,
    /// Jira linking runs only when configured
    pub jira: Option<JiraLink>,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            active: false,
            verified: false,
            close_old_findings: false,
            close_old_findings_product_scope: false,
            push_to_jira: false,
            auto_create_context: false,
            deduplication_on_engagement: false,
            do_not_reactivate: false,
            minimum_severity: "Info".to_string(),
            product_name: TemplatedField::literal("product"),
            product_type_name: TemplatedField::default(),
            service: TemplatedField::default(),
            environment: TemplatedField::literal("Development"),
            test_title: TemplatedField::literal("Kubernetes"),
            engagement_name: TemplatedField::default(),
            tags: Vec::new(),
            evaluate_tags: false,
            jira: None,
        }
    }
}

/// Everything sent to the reimport endpoint for one attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionRequest {
    /// The resource serialized as JSON, uploaded as `report.json`
    pub report_document: Vec<u8>,
    /// Multipart text fields, keyed by DefectDojo field name
    pub metadata_fields: BTreeMap<String, String>,
    /// Product tags, in configured order
    pub tags: Vec<String>,
}

impl SubmissionRequest {
    /// Build the request for `event`.
    ///
    /// A templated field that fails to evaluate is logged and replaced by its
    /// configured value; a tag that fails or evaluates empty is dropped. Only
    /// a report body that cannot be serialized fails the build.
    pub fn build(
        event: &ResourceEvent,
        settings: &SubmissionSettings,
        engine: &ExpressionEngine,
    ) -> Result<Self, Error> {
        let report_document = serde_json::to_vec(&event.body)
            .map_err(|e| Error::serialization_for_kind(event.kind.kind(), e.to_string()))?;

        let ctx = EvalContext::new(event.meta_value(), event.body.clone());
        let field = |name: &str, f: &TemplatedField| compute_field(name, f, engine, &ctx);

        let mut fields = BTreeMap::new();
        let mut put = |name: &str, value: String| {
            fields.insert(name.to_string(), value);
        };

        put("scan_type", SCAN_TYPE.to_string());
        put("active", settings.active.to_string());
        put("verified", settings.verified.to_string());
        put("close_old_findings", settings.close_old_findings.to_string());
        put(
            "close_old_findings_product_scope",
            settings.close_old_findings_product_scope.to_string(),
        );
        put("push_to_jira", settings.push_to_jira.to_string());
        put("auto_create_context", settings.auto_create_context.to_string());
        put(
            "deduplication_on_engagement",
            settings.deduplication_on_engagement.to_string(),
        );
        put("do_not_reactivate", settings.do_not_reactivate.to_string());
        put("minimum_severity", settings.minimum_severity.clone());
        put("product_name", field("product_name", &settings.product_name));
        put(
            "product_type_name",
            field("product_type_name", &settings.product_type_name),
        );
        put("service", field("service", &settings.service));
        put("environment", field("environment", &settings.environment));
        put("test_title", field("test_title", &settings.test_title));
        put(
            "engagement_name",
            field("engagement_name", &settings.engagement_name),
        );

        let tags = if settings.evaluate_tags {
            settings
                .tags
                .iter()
                .filter_map(|expr| evaluate_tag(expr, engine, &ctx))
                .collect()
        } else {
            settings
                .tags
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        };

        Ok(Self {
            report_document,
            metadata_fields: fields,
            tags,
        })
    }
}

/// Evaluate `expr`, reporting failures as [`Error::Template`]
fn evaluate(engine: &ExpressionEngine, expr: &str, ctx: &EvalContext) -> Result<String, Error> {
    engine
        .evaluate(expr, ctx)
        .map_err(|e| Error::template(expr, e.to_string()))
}

fn compute_field(
    name: &str,
    field: &TemplatedField,
    engine: &ExpressionEngine,
    ctx: &EvalContext,
) -> String {
    if !field.evaluate || field.value.is_empty() {
        return field.value.clone();
    }
    match evaluate(engine, &field.value, ctx) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                field = name,
                expression = %field.value,
                error = %e,
                "Field evaluation failed, using configured value"
            );
            field.value.clone()
        }
    }
}

fn evaluate_tag(expr: &str, engine: &ExpressionEngine, ctx: &EvalContext) -> Option<String> {
    let expr = expr.trim();
    if expr.is_empty() {
        return None;
    }
    match evaluate(engine, expr, ctx) {
        Ok(tag) => Some(tag.trim().to_string()).filter(|t| !t.is_empty()),
        Err(e) => {
            warn!(expression = %expr, error = %e, "Tag evaluation failed, dropping tag");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::sample_event;

    fn build(settings: &SubmissionSettings) -> SubmissionRequest {
        SubmissionRequest::build(&sample_event(), settings, &ExpressionEngine::new())
            .expect("request should build")
    }

    #[test]
    fn defaults_produce_literal_fields() {
        let request = build(&SubmissionSettings::default());
        let fields = &request.metadata_fields;

        assert_eq!(fields["scan_type"], "Trivy Operator Scan");
        assert_eq!(fields["product_name"], "product");
        assert_eq!(fields["environment"], "Development");
        assert_eq!(fields["test_title"], "Kubernetes");
        assert_eq!(fields["minimum_severity"], "Info");
        assert_eq!(fields["engagement_name"], "");
        assert_eq!(fields["product_type_name"], "");
        assert_eq!(fields["active"], "false");
        assert!(request.tags.is_empty());
    }

    #[test]
    fn report_document_is_the_full_resource() {
        let event = sample_event();
        let request = build(&SubmissionSettings::default());
        let decoded: serde_json::Value =
            serde_json::from_slice(&request.report_document).expect("document is JSON");
        assert_eq!(decoded, event.body);
        assert_eq!(decoded["kind"], "VulnerabilityReport");
    }

    #[test]
    fn configured_flags_are_sent_verbatim() {
        let settings = SubmissionSettings {
            active: true,
            verified: false,
            push_to_jira: false,
            close_old_findings: true,
            do_not_reactivate: true,
            minimum_severity: "High".to_string(),
            ..Default::default()
        };
        let fields = build(&settings).metadata_fields;
        assert_eq!(fields["active"], "true");
        assert_eq!(fields["verified"], "false");
        assert_eq!(fields["push_to_jira"], "false");
        assert_eq!(fields["close_old_findings"], "true");
        assert_eq!(fields["do_not_reactivate"], "true");
        assert_eq!(fields["minimum_severity"], "High");
    }

    #[test]
    fn evaluated_field_reads_meta_name() {
        let settings = SubmissionSettings {
            product_name: TemplatedField::expression("meta['name']"),
            ..Default::default()
        };
        let fields = build(&settings).metadata_fields;
        assert_eq!(fields["product_name"], "app-x");
    }

    #[test]
    fn malformed_expression_falls_back_without_affecting_other_fields() {
        let settings = SubmissionSettings {
            product_name: TemplatedField::expression("meta['name'"),
            service: TemplatedField::expression("meta.namespace"),
            ..Default::default()
        };
        let fields = build(&settings).metadata_fields;
        assert_eq!(fields["product_name"], "meta['name'");
        assert_eq!(fields["service"], "payments");
    }

    #[test]
    fn evaluation_failure_is_a_template_error_naming_the_expression() {
        let event = sample_event();
        let ctx = EvalContext::new(event.meta_value(), event.body.clone());
        let err = evaluate(&ExpressionEngine::new(), "meta['name'", &ctx)
            .expect_err("unterminated subscript should fail");
        match err {
            Error::Template { expression, .. } => assert_eq!(expression, "meta['name'"),
            other => panic!("Expected Template variant, got {:?}", other),
        }
    }

    #[test]
    fn unevaluated_field_keeps_expression_text() {
        let settings = SubmissionSettings {
            product_name: TemplatedField::literal("meta['name']"),
            ..Default::default()
        };
        let fields = build(&settings).metadata_fields;
        assert_eq!(fields["product_name"], "meta['name']");
    }

    #[test]
    fn evaluated_tags_drop_failures_and_empties() {
        let settings = SubmissionSettings {
            tags: vec![
                "meta.namespace".to_string(),
                "'team-' ~ meta.labels.team".to_string(),
                "meta.labels.missing".to_string(),
                "body.report.registry.server".to_string(),
                "  ".to_string(),
            ],
            evaluate_tags: true,
            ..Default::default()
        };
        let request = build(&settings);
        assert_eq!(request.tags, vec!["payments", "team-platform"]);
    }

    #[test]
    fn literal_tags_are_trimmed_in_order() {
        let settings = SubmissionSettings {
            tags: vec![" k8s".to_string(), "".to_string(), "trivy ".to_string()],
            evaluate_tags: false,
            ..Default::default()
        };
        assert_eq!(build(&settings).tags, vec!["k8s", "trivy"]);
    }
}
