//! Submission orchestrator
//!
//! Runs the three dependent DefectDojo calls for one report:
//! 1. reimport the scan, which yields the product id
//! 2. replace the product's tags
//! 3. link the product to a Jira project unless a link already exists
//!
//! Calls are strictly sequential. Any failure, including a panic, aborts the
//! attempt and is returned as a [`RetryableFailure`]; the event source
//! redelivers the report after the failure's delay and the whole sequence
//! starts again from call 1.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info};

use trivy_dojo_common::metrics::SubmissionMetrics;
use trivy_dojo_common::retry::RetryPolicy;
use trivy_dojo_common::template::ExpressionEngine;
use trivy_dojo_common::Error;

use super::{JiraLink, SubmissionRequest, SubmissionSettings};
use crate::findings::{FindingsApi, NewJiraProject, JIRA_PROJECTS_PATH};
use crate::source::{ReportHandler, ResourceEvent};

/// Upper bound on Jira project pages scanned per submission
const MAX_JIRA_PAGES: usize = 500;

/// A failed attempt, to be redelivered after `delay`
#[derive(Debug, Error)]
#[error("submission failed, retrying in {}s: {source}", .delay.as_secs())]
pub struct RetryableFailure {
    #[source]
    pub source: Error,
    pub delay: Duration,
}

/// What one successful submission found and created
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub product_id: i64,
    /// A Jira link for the product was already present
    pub jira_project_exists: bool,
    /// A Jira link was created by this submission
    pub jira_project_created: bool,
}

/// Drives submissions against a [`FindingsApi`]
pub struct Orchestrator {
    api: Arc<dyn FindingsApi>,
    settings: SubmissionSettings,
    engine: ExpressionEngine,
    retry: RetryPolicy,
    metrics: SubmissionMetrics,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(
        api: Arc<dyn FindingsApi>,
        settings: SubmissionSettings,
        retry: RetryPolicy,
        metrics: SubmissionMetrics,
    ) -> Self {
        Self {
            api,
            settings,
            engine: ExpressionEngine::new(),
            retry,
            metrics,
        }
    }

    /// Submit one report.
    ///
    /// Every attempt is timed and counted as `success` or `failed`.
    pub async fn submit(
        &self,
        event: &ResourceEvent,
    ) -> Result<SubmissionOutcome, RetryableFailure> {
        let kind = event.kind.kind();
        let name = event.name();
        let namespace = event.namespace().unwrap_or_default();
        info!(kind, name, namespace, "Processing report");

        let timer = self.metrics.start();
        let result = AssertUnwindSafe(self.run(event))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(Error::internal_with_context(
                    "orchestrator",
                    format!("submission panicked: {}", panic_message(panic.as_ref())),
                ))
            });

        match result {
            Ok(outcome) => {
                timer.success();
                info!(
                    kind,
                    name,
                    namespace,
                    product_id = outcome.product_id,
                    "Successfully processed report"
                );
                Ok(outcome)
            }
            Err(err) => {
                timer.failed();
                error!(
                    kind,
                    name,
                    namespace,
                    status = ?err.status(),
                    response = err.response_body().unwrap_or_default(),
                    error = %err,
                    retry_in_secs = self.retry.delay.as_secs(),
                    "Failed to submit report"
                );
                Err(RetryableFailure {
                    source: err,
                    delay: self.retry.delay,
                })
            }
        }
    }

    async fn run(&self, event: &ResourceEvent) -> Result<SubmissionOutcome, Error> {
        let request = SubmissionRequest::build(event, &self.settings, &self.engine)?;
        debug!(
            report = %String::from_utf8_lossy(&request.report_document),
            "Report document"
        );

        let imported = self.api.reimport_scan(&request).await?;
        let product_id = imported.product_id;
        debug!(
            product_id,
            engagement_id = ?imported.engagement_id,
            test_id = ?imported.test_id,
            "Scan reimported"
        );

        self.api.set_product_tags(product_id, &request.tags).await?;

        let (jira_project_exists, jira_project_created) = match &self.settings.jira {
            Some(link) => self.ensure_jira_project(product_id, link).await?,
            None => (false, false),
        };

        Ok(SubmissionOutcome {
            product_id,
            jira_project_exists,
            jira_project_created,
        })
    }

    /// Returns `(existed, created)`
    async fn ensure_jira_project(
        &self,
        product_id: i64,
        link: &JiraLink,
    ) -> Result<(bool, bool), Error> {
        let mut next: Option<String> = None;
        let mut fetched: HashSet<String> = HashSet::new();
        for pages in 1.. {
            let page = self.api.list_jira_projects(next.clone()).await?;
            if let Some(project) = page
                .results
                .iter()
                .find(|p| p.product == Some(product_id))
            {
                info!(
                    product_id,
                    jira_project_id = project.id,
                    "Jira project found for product, skipping"
                );
                return Ok((true, false));
            }
            if let Some(url) = next.take() {
                fetched.insert(url);
            }
            // A link already fetched means every reachable page has been seen
            match page.next {
                Some(url) if !fetched.contains(&url) => next = Some(url),
                _ => break,
            }
            if pages >= MAX_JIRA_PAGES {
                return Err(Error::http(
                    JIRA_PROJECTS_PATH,
                    format!("listing still paging after {} pages", MAX_JIRA_PAGES),
                ));
            }
        }

        self.api
            .create_jira_project(&NewJiraProject::for_product(
                product_id,
                &link.project_key,
                link.instance_id,
            ))
            .await?;
        info!(
            product_id,
            project_key = %link.project_key,
            "Created Jira project for product"
        );
        Ok((false, true))
    }
}

#[async_trait]
impl ReportHandler for Orchestrator {
    async fn handle(&self, event: &ResourceEvent) -> Result<SubmissionOutcome, RetryableFailure> {
        self.submit(event).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
