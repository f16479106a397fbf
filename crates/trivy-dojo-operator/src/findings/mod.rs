//! DefectDojo API surface used by the orchestrator
//!
//! One method per endpoint. The trait is the seam the orchestrator is tested
//! through; [`DojoClient`] is the `reqwest` implementation.

mod client;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use trivy_dojo_common::Error;

use crate::submission::SubmissionRequest;

pub use client::{DojoClient, DojoClientConfig};

/// Reimport endpoint path
pub const REIMPORT_SCAN_PATH: &str = "/api/v2/reimport-scan/";
/// Jira project listing and creation path
pub const JIRA_PROJECTS_PATH: &str = "/api/v2/jira_projects/";

/// Product detail path for `product_id`
pub fn product_path(product_id: i64) -> String {
    format!("/api/v2/products/{}/", product_id)
}

/// Subset of the reimport response the operator relies on
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ReimportResponse {
    /// Product the scan was imported into (created if auto-create is on)
    pub product_id: i64,
    #[serde(default)]
    pub engagement_id: Option<i64>,
    #[serde(default)]
    pub test_id: Option<i64>,
}

/// A Jira project link as listed by DefectDojo
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct JiraProject {
    pub id: i64,
    #[serde(default)]
    pub project_key: Option<String>,
    #[serde(default)]
    pub jira_instance: Option<i64>,
    /// Product this link is bound to; engagement-level links have none
    #[serde(default)]
    pub product: Option<i64>,
}

/// One page of the Jira project listing
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct JiraProjectPage {
    /// Absolute URL of the next page, if any
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub results: Vec<JiraProject>,
}

/// Body of the Jira project creation call
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct NewJiraProject {
    pub project_key: String,
    pub jira_instance: u64,
    /// Product id, sent as a string
    pub product: String,
}

impl NewJiraProject {
    /// Link `product_id` to a Jira project
    pub fn for_product(product_id: i64, project_key: &str, jira_instance: u64) -> Self {
        Self {
            project_key: project_key.to_string(),
            jira_instance,
            product: product_id.to_string(),
        }
    }
}

/// DefectDojo operations needed to submit one report
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FindingsApi: Send + Sync {
    /// Upload the report to the reimport endpoint
    async fn reimport_scan(&self, request: &SubmissionRequest) -> Result<ReimportResponse, Error>;

    /// Replace the product's tag list
    async fn set_product_tags(&self, product_id: i64, tags: &[String]) -> Result<(), Error>;

    /// Fetch one page of Jira project links
    ///
    /// `next` is the `next` link of the previous page, or None for the first.
    async fn list_jira_projects(&self, next: Option<String>) -> Result<JiraProjectPage, Error>;

    /// Create a Jira project link
    async fn create_jira_project(&self, project: &NewJiraProject) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reimport_response_ignores_unknown_fields() {
        let response: ReimportResponse = serde_json::from_value(json!({
            "product_id": 42,
            "engagement_id": 7,
            "test_id": 99,
            "scan_type": "Trivy Operator Scan",
            "statistics": {"after": {"total": 3}}
        }))
        .expect("response should decode");
        assert_eq!(response.product_id, 42);
        assert_eq!(response.engagement_id, Some(7));
    }

    #[test]
    fn jira_page_tolerates_engagement_links() {
        let page: JiraProjectPage = serde_json::from_value(json!({
            "count": 2,
            "next": null,
            "results": [
                {"id": 1, "project_key": "SEC", "product": 42, "jira_instance": 1},
                {"id": 2, "project_key": "OPS", "engagement": 9, "product": null}
            ]
        }))
        .expect("page should decode");
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].product, Some(42));
        assert_eq!(page.results[1].product, None);
        assert!(page.next.is_none());
    }

    #[test]
    fn new_project_sends_product_as_string() {
        let body = serde_json::to_value(NewJiraProject::for_product(42, "SEC", 3))
            .expect("body should encode");
        assert_eq!(
            body,
            json!({"project_key": "SEC", "jira_instance": 3, "product": "42"})
        );
    }

    #[test]
    fn product_path_embeds_id() {
        assert_eq!(product_path(42), "/api/v2/products/42/");
    }
}
