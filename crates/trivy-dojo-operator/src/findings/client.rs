//! `reqwest` implementation of [`FindingsApi`]

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Proxy, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use trivy_dojo_common::{Error, DEFAULT_REQUEST_TIMEOUT_SECS};

use super::{
    product_path, FindingsApi, JiraProjectPage, NewJiraProject, ReimportResponse,
    JIRA_PROJECTS_PATH, REIMPORT_SCAN_PATH,
};
use crate::submission::SubmissionRequest;

/// Connection settings for [`DojoClient`]
#[derive(Clone)]
pub struct DojoClientConfig {
    /// Base URL without trailing slash (e.g. `https://dojo.example.com`)
    pub base_url: String,
    pub api_key: String,
    /// Applied to connect and to the whole request
    pub timeout: Duration,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
}

impl DojoClientConfig {
    /// Config with default timeout and no proxies
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            http_proxy: None,
            https_proxy: None,
        }
    }
}

impl std::fmt::Debug for DojoClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DojoClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("http_proxy", &self.http_proxy)
            .field("https_proxy", &self.https_proxy)
            .finish()
    }
}

/// DefectDojo REST client
#[derive(Clone)]
pub struct DojoClient {
    http: reqwest::Client,
    base_url: String,
}

impl DojoClient {
    /// Build the client. Only the configured proxies are used.
    pub fn new(config: DojoClientConfig) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Token {}", config.api_key)).map_err(|_| {
            Error::config_for(
                "DEFECT_DOJO_API_KEY",
                "API key contains characters not allowed in an HTTP header",
            )
        })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("trivy-dojo-operator/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .no_proxy();

        if let Some(proxy) = &config.http_proxy {
            let proxy = Proxy::http(proxy)
                .map_err(|e| Error::config_for("HTTP_PROXY", e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        if let Some(proxy) = &config.https_proxy {
            let proxy = Proxy::https(proxy)
                .map_err(|e| Error::config_for("HTTPS_PROXY", e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Rebuild a `next` link against the configured base URL, keeping only
    /// its query, so the API token is never sent to another host.
    fn next_page_url(&self, next: &str) -> Result<String, Error> {
        let parsed = Url::parse(next).map_err(|e| {
            Error::http(JIRA_PROJECTS_PATH, format!("invalid next link '{}': {}", next, e))
        })?;
        Ok(match parsed.query() {
            Some(query) => format!("{}?{}", self.url(JIRA_PROJECTS_PATH), query),
            None => self.url(JIRA_PROJECTS_PATH),
        })
    }
}

/// Map a transport failure onto `Error::Http`
fn transport(endpoint: &str, err: reqwest::Error) -> Error {
    let message = if err.is_timeout() {
        format!("request timed out: {}", err)
    } else {
        err.to_string()
    };
    Error::http(endpoint, message)
}

/// Turn a non-2xx response into `Error::Http` carrying the response body
async fn check_status(endpoint: &str, response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::http_status(endpoint, status.as_u16(), body))
}

async fn decode<T: DeserializeOwned>(
    endpoint: &str,
    kind: &str,
    response: Response,
) -> Result<T, Error> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport(endpoint, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::serialization_for_kind(kind, format!("{} from {}", e, endpoint)))
}

#[async_trait]
impl FindingsApi for DojoClient {
    async fn reimport_scan(&self, request: &SubmissionRequest) -> Result<ReimportResponse, Error> {
        let file = Part::bytes(request.report_document.clone())
            .file_name("report.json")
            .mime_str("application/json")
            .map_err(|e| transport(REIMPORT_SCAN_PATH, e))?;

        let mut form = Form::new().part("file", file);
        for (name, value) in &request.metadata_fields {
            form = form.text(name.clone(), value.clone());
        }
        for tag in &request.tags {
            form = form.text("tags", tag.clone());
        }

        let response = self
            .http
            .post(self.url(REIMPORT_SCAN_PATH))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport(REIMPORT_SCAN_PATH, e))?;
        let response = check_status(REIMPORT_SCAN_PATH, response).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport(REIMPORT_SCAN_PATH, e))?;
        debug!(
            response = %String::from_utf8_lossy(&bytes),
            "Reimport response"
        );
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::serialization_for_kind("ReimportResponse", e.to_string()))
    }

    async fn set_product_tags(&self, product_id: i64, tags: &[String]) -> Result<(), Error> {
        let path = product_path(product_id);
        let response = self
            .http
            .patch(self.url(&path))
            .json(&serde_json::json!({ "tags": tags }))
            .send()
            .await
            .map_err(|e| transport(&path, e))?;
        check_status(&path, response).await?;
        Ok(())
    }

    async fn list_jira_projects(&self, next: Option<String>) -> Result<JiraProjectPage, Error> {
        let url = match next {
            Some(next) => self.next_page_url(&next)?,
            None => self.url(JIRA_PROJECTS_PATH),
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport(JIRA_PROJECTS_PATH, e))?;
        let response = check_status(JIRA_PROJECTS_PATH, response).await?;
        decode(JIRA_PROJECTS_PATH, "JiraProjectPage", response).await
    }

    async fn create_jira_project(&self, project: &NewJiraProject) -> Result<(), Error> {
        let response = self
            .http
            .post(self.url(JIRA_PROJECTS_PATH))
            .json(project)
            .send()
            .await
            .map_err(|e| transport(JIRA_PROJECTS_PATH, e))?;
        check_status(JIRA_PROJECTS_PATH, response).await?;
        Ok(())
    }
}
