//! Integration tests for the DefectDojo client
//!
//! Each test runs an in-process DefectDojo stand-in on a loopback port and
//! checks what actually goes over the wire.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use trivy_dojo_common::Error;
use trivy_dojo_operator::findings::{DojoClient, DojoClientConfig, FindingsApi, NewJiraProject};
use trivy_dojo_operator::submission::SubmissionRequest;

// =============================================================================
// Test Fixtures
// =============================================================================

#[derive(Debug, Clone)]
struct FormField {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct Recorded {
    authorization: Vec<String>,
    forms: Vec<Vec<FormField>>,
    tag_patches: Vec<(i64, Value)>,
    jira_queries: Vec<BTreeMap<String, String>>,
    jira_creates: Vec<Value>,
}

type Shared = Arc<Mutex<Recorded>>;

fn record_auth(state: &Shared, headers: &HeaderMap) {
    let value = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.lock().unwrap().authorization.push(value);
}

async fn reimport(
    State(state): State<Shared>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Json<Value> {
    record_auth(&state, &headers);
    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.unwrap().to_vec();
        fields.push(FormField {
            name,
            file_name,
            content_type,
            data,
        });
    }
    state.lock().unwrap().forms.push(fields);
    Json(json!({
        "product_id": 42,
        "engagement_id": 7,
        "test_id": 99,
        "scan_type": "Trivy Operator Scan"
    }))
}

async fn patch_product(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    record_auth(&state, &headers);
    state.lock().unwrap().tag_patches.push((id, body.clone()));
    Json(json!({"id": id, "tags": body["tags"]}))
}

async fn list_jira(
    State(state): State<Shared>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Json<Value> {
    let page = query.get("offset").cloned();
    state.lock().unwrap().jira_queries.push(query);
    match page.as_deref() {
        None => Json(json!({
            "count": 2,
            // DefectDojo behind a proxy often advertises its internal host
            "next": "http://dojo-internal:8080/api/v2/jira_projects/?limit=1&offset=1",
            "results": [{"id": 1, "project_key": "OPS", "product": 7, "jira_instance": 1}]
        })),
        Some(_) => Json(json!({
            "count": 2,
            "next": null,
            "results": [{"id": 2, "project_key": "SEC", "product": 42, "jira_instance": 1}]
        })),
    }
}

async fn create_jira(State(state): State<Shared>, Json(body): Json<Value>) -> impl IntoResponse {
    state.lock().unwrap().jira_creates.push(body);
    (StatusCode::CREATED, Json(json!({"id": 3})))
}

fn dojo_app(state: Shared) -> Router {
    Router::new()
        .route("/api/v2/reimport-scan/", post(reimport))
        .route("/api/v2/products/{id}/", patch(patch_product))
        .route("/api/v2/jira_projects/", get(list_jira).post(create_jira))
        .with_state(state)
}

fn failing_app() -> Router {
    Router::new()
        .route(
            "/api/v2/reimport-scan/",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable") }),
        )
        .route(
            "/api/v2/products/{id}/",
            patch(|| async { (StatusCode::BAD_REQUEST, r#"{"tags":["invalid"]}"#) }),
        )
        .route(
            "/api/v2/jira_projects/",
            get(|| async { (StatusCode::OK, "not json") }),
        )
}

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str) -> DojoClient {
    DojoClient::new(DojoClientConfig::new(base_url, "test-token")).unwrap()
}

fn sample_request() -> SubmissionRequest {
    let mut metadata_fields = BTreeMap::new();
    metadata_fields.insert("scan_type".to_string(), "Trivy Operator Scan".to_string());
    metadata_fields.insert("product_name".to_string(), "checkout".to_string());
    metadata_fields.insert("active".to_string(), "true".to_string());
    SubmissionRequest {
        report_document: br#"{"kind":"VulnerabilityReport"}"#.to_vec(),
        metadata_fields,
        tags: vec!["team-a".to_string(), "prod".to_string()],
    }
}

// =============================================================================
// Reimport
// =============================================================================

#[tokio::test]
async fn reimport_sends_report_file_and_metadata() {
    let state = Shared::default();
    let base = spawn(dojo_app(state.clone())).await;

    let response = client(&base)
        .reimport_scan(&sample_request())
        .await
        .unwrap();
    assert_eq!(response.product_id, 42);
    assert_eq!(response.engagement_id, Some(7));

    let recorded = state.lock().unwrap();
    assert_eq!(recorded.authorization, vec!["Token test-token"]);
    let form = &recorded.forms[0];

    let file = form.iter().find(|f| f.name == "file").unwrap();
    assert_eq!(file.file_name.as_deref(), Some("report.json"));
    assert_eq!(file.content_type.as_deref(), Some("application/json"));
    assert_eq!(file.data, br#"{"kind":"VulnerabilityReport"}"#.to_vec());

    let text = |name: &str| {
        form.iter()
            .filter(|f| f.name == name)
            .map(|f| String::from_utf8(f.data.clone()).unwrap())
            .collect::<Vec<_>>()
    };
    assert_eq!(text("scan_type"), vec!["Trivy Operator Scan"]);
    assert_eq!(text("product_name"), vec!["checkout"]);
    assert_eq!(text("active"), vec!["true"]);
    assert_eq!(text("tags"), vec!["team-a", "prod"]);
}

#[tokio::test]
async fn reimport_error_carries_status_and_body() {
    let base = spawn(failing_app()).await;

    let err = client(&base)
        .reimport_scan(&sample_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Http { .. }));
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.response_body(), Some("database unavailable"));
}

#[tokio::test]
async fn unreachable_server_is_an_http_error() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{}", addr))
        .reimport_scan(&sample_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Http { .. }));
    assert_eq!(err.status(), None);
}

// =============================================================================
// Product tags
// =============================================================================

#[tokio::test]
async fn tags_are_patched_onto_the_product() {
    let state = Shared::default();
    let base = spawn(dojo_app(state.clone())).await;

    client(&base)
        .set_product_tags(42, &["team-a".to_string(), "prod".to_string()])
        .await
        .unwrap();

    let recorded = state.lock().unwrap();
    assert_eq!(recorded.tag_patches, vec![(42, json!({"tags": ["team-a", "prod"]}))]);
    assert_eq!(recorded.authorization, vec!["Token test-token"]);
}

#[tokio::test]
async fn rejected_tag_patch_is_an_error() {
    let base = spawn(failing_app()).await;

    let err = client(&base)
        .set_product_tags(42, &["bad tag".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
}

// =============================================================================
// Jira projects
// =============================================================================

#[tokio::test]
async fn jira_listing_follows_next_link_on_configured_host() {
    let state = Shared::default();
    let base = spawn(dojo_app(state.clone())).await;
    let dojo = client(&base);

    let first = dojo.list_jira_projects(None).await.unwrap();
    assert_eq!(first.results[0].product, Some(7));
    let next = first.next.clone().unwrap();

    let second = dojo.list_jira_projects(Some(next)).await.unwrap();
    assert_eq!(second.results[0].project_key.as_deref(), Some("SEC"));
    assert_eq!(second.results[0].product, Some(42));
    assert!(second.next.is_none());

    let recorded = state.lock().unwrap();
    assert_eq!(recorded.jira_queries.len(), 2);
    assert_eq!(
        recorded.jira_queries[1].get("offset").map(String::as_str),
        Some("1")
    );
}

#[tokio::test]
async fn jira_listing_with_invalid_json_is_a_serialization_error() {
    let base = spawn(failing_app()).await;

    let err = client(&base).list_jira_projects(None).await.unwrap_err();
    assert!(matches!(err, Error::Serialization { .. }));
}

#[tokio::test]
async fn jira_project_creation_sends_product_as_string() {
    let state = Shared::default();
    let base = spawn(dojo_app(state.clone())).await;

    client(&base)
        .create_jira_project(&NewJiraProject::for_product(42, "SEC", 3))
        .await
        .unwrap();

    let recorded = state.lock().unwrap();
    assert_eq!(
        recorded.jira_creates,
        vec![json!({"project_key": "SEC", "jira_instance": 3, "product": "42"})]
    );
}
