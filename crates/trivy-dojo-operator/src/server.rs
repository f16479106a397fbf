//! Probe server: liveness and Prometheus scrape endpoints
//!
//! - `GET /healthz` returns `ok`
//! - `GET /metrics` returns the Prometheus text exposition

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use trivy_dojo_common::metrics::SubmissionMetrics;

/// Build the probe router
pub fn probe_routes(metrics: SubmissionMetrics) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<SubmissionMetrics>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serve probes on an already bound listener until the process exits
pub async fn serve(listener: TcpListener, metrics: SubmissionMetrics) -> std::io::Result<()> {
    axum::serve(listener, probe_routes(metrics)).await
}

/// Bind `addr` and serve probes; bind and serve failures are logged
pub async fn start_probe_server(addr: SocketAddr, metrics: SubmissionMetrics) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => {
            info!(addr = %addr, "Probe server started");
            l
        }
        Err(e) => {
            error!(error = %e, addr = %addr, "Failed to bind probe server");
            return;
        }
    };
    if let Err(e) = serve(listener, metrics).await {
        error!(error = %e, "Probe server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn spawn_server(metrics: SubmissionMetrics) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(serve(listener, metrics));
        addr
    }

    async fn fetch(url: String) -> reqwest::Response {
        reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client")
            .get(url)
            .send()
            .await
            .expect("probe request")
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let metrics = SubmissionMetrics::new().expect("metrics");
        let addr = spawn_server(metrics).await;

        let resp = fetch(format!("http://{addr}/healthz")).await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.text().await.expect("body"), "ok");
    }

    #[tokio::test]
    async fn metrics_exposes_submission_counters() {
        let metrics = SubmissionMetrics::new().expect("metrics");
        metrics.record("success", Duration::from_millis(250));
        let addr = spawn_server(metrics).await;

        let resp = fetch(format!("http://{addr}/metrics")).await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body = resp.text().await.expect("body");
        assert!(body.contains("requests_total{status=\"success\"} 1"));
        assert!(body.contains("request_processing_seconds_bucket"));
    }
}
