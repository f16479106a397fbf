//! trivy-dojo-operator - forwards Trivy Operator reports to DefectDojo

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing::info;

use trivy_dojo_common::events::{EventPublisher, KubeEventPublisher};
use trivy_dojo_common::metrics::SubmissionMetrics;
use trivy_dojo_common::telemetry::init_telemetry;
use trivy_dojo_common::CONTROLLER_NAME;
use trivy_dojo_operator::findings::{DojoClient, FindingsApi};
use trivy_dojo_operator::server::start_probe_server;
use trivy_dojo_operator::settings::Settings;
use trivy_dojo_operator::source::{EventSource, KubeEventSource, ReportHandler};
use trivy_dojo_operator::submission::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let settings = Settings::parse();

    init_telemetry(settings.telemetry_config())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    settings.log_config();

    // Configuration errors are fatal before anything is watched
    let kinds = settings.report_kinds()?;
    let submission = settings.submission_settings()?;
    let retry = settings.retry_policy();
    let client_config = settings.client_config()?;

    let metrics = SubmissionMetrics::new()
        .map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?;

    let api: Arc<dyn FindingsApi> = Arc::new(DojoClient::new(client_config)?);
    let handler: Arc<dyn ReportHandler> = Arc::new(Orchestrator::new(
        api,
        submission,
        retry.clone(),
        metrics.clone(),
    ));

    tokio::spawn(start_probe_server(settings.probe_addr, metrics));

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let events: Arc<dyn EventPublisher> =
        Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME));
    let source = KubeEventSource::new(client, settings.watch_namespace.clone(), retry, events);

    let selector = settings.label_selector();
    let subscriptions = kinds
        .into_iter()
        .map(|kind| source.subscribe(kind, selector.clone(), handler.clone()));

    info!("Starting report controllers");
    futures::future::join_all(subscriptions).await;

    info!("trivy-dojo-operator shutting down");
    Ok(())
}
