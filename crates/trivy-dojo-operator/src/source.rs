//! Event source: delivers newly created Trivy reports to a handler
//!
//! The orchestrator only sees [`EventSource`] and [`ReportHandler`]. The
//! Kubernetes implementation runs one `kube::runtime::Controller` per report
//! kind over `DynamicObject`s. A report counts as handled once it carries the
//! [`SUBMITTED_ANNOTATION`]; reports without it are delivered, including
//! reports that already existed when the operator started.
//!
//! Delivery is at-least-once: if the process dies between a successful
//! submission and writing the annotation, the report is submitted again.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use trivy_dojo_common::events::{actions, reasons, EventPublisher};
use trivy_dojo_common::report::ReportKind;
use trivy_dojo_common::retry::{RetryDecision, RetryPolicy};
use trivy_dojo_common::{Error, SUBMITTED_ANNOTATION};

use crate::submission::{RetryableFailure, SubmissionOutcome};

/// Server-side watch timeout; below the client read timeout so an idle watch
/// is closed by the API server rather than timing out in the client.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A report delivered for submission
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceEvent {
    pub kind: ReportKind,
    pub metadata: ObjectMeta,
    /// The full resource, always carrying `apiVersion` and `kind`
    pub body: serde_json::Value,
}

impl ResourceEvent {
    /// Build an event from a watched object
    pub fn from_object(kind: ReportKind, obj: &DynamicObject) -> Result<Self, Error> {
        let mut body = serde_json::to_value(obj)
            .map_err(|e| Error::serialization_for_kind(kind.kind(), e.to_string()))?;

        if let Some(map) = body.as_object_mut() {
            map.entry("apiVersion")
                .or_insert_with(|| json!(ReportKind::api_version()));
            map.entry("kind").or_insert_with(|| json!(kind.kind()));
        }

        Ok(Self {
            kind,
            metadata: obj.metadata.clone(),
            body,
        })
    }

    /// Resource name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Resource namespace
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Metadata as JSON, the `meta` seen by field expressions
    pub fn meta_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.metadata).unwrap_or_default()
    }
}

/// Receives report events; failures are redelivered after their delay
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReportHandler: Send + Sync {
    /// Handle one report
    async fn handle(&self, event: &ResourceEvent) -> Result<SubmissionOutcome, RetryableFailure>;
}

/// Source of report events
pub trait EventSource: Send + Sync {
    /// Deliver reports of `kind` matching `label_selector` to `handler`.
    ///
    /// The returned future runs until shutdown.
    fn subscribe(
        &self,
        kind: ReportKind,
        label_selector: Option<String>,
        handler: Arc<dyn ReportHandler>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Records that a report has been submitted
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SubmissionMarker: Send + Sync {
    /// Stamp the report with the submission time
    async fn mark_submitted(
        &self,
        kind: ReportKind,
        namespace: Option<String>,
        name: String,
        at: DateTime<Utc>,
    ) -> Result<(), Error>;
}

/// Marks reports by merge-patching the submitted annotation
pub struct KubeSubmissionMarker {
    client: Client,
}

impl KubeSubmissionMarker {
    /// Create a marker using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SubmissionMarker for KubeSubmissionMarker {
    async fn mark_submitted(
        &self,
        kind: ReportKind,
        namespace: Option<String>,
        name: String,
        at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let ar = kind.api_resource();
        let api: Api<DynamicObject> = match namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        let patch = json!({
            "metadata": {
                "annotations": {
                    SUBMITTED_ANNOTATION: at.to_rfc3339_opts(SecondsFormat::Secs, true)
                }
            }
        });

        match api
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            // Trivy replaces reports on rescan; a deleted report needs no mark
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(name = %name, "Report deleted before it could be marked");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Kubernetes-backed event source
pub struct KubeEventSource {
    client: Client,
    namespace: Option<String>,
    retry: RetryPolicy,
    marker: Arc<dyn SubmissionMarker>,
    events: Arc<dyn EventPublisher>,
    attempts: Arc<DashMap<String, u32>>,
}

impl KubeEventSource {
    /// Watch cluster-wide, or only `namespace` when set
    pub fn new(
        client: Client,
        namespace: Option<String>,
        retry: RetryPolicy,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            marker: Arc::new(KubeSubmissionMarker::new(client.clone())),
            client,
            namespace,
            retry,
            events,
            attempts: Arc::new(DashMap::new()),
        }
    }
}

impl EventSource for KubeEventSource {
    fn subscribe(
        &self,
        kind: ReportKind,
        label_selector: Option<String>,
        handler: Arc<dyn ReportHandler>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let ar = kind.api_resource();
        let api: Api<DynamicObject> = match &self.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };

        let config = watcher_config(label_selector.as_deref());

        info!(
            kind = %kind,
            namespace = self.namespace.as_deref().unwrap_or("<all>"),
            selector = label_selector.as_deref().unwrap_or("<none>"),
            "Watching reports"
        );

        let ctx = Arc::new(DeliveryContext {
            kind,
            handler,
            marker: self.marker.clone(),
            events: self.events.clone(),
            retry: self.retry.clone(),
            attempts: self.attempts.clone(),
        });

        Box::pin(
            Controller::new_with(api, config, ar)
                .shutdown_on_signal()
                .run(deliver, error_policy, ctx)
                .for_each(log_delivery_result(kind)),
        )
    }
}

/// Watch settings for one subscription
fn watcher_config(label_selector: Option<&str>) -> WatcherConfig {
    let config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    match label_selector {
        Some(selector) => config.labels(selector),
        None => config,
    }
}

/// Shared state for one subscription's controller
pub(crate) struct DeliveryContext {
    kind: ReportKind,
    handler: Arc<dyn ReportHandler>,
    marker: Arc<dyn SubmissionMarker>,
    events: Arc<dyn EventPublisher>,
    retry: RetryPolicy,
    /// Failed attempts per report UID, shared across kinds
    attempts: Arc<DashMap<String, u32>>,
}

/// Errors returned from a delivery
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The handler failed; redeliver after its delay
    #[error(transparent)]
    Submission(#[from] RetryableFailure),

    /// Submission succeeded but the report could not be marked
    #[error("failed to mark report as submitted: {0}")]
    Mark(#[source] Error),

    /// The watched object could not be turned into an event
    #[error("invalid report object: {0}")]
    Decode(#[source] Error),
}

fn attempt_key(obj: &DynamicObject) -> String {
    obj.uid().unwrap_or_else(|| {
        format!(
            "{}/{}",
            obj.namespace().unwrap_or_default(),
            obj.name_any()
        )
    })
}

/// Deliver one report to the handler and mark it on success
pub(crate) async fn deliver(
    obj: Arc<DynamicObject>,
    ctx: Arc<DeliveryContext>,
) -> Result<Action, DeliveryError> {
    let name = obj.name_any();
    let namespace = obj.namespace();

    if obj.metadata.deletion_timestamp.is_some() {
        ctx.attempts.remove(&attempt_key(&obj));
        debug!(kind = %ctx.kind, name = %name, "Report is being deleted, skipping");
        return Ok(Action::await_change());
    }
    if obj.annotations().contains_key(SUBMITTED_ANNOTATION) {
        debug!(kind = %ctx.kind, name = %name, "Report already submitted, skipping");
        return Ok(Action::await_change());
    }

    let event = ResourceEvent::from_object(ctx.kind, &obj).map_err(DeliveryError::Decode)?;
    let resource_ref = obj.object_ref(&ctx.kind.api_resource());
    let key = attempt_key(&obj);

    match ctx.handler.handle(&event).await {
        Ok(outcome) => {
            ctx.attempts.remove(&key);
            ctx.marker
                .mark_submitted(ctx.kind, namespace, name, Utc::now())
                .await
                .map_err(DeliveryError::Mark)?;
            ctx.events
                .publish(
                    &resource_ref,
                    EventType::Normal,
                    reasons::SUBMITTED,
                    actions::SUBMIT,
                    Some(format!(
                        "Submitted to DefectDojo product {}",
                        outcome.product_id
                    )),
                )
                .await;
            Ok(Action::await_change())
        }
        Err(failure) => {
            let attempts = {
                let mut entry = ctx.attempts.entry(key.clone()).or_insert(0);
                *entry += 1;
                *entry
            };

            match ctx.retry.decide(attempts) {
                RetryDecision::RetryAfter(delay) => {
                    ctx.events
                        .publish(
                            &resource_ref,
                            EventType::Warning,
                            reasons::SUBMISSION_FAILED,
                            actions::SUBMIT,
                            Some(format!(
                                "Attempt {} failed, retrying in {}s: {}",
                                attempts,
                                delay.as_secs(),
                                failure.source
                            )),
                        )
                        .await;
                    Err(DeliveryError::Submission(failure))
                }
                RetryDecision::GiveUp => {
                    // Fresh budget if the report changes later
                    ctx.attempts.remove(&key);
                    error!(
                        kind = %ctx.kind,
                        name = %event.name(),
                        namespace = event.namespace().unwrap_or_default(),
                        attempts,
                        error = %failure.source,
                        "Giving up on report after repeated failures"
                    );
                    ctx.events
                        .publish(
                            &resource_ref,
                            EventType::Warning,
                            reasons::RETRIES_EXHAUSTED,
                            actions::SUBMIT,
                            Some(format!(
                                "Gave up after {} attempts: {}",
                                attempts, failure.source
                            )),
                        )
                        .await;
                    Ok(Action::await_change())
                }
            }
        }
    }
}

/// Requeue failed deliveries after the failure's delay
pub(crate) fn error_policy(
    obj: Arc<DynamicObject>,
    error: &DeliveryError,
    ctx: Arc<DeliveryContext>,
) -> Action {
    match error {
        DeliveryError::Submission(failure) => Action::requeue(failure.delay),
        DeliveryError::Mark(e) => {
            warn!(
                kind = %ctx.kind,
                name = %obj.name_any(),
                error = %e,
                "Failed to mark submitted report, redelivering"
            );
            Action::requeue(ctx.retry.delay)
        }
        DeliveryError::Decode(e) => {
            error!(
                kind = %ctx.kind,
                name = %obj.name_any(),
                error = %e,
                "Dropping undecodable report"
            );
            Action::await_change()
        }
    }
}

fn log_delivery_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    kind: ReportKind,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => debug!(?action, kind = %kind, "Delivery completed"),
            Err(e) => debug!(error = ?e, kind = %kind, "Delivery error"),
        }
        std::future::ready(())
    }
}
