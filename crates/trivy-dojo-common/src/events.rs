//! Kubernetes Events for submission outcomes.
//!
//! Each report gets an Event when it is submitted to DefectDojo and when a
//! submission attempt fails, so `kubectl describe vulnerabilityreport ...`
//! shows whether the findings made it across.
//!
//! Publishing never fails the caller: errors are logged as warnings and
//! dropped.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about report resources
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on the given resource.
    ///
    /// * `reason` - machine-readable reason (see [`reasons`])
    /// * `action` - what the operator did (see [`actions`])
    /// * `note` - optional human-readable detail
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: note.map(truncate_note),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                resource = resource_ref.name.as_deref().unwrap_or_default(),
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// The API server rejects Event notes longer than 1 KiB
const MAX_NOTE_BYTES: usize = 1024;

fn truncate_note(mut note: String) -> String {
    if note.len() > MAX_NOTE_BYTES {
        let mut end = MAX_NOTE_BYTES;
        while !note.is_char_boundary(end) {
            end -= 1;
        }
        note.truncate(end);
    }
    note
}

/// Event reasons, shown under REASON in `kubectl get events`
pub mod reasons {
    /// Report was imported, tagged and linked in DefectDojo
    pub const SUBMITTED: &str = "Submitted";
    /// A submission attempt failed and will be retried
    pub const SUBMISSION_FAILED: &str = "SubmissionFailed";
    /// The attempt cap was reached; the report is no longer redelivered
    pub const RETRIES_EXHAUSTED: &str = "RetriesExhausted";
}

/// Event actions, shown under ACTION in `kubectl get events`
pub mod actions {
    /// Submission of a report to DefectDojo
    pub const SUBMIT: &str = "Submit";
}
