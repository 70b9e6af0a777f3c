//! Kubernetes Event recording
//!
//! Events are fire-and-forget: a failed publish is logged and never fails a
//! reconcile pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Publishes Kubernetes Events about an object
#[async_trait]
pub trait EventPublisher: Send + Sync {
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
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Event reasons shown in the REASON column of `kubectl get events`
pub mod reasons {
    pub const CREATING: &str = "Creating";
    pub const SUCCESSFUL_CREATE: &str = "SuccessfulCreate";
    pub const FAILED_TO_CREATE: &str = "FailedToCreate";
    pub const FAILED_TO_DELETE: &str = "FailedToDelete";
    pub const FAILED_TO_START: &str = "FailedToStart";
    pub const INVALID: &str = "Invalid";
    pub const INITIALIZING: &str = "Initializing";
    pub const SUCCESSFUL_INITIALIZE: &str = "SuccessfulInitialize";
    pub const FAILED_TO_INITIALIZE: &str = "FailedToInitialize";
    pub const RESUMING: &str = "Resuming";
    pub const PAUSING: &str = "Pausing";
    pub const SUCCESSFUL_PAUSE: &str = "SuccessfulPause";
    pub const FAILED_TO_PAUSE: &str = "FailedToPause";
    pub const WIPING_OUT: &str = "WipingOut";
    pub const SUCCESSFUL_WIPE_OUT: &str = "SuccessfulWipeOut";
    pub const FAILED_TO_WIPE_OUT: &str = "FailedToWipeOut";
    pub const FAILED_TO_SCHEDULE: &str = "FailedToSchedule";
    pub const SUCCESSFUL_MONITOR: &str = "SuccessfulMonitor";
    pub const FAILED_TO_MONITOR: &str = "FailedToMonitor";
    pub const OWNERSHIP_CONFLICT: &str = "OwnershipConflict";
    pub const IGNORED: &str = "Ignored";
}

/// Event actions shown in the ACTION column of `kubectl get events`
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const CREATE: &str = "Create";
    pub const UPDATE: &str = "Update";
    pub const DELETE: &str = "Delete";
    pub const RESTORE: &str = "Restore";
    pub const BACKUP: &str = "Backup";
    pub const MONITOR: &str = "Monitor";
    pub const HALT: &str = "Halt";
    pub const RESUME: &str = "Resume";
    pub const WIPE_OUT: &str = "WipeOut";
}
