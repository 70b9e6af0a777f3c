//! Status and conditions management for MySQL resources

use std::sync::Mutex;

use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use tracing::debug;

use crate::controller::Context;
use crate::controller::error::{Error, Result, is_kube_conflict};
use crate::controller::monitor::MonitorRegistration;
use crate::crd::{Condition, DatabasePhase, MySQL, MySQLStatus};
use crate::resources::common::FIELD_MANAGER;
use crate::resources::ensure::DEFAULT_PATCH_ATTEMPTS;

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// Database is ready to serve clients
    pub const READY: &str = "Ready";
    /// Database is progressing towards a goal state
    pub const PROGRESSING: &str = "Progressing";
    /// Database is not in its desired state
    pub const DEGRADED: &str = "Degraded";
    /// Primary Service accepts TCP connections
    pub const ACCEPTING_CONNECTION: &str = "AcceptingConnection";
    /// Initial data has been loaded
    pub const INITIALIZED: &str = "Initialized";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

fn bool_status(value: bool) -> &'static str {
    if value {
        condition_status::TRUE
    } else {
        condition_status::FALSE
    }
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't
    ///
    /// `lastTransitionTime` only moves when the status flips.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Utc::now().to_rfc3339();
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Utc::now().to_rfc3339(),
                observed_generation: self.generation,
            });
        }
        self
    }

    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::READY, bool_status(is_ready), reason, message)
    }

    pub fn progressing(self, is_progressing: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::PROGRESSING,
            bool_status(is_progressing),
            reason,
            message,
        )
    }

    pub fn degraded(self, is_degraded: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::DEGRADED, bool_status(is_degraded), reason, message)
    }

    pub fn accepting_connection(self, accepting: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::ACCEPTING_CONNECTION,
            bool_status(accepting),
            reason,
            message,
        )
    }

    pub fn initialized(self, done: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::INITIALIZED, bool_status(done), reason, message)
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Conditions describing `phase`
pub fn phase_conditions(
    existing: Vec<Condition>,
    generation: Option<i64>,
    phase: DatabasePhase,
    reason: &str,
    message: &str,
) -> Vec<Condition> {
    let builder = ConditionBuilder::from_existing(existing, generation);
    match phase {
        DatabasePhase::Running => builder
            .ready(true, reason, message)
            .progressing(false, "Stable", "Database is stable")
            .degraded(false, "Healthy", "Database is healthy"),
        DatabasePhase::Creating | DatabasePhase::Resuming => builder
            .ready(false, reason, message)
            .progressing(true, reason, message)
            .degraded(false, "NotApplicable", message),
        DatabasePhase::Initializing => builder
            .ready(false, reason, message)
            .progressing(true, reason, message)
            .initialized(false, reason, message),
        DatabasePhase::Failed => builder
            .ready(false, reason, message)
            .progressing(false, "Failed", message)
            .degraded(true, reason, message),
        DatabasePhase::Terminating | DatabasePhase::Paused => builder
            .ready(false, reason, message)
            .progressing(true, reason, message),
    }
    .build()
}

/// Status manager for MySQL resources
///
/// Keeps the last written status so successive writes within one reconcile
/// pass build on each other instead of on the object snapshot.
pub struct StatusManager<'a> {
    db: &'a MySQL,
    ctx: &'a Context,
    ns: &'a str,
    written: Mutex<Option<MySQLStatus>>,
}

impl<'a> StatusManager<'a> {
    pub fn new(db: &'a MySQL, ctx: &'a Context, ns: &'a str) -> Self {
        Self {
            db,
            ctx,
            ns,
            written: Mutex::new(None),
        }
    }

    /// Latest known status
    pub fn current(&self) -> MySQLStatus {
        self.written
            .lock()
            .ok()
            .and_then(|w| w.clone())
            .or_else(|| self.db.status.clone())
            .unwrap_or_default()
    }

    /// Replace the status subresource
    pub async fn update(&self, status: MySQLStatus) -> Result<()> {
        let api: Api<MySQL> = Api::namespaced(self.ctx.client.clone(), self.ns);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            &self.db.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        if let Ok(mut written) = self.written.lock() {
            *written = Some(status);
        }
        Ok(())
    }

    /// Record a phase, stamping the creation time the first time
    pub async fn set_phase(&self, phase: DatabasePhase, reason: &str, message: &str) -> Result<()> {
        let generation = self.db.metadata.generation;
        let mut status = self.current();
        status.conditions = phase_conditions(status.conditions, generation, phase, reason, message);
        status.phase = phase;
        status.observed_generation = generation;
        if status.creation_time.is_none() {
            status.creation_time = Some(Utc::now().to_rfc3339());
        }
        if phase != DatabasePhase::Failed {
            status.reason = None;
        }
        self.update(status).await
    }

    /// Record a failure; `phase` is where the state machine moved the
    /// database, normally Failed
    pub async fn set_failed(&self, phase: DatabasePhase, reason: &str, message: &str) -> Result<()> {
        let generation = self.db.metadata.generation;
        let mut status = self.current();
        status.conditions = phase_conditions(status.conditions, generation, phase, reason, message);
        status.phase = phase;
        status.reason = Some(message.to_string());
        if status.creation_time.is_none() {
            status.creation_time = Some(Utc::now().to_rfc3339());
        }
        self.update(status).await
    }

    /// Record the completed initial restore
    pub async fn set_initialized(&self) -> Result<()> {
        let mut status = self.current();
        status.conditions = ConditionBuilder::from_existing(status.conditions, self.db.metadata.generation)
            .initialized(true, "RestoreSucceeded", "Initial snapshot restored")
            .build();
        self.update(status).await
    }

    /// Record the monitor registration made by this pass
    pub async fn set_monitor_registration(&self, registration: Option<MonitorRegistration>) -> Result<()> {
        let mut status = self.current();
        if MonitorRegistration::recorded(&status) == registration {
            return Ok(());
        }
        status.monitor_agent = registration.as_ref().map(|r| r.agent.clone());
        status.monitor_namespace = registration.and_then(|r| r.namespace);
        self.update(status).await
    }

    /// Record the result of a connection check without touching the phase
    ///
    /// Reads the object fresh and writes only the conditions, guarded by the
    /// read resourceVersion. A database that left Running in the meantime is
    /// skipped.
    pub async fn set_connection(&self, accepting: bool, message: &str) -> Result<()> {
        let api: Api<MySQL> = Api::namespaced(self.ctx.client.clone(), self.ns);
        let name = self.db.name_any();

        for attempt in 1..=DEFAULT_PATCH_ATTEMPTS {
            let fresh = api.get(&name).await?;
            let Some(patch) = connection_patch(&fresh, accepting, message) else {
                debug!(name = %name, phase = %fresh.phase(), "Not running, skipping connection status");
                return Ok(());
            };
            match api
                .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if is_kube_conflict(&e) && attempt < DEFAULT_PATCH_ATTEMPTS => {
                    debug!(name = %name, attempt, "Status changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::TransientError(format!(
            "gave up recording connection state of {} after {} conflicting writes",
            name, DEFAULT_PATCH_ATTEMPTS
        )))
    }
}

/// Merge patch recording a connection check on a freshly read object
///
/// Carries the conditions and the read resourceVersion only, never the
/// phase. `None` unless the database is Running.
pub fn connection_patch(fresh: &MySQL, accepting: bool, message: &str) -> Option<serde_json::Value> {
    let status = fresh.status.clone().unwrap_or_default();
    if status.phase != DatabasePhase::Running {
        return None;
    }
    let reason = if accepting {
        "ConnectionSucceeded"
    } else {
        "ConnectionFailed"
    };
    let conditions = ConditionBuilder::from_existing(status.conditions, status.observed_generation)
        .accepting_connection(accepting, reason, message)
        .ready(accepting, reason, message)
        .build();

    Some(serde_json::json!({
        "metadata": { "resourceVersion": fresh.resource_version() },
        "status": { "conditions": conditions },
    }))
}

/// Check if the spec has changed by comparing observed generation
pub fn spec_changed(db: &MySQL) -> bool {
    let current_generation = db.metadata.generation;
    let observed_generation = db.status.as_ref().and_then(|s| s.observed_generation);

    match (current_generation, observed_generation) {
        (Some(current), Some(observed)) => current != observed,
        _ => true,
    }
}
