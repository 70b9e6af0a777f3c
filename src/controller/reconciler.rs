//! Reconciliation logic for MySQL resources
//!
//! One pass walks the database towards its desired state:
//! finalizer, validation, dormant match, child objects, optional pod wait,
//! initial restore, phase update, then the isolated backup and monitor steps.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::wait::await_condition;
use kube::{Api, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::lifecycle::{
    DormantMatch, TerminationAction, dormant_from, match_dormant, secret_referenced,
    termination_action,
};
use crate::controller::monitor::{
    MonitorRegistration, agent_by_name, agent_for, stale_registration,
};
use crate::controller::state_machine::{
    DatabaseEvent, DatabaseStateMachine, TransitionContext, TransitionResult, determine_event,
};
use crate::controller::status::{StatusManager, spec_changed};
use crate::controller::validation::{ValidationFailure, validate, validate_version};
use crate::crd::{
    DatabasePhase, DormantDatabase, MySQL, MySQLVersion, SecretReference, Snapshot,
    default_auth_secret_name,
};
use crate::events::{actions, reasons};
use crate::resources::common::{FIELD_MANAGER, backup_cronjob_name, selector_labels, snapshot_sa_name};
use crate::resources::ensure::{Verb, delete_by_labels, delete_if_exists, ensure_object, label_selector};
use crate::resources::{backup, job, rbac, secret, service, statefulset};

/// Finalizer guarding the deletion path
pub const FINALIZER: &str = "kubedb.com";

/// Requeue delay after adding the finalizer
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Main reconciliation function
#[instrument(skip(db, ctx), fields(name = %db.name_any(), namespace = db.namespace().unwrap_or_default()))]
pub async fn reconcile(db: Arc<MySQL>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let ns = db.namespace().unwrap_or_default();
    let name = db.name_any();

    let result = reconcile_inner(&db, &ctx, &ns).await;

    if let Some(health) = &ctx.health_state {
        health
            .metrics
            .record_reconcile(&ns, &name, started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => health.metrics.mark_reconciled(),
            Err(_) => health.metrics.record_error(&ns, &name),
        }
    }
    result
}

async fn reconcile_inner(db: &MySQL, ctx: &Context, ns: &str) -> Result<Action> {
    if db.metadata.deletion_timestamp.is_some() {
        return handle_deletion(db, ctx, ns).await;
    }

    if !has_finalizer(db) {
        add_finalizer(db, ctx, ns).await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    let phase = db.phase();
    if !spec_changed(db) && phase == DatabasePhase::Running {
        debug!(
            generation = ?db.metadata.generation,
            "Spec unchanged, refreshing status only"
        );
        return check_and_update_status(db, ctx, ns).await;
    }

    info!(phase = %phase, "Reconciling MySQL");
    let status = StatusManager::new(db, ctx, ns);
    match reconcile_database(db, ctx, ns, &status).await {
        Ok(action) => Ok(action),
        Err(e) => {
            error!(error = %e, "Reconciliation failed");
            ctx.warn(db, failure_reason(&e), actions::RECONCILE, e.to_string()).await;
            let tctx = TransitionContext {
                error_message: Some(e.to_string()),
                ..Default::default()
            };
            let current = status.current().phase;
            let failed = next_phase(current, determine_event(current, &tctx, false), &tctx);
            if let Err(status_err) = status.set_failed(failed, e.reason(), &e.to_string()).await {
                warn!(error = %status_err, "Failed to record failure in status");
            }
            Err(e)
        }
    }
}

fn failure_reason(e: &Error) -> &'static str {
    match e {
        Error::ValidationError(_) => reasons::INVALID,
        Error::OwnershipConflictError { .. } => reasons::OWNERSHIP_CONFLICT,
        _ => reasons::FAILED_TO_CREATE,
    }
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(db: Arc<MySQL>, error: &Error, _ctx: Arc<Context>) -> Action {
    let backoff = BackoffConfig::default();
    // Controller does not expose a per-object retry count
    let delay = backoff.delay_for_error(error, 0);

    if error.is_retryable() {
        warn!(name = %db.name_any(), error = %error, ?delay, "Retryable error, requeuing");
    } else {
        error!(name = %db.name_any(), error = %error, ?delay, "Non-retryable error, requeuing for manual intervention");
    }
    Action::requeue(delay)
}

/// Pure phase step through the state machine; an event without a valid
/// transition leaves the phase unchanged
pub fn next_phase(current: DatabasePhase, event: DatabaseEvent, tctx: &TransitionContext) -> DatabasePhase {
    let sm = DatabaseStateMachine::new();
    match sm.transition(current, event, tctx) {
        TransitionResult::Success { to, description, .. } => {
            debug!(from = %current, to = %to, %event, description, "Phase transition");
            to
        }
        TransitionResult::GuardFailed { reason, .. } => {
            debug!(phase = %current, %event, %reason, "Transition guard failed");
            current
        }
        TransitionResult::InvalidTransition { .. } => current,
    }
}

async fn reconcile_database(
    db: &MySQL,
    ctx: &Context,
    ns: &str,
    status: &StatusManager<'_>,
) -> Result<Action> {
    let name = db.name_any();
    let mut phase = db.phase();
    let is_add = db.status.as_ref().and_then(|s| s.creation_time.as_ref()).is_none();

    if is_add {
        status
            .set_phase(DatabasePhase::Creating, reasons::CREATING, "Creating database")
            .await?;
        phase = DatabasePhase::Creating;
    }

    let version = match validate(ctx.lookup.as_ref(), db).await {
        Ok(()) => validate_version(ctx.lookup.as_ref(), &db.spec.version).await,
        Err(e) => Err(e),
    };
    let version = match version {
        Ok(v) => v,
        Err(ValidationFailure::Violation(v)) => return Err(Error::ValidationError(v)),
        Err(ValidationFailure::Lookup(e)) => return Err(Error::KubeError(e)),
    };

    let mut init_done = db.spec.init.as_ref().is_none_or(|i| i.initialized);

    let resumed = if matches!(phase, DatabasePhase::Creating | DatabasePhase::Resuming) {
        match_existing_dormant(db, ctx, ns).await?
    } else {
        false
    };
    if resumed {
        let tctx = TransitionContext {
            dormant_matched: true,
            ..Default::default()
        };
        phase = next_phase(phase, DatabaseEvent::ResumeRequested, &tctx);
        status
            .set_phase(phase, reasons::RESUMING, "Resuming from DormantDatabase")
            .await?;
        ctx.normal(db, reasons::RESUMING, actions::RESUME, "Resuming from DormantDatabase".to_string()).await;
        // data is already on the preserved volumes
        if !init_done {
            mark_initialized(db, ctx, ns).await?;
            init_done = true;
        }
    } else if is_add {
        ctx.normal(db, reasons::CREATING, actions::CREATE, "Creating Kubernetes objects".to_string()).await;
    }

    ensure_governing_service(ctx, ns).await?;
    ensure_primary_service(db, ctx, ns).await?;
    let secret_name = ensure_auth_secret(db, ctx, ns).await?;
    if ctx.config.enable_rbac {
        ensure_rbac(db, ctx, ns).await?;
    }

    // workloads must mount the resolved secret even before the spec patch lands
    let mut resolved = db.clone();
    resolved.spec.database_secret = Some(SecretReference { secret_name });
    let sts_verb = ensure_statefulset(&resolved, ctx, ns, &version).await?;
    if sts_verb == Verb::Created {
        let message = "Successfully created StatefulSet".to_string();
        ctx.normal(db, reasons::SUCCESSFUL_CREATE, actions::CREATE, message).await;
    }

    if ctx.config.wait_for_pods_ready && matches!(phase, DatabasePhase::Creating | DatabasePhase::Resuming) {
        wait_for_pods_ready(db, ctx, ns).await?;
    }

    if resumed {
        let dormants: Api<DormantDatabase> = Api::namespaced(ctx.client.clone(), ns);
        delete_if_exists(&dormants, &name).await?;
        info!("Resumed from DormantDatabase");
    }

    let may_restore = matches!(
        phase,
        DatabasePhase::Creating | DatabasePhase::Initializing | DatabasePhase::Failed
    );
    if !init_done && may_restore && db.spec.init_snapshot().is_some() {
        let wait = db.spec.init.as_ref().is_some_and(|i| i.wait_for_initial_restore);
        phase = next_phase(phase, DatabaseEvent::InitRequired, &TransitionContext::new(true));
        status
            .set_phase(phase, reasons::INITIALIZING, "Restoring initial snapshot")
            .await?;

        match run_initial_restore(&resolved, ctx, ns, &version, status).await {
            Ok(()) => {
                let tctx = TransitionContext {
                    restore_completed: true,
                    ..Default::default()
                };
                phase = next_phase(phase, DatabaseEvent::RestoreSucceeded, &tctx);
            }
            Err(e) if wait => return Err(e),
            Err(e) => {
                // without waitForInitialRestore a failed restore is only reported
                warn!(error = %e, "Initial restore failed");
            }
        }
    }

    phase = next_phase(phase, DatabaseEvent::ResourcesApplied, &TransitionContext::new(false));
    status
        .set_phase(phase, "DatabaseReady", "All database objects are in place")
        .await?;

    ensure_backup_schedule(db, ctx, ns, &version).await;
    reconcile_monitor(db, ctx, status).await;

    info!(phase = %phase, "Reconciliation completed successfully");
    Ok(Action::requeue(ctx.config.requeue_interval))
}

/// Check and update status without a full reconcile
async fn check_and_update_status(db: &MySQL, ctx: &Context, ns: &str) -> Result<Action> {
    let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), ns);
    if let Some(health) = &ctx.health_state
        && let Some(sts) = sts_api.get_opt(&db.name_any()).await?
    {
        let ready = sts.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
        health.metrics.set_database_replicas(
            ns,
            &db.name_any(),
            i64::from(db.spec.replicas),
            i64::from(ready),
        );
    }
    Ok(Action::requeue(ctx.config.requeue_interval))
}

/// Look for a DormantDatabase with this name. `Ok(true)` means resume.
async fn match_existing_dormant(db: &MySQL, ctx: &Context, ns: &str) -> Result<bool> {
    let api: Api<DormantDatabase> = Api::namespaced(ctx.client.clone(), ns);
    let Some(dormant) = api.get_opt(&db.name_any()).await? else {
        return Ok(false);
    };
    match match_dormant(db, &dormant) {
        DormantMatch::Resume => Ok(true),
        DormantMatch::Mismatch(message) => Err(Error::PermanentError(message)),
    }
}

/// The governing Service is shared by the namespace: created when missing,
/// never patched
async fn ensure_governing_service(ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), ns);
    let name = &ctx.config.governing_service;
    if api.get_opt(name).await?.is_some() {
        return Ok(());
    }
    let desired = service::generate_governing_service(name, ns);
    match api.create(&post_params(), &desired).await {
        Ok(_) => {
            info!(service = %name, "Created governing Service");
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn ensure_primary_service(db: &MySQL, ctx: &Context, ns: &str) -> Result<Verb> {
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), ns);
    let desired = service::generate_primary_service(db);
    ensure_object(&api, "Service", &db.name_any(), &desired, service::merge_service).await
}

/// Make sure the auth Secret exists and `spec.databaseSecret` names it.
/// Returns the Secret name.
///
/// A database initialized from a snapshot reuses the credentials of the
/// database the snapshot was taken from when that Secret still exists.
async fn ensure_auth_secret(db: &MySQL, ctx: &Context, ns: &str) -> Result<String> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);

    if let Some(reference) = &db.spec.database_secret {
        if api.get_opt(&reference.secret_name).await?.is_none() {
            return Err(Error::NotFound(format!(
                "database secret \"{}\"",
                reference.secret_name
            )));
        }
        return Ok(reference.secret_name.clone());
    }

    let mut secret_name = default_auth_secret_name(&db.name_any());
    if let Some(source) = db.spec.init_snapshot() {
        let snap_ns = source.namespace.clone().unwrap_or_else(|| ns.to_string());
        let snapshots: Api<Snapshot> = Api::namespaced(ctx.client.clone(), &snap_ns);
        if let Some(snapshot) = snapshots.get_opt(&source.name).await? {
            let origin_secret = default_auth_secret_name(&snapshot.spec.database_name);
            if snap_ns == ns && api.get_opt(&origin_secret).await?.is_some() {
                debug!(secret = %origin_secret, "Reusing credentials of the snapshot origin");
                secret_name = origin_secret;
            }
        }
    }

    if api.get_opt(&secret_name).await?.is_none() {
        let desired = secret::generate_auth_secret(db);
        match api.create(&post_params(), &desired).await {
            Ok(_) => info!(secret = %secret_name, "Created auth Secret"),
            Err(kube::Error::Api(e)) if e.code == 409 => {}
            Err(e) => return Err(e.into()),
        }
    }

    let mysqls: Api<MySQL> = Api::namespaced(ctx.client.clone(), ns);
    let patch = serde_json::json!({
        "spec": { "databaseSecret": { "secretName": secret_name } }
    });
    mysqls
        .patch(&db.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(secret_name)
}

async fn ensure_rbac(db: &MySQL, ctx: &Context, ns: &str) -> Result<()> {
    let db_name = db.name_any();
    let sa_api: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), ns);
    let role_api: Api<Role> = Api::namespaced(ctx.client.clone(), ns);
    let binding_api: Api<RoleBinding> = Api::namespaced(ctx.client.clone(), ns);

    for name in [db_name.clone(), snapshot_sa_name(&db_name)] {
        ensure_object(
            &sa_api,
            "ServiceAccount",
            &db_name,
            &rbac::generate_service_account(db, &name),
            rbac::merge_service_account,
        )
        .await?;
        ensure_object(
            &role_api,
            "Role",
            &db_name,
            &rbac::generate_role(db, &name),
            rbac::merge_role,
        )
        .await?;
        ensure_object(
            &binding_api,
            "RoleBinding",
            &db_name,
            &rbac::generate_role_binding(db, &name),
            rbac::merge_role_binding,
        )
        .await?;
    }
    Ok(())
}

async fn ensure_statefulset(db: &MySQL, ctx: &Context, ns: &str, version: &MySQLVersion) -> Result<Verb> {
    let api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), ns);
    let desired = statefulset::generate_statefulset(db, version, &ctx.config);
    ensure_object(&api, "StatefulSet", &db.name_any(), &desired, statefulset::merge_statefulset).await
}

/// Block until every member is Ready, bounded by the configured timeout
async fn wait_for_pods_ready(db: &MySQL, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), ns);
    let name = db.name_any();
    let want = db.spec.replicas;

    let ready = await_condition(api, &name, move |sts: Option<&StatefulSet>| {
        sts.and_then(|s| s.status.as_ref())
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
            >= want
    });
    match tokio::time::timeout(ctx.config.pod_ready_timeout, ready).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(Error::TransientError(format!("watching StatefulSet {}: {}", name, e))),
        Err(_) => {
            let message = format!(
                "StatefulSet \"{}\" did not become ready within {:?}",
                name, ctx.config.pod_ready_timeout
            );
            ctx.warn(db, reasons::FAILED_TO_START, actions::CREATE, message).await;
            Err(Error::TimeoutError(format!("pods of StatefulSet {}", name)))
        }
    }
}

async fn create_if_absent<K>(api: &Api<K>, desired: &K) -> Result<()>
where
    K: Resource + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
{
    if api.get_opt(&desired.name_any()).await?.is_some() {
        return Ok(());
    }
    match api.create(&post_params(), desired).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Run the restore Job for the init snapshot and wait for it
async fn run_initial_restore(
    db: &MySQL,
    ctx: &Context,
    ns: &str,
    version: &MySQLVersion,
    status: &StatusManager<'_>,
) -> Result<()> {
    let Some(source) = db.spec.init_snapshot() else {
        return Ok(());
    };
    let message = format!("Initializing from Snapshot \"{}\"", source.name);
    ctx.normal(db, reasons::INITIALIZING, actions::RESTORE, message).await;

    let snap_ns = source.namespace.clone().unwrap_or_else(|| ns.to_string());
    let snapshots: Api<Snapshot> = Api::namespaced(ctx.client.clone(), &snap_ns);
    let snapshot = snapshots
        .get_opt(&source.name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Snapshot {}/{}", snap_ns, source.name)))?;

    let pvc_api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), ns);
    let restore_pvc = job::generate_restore_pvc(db, &snapshot);
    if let Some(pvc) = &restore_pvc {
        create_if_absent(&pvc_api, pvc).await?;
    }

    let job_api: Api<Job> = Api::namespaced(ctx.client.clone(), ns);
    let restore_job = job::generate_restore_job(db, &snapshot, version, ctx.config.enable_rbac)?;
    let job_name = restore_job.name_any();
    create_if_absent(&job_api, &restore_job).await?;

    let finished = await_condition(job_api.clone(), &job_name, |j: Option<&Job>| {
        j.and_then(job::job_outcome).is_some()
    });
    let outcome = match tokio::time::timeout(ctx.config.restore_timeout, finished).await {
        Ok(Ok(found)) => found.as_ref().and_then(job::job_outcome),
        Ok(Err(e)) => {
            return Err(Error::TransientError(format!("watching Job {}: {}", job_name, e)));
        }
        Err(_) => {
            let message = format!(
                "Restore Job \"{}\" did not finish within {:?}",
                job_name, ctx.config.restore_timeout
            );
            ctx.warn(db, reasons::FAILED_TO_INITIALIZE, actions::RESTORE, message).await;
            return Err(Error::TimeoutError(format!("restore Job {}", job_name)));
        }
    };

    // the Job and its staging volume are not needed after a terminal outcome
    delete_if_exists(&job_api, &job_name).await?;
    if restore_pvc.is_some() {
        delete_if_exists(&pvc_api, &job_name).await?;
    }

    match outcome {
        Some(job::JobOutcome::Succeeded) => {
            mark_initialized(db, ctx, ns).await?;
            status.set_initialized().await?;
            let message = "Successfully completed initialization".to_string();
            ctx.normal(db, reasons::SUCCESSFUL_INITIALIZE, actions::RESTORE, message).await;
            Ok(())
        }
        _ => {
            let message = "Failed to complete initialization".to_string();
            ctx.warn(db, reasons::FAILED_TO_INITIALIZE, actions::RESTORE, message).await;
            Err(Error::PermanentError(format!("restore Job {} failed", job_name)))
        }
    }
}

/// Set `spec.init.initialized` so the restore never runs again
async fn mark_initialized(db: &MySQL, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<MySQL> = Api::namespaced(ctx.client.clone(), ns);
    let patch = serde_json::json!({ "spec": { "init": { "initialized": true } } });
    api.patch(&db.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Create, update or stop the backup CronJob. Failures emit an event only.
async fn ensure_backup_schedule(db: &MySQL, ctx: &Context, ns: &str, version: &MySQLVersion) {
    let api: Api<CronJob> = Api::namespaced(ctx.client.clone(), ns);
    let result = match &db.spec.backup_schedule {
        Some(schedule) => {
            match backup::generate_backup_cronjob(db, schedule, version, ctx.config.enable_rbac) {
                Ok(desired) => {
                    ensure_object(&api, "CronJob", &db.name_any(), &desired, backup::merge_backup_cronjob)
                        .await
                        .map(|_| ())
                }
                Err(e) => Err(e),
            }
        }
        None => delete_if_exists(&api, &backup_cronjob_name(&db.name_any()))
            .await
            .map(|_| ()),
    };

    if let Err(e) = result {
        warn!(error = %e, "Failed to reconcile backup schedule");
        let message = format!("Failed to schedule snapshot. Reason: {}", e);
        ctx.warn(db, reasons::FAILED_TO_SCHEDULE, actions::BACKUP, message).await;
    }
}

/// Register the monitor agent, tearing down the previous registration when
/// the agent or its target namespace changed. Failures emit an event only.
async fn reconcile_monitor(db: &MySQL, ctx: &Context, status: &StatusManager<'_>) {
    let previous = MonitorRegistration::recorded(&status.current());
    let prometheus = db.spec.monitor.as_ref().and_then(|m| m.prometheus.clone());

    let desired = match db.spec.monitor.as_ref().map(agent_for).transpose() {
        Ok(agent) => agent,
        Err(e) => {
            ctx.warn(db, reasons::FAILED_TO_MONITOR, actions::MONITOR, e.to_string()).await;
            return;
        }
    };
    let registration = desired.as_ref().map(|agent| agent.registration(db));

    if let Some(stale) = stale_registration(previous.as_ref(), registration.as_ref()) {
        let removed = match agent_by_name(&stale.agent, prometheus) {
            Ok(agent) => agent.delete(ctx, db, &stale).await,
            Err(e) => Err(e),
        };
        if let Err(e) = removed {
            warn!(agent = %stale.agent, error = %e, "Failed to remove previous monitor agent");
            let message = format!(
                "Failed to remove monitoring agent \"{}\". Reason: {}",
                stale.agent, e
            );
            ctx.warn(db, reasons::FAILED_TO_MONITOR, actions::MONITOR, message).await;
            return;
        }
    }

    if let Some(agent) = &desired {
        match agent.ensure(ctx, db).await {
            Ok(Verb::Created) => {
                let message = "Successfully added monitoring system".to_string();
                ctx.normal(db, reasons::SUCCESSFUL_MONITOR, actions::MONITOR, message).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to add monitoring system");
                let message = format!("Failed to add monitoring system. Reason: {}", e);
                ctx.warn(db, reasons::FAILED_TO_MONITOR, actions::MONITOR, message).await;
                return;
            }
        }
    }

    if let Err(e) = status.set_monitor_registration(registration).await {
        warn!(error = %e, "Failed to record monitor agent");
    }
}

/// Check if the finalizer is present
fn has_finalizer(db: &MySQL) -> bool {
    db.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the finalizer to the resource
async fn add_finalizer(db: &MySQL, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<MySQL> = Api::namespaced(ctx.client.clone(), ns);
    let mut finalizers = db.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });

    api.patch(&db.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    info!("Added finalizer");
    Ok(())
}

async fn remove_finalizer(db: &MySQL, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<MySQL> = Api::namespaced(ctx.client.clone(), ns);
    let finalizers: Vec<&String> = db.finalizers().iter().filter(|f| *f != FINALIZER).collect();
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });

    match api
        .patch(&db.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => {
            info!("Removed finalizer");
            Ok(())
        }
        Err(e) if crate::controller::error::is_kube_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Handle deletion of the MySQL according to its termination policy
async fn handle_deletion(db: &MySQL, ctx: &Context, ns: &str) -> Result<Action> {
    if !has_finalizer(db) {
        return Ok(Action::await_change());
    }
    let name = db.name_any();
    let action = termination_action(db);
    info!(policy = %db.spec.termination_policy, ?action, "Handling deletion");

    if action == TerminationAction::Block {
        let message = format!("MySQL \"{}\" is locked by its termination policy", name);
        ctx.warn(db, reasons::FAILED_TO_DELETE, actions::DELETE, message).await;
        return Ok(Action::requeue(ctx.config.requeue_interval));
    }

    let status = StatusManager::new(db, ctx, ns);
    let terminating = next_phase(db.phase(), DatabaseEvent::DeletionRequested, &TransitionContext::default());
    if let Err(e) = status.set_phase(terminating, "Terminating", "Database is being deleted").await {
        debug!(error = %e, "Could not record Terminating phase");
    }

    match action {
        TerminationAction::Halt => {
            ctx.normal(db, reasons::PAUSING, actions::HALT, "Pausing MySQL".to_string()).await;
            let dormants: Api<DormantDatabase> = Api::namespaced(ctx.client.clone(), ns);
            if let Err(e) = create_if_absent(&dormants, &dormant_from(db)?).await {
                let message = format!("Failed to create DormantDatabase \"{}\": {}", name, e);
                ctx.warn(db, reasons::FAILED_TO_PAUSE, actions::HALT, message).await;
                return Err(e);
            }
            let message = format!("Successfully created DormantDatabase \"{}\"", name);
            ctx.normal(db, reasons::SUCCESSFUL_PAUSE, actions::HALT, message).await;
            let paused = next_phase(terminating, DatabaseEvent::Halted, &TransitionContext::default());
            if let Err(e) = status.set_phase(paused, reasons::SUCCESSFUL_PAUSE, "Database halted").await {
                debug!(error = %e, "Could not record Paused phase");
            }
        }
        TerminationAction::Skip => {
            ctx.normal(db, reasons::IGNORED, actions::HALT, "Dormant database creation skipped".to_string()).await;
        }
        TerminationAction::Delete => {
            delete_volumes(ctx, ns, &name).await?;
        }
        TerminationAction::WipeOut => {
            delete_volumes(ctx, ns, &name).await?;
            delete_auth_secret(ctx, ns, &name, &db.auth_secret_name()).await?;
            let dormants: Api<DormantDatabase> = Api::namespaced(ctx.client.clone(), ns);
            delete_if_exists(&dormants, &name).await?;
        }
        TerminationAction::Block => {}
    }

    stop_backups(db, ctx, ns).await;
    teardown_monitor(db, ctx).await;
    remove_finalizer(db, ctx, ns).await?;
    Ok(Action::await_change())
}

/// Remove the data volumes of a database
pub(crate) async fn delete_volumes(ctx: &Context, ns: &str, db_name: &str) -> Result<()> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), ns);
    delete_by_labels(&api, &label_selector(&selector_labels(db_name))).await?;
    debug!(database = db_name, "Deleted data volumes");
    Ok(())
}

/// Delete an auth Secret unless another database still references it
pub(crate) async fn delete_auth_secret(ctx: &Context, ns: &str, db_name: &str, secret_name: &str) -> Result<()> {
    let mysqls: Api<MySQL> = Api::namespaced(ctx.client.clone(), ns);
    let dormants: Api<DormantDatabase> = Api::namespaced(ctx.client.clone(), ns);
    let databases = mysqls.list(&ListParams::default()).await?.items;
    let dormant_list = dormants.list(&ListParams::default()).await?.items;

    if secret_referenced(secret_name, db_name, &databases, &dormant_list) {
        info!(secret = secret_name, "Auth Secret still in use, keeping it");
        return Ok(());
    }
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
    delete_if_exists(&secrets, secret_name).await?;
    Ok(())
}

async fn stop_backups(db: &MySQL, ctx: &Context, ns: &str) {
    let api: Api<CronJob> = Api::namespaced(ctx.client.clone(), ns);
    if let Err(e) = delete_if_exists(&api, &backup_cronjob_name(&db.name_any())).await {
        warn!(error = %e, "Failed to stop scheduled backups");
        ctx.warn(db, reasons::FAILED_TO_DELETE, actions::BACKUP, e.to_string()).await;
    }
}

async fn teardown_monitor(db: &MySQL, ctx: &Context) {
    let prometheus = db.spec.monitor.as_ref().and_then(|m| m.prometheus.clone());
    let recorded = db.status.as_ref().and_then(MonitorRegistration::recorded);
    let registration = match recorded {
        Some(r) => r,
        None => match db.spec.monitor.as_ref().map(agent_for).transpose() {
            Ok(Some(agent)) => agent.registration(db),
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to resolve monitor agent");
                return;
            }
        },
    };

    let removed = match agent_by_name(&registration.agent, prometheus) {
        Ok(agent) => agent.delete(ctx, db, &registration).await,
        Err(e) => Err(e),
    };
    if let Err(e) = removed {
        warn!(agent = %registration.agent, error = %e, "Failed to remove monitor agent");
        ctx.warn(db, reasons::FAILED_TO_MONITOR, actions::MONITOR, e.to_string()).await;
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}
