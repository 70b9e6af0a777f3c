pub mod config;
pub mod controller;
pub mod crd;
pub mod events;
pub mod health;
pub mod resources;
pub mod webhooks;

pub use config::OperatorConfig;
pub use controller::{
    BackoffConfig, Context, Error, FINALIZER, Result, dormant_error_policy, error_policy,
    reconcile, reconcile_dormant, run_health_checker,
};
pub use crd::{DormantDatabase, MySQL, MySQLVersion, Snapshot};
pub use health::{HealthState, Metrics};
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, run_webhook_server,
};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::{Action, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::Controller;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

type ControllerResult<K> = std::result::Result<
    (ObjectRef<K>, Action),
    ControllerError<Error, watcher::Error>,
>;

fn log_result<K: Resource>(kind: &'static str, result: ControllerResult<K>) {
    match result {
        Ok((obj, _action)) => {
            tracing::debug!(kind, name = %obj.name, "Reconciled");
        }
        Err(ControllerError::ObjectNotFound(obj)) => {
            // related watch events can arrive after the object is gone
            tracing::debug!(kind, name = %obj.name, "Object no longer exists");
        }
        Err(ControllerError::ReconcilerFailed(err, obj)) if err.is_not_found() => {
            tracing::debug!(kind, name = %obj.name, "Object no longer exists (likely deleted)");
        }
        Err(e) => {
            tracing::error!(kind, error = ?e, "Reconciliation error");
        }
    }
}

/// Run the MySQL controller (cluster-wide).
///
/// Watches MySQL resources and the children they own. If health_state is
/// provided, metrics are recorded for reconciliations.
pub async fn run_controller(client: Client, config: OperatorConfig, health_state: Option<Arc<HealthState>>) {
    run_controller_scoped(client, config, health_state, None).await
}

/// Run the MySQL controller with optional namespace scoping.
///
/// Use the scoped version for integration tests to enable parallel test execution.
pub async fn run_controller_scoped(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) {
    tracing::info!(
        scope = namespace.unwrap_or("cluster-wide"),
        "Starting controller for MySQL resources"
    );

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), config, health_state));

    let mysqls: Api<MySQL> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let jobs: Api<Job> = scoped_api(client.clone(), namespace);
    let cronjobs: Api<CronJob> = scoped_api(client.clone(), namespace);

    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(mysqls, watcher_config.clone())
        .owns(statefulsets, watcher_config.clone())
        .owns(services, watcher_config.clone())
        .owns(jobs, watcher_config.clone())
        .owns(cronjobs, watcher_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move { log_result("MySQL", result) })
        .await;

    // This should never complete in normal operation
    tracing::error!("MySQL controller stream ended unexpectedly");
}

/// Run the DormantDatabase controller with optional namespace scoping.
pub async fn run_dormant_controller(client: Client, config: OperatorConfig, namespace: Option<&str>) {
    tracing::info!(
        scope = namespace.unwrap_or("cluster-wide"),
        "Starting controller for DormantDatabase resources"
    );

    let ctx = Arc::new(Context::new(client.clone(), config, None));
    let dormants: Api<DormantDatabase> = scoped_api(client, namespace);

    Controller::new(dormants, WatcherConfig::default().any_semantic())
        .run(reconcile_dormant, dormant_error_policy, ctx)
        .for_each(|result| async move { log_result("DormantDatabase", result) })
        .await;

    tracing::error!("DormantDatabase controller stream ended unexpectedly");
}

/// Run the periodic connection checker for running databases.
pub async fn run_database_health_checker(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) {
    let ctx = Arc::new(Context::new(client, config, health_state));
    run_health_checker(ctx).await
}
