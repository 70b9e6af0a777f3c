//! Monitoring agents
//!
//! Each agent kind knows how to register and unregister the scrape target of
//! one database. [`agent_for`] picks the implementation once per pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::DynamicObject;
use kube::{Api, ResourceExt};
use tracing::debug;

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::crd::{
    AGENT_COREOS_PROMETHEUS, AGENT_PROMETHEUS_BUILTIN, AGENT_PROMETHEUS_OPERATOR, MonitorSpec,
    MySQL, MySQLStatus, PrometheusSpec,
};
use crate::resources::common::{service_monitor_name, stats_service_name};
use crate::resources::ensure::{Verb, delete_if_exists, ensure_object, upsert_map};
use crate::resources::monitor::{
    generate_service_monitor, service_monitor_api_resource, service_monitor_namespace,
};
use crate::resources::service::{generate_stats_service, merge_service};

/// Where an agent put the scrape target of a database
///
/// Persisted in `status.monitorAgent` and `status.monitorNamespace` so the
/// target can be removed after the monitor spec moved it or went away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorRegistration {
    pub agent: String,
    /// Namespace of objects written outside the database namespace
    pub namespace: Option<String>,
}

impl MonitorRegistration {
    pub fn recorded(status: &MySQLStatus) -> Option<Self> {
        status.monitor_agent.as_ref().map(|agent| Self {
            agent: agent.clone(),
            namespace: status.monitor_namespace.clone(),
        })
    }
}

/// The previous registration when it no longer matches the desired one
pub fn stale_registration(
    previous: Option<&MonitorRegistration>,
    desired: Option<&MonitorRegistration>,
) -> Option<MonitorRegistration> {
    previous.filter(|p| Some(*p) != desired).cloned()
}

/// Registers a database with a metrics collector
#[async_trait]
pub trait MonitorAgent: Send + Sync {
    /// Agent identifier recorded in `status.monitorAgent`
    fn name(&self) -> &'static str;

    /// Registration [`MonitorAgent::ensure`] produces for `db`
    fn registration(&self, _db: &MySQL) -> MonitorRegistration {
        MonitorRegistration {
            agent: self.name().to_string(),
            namespace: None,
        }
    }

    /// Create or update the scrape target
    async fn ensure(&self, ctx: &Context, db: &MySQL) -> Result<Verb>;

    /// Remove the scrape target described by `registration`; absence is success
    async fn delete(&self, ctx: &Context, db: &MySQL, registration: &MonitorRegistration) -> Result<()>;
}

/// Pick the agent implementation for a monitor spec
pub fn agent_for(spec: &MonitorSpec) -> Result<Box<dyn MonitorAgent>> {
    agent_by_name(&spec.agent, spec.prometheus.clone())
}

/// Pick the agent implementation by its recorded name
///
/// Used to tear down an agent after the monitor spec changed or was removed,
/// when only `status.monitorAgent` remains.
pub fn agent_by_name(
    agent: &str,
    prometheus: Option<PrometheusSpec>,
) -> Result<Box<dyn MonitorAgent>> {
    match agent {
        AGENT_PROMETHEUS_BUILTIN => Ok(Box::new(BuiltinAgent { prometheus })),
        AGENT_PROMETHEUS_OPERATOR | AGENT_COREOS_PROMETHEUS => {
            Ok(Box::new(PrometheusOperatorAgent { prometheus }))
        }
        other => Err(Error::InvalidConfig(format!(
            "unknown monitoring agent \"{}\"",
            other
        ))),
    }
}

async fn ensure_stats_service(ctx: &Context, db: &MySQL, prometheus: &PrometheusSpec) -> Result<Verb> {
    let ns = db.namespace().unwrap_or_default();
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);
    let desired = generate_stats_service(db, prometheus);
    ensure_object(&api, "Service", &db.name_any(), &desired, merge_service).await
}

async fn delete_stats_service(ctx: &Context, db: &MySQL) -> Result<()> {
    let ns = db.namespace().unwrap_or_default();
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);
    delete_if_exists(&api, &stats_service_name(&db.name_any())).await?;
    Ok(())
}

/// Stats Service carrying `prometheus.io/*` scrape annotations
pub struct BuiltinAgent {
    prometheus: Option<PrometheusSpec>,
}

#[async_trait]
impl MonitorAgent for BuiltinAgent {
    fn name(&self) -> &'static str {
        AGENT_PROMETHEUS_BUILTIN
    }

    async fn ensure(&self, ctx: &Context, db: &MySQL) -> Result<Verb> {
        let prometheus = self.prometheus.clone().unwrap_or_default();
        ensure_stats_service(ctx, db, &prometheus).await
    }

    async fn delete(&self, ctx: &Context, db: &MySQL, _registration: &MonitorRegistration) -> Result<()> {
        delete_stats_service(ctx, db).await
    }
}

/// Stats Service plus a ServiceMonitor for the Prometheus operator
pub struct PrometheusOperatorAgent {
    prometheus: Option<PrometheusSpec>,
}

impl PrometheusOperatorAgent {
    fn service_monitor_api(&self, ctx: &Context, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(ctx.client.clone(), namespace, &service_monitor_api_resource())
    }

    fn target_namespace(&self, db: &MySQL) -> String {
        match &self.prometheus {
            Some(p) => service_monitor_namespace(db, p),
            None => db.namespace().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl MonitorAgent for PrometheusOperatorAgent {
    fn name(&self) -> &'static str {
        AGENT_PROMETHEUS_OPERATOR
    }

    fn registration(&self, db: &MySQL) -> MonitorRegistration {
        MonitorRegistration {
            agent: self.name().to_string(),
            namespace: Some(self.target_namespace(db)),
        }
    }

    async fn ensure(&self, ctx: &Context, db: &MySQL) -> Result<Verb> {
        let prometheus = self.prometheus.clone().ok_or_else(|| {
            Error::InvalidConfig("monitor.prometheus is required for the operator agent".to_string())
        })?;
        let service_verb = ensure_stats_service(ctx, db, &prometheus).await?;

        let desired = generate_service_monitor(db, &prometheus)?;
        let api = self.service_monitor_api(ctx, &service_monitor_namespace(db, &prometheus));
        let monitor_verb = ensure_object(&api, "ServiceMonitor", &db.name_any(), &desired, |current, desired| {
            current.data = desired.data.clone();
            upsert_map(&mut current.metadata.labels, desired.metadata.labels.as_ref());
        })
        .await?;

        debug!(service = %service_verb, service_monitor = %monitor_verb, "Ensured operator agent");
        Ok(if monitor_verb == Verb::Unchanged { service_verb } else { monitor_verb })
    }

    async fn delete(&self, ctx: &Context, db: &MySQL, registration: &MonitorRegistration) -> Result<()> {
        let db_ns = db.namespace().unwrap_or_default();
        // Registrations recorded without a namespace predate its tracking
        let monitor_ns = registration
            .namespace
            .clone()
            .unwrap_or_else(|| self.target_namespace(db));
        let api = self.service_monitor_api(ctx, &monitor_ns);
        delete_if_exists(&api, &service_monitor_name(&db_ns, &db.name_any())).await?;
        delete_stats_service(ctx, db).await
    }
}
