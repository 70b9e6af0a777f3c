//! Service generation for MySQL databases
//!
//! Three Services exist per database:
//! - the governing headless Service shared by every database in the namespace;
//! - the primary Service `<name>` selecting the database pods;
//! - the stats Service `<name>-stats` used by the builtin Prometheus agent.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::{MySQL, PrometheusSpec};
use crate::resources::common::{
    EXPORTER_PORT_NAME, FIELD_MANAGER, MYSQL_PORT, owner_reference, selector_labels,
    standard_labels, stats_service_name,
};
use crate::resources::ensure::upsert_map;

/// Generate the governing headless Service
///
/// It is shared by every database of the namespace, so it carries no owner
/// reference and is never deleted by this operator.
pub fn generate_governing_service(name: &str, namespace: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                FIELD_MANAGER.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the primary Service routing client traffic to the database pods
pub fn generate_primary_service(db: &MySQL) -> Service {
    let db_name = db.name_any();

    Service {
        metadata: ObjectMeta {
            name: Some(db_name.clone()),
            namespace: db.namespace(),
            labels: Some(standard_labels(&db_name)),
            owner_references: Some(vec![owner_reference(db)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&db_name)),
            ports: Some(vec![ServicePort {
                name: Some("db".to_string()),
                port: MYSQL_PORT,
                target_port: Some(IntOrString::String("db".to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the stats Service exposing the exporter sidecar
///
/// The `prometheus.io/*` annotations let an annotation-driven Prometheus
/// discover the endpoint without a ServiceMonitor.
pub fn generate_stats_service(db: &MySQL, prometheus: &PrometheusSpec) -> Service {
    let db_name = db.name_any();

    let annotations = BTreeMap::from([
        ("prometheus.io/scrape".to_string(), "true".to_string()),
        ("prometheus.io/port".to_string(), prometheus.port.to_string()),
        ("prometheus.io/path".to_string(), "/metrics".to_string()),
    ]);

    Service {
        metadata: ObjectMeta {
            name: Some(stats_service_name(&db_name)),
            namespace: db.namespace(),
            labels: Some(standard_labels(&db_name)),
            annotations: Some(annotations),
            owner_references: Some(vec![owner_reference(db)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&db_name)),
            ports: Some(vec![ServicePort {
                name: Some(EXPORTER_PORT_NAME.to_string()),
                port: prometheus.port,
                target_port: Some(IntOrString::String(EXPORTER_PORT_NAME.to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Copy the operator-owned fields of `desired` onto a live Service
///
/// Server-assigned fields (clusterIP, nodePorts, session affinity defaults)
/// are left untouched so a re-ensure of an unchanged spec is a no-op.
pub fn merge_service(current: &mut Service, desired: &Service) {
    upsert_map(&mut current.metadata.labels, desired.metadata.labels.as_ref());
    upsert_map(
        &mut current.metadata.annotations,
        desired.metadata.annotations.as_ref(),
    );
    if current.metadata.owner_references.is_none() {
        current.metadata.owner_references = desired.metadata.owner_references.clone();
    }

    let Some(desired_spec) = desired.spec.as_ref() else {
        return;
    };
    let spec = current.spec.get_or_insert_with(ServiceSpec::default);
    spec.selector = desired_spec.selector.clone();

    let live_ports = spec.ports.take().unwrap_or_default();
    let ports = desired_spec
        .ports
        .iter()
        .flatten()
        .map(|want| {
            let mut port = live_ports
                .iter()
                .find(|p| p.name == want.name)
                .cloned()
                .unwrap_or_default();
            port.name = want.name.clone();
            port.port = want.port;
            port.target_port = want.target_port.clone();
            port.protocol = want.protocol.clone();
            port
        })
        .collect::<Vec<_>>();
    spec.ports = if ports.is_empty() { None } else { Some(ports) };
}
