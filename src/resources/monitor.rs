//! ServiceMonitor for the Prometheus operator agent
//!
//! The Prometheus operator CRDs are not part of k8s-openapi, so the object is
//! built as JSON and handled through a `DynamicObject`.

use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::ResourceExt;

use crate::controller::error::Result;
use crate::crd::{MySQL, PrometheusSpec};
use crate::resources::common::{
    EXPORTER_PORT_NAME, LABEL_DATABASE_NAME, service_monitor_name, standard_labels,
};

/// API resource of `monitoring.coreos.com/v1` ServiceMonitor
pub fn service_monitor_api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("monitoring.coreos.com", "v1", "ServiceMonitor"),
        "servicemonitors",
    )
}

/// Namespace a ServiceMonitor is written to
pub fn service_monitor_namespace(db: &MySQL, prometheus: &PrometheusSpec) -> String {
    prometheus
        .namespace
        .clone()
        .unwrap_or_else(|| db.namespace().unwrap_or_default())
}

/// Generate the ServiceMonitor scraping the stats Service of `db`
pub fn generate_service_monitor(db: &MySQL, prometheus: &PrometheusSpec) -> Result<DynamicObject> {
    let db_name = db.name_any();
    let db_namespace = db.namespace().unwrap_or_default();
    let name = service_monitor_name(&db_namespace, &db_name);

    let mut labels = prometheus.labels.clone();
    labels.extend(standard_labels(&db_name));

    let mut endpoint = serde_json::json!({
        "port": EXPORTER_PORT_NAME,
        "path": "/metrics",
    });
    if let Some(interval) = &prometheus.interval {
        endpoint["interval"] = serde_json::Value::String(interval.clone());
    }

    let json = serde_json::json!({
        "apiVersion": "monitoring.coreos.com/v1",
        "kind": "ServiceMonitor",
        "metadata": {
            "name": name,
            "namespace": service_monitor_namespace(db, prometheus),
            "labels": labels,
        },
        "spec": {
            "namespaceSelector": { "matchNames": [db_namespace] },
            "selector": { "matchLabels": { LABEL_DATABASE_NAME: db_name } },
            "endpoints": [endpoint],
        }
    });

    Ok(serde_json::from_value(json)?)
}
