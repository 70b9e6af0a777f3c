//! Common utilities for Kubernetes resource generation
//!
//! Names, labels and owner references shared by every child object of a
//! MySQL so that ownership checks and selectors agree across builders.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::MySQL;

/// API version for the MySQL CRD
pub const API_VERSION: &str = "kubedb.com/v1alpha1";

/// Kind for the MySQL CRD
pub const KIND: &str = "MySQL";

/// Operator field manager name
pub const FIELD_MANAGER: &str = "mysql-operator";

/// Label carrying the database kind
pub const LABEL_DATABASE_KIND: &str = "kubedb.com/kind";

/// Label carrying the database name
pub const LABEL_DATABASE_NAME: &str = "kubedb.com/name";

/// Label distinguishing restore and backup jobs
pub const LABEL_JOB_TYPE: &str = "kubedb.com/job-type";

/// Database a snapshot job pod works for
///
/// Job pods must not carry the kind/name pair, or the database's Services
/// would route client traffic to them.
pub const LABEL_JOB_DATABASE: &str = "kubedb.com/job-database";

/// Annotation that makes deletion skip the dormant record
pub const ANNOTATION_IGNORE: &str = "kubedb.com/ignore";

/// Annotation on a dormant record holding the stripped init spec as JSON
pub const ANNOTATION_INIT_SPEC: &str = "kubedb.com/init-spec";

/// MySQL server port
pub const MYSQL_PORT: i32 = 3306;

/// Name of the mysql container and of its port
pub const MYSQL_CONTAINER: &str = "mysql";

/// Name of the exporter port on pods and Services
pub const EXPORTER_PORT_NAME: &str = "prom-http";

/// Generate an owner reference for a MySQL
///
/// Child objects carrying this reference are garbage collected with the database.
pub fn owner_reference(db: &MySQL) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: db.name_any(),
        uid: db.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Labels identifying the objects of one database, also used as pod selector
pub fn selector_labels(db_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_DATABASE_KIND.to_string(), KIND.to_string()),
        (LABEL_DATABASE_NAME.to_string(), db_name.to_string()),
    ])
}

/// Generate standard labels for all resources belonging to a MySQL
pub fn standard_labels(db_name: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(db_name);
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    );
    labels
}

/// Whether the labels of an existing object claim it for this database
pub fn is_owned_by(labels: &BTreeMap<String, String>, db_name: &str) -> bool {
    labels.get(LABEL_DATABASE_KIND).map(String::as_str) == Some(KIND)
        && labels.get(LABEL_DATABASE_NAME).map(String::as_str) == Some(db_name)
}

/// Name of the stats Service used by the builtin monitor agent
pub fn stats_service_name(db_name: &str) -> String {
    format!("{}-stats", db_name)
}

/// Name of the ServiceAccount/Role/RoleBinding used by snapshot jobs
pub fn snapshot_sa_name(db_name: &str) -> String {
    format!("{}-snapshot", db_name)
}

/// Name of the backup CronJob
pub fn backup_cronjob_name(db_name: &str) -> String {
    format!("{}-backup", db_name)
}

/// Name of the restore Job for a snapshot
pub fn restore_job_name(snapshot_name: &str) -> String {
    format!("restore-{}", snapshot_name)
}

/// Name of the ServiceMonitor registered by the Prometheus operator agent
pub fn service_monitor_name(namespace: &str, db_name: &str) -> String {
    format!("kubedb-{}-{}", namespace, db_name)
}

/// In-cluster DNS name of the primary Service
pub fn primary_service_dns(db_name: &str, namespace: &str) -> String {
    format!("{}.{}.svc", db_name, namespace)
}
