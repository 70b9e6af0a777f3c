use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// MySQLVersion is a cluster-scoped catalog entry mapping a version name to images
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "catalog.kubedb.com",
    version = "v1alpha1",
    kind = "MySQLVersion",
    plural = "mysqlversions",
    shortname = "myversion",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"DB_Image", "type":"string", "jsonPath":".spec.db.image"}"#,
    printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.deprecated"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MySQLVersionSpec {
    /// Server version (semantic version, e.g. "8.0.23")
    pub version: String,

    /// Database server image
    pub db: ImageRef,

    /// Prometheus exporter image
    pub exporter: ImageRef,

    /// Backup/restore tools image
    pub tools: ImageRef,

    /// Deprecated versions are refused for new databases
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct ImageRef {
    pub image: String,
}
