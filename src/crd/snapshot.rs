use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Path component placed between the backend prefix and the namespace
pub const DATABASE_NAME_PREFIX: &str = "kubedb";

/// Snapshot describes a backup of a database stored in an object store
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "kubedb.com",
    version = "v1alpha1",
    kind = "Snapshot",
    plural = "snapshots",
    shortname = "snap",
    namespaced,
    printcolumn = r#"{"name":"DatabaseName", "type":"string", "jsonPath":".spec.databaseName"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSpec {
    /// Database the snapshot was taken from
    pub database_name: String,

    /// Backend holding the snapshot data
    pub storage: SnapshotStorageSpec,
}

/// Object storage backend; exactly one backend must be set
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStorageSpec {
    /// Secret with backend credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_secret_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Spec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swift: Option<SwiftSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3Spec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcsSpec {
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureSpec {
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwiftSpec {
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Local backend backed by a volume mounted into the job
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalSpec {
    /// Where the volume is mounted in the backup/restore container
    pub mount_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,

    /// PersistentVolumeClaim providing the volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,

    /// Host path providing the volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<String>,
}

impl SnapshotStorageSpec {
    /// Number of configured backends
    pub fn backend_count(&self) -> usize {
        [
            self.s3.is_some(),
            self.gcs.is_some(),
            self.azure.is_some(),
            self.swift.is_some(),
            self.local.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    /// Bucket or container name of the configured backend
    pub fn container(&self) -> Option<String> {
        if let Some(s3) = &self.s3 {
            Some(s3.bucket.clone())
        } else if let Some(gcs) = &self.gcs {
            Some(gcs.bucket.clone())
        } else if let Some(azure) = &self.azure {
            Some(azure.container.clone())
        } else if let Some(swift) = &self.swift {
            Some(swift.container.clone())
        } else {
            self.local.as_ref().map(|_| DATABASE_NAME_PREFIX.to_string())
        }
    }

    /// Key prefix inside the bucket
    pub fn prefix(&self) -> Option<&str> {
        self.s3
            .as_ref()
            .and_then(|b| b.prefix.as_deref())
            .or_else(|| self.gcs.as_ref().and_then(|b| b.prefix.as_deref()))
            .or_else(|| self.azure.as_ref().and_then(|b| b.prefix.as_deref()))
            .or_else(|| self.swift.as_ref().and_then(|b| b.prefix.as_deref()))
            .or_else(|| self.local.as_ref().and_then(|b| b.sub_path.as_deref()))
    }

    /// Folder for a database's snapshots: `<prefix>/kubedb/<namespace>/<database>`
    pub fn location(&self, namespace: &str, database_name: &str) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(4);
        if let Some(prefix) = self.prefix() {
            let trimmed = prefix.trim_matches('/');
            if !trimmed.is_empty() {
                parts.push(trimmed);
            }
        }
        parts.push(DATABASE_NAME_PREFIX);
        parts.push(namespace);
        parts.push(database_name);
        parts.join("/")
    }
}
