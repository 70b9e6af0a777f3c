use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::mysql::MySQLSpec;

/// DormantDatabase preserves a halted MySQL so it can be resumed or wiped later
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "kubedb.com",
    version = "v1alpha1",
    kind = "DormantDatabase",
    plural = "dormantdatabases",
    shortname = "drmn",
    namespaced,
    status = "DormantDatabaseStatus",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DormantDatabaseSpec {
    /// The halted database
    pub origin: Origin,

    /// Remove volumes and secrets of the origin, then mark the record WipedOut
    #[serde(default)]
    pub wipe_out: bool,

    /// Recreate the origin MySQL
    #[serde(default)]
    pub resume: bool,
}

/// Snapshot of the halted database
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub metadata: OriginMeta,

    /// Spec of the halted database with `init` removed
    pub spec: MySQLSpec,
}

/// Identity of the halted database
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OriginMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DormantDatabaseStatus {
    #[serde(default)]
    pub phase: DormantPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_time: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum DormantPhase {
    #[default]
    Paused,
    Resuming,
    WipingOut,
    WipedOut,
    Failed,
}

impl std::fmt::Display for DormantPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DormantPhase::Paused => write!(f, "Paused"),
            DormantPhase::Resuming => write!(f, "Resuming"),
            DormantPhase::WipingOut => write!(f, "WipingOut"),
            DormantPhase::WipedOut => write!(f, "WipedOut"),
            DormantPhase::Failed => write!(f, "Failed"),
        }
    }
}
