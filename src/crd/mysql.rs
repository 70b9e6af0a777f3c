use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::snapshot::SnapshotStorageSpec;

/// Cluster mode value that enables MySQL Group Replication
pub const GROUP_REPLICATION_MODE: &str = "GroupReplication";

/// Monitoring agent that exposes metrics through an annotated stats Service
pub const AGENT_PROMETHEUS_BUILTIN: &str = "prometheus.io/builtin";

/// Monitoring agent that registers a ServiceMonitor for the Prometheus operator
pub const AGENT_PROMETHEUS_OPERATOR: &str = "prometheus.io/operator";

/// Legacy spelling of [`AGENT_PROMETHEUS_OPERATOR`]
pub const AGENT_COREOS_PROMETHEUS: &str = "prometheus.io/coreos-operator";

/// MySQL is the Schema for the mysqls API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "kubedb.com",
    version = "v1alpha1",
    kind = "MySQL",
    plural = "mysqls",
    shortname = "my",
    namespaced,
    status = "MySQLStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MySQLSpec {
    /// Name of the MySQLVersion catalog entry (e.g., "8.0", "5.7.25")
    pub version: String,

    /// Number of MySQL members
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Whether data lives on persistent volumes or in an emptyDir
    #[serde(default)]
    pub storage_type: StorageType,

    /// Persistent volume claim settings, required for Durable storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,

    /// Clustering configuration; standalone when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<MySQLTopology>,

    /// What happens to data and child objects when this resource is deleted
    #[serde(default)]
    pub termination_policy: TerminationPolicy,

    /// Initialization source applied once at creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<InitSpec>,

    /// Monitoring agent configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorSpec>,

    /// Scheduled backups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_schedule: Option<BackupScheduleSpec>,

    /// Secret holding the root credentials (defaults to `<name>-auth`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_secret: Option<SecretReference>,

    /// Node labels the database pods must be scheduled onto
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// How strongly pods are spread across nodes
    #[serde(default)]
    pub anti_affinity: AntiAffinity,

    /// Tolerations for the database pods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Custom scheduler for the database pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,

    /// Compute resources for the mysql container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Legacy lock: when true, deletion is blocked like DoNotTerminate
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub do_not_pause: bool,
}

fn default_replicas() -> i32 {
    1
}

fn default_access_modes() -> Vec<String> {
    vec!["ReadWriteOnce".to_string()]
}

/// Storage medium for MySQL data
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum StorageType {
    /// Data is kept on PersistentVolumeClaims
    #[default]
    Durable,
    /// Data is kept in an emptyDir and lost with the pod
    Ephemeral,
}

/// Persistent volume settings for MySQL data
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Storage class name (cluster default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Access modes of the volume claim
    #[serde(default = "default_access_modes")]
    pub access_modes: Vec<String>,

    /// Requested size (e.g., "1Gi", "100Mi")
    pub size: String,
}

/// Clustering configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MySQLTopology {
    /// Cluster mode; only "GroupReplication" is recognized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Group Replication settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupSpec>,
}

/// Group Replication settings
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    /// Group name, a UUID in 8-4-4-4-12 form
    #[serde(default)]
    pub name: String,

    /// Server id assigned to the first member; members use consecutive ids
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_server_id: Option<u32>,
}

/// Deletion behaviour
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum TerminationPolicy {
    /// Deletion is rejected until the policy is changed
    DoNotTerminate,
    /// Workload is removed, data and secrets are kept in a DormantDatabase
    #[default]
    Halt,
    /// Workload and volumes are removed, secrets are kept
    Delete,
    /// Everything including secrets is removed
    WipeOut,
}

impl std::fmt::Display for TerminationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationPolicy::DoNotTerminate => write!(f, "DoNotTerminate"),
            TerminationPolicy::Halt => write!(f, "Halt"),
            TerminationPolicy::Delete => write!(f, "Delete"),
            TerminationPolicy::WipeOut => write!(f, "WipeOut"),
        }
    }
}

/// Initialization source
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitSpec {
    /// Scripts mounted into /docker-entrypoint-initdb.d
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_source: Option<ScriptSource>,

    /// Snapshot restored by a one-shot Job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_source: Option<SnapshotSource>,

    /// Keep the database out of Running until the restore has finished
    #[serde(default)]
    pub wait_for_initial_restore: bool,

    /// Set by the operator once initialization has completed
    #[serde(default)]
    pub initialized: bool,
}

/// Volume providing init scripts
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSource {
    /// ConfigMap holding the scripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<String>,

    /// Secret holding the scripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Reference to a Snapshot object
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSource {
    /// Snapshot name
    pub name: String,

    /// Snapshot namespace (defaults to the database namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Monitoring configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSpec {
    /// Agent kind, e.g. "prometheus.io/builtin" or "prometheus.io/operator"
    pub agent: String,

    /// Prometheus settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusSpec>,
}

/// Prometheus exporter and scrape settings
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    /// Port the exporter sidecar listens on
    #[serde(default = "default_exporter_port")]
    pub port: i32,

    /// Namespace for the ServiceMonitor (operator agent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Labels the Prometheus instance selects ServiceMonitors by
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Scrape interval (e.g., "30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// Port the exporter listens on when none is configured
pub const DEFAULT_EXPORTER_PORT: i32 = 56790;

fn default_exporter_port() -> i32 {
    DEFAULT_EXPORTER_PORT
}

impl Default for PrometheusSpec {
    fn default() -> Self {
        Self {
            port: DEFAULT_EXPORTER_PORT,
            namespace: None,
            labels: BTreeMap::new(),
            interval: None,
        }
    }
}

impl MonitorSpec {
    /// Prometheus settings with defaults filled in
    pub fn prometheus_or_default(&self) -> PrometheusSpec {
        self.prometheus.clone().unwrap_or_default()
    }
}

/// Backup schedule configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupScheduleSpec {
    /// Five field cron expression
    pub cron_expression: String,

    /// Where backups are written
    pub storage: SnapshotStorageSpec,
}

/// Reference to a Secret by name
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub secret_name: String,
}

/// Pod anti-affinity strength
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum AntiAffinity {
    /// Spread across nodes when possible
    #[default]
    Preferred,
    /// Never co-locate two members on a node
    Required,
    /// No anti-affinity
    Disabled,
}

/// Toleration for pod scheduling
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Exists or Equal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// NoSchedule, PreferNoSchedule or NoExecute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

/// Resource requirements for the mysql container
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceList>,
}

/// Resource quantities for CPU and memory
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
pub struct ResourceList {
    /// CPU quantity (e.g., "500m", "2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory quantity (e.g., "512Mi", "2Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl MySQLSpec {
    /// Whether Group Replication is requested
    pub fn is_group_replication(&self) -> bool {
        self.topology
            .as_ref()
            .and_then(|t| t.mode.as_deref())
            .is_some_and(|m| m == GROUP_REPLICATION_MODE)
    }

    /// Whether deletion must be refused
    pub fn is_deletion_locked(&self) -> bool {
        self.termination_policy == TerminationPolicy::DoNotTerminate || self.do_not_pause
    }

    /// Snapshot named by the init source, if any
    pub fn init_snapshot(&self) -> Option<&SnapshotSource> {
        self.init.as_ref().and_then(|i| i.snapshot_source.as_ref())
    }
}

impl MySQL {
    /// Name of the auth secret, honoring an explicit reference
    pub fn auth_secret_name(&self) -> String {
        self.spec
            .database_secret
            .as_ref()
            .map(|s| s.secret_name.clone())
            .unwrap_or_else(|| default_auth_secret_name(&kube::ResourceExt::name_any(self)))
    }

    /// Current phase, defaulting when status has not been written yet
    pub fn phase(&self) -> DatabasePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}

/// Default auth secret name derived from the database name
pub fn default_auth_secret_name(db_name: &str) -> String {
    format!("{}-auth", db_name)
}

/// Status of the MySQL resource
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MySQLStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: DatabasePhase,

    /// Set once when the operator first observes the object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,

    /// Observed generation of the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Kubernetes-style conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Free-form failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Monitoring agent registered by the last successful reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_agent: Option<String>,

    /// Namespace the monitor agent wrote its objects to, when not the database's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_namespace: Option<String>,
}

/// Database lifecycle phase
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum DatabasePhase {
    /// Child resources are being created
    #[default]
    Creating,
    /// Initial data is being restored
    Initializing,
    /// Database is serving
    Running,
    /// Database was halted into a DormantDatabase
    Paused,
    /// Database is being resumed from a DormantDatabase
    Resuming,
    /// Reconciliation failed; see status.reason
    Failed,
    /// Deletion is in progress
    Terminating,
}

impl std::fmt::Display for DatabasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabasePhase::Creating => write!(f, "Creating"),
            DatabasePhase::Initializing => write!(f, "Initializing"),
            DatabasePhase::Running => write!(f, "Running"),
            DatabasePhase::Paused => write!(f, "Paused"),
            DatabasePhase::Resuming => write!(f, "Resuming"),
            DatabasePhase::Failed => write!(f, "Failed"),
            DatabasePhase::Terminating => write!(f, "Terminating"),
        }
    }
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
