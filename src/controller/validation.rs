//! Validation of MySQL specs
//!
//! Checks run in a fixed order and stop at the first violation:
//! - replica count and init sources
//! - version catalog
//! - storage
//! - topology (Group Replication)
//! - backup schedule
//! - monitor
//!
//! Cluster state is only read through [`ClusterLookup`], which keeps the
//! validator usable from the admission webhook, the reconciler and tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::{Api, Client, ResourceExt};
use thiserror::Error;
use tracing::warn;

use crate::crd::{
    AGENT_COREOS_PROMETHEUS, AGENT_PROMETHEUS_BUILTIN, AGENT_PROMETHEUS_OPERATOR,
    BackupScheduleSpec, GROUP_REPLICATION_MODE, MonitorSpec, MySQL, MySQLVersion, StorageType,
    TerminationPolicy,
};

/// Smallest Group Replication group
pub const MIN_GROUP_SIZE: i32 = 3;

/// Largest Group Replication group
pub const MAX_GROUP_SIZE: i32 = 9;

/// First server version with the Group Replication setup the operator relies on
pub const GROUP_REPLICATION_MIN_VERSION: &str = "5.7.25";

/// A rule the spec breaks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecViolation {
    #[error("spec.version is required")]
    MissingVersion,

    #[error("MySQLVersion \"{0}\" does not exist")]
    UnknownVersion(String),

    #[error("MySQLVersion \"{0}\" is deprecated")]
    DeprecatedVersion(String),

    #[error("spec.replicas must not be negative, got {0}")]
    NegativeReplicas(i32),

    #[error("spec.init.scriptSource and spec.init.snapshotSource are mutually exclusive")]
    ConflictingInitSources,

    #[error("spec.storage is required for Durable storage")]
    MissingStorage,

    #[error("StorageClass \"{0}\" does not exist")]
    UnknownStorageClass(String),

    #[error("spec.storage must be empty for Ephemeral storage")]
    EphemeralWithStorage,

    #[error("terminationPolicy Halt cannot be used with Ephemeral storage")]
    EphemeralHalt,

    #[error("unknown topology mode \"{0}\"")]
    UnknownTopologyMode(String),

    #[error("spec.topology.group.name is required in GroupReplication mode")]
    MissingGroupName,

    #[error("group name \"{0}\" is not a UUID")]
    InvalidGroupName(String),

    #[error("{replicas} replicas is below the minimum group size of {min}")]
    GroupTooSmall { replicas: i32, min: i32 },

    #[error("{replicas} replicas exceeds the maximum group size of {max}")]
    GroupTooLarge { replicas: i32, max: i32 },

    #[error("Group Replication needs MySQL {min} or later, version is {version}")]
    GroupReplicationUnsupported { version: String, min: &'static str },

    #[error("invalid cron expression \"{expression}\": {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("backup storage must configure exactly one backend, found {0}")]
    BackendCount(usize),

    #[error("backup storage must name a storageSecretName")]
    MissingStorageSecret,

    #[error("storage secret \"{0}\" does not exist")]
    UnknownStorageSecret(String),

    #[error("unknown monitoring agent \"{0}\"")]
    UnknownMonitorAgent(String),

    #[error("monitoring agent \"{0}\" requires spec.monitor.prometheus")]
    MissingPrometheus(String),

    #[error("exporter port must be positive, got {0}")]
    InvalidExporterPort(i32),
}

/// Why validation did not succeed
#[derive(Error, Debug)]
pub enum ValidationFailure {
    /// The spec is invalid
    #[error(transparent)]
    Violation(#[from] SpecViolation),

    /// A lookup failed, so no verdict could be reached
    #[error("lookup failed: {0}")]
    Lookup(#[from] kube::Error),
}

/// Read-only view of cluster state needed for validation
#[async_trait]
pub trait ClusterLookup: Send + Sync {
    /// Fetch a catalog entry, `None` when it does not exist
    async fn mysql_version(&self, name: &str) -> Result<Option<MySQLVersion>, kube::Error>;

    async fn storage_class_exists(&self, name: &str) -> Result<bool, kube::Error>;

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, kube::Error>;

    /// Fetch a stored MySQL, `None` when it does not exist
    async fn mysql(&self, namespace: &str, name: &str) -> Result<Option<MySQL>, kube::Error>;
}

/// [`ClusterLookup`] against the API server
#[derive(Clone)]
pub struct KubeLookup {
    client: Client,
}

impl KubeLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterLookup for KubeLookup {
    async fn mysql_version(&self, name: &str) -> Result<Option<MySQLVersion>, kube::Error> {
        Api::<MySQLVersion>::all(self.client.clone())
            .get_opt(name)
            .await
    }

    async fn storage_class_exists(&self, name: &str) -> Result<bool, kube::Error> {
        let found = Api::<StorageClass>::all(self.client.clone())
            .get_opt(name)
            .await?;
        Ok(found.is_some())
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, kube::Error> {
        let found = Api::<Secret>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await?;
        Ok(found.is_some())
    }

    async fn mysql(&self, namespace: &str, name: &str) -> Result<Option<MySQL>, kube::Error> {
        Api::<MySQL>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
    }
}

/// Validate a MySQL against the catalog and cluster state
pub async fn validate(lookup: &dyn ClusterLookup, db: &MySQL) -> Result<(), ValidationFailure> {
    let spec = &db.spec;
    let namespace = db.namespace().unwrap_or_default();

    let version = validate_version(lookup, &spec.version).await?;
    validate_storage(lookup, db).await?;
    validate_topology(db, &version)?;
    if let Some(schedule) = &spec.backup_schedule {
        validate_backup_schedule(lookup, &namespace, schedule).await?;
    }
    if let Some(monitor) = &spec.monitor {
        validate_monitor(monitor)?;
    }

    if let Some(init) = &spec.init
        && init.script_source.is_some()
        && init.snapshot_source.is_some()
    {
        return Err(SpecViolation::ConflictingInitSources.into());
    }
    if spec.replicas < 0 {
        return Err(SpecViolation::NegativeReplicas(spec.replicas).into());
    }
    Ok(())
}

/// Resolve the catalog entry named by `spec.version`
pub async fn validate_version(
    lookup: &dyn ClusterLookup,
    name: &str,
) -> Result<MySQLVersion, ValidationFailure> {
    if name.is_empty() {
        return Err(SpecViolation::MissingVersion.into());
    }
    let version = lookup
        .mysql_version(name)
        .await?
        .ok_or_else(|| SpecViolation::UnknownVersion(name.to_string()))?;
    if version.spec.deprecated {
        return Err(SpecViolation::DeprecatedVersion(name.to_string()).into());
    }
    Ok(version)
}

async fn validate_storage(lookup: &dyn ClusterLookup, db: &MySQL) -> Result<(), ValidationFailure> {
    let spec = &db.spec;
    match spec.storage_type {
        StorageType::Ephemeral => {
            if spec.storage.is_some() {
                return Err(SpecViolation::EphemeralWithStorage.into());
            }
            if spec.termination_policy == TerminationPolicy::Halt {
                return Err(SpecViolation::EphemeralHalt.into());
            }
        }
        StorageType::Durable => {
            let storage = spec.storage.as_ref().ok_or(SpecViolation::MissingStorage)?;
            if let Some(class) = &storage.storage_class_name
                && !lookup.storage_class_exists(class).await?
            {
                return Err(SpecViolation::UnknownStorageClass(class.clone()).into());
            }
        }
    }
    Ok(())
}

/// Validate Group Replication settings
///
/// Nothing is checked unless `topology.mode` is set.
pub fn validate_topology(db: &MySQL, version: &MySQLVersion) -> Result<(), SpecViolation> {
    let Some(topology) = &db.spec.topology else {
        return Ok(());
    };
    let Some(mode) = topology.mode.as_deref() else {
        return Ok(());
    };
    if mode != GROUP_REPLICATION_MODE {
        return Err(SpecViolation::UnknownTopologyMode(mode.to_string()));
    }

    let name = topology
        .group
        .as_ref()
        .map(|g| g.name.as_str())
        .filter(|n| !n.is_empty())
        .ok_or(SpecViolation::MissingGroupName)?;
    if !is_group_uuid(name) {
        return Err(SpecViolation::InvalidGroupName(name.to_string()));
    }

    let replicas = db.spec.replicas;
    if replicas < MIN_GROUP_SIZE {
        return Err(SpecViolation::GroupTooSmall {
            replicas,
            min: MIN_GROUP_SIZE,
        });
    }
    if replicas > MAX_GROUP_SIZE {
        return Err(SpecViolation::GroupTooLarge {
            replicas,
            max: MAX_GROUP_SIZE,
        });
    }

    check_group_replication_version(&version.spec.version)
}

/// Whether `name` is a UUID in 8-4-4-4-12 hex form
pub fn is_group_uuid(name: &str) -> bool {
    name.len() == 36 && uuid::Uuid::try_parse(name).is_ok()
}

fn check_group_replication_version(version: &str) -> Result<(), SpecViolation> {
    let Ok(parsed) = semver::Version::parse(version) else {
        warn!(
            version = %version,
            "catalog version is not major.minor.patch, skipping Group Replication version check"
        );
        return Ok(());
    };
    let core = semver::Version::new(parsed.major, parsed.minor, parsed.patch);
    let min = semver::Version::new(5, 7, 25);
    if core < min {
        return Err(SpecViolation::GroupReplicationUnsupported {
            version: version.to_string(),
            min: GROUP_REPLICATION_MIN_VERSION,
        });
    }
    Ok(())
}

async fn validate_backup_schedule(
    lookup: &dyn ClusterLookup,
    namespace: &str,
    schedule: &BackupScheduleSpec,
) -> Result<(), ValidationFailure> {
    validate_cron_expression(&schedule.cron_expression)?;

    let backends = schedule.storage.backend_count();
    if backends != 1 {
        return Err(SpecViolation::BackendCount(backends).into());
    }

    let secret = schedule
        .storage
        .storage_secret_name
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(SpecViolation::MissingStorageSecret)?;
    if !lookup.secret_exists(namespace, secret).await? {
        return Err(SpecViolation::UnknownStorageSecret(secret.to_string()).into());
    }
    Ok(())
}

/// Validate the monitor agent and its Prometheus settings
pub fn validate_monitor(monitor: &MonitorSpec) -> Result<(), SpecViolation> {
    match monitor.agent.as_str() {
        AGENT_PROMETHEUS_BUILTIN => Ok(()),
        AGENT_PROMETHEUS_OPERATOR | AGENT_COREOS_PROMETHEUS => {
            let prometheus = monitor
                .prometheus
                .as_ref()
                .ok_or_else(|| SpecViolation::MissingPrometheus(monitor.agent.clone()))?;
            if prometheus.port <= 0 {
                return Err(SpecViolation::InvalidExporterPort(prometheus.port));
            }
            Ok(())
        }
        other => Err(SpecViolation::UnknownMonitorAgent(other.to_string())),
    }
}

/// Cron descriptors accepted in place of five fields
const CRON_DESCRIPTORS: &[&str] = &[
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const DAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

struct CronField {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value of the first entry in `names`
    names_base: u32,
}

impl CronField {
    const fn new(name: &'static str, min: u32, max: u32) -> Self {
        Self {
            name,
            min,
            max,
            names: &[],
            names_base: 0,
        }
    }

    const fn named(self, names: &'static [&'static str], names_base: u32) -> Self {
        Self {
            names,
            names_base,
            ..self
        }
    }
}

const CRON_FIELDS: [CronField; 5] = [
    CronField::new("minute", 0, 59),
    CronField::new("hour", 0, 23),
    CronField::new("day of month", 1, 31),
    CronField::new("month", 1, 12).named(MONTH_NAMES, 1),
    CronField::new("day of week", 0, 7).named(DAY_NAMES, 0),
];

/// Validate a standard five field cron expression
pub fn validate_cron_expression(expression: &str) -> Result<(), SpecViolation> {
    let invalid = |reason: String| SpecViolation::InvalidCronExpression {
        expression: expression.to_string(),
        reason,
    };

    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        return if CRON_DESCRIPTORS.contains(&trimmed) {
            Ok(())
        } else {
            Err(invalid(format!("unknown descriptor {}", trimmed)))
        };
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != CRON_FIELDS.len() {
        return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
    }

    for (value, field) in fields.iter().zip(CRON_FIELDS.iter()) {
        for item in value.split(',') {
            parse_cron_item(item, field).map_err(|r| invalid(format!("{}: {}", field.name, r)))?;
        }
    }
    Ok(())
}

fn parse_cron_item(item: &str, field: &CronField) -> Result<(), String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };

    if let Some(step) = step {
        match step.parse::<u32>() {
            Ok(n) if n > 0 => {}
            _ => return Err(format!("invalid step \"{}\"", step)),
        }
    }

    if range == "*" {
        return Ok(());
    }

    let (low, high) = match range.split_once('-') {
        Some((low, high)) => (cron_value(low, field)?, cron_value(high, field)?),
        None => {
            let v = cron_value(range, field)?;
            (v, v)
        }
    };
    if low > high {
        return Err(format!("range {} is reversed", range));
    }
    Ok(())
}

fn cron_value(token: &str, field: &CronField) -> Result<u32, String> {
    let lower = token.to_ascii_lowercase();
    if let Some(pos) = field.names.iter().position(|n| *n == lower) {
        return Ok(field.names_base + pos as u32);
    }
    let value: u32 = token
        .parse()
        .map_err(|_| format!("invalid value \"{}\"", token))?;
    if value < field.min || value > field.max {
        return Err(format!("{} out of range {}-{}", value, field.min, field.max));
    }
    Ok(value)
}
