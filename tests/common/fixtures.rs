//! Test fixtures and builders for MySQL resources
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let db = create_test_mysql("my-db", "default");
//! let group = MySQLBuilder::group_replication("my-db", "default").build();
//! let lookup = InMemoryLookup::with_catalog().with_mysql(db.clone());
//! ```

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use kube::core::ObjectMeta;
use mysql_operator::controller::ClusterLookup;
use mysql_operator::crd::{
    AGENT_PROMETHEUS_BUILTIN, AGENT_PROMETHEUS_OPERATOR, AntiAffinity, BackupScheduleSpec,
    DatabasePhase, GcsSpec, GroupSpec, ImageRef, InitSpec, MonitorSpec, MySQL,
    MySQLSpec, MySQLStatus, MySQLTopology, MySQLVersion, MySQLVersionSpec, PrometheusSpec,
    ScriptSource, Snapshot, SnapshotSource, SnapshotSpec, SnapshotStorageSpec, StorageSpec,
    StorageType, TerminationPolicy,
};

/// A valid Group Replication group name
pub const TEST_GROUP_NAME: &str = "dc4c4a1a-4bd3-4f10-bb2e-5ac8a1c4d1a2";

/// Storage class known to [`InMemoryLookup::with_catalog`]
pub const TEST_STORAGE_CLASS: &str = "standard";

/// Storage secret known to [`InMemoryLookup::with_catalog`] in every namespace
pub const TEST_STORAGE_SECRET: &str = "gcs-secret";

// =============================================================================
// Convenience Functions
// =============================================================================

/// Create a standalone durable database on version "8.0"
pub fn create_test_mysql(name: &str, namespace: &str) -> MySQL {
    MySQLBuilder::new(name, namespace).build()
}

/// Create a catalog entry
pub fn create_test_version(name: &str, version: &str, deprecated: bool) -> MySQLVersion {
    MySQLVersion::new(
        name,
        MySQLVersionSpec {
            version: version.to_string(),
            db: ImageRef {
                image: format!("kubedb/mysql:{}", version),
            },
            exporter: ImageRef {
                image: "kubedb/mysqld-exporter:v0.11.0".to_string(),
            },
            tools: ImageRef {
                image: format!("kubedb/mysql-tools:{}", version),
            },
            deprecated,
        },
    )
}

/// Create a snapshot of `database_name` stored in a GCS bucket
pub fn create_test_snapshot(name: &str, namespace: &str, database_name: &str) -> Snapshot {
    let mut snapshot = Snapshot::new(
        name,
        SnapshotSpec {
            database_name: database_name.to_string(),
            storage: gcs_storage(),
        },
    );
    snapshot.metadata.namespace = Some(namespace.to_string());
    snapshot
}

/// Backup storage with a single GCS backend and a storage secret
pub fn gcs_storage() -> SnapshotStorageSpec {
    SnapshotStorageSpec {
        storage_secret_name: Some(TEST_STORAGE_SECRET.to_string()),
        gcs: Some(GcsSpec {
            bucket: "mysql-backups".to_string(),
            prefix: None,
        }),
        ..Default::default()
    }
}

// =============================================================================
// MySQLBuilder
// =============================================================================

/// Builder for MySQL test objects
pub struct MySQLBuilder {
    name: String,
    namespace: String,
    spec: MySQLSpec,
    generation: Option<i64>,
    uid: Option<String>,
    annotations: BTreeMap<String, String>,
    status: Option<MySQLStatus>,
}

impl MySQLBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            spec: MySQLSpec {
                version: "8.0".to_string(),
                replicas: 1,
                storage_type: StorageType::Durable,
                storage: Some(StorageSpec {
                    storage_class_name: Some(TEST_STORAGE_CLASS.to_string()),
                    access_modes: vec!["ReadWriteOnce".to_string()],
                    size: "1Gi".to_string(),
                }),
                topology: None,
                termination_policy: TerminationPolicy::Halt,
                init: None,
                monitor: None,
                backup_schedule: None,
                database_secret: None,
                node_selector: BTreeMap::new(),
                anti_affinity: AntiAffinity::Preferred,
                tolerations: Vec::new(),
                scheduler_name: None,
                resources: None,
                do_not_pause: false,
            },
            generation: Some(1),
            uid: Some("test-uid-12345".to_string()),
            annotations: BTreeMap::new(),
            status: None,
        }
    }

    /// Three member Group Replication on a version that supports it
    pub fn group_replication(name: &str, namespace: &str) -> Self {
        Self::new(name, namespace)
            .with_version("8.0.23")
            .with_replicas(3)
            .with_group(TEST_GROUP_NAME)
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.spec.version = version.to_string();
        self
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.spec.replicas = replicas;
        self
    }

    pub fn with_group(mut self, group_name: &str) -> Self {
        self.spec.topology = Some(MySQLTopology {
            mode: Some("GroupReplication".to_string()),
            group: Some(GroupSpec {
                name: group_name.to_string(),
                base_server_id: None,
            }),
        });
        self
    }

    pub fn with_topology_mode(mut self, mode: &str) -> Self {
        self.spec.topology = Some(MySQLTopology {
            mode: Some(mode.to_string()),
            group: None,
        });
        self
    }

    pub fn with_storage_class(mut self, class: Option<&str>) -> Self {
        if let Some(storage) = self.spec.storage.as_mut() {
            storage.storage_class_name = class.map(str::to_string);
        }
        self
    }

    pub fn without_storage(mut self) -> Self {
        self.spec.storage = None;
        self
    }

    /// Ephemeral storage; Halt is not allowed there so the policy becomes Delete
    pub fn ephemeral(mut self) -> Self {
        self.spec.storage_type = StorageType::Ephemeral;
        self.spec.storage = None;
        self.spec.termination_policy = TerminationPolicy::Delete;
        self
    }

    pub fn with_termination_policy(mut self, policy: TerminationPolicy) -> Self {
        self.spec.termination_policy = policy;
        self
    }

    pub fn with_do_not_pause(mut self) -> Self {
        self.spec.do_not_pause = true;
        self
    }

    pub fn with_snapshot_init(mut self, snapshot: &str, wait: bool) -> Self {
        self.spec.init = Some(InitSpec {
            snapshot_source: Some(SnapshotSource {
                name: snapshot.to_string(),
                namespace: None,
            }),
            wait_for_initial_restore: wait,
            ..Default::default()
        });
        self
    }

    pub fn with_script_init(mut self, config_map: &str) -> Self {
        self.spec.init = Some(InitSpec {
            script_source: Some(ScriptSource {
                config_map: Some(config_map.to_string()),
                secret: None,
            }),
            ..Default::default()
        });
        self
    }

    pub fn initialized(mut self) -> Self {
        if let Some(init) = self.spec.init.as_mut() {
            init.initialized = true;
        }
        self
    }

    pub fn with_backup_schedule(mut self, cron: &str) -> Self {
        self.spec.backup_schedule = Some(BackupScheduleSpec {
            cron_expression: cron.to_string(),
            storage: gcs_storage(),
        });
        self
    }

    pub fn with_builtin_monitor(mut self) -> Self {
        self.spec.monitor = Some(MonitorSpec {
            agent: AGENT_PROMETHEUS_BUILTIN.to_string(),
            prometheus: None,
        });
        self
    }

    pub fn with_operator_monitor(mut self, port: i32) -> Self {
        self.spec.monitor = Some(MonitorSpec {
            agent: AGENT_PROMETHEUS_OPERATOR.to_string(),
            prometheus: Some(PrometheusSpec {
                port,
                namespace: Some("monitoring".to_string()),
                labels: BTreeMap::from([("release".to_string(), "prometheus".to_string())]),
                interval: Some("10s".to_string()),
            }),
        });
        self
    }

    pub fn with_monitor_agent(mut self, agent: &str) -> Self {
        self.spec.monitor = Some(MonitorSpec {
            agent: agent.to_string(),
            prometheus: None,
        });
        self
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_phase(mut self, phase: DatabasePhase) -> Self {
        let status = self.status.get_or_insert_with(MySQLStatus::default);
        status.phase = phase;
        self
    }

    pub fn with_observed_generation(mut self, generation: i64) -> Self {
        let status = self.status.get_or_insert_with(MySQLStatus::default);
        status.observed_generation = Some(generation);
        self
    }

    pub fn build(self) -> MySQL {
        MySQL {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: self.uid,
                generation: self.generation,
                annotations: if self.annotations.is_empty() {
                    None
                } else {
                    Some(self.annotations)
                },
                ..Default::default()
            },
            spec: self.spec,
            status: self.status,
        }
    }
}

// =============================================================================
// InMemoryLookup
// =============================================================================

/// [`ClusterLookup`] backed by in-memory maps
#[derive(Clone, Default)]
pub struct InMemoryLookup {
    pub versions: BTreeMap<String, MySQLVersion>,
    pub storage_classes: BTreeSet<String>,
    /// (namespace, name)
    pub secrets: BTreeSet<(String, String)>,
    /// (namespace, name)
    pub databases: BTreeMap<(String, String), MySQL>,
    /// Answer every lookup with a 503
    pub unavailable: bool,
}

impl InMemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with 5.6, 5.7.25, 8.0 and 8.0.23, one storage class and the
    /// backup storage secret in the "default" namespace
    pub fn with_catalog() -> Self {
        Self::new()
            .with_version(create_test_version("5.6", "5.6.45", false))
            .with_version(create_test_version("5.7.25", "5.7.25", false))
            .with_version(create_test_version("8.0", "8.0.0", false))
            .with_version(create_test_version("8.0.23", "8.0.23", false))
            .with_version(create_test_version("5.7-old", "5.7.0", true))
            .with_storage_class(TEST_STORAGE_CLASS)
            .with_secret("default", TEST_STORAGE_SECRET)
    }

    pub fn with_version(mut self, version: MySQLVersion) -> Self {
        let name = version.metadata.name.clone().unwrap_or_default();
        self.versions.insert(name, version);
        self
    }

    pub fn with_storage_class(mut self, name: &str) -> Self {
        self.storage_classes.insert(name.to_string());
        self
    }

    pub fn with_secret(mut self, namespace: &str, name: &str) -> Self {
        self.secrets.insert((namespace.to_string(), name.to_string()));
        self
    }

    pub fn with_mysql(mut self, db: MySQL) -> Self {
        let key = (
            db.metadata.namespace.clone().unwrap_or_default(),
            db.metadata.name.clone().unwrap_or_default(),
        );
        self.databases.insert(key, db);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    fn check_available(&self) -> Result<(), kube::Error> {
        if self.unavailable {
            return Err(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "the server is currently unable to handle the request".to_string(),
                reason: "ServiceUnavailable".to_string(),
                code: 503,
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterLookup for InMemoryLookup {
    async fn mysql_version(&self, name: &str) -> Result<Option<MySQLVersion>, kube::Error> {
        self.check_available()?;
        Ok(self.versions.get(name).cloned())
    }

    async fn storage_class_exists(&self, name: &str) -> Result<bool, kube::Error> {
        self.check_available()?;
        Ok(self.storage_classes.contains(name))
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, kube::Error> {
        self.check_available()?;
        Ok(self
            .secrets
            .contains(&(namespace.to_string(), name.to_string())))
    }

    async fn mysql(&self, namespace: &str, name: &str) -> Result<Option<MySQL>, kube::Error> {
        self.check_available()?;
        Ok(self
            .databases
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}
