//! Snapshot jobs: restore Job and the pod template shared with scheduled backups
//!
//! Both run the tools image of the catalog entry with
//! `--process=<restore|backup> --host=<db> --bucket=<bucket> --folder=<folder> --snapshot=<name>`
//! and mount the auth Secret, a dump staging volume, the storage credentials
//! and, for the Local backend, the backup volume itself.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, HostPathVolumeSource, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    SecretVolumeSource, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::controller::error::{Error, Result};
use crate::crd::{MySQL, MySQLVersion, Snapshot, SnapshotStorageSpec};
use crate::resources::common::{
    FIELD_MANAGER, LABEL_JOB_DATABASE, LABEL_JOB_TYPE, owner_reference, restore_job_name, snapshot_sa_name,
    standard_labels,
};

/// Restore process argument
pub const PROCESS_RESTORE: &str = "restore";

/// Backup process argument
pub const PROCESS_BACKUP: &str = "backup";

/// Where storage credentials are mounted
pub const OSM_MOUNT_PATH: &str = "/etc/osm";

const SECRET_MOUNT_PATH: &str = "/srv/mysql/secrets";

/// Inputs for a snapshot pod
pub struct SnapshotPod<'a> {
    pub db: &'a MySQL,
    pub version: &'a MySQLVersion,
    pub storage: &'a SnapshotStorageSpec,
    /// `restore` or `backup`
    pub process: &'static str,
    /// Bucket folder holding the database's snapshots
    pub folder: String,
    /// Value of `--snapshot`, may reference pod env as `$(VAR)`
    pub snapshot: String,
    /// Volume staging the dump
    pub data_volume: Volume,
    pub service_account: Option<String>,
}

/// Labels of a snapshot job object
pub fn job_labels(db_name: &str, process: &str) -> BTreeMap<String, String> {
    let mut labels = standard_labels(db_name);
    labels.insert(LABEL_JOB_TYPE.to_string(), process.to_string());
    labels
}

/// Labels of the pods a snapshot job runs, disjoint from the database selector
pub fn job_pod_labels(db_name: &str, process: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/managed-by".to_string(), FIELD_MANAGER.to_string()),
        (LABEL_JOB_DATABASE.to_string(), db_name.to_string()),
        (LABEL_JOB_TYPE.to_string(), process.to_string()),
    ])
}

/// Build the pod template of a restore or backup job
pub fn snapshot_pod_template(pod: SnapshotPod<'_>) -> Result<PodTemplateSpec> {
    let db_name = pod.db.name_any();
    let bucket = pod.storage.container().ok_or_else(|| {
        Error::InvalidConfig("snapshot storage has no backend configured".to_string())
    })?;

    let data_volume_name = pod.data_volume.name.clone();
    let mut volume_mounts = vec![
        VolumeMount {
            name: "secret".to_string(),
            mount_path: SECRET_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: data_volume_name,
            mount_path: format!("/var/dump-{}/", pod.process),
            ..Default::default()
        },
    ];
    let mut volumes = vec![
        Volume {
            name: "secret".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(pod.db.auth_secret_name()),
                ..Default::default()
            }),
            ..Default::default()
        },
        pod.data_volume,
    ];

    if let Some(osm_secret) = &pod.storage.storage_secret_name {
        volume_mounts.push(VolumeMount {
            name: "osmconfig".to_string(),
            mount_path: OSM_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
        volumes.push(Volume {
            name: "osmconfig".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(osm_secret.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    if let Some(local) = &pod.storage.local {
        volume_mounts.push(VolumeMount {
            name: "local".to_string(),
            mount_path: local.mount_path.clone(),
            ..Default::default()
        });
        let mut volume = Volume {
            name: "local".to_string(),
            ..Default::default()
        };
        if let Some(claim) = &local.claim_name {
            volume.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.clone(),
                ..Default::default()
            });
        } else if let Some(path) = &local.host_path {
            volume.host_path = Some(HostPathVolumeSource {
                path: path.clone(),
                ..Default::default()
            });
        } else {
            volume.empty_dir = Some(EmptyDirVolumeSource::default());
        }
        volumes.push(volume);
    }

    let container = Container {
        name: pod.process.to_string(),
        image: Some(pod.version.spec.tools.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![
            format!("--process={}", pod.process),
            format!("--host={}", db_name),
            format!("--bucket={}", bucket),
            format!("--folder={}", pod.folder),
            format!("--snapshot={}", pod.snapshot),
        ]),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    };

    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(job_pod_labels(&db_name, pod.process)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: Some(volumes),
            restart_policy: Some("Never".to_string()),
            service_account_name: pod.service_account,
            ..Default::default()
        }),
    })
}

/// Generate the PVC staging restored data when the database uses durable storage
pub fn generate_restore_pvc(db: &MySQL, snapshot: &Snapshot) -> Option<PersistentVolumeClaim> {
    let storage = db.spec.storage.as_ref()?;
    let db_name = db.name_any();
    Some(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(restore_job_name(&snapshot.name_any())),
            namespace: db.namespace(),
            labels: Some(job_labels(&db_name, PROCESS_RESTORE)),
            owner_references: Some(vec![owner_reference(db)]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(storage.access_modes.clone()),
            storage_class_name: storage.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(storage.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Generate the one-shot Job restoring `snapshot` into `db`
pub fn generate_restore_job(
    db: &MySQL,
    snapshot: &Snapshot,
    version: &MySQLVersion,
    enable_rbac: bool,
) -> Result<Job> {
    let db_name = db.name_any();
    let job_name = restore_job_name(&snapshot.name_any());
    let snapshot_ns = snapshot.namespace().unwrap_or_default();

    let data_volume = match generate_restore_pvc(db, snapshot) {
        Some(_) => Volume {
            name: "data".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: job_name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        },
        None => Volume {
            name: "data".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    };

    let template = snapshot_pod_template(SnapshotPod {
        db,
        version,
        storage: &snapshot.spec.storage,
        process: PROCESS_RESTORE,
        folder: snapshot
            .spec
            .storage
            .location(&snapshot_ns, &snapshot.spec.database_name),
        snapshot: snapshot.name_any(),
        data_volume,
        service_account: enable_rbac.then(|| snapshot_sa_name(&db_name)),
    })?;

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(job_name),
            namespace: db.namespace(),
            labels: Some(job_labels(&db_name, PROCESS_RESTORE)),
            owner_references: Some(vec![owner_reference(db)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(2),
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Terminal state of a Job, if it reached one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

/// Read the terminal state from a Job's status
pub fn job_outcome(job: &Job) -> Option<JobOutcome> {
    let status = job.status.as_ref()?;
    if status.succeeded.unwrap_or(0) > 0 {
        return Some(JobOutcome::Succeeded);
    }
    let failed_condition = status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Failed" && c.status == "True");
    failed_condition.then_some(JobOutcome::Failed)
}
