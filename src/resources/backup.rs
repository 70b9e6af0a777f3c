//! Scheduled backups
//!
//! A `BackupSchedule` becomes a CronJob `<name>-backup` whose pods run the
//! tools image with `--process=backup`. Every run writes a snapshot named
//! after its pod so runs never collide.

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, EnvVar, EnvVarSource, ObjectFieldSelector, Volume};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::controller::error::Result;
use crate::crd::{BackupScheduleSpec, MySQL, MySQLVersion};
use crate::resources::common::{backup_cronjob_name, owner_reference, snapshot_sa_name};
use crate::resources::ensure::upsert_map;
use crate::resources::job::{PROCESS_BACKUP, SnapshotPod, job_labels, snapshot_pod_template};

/// Generate the backup CronJob for a schedule
pub fn generate_backup_cronjob(
    db: &MySQL,
    schedule: &BackupScheduleSpec,
    version: &MySQLVersion,
    enable_rbac: bool,
) -> Result<CronJob> {
    let db_name = db.name_any();
    let namespace = db.namespace().unwrap_or_default();

    let mut template = snapshot_pod_template(SnapshotPod {
        db,
        version,
        storage: &schedule.storage,
        process: PROCESS_BACKUP,
        folder: schedule.storage.location(&namespace, &db_name),
        snapshot: "$(POD_NAME)".to_string(),
        data_volume: Volume {
            name: "data".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        service_account: enable_rbac.then(|| snapshot_sa_name(&db_name)),
    })?;

    if let Some(container) = template
        .spec
        .as_mut()
        .and_then(|spec| spec.containers.first_mut())
    {
        container.env = Some(vec![EnvVar {
            name: "POD_NAME".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.name".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);
    }

    Ok(CronJob {
        metadata: ObjectMeta {
            name: Some(backup_cronjob_name(&db_name)),
            namespace: db.namespace(),
            labels: Some(job_labels(&db_name, PROCESS_BACKUP)),
            owner_references: Some(vec![owner_reference(db)]),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: schedule.cron_expression.clone(),
            concurrency_policy: Some("Forbid".to_string()),
            successful_jobs_history_limit: Some(3),
            failed_jobs_history_limit: Some(1),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(job_labels(&db_name, PROCESS_BACKUP)),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    backoff_limit: Some(1),
                    template,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Copy schedule and job template onto the live CronJob
pub fn merge_backup_cronjob(current: &mut CronJob, desired: &CronJob) {
    upsert_map(&mut current.metadata.labels, desired.metadata.labels.as_ref());
    let Some(want) = desired.spec.as_ref() else {
        return;
    };
    match current.spec.as_mut() {
        Some(spec) => {
            spec.schedule = want.schedule.clone();
            spec.concurrency_policy = want.concurrency_policy.clone();
            let live_template = spec.job_template.spec.as_ref().map(|s| &s.template);
            let want_template = want.job_template.spec.as_ref().map(|s| &s.template);
            if live_template.and_then(|t| t.spec.as_ref()).map(|s| &s.containers)
                != want_template.and_then(|t| t.spec.as_ref()).map(|s| &s.containers)
            {
                spec.job_template = want.job_template.clone();
            }
        }
        None => current.spec = Some(want.clone()),
    }
}
