//! StatefulSet generation for MySQL databases
//!
//! One StatefulSet named after the database runs every member. Its pods use
//! the governing Service for stable DNS names, get the root password from the
//! auth Secret, and carry an exporter sidecar when monitoring is enabled.

use std::collections::BTreeMap;
use std::fmt::Write;

use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements as K8sResourceRequirements, SecretKeySelector, SecretVolumeSource,
    TCPSocketAction, Toleration as K8sToleration, Volume, VolumeMount,
    VolumeResourceRequirements, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use sha2::{Digest, Sha256};

use crate::config::OperatorConfig;
use crate::crd::{
    AntiAffinity, MySQL, MySQLVersion, ResourceList, ResourceRequirements, StorageType,
    Toleration,
};
use crate::resources::common::{
    EXPORTER_PORT_NAME, LABEL_DATABASE_NAME, MYSQL_CONTAINER, MYSQL_PORT, owner_reference,
    selector_labels, standard_labels,
};
use crate::resources::ensure::upsert_map;
use crate::resources::secret::KEY_MYSQL_PASSWORD;

/// Annotation recording a hash of the last applied pod template
pub const ANNOTATION_TEMPLATE_HASH: &str = "kubedb.com/template-hash";

/// Data directory of the MySQL server image
const DATA_MOUNT_PATH: &str = "/var/lib/mysql";

/// Directory the MySQL image runs init scripts from
const INIT_SCRIPT_MOUNT_PATH: &str = "/docker-entrypoint-initdb.d";

fn quantities(list: &ResourceList) -> BTreeMap<String, Quantity> {
    let mut map = BTreeMap::new();
    if let Some(cpu) = &list.cpu {
        map.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &list.memory {
        map.insert("memory".to_string(), Quantity(memory.clone()));
    }
    map
}

fn resources(r: &ResourceRequirements) -> K8sResourceRequirements {
    K8sResourceRequirements {
        limits: r.limits.as_ref().map(quantities),
        requests: r.requests.as_ref().map(quantities),
        ..Default::default()
    }
}

fn toleration(t: &Toleration) -> K8sToleration {
    K8sToleration {
        key: t.key.clone(),
        operator: t.operator.clone(),
        value: t.value.clone(),
        effect: t.effect.clone(),
        toleration_seconds: t.toleration_seconds,
    }
}

fn affinity_term(db_name: &str) -> PodAffinityTerm {
    PodAffinityTerm {
        label_selector: Some(LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: LABEL_DATABASE_NAME.to_string(),
                operator: "In".to_string(),
                values: Some(vec![db_name.to_string()]),
            }]),
            ..Default::default()
        }),
        topology_key: "kubernetes.io/hostname".to_string(),
        ..Default::default()
    }
}

/// Generate pod anti-affinity for spreading members across nodes
fn generate_anti_affinity(db_name: &str, mode: AntiAffinity) -> Option<Affinity> {
    let anti_affinity = match mode {
        AntiAffinity::Disabled => return None,
        AntiAffinity::Preferred => PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: affinity_term(db_name),
                },
            ]),
            ..Default::default()
        },
        AntiAffinity::Required => PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![affinity_term(
                db_name,
            )]),
            ..Default::default()
        },
    };
    Some(Affinity {
        pod_anti_affinity: Some(anti_affinity),
        ..Default::default()
    })
}

fn env_value(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn root_password_env(secret_name: &str) -> EnvVar {
    EnvVar {
        name: "MYSQL_ROOT_PASSWORD".to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: KEY_MYSQL_PASSWORD.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment for Group Replication members
fn group_replication_env(db: &MySQL, governing_service: &str) -> Vec<EnvVar> {
    let group = db.spec.topology.as_ref().and_then(|t| t.group.as_ref());
    let mut env = vec![
        env_value("GROUP_NAME", group.map(|g| g.name.clone()).unwrap_or_default()),
        env_value(
            "BASE_SERVER_ID",
            group
                .and_then(|g| g.base_server_id)
                .unwrap_or(1)
                .to_string(),
        ),
        env_value("GOV_SVC", governing_service),
        env_value("DB_NAME", db.name_any()),
    ];
    env.push(EnvVar {
        name: "POD_NAMESPACE".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.namespace".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
    env
}

fn tcp_probe(initial_delay: i32, failure_threshold: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(MYSQL_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}

fn mysql_container(db: &MySQL, version: &MySQLVersion, governing_service: &str) -> Container {
    let mut env = vec![root_password_env(&db.auth_secret_name())];
    if db.spec.is_group_replication() {
        env.extend(group_replication_env(db, governing_service));
    }

    let mut volume_mounts = vec![VolumeMount {
        name: "data".to_string(),
        mount_path: DATA_MOUNT_PATH.to_string(),
        ..Default::default()
    }];
    if db
        .spec
        .init
        .as_ref()
        .is_some_and(|i| i.script_source.is_some())
    {
        volume_mounts.push(VolumeMount {
            name: "initial-script".to_string(),
            mount_path: INIT_SCRIPT_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    Container {
        name: MYSQL_CONTAINER.to_string(),
        image: Some(version.spec.db.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![ContainerPort {
            name: Some("db".to_string()),
            container_port: MYSQL_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(env),
        volume_mounts: Some(volume_mounts),
        resources: db.spec.resources.as_ref().map(resources),
        readiness_probe: Some(tcp_probe(10, 3)),
        liveness_probe: Some(tcp_probe(30, 6)),
        ..Default::default()
    }
}

/// Sidecar exporting MySQL metrics to Prometheus
fn exporter_container(db: &MySQL, version: &MySQLVersion, port: i32) -> Container {
    Container {
        name: "exporter".to_string(),
        image: Some(version.spec.exporter.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![format!("--web.listen-address=:{}", port)]),
        env: Some(vec![
            root_password_env(&db.auth_secret_name()),
            env_value(
                "DATA_SOURCE_NAME",
                format!("root:$(MYSQL_ROOT_PASSWORD)@(127.0.0.1:{})/", MYSQL_PORT),
            ),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some(EXPORTER_PORT_NAME.to_string()),
            container_port: port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn init_script_volume(db: &MySQL) -> Option<Volume> {
    let source = db.spec.init.as_ref()?.script_source.as_ref()?;
    let mut volume = Volume {
        name: "initial-script".to_string(),
        ..Default::default()
    };
    if let Some(config_map) = &source.config_map {
        volume.config_map = Some(ConfigMapVolumeSource {
            name: config_map.clone(),
            ..Default::default()
        });
    } else if let Some(secret) = &source.secret {
        volume.secret = Some(SecretVolumeSource {
            secret_name: Some(secret.clone()),
            ..Default::default()
        });
    } else {
        return None;
    }
    Some(volume)
}

fn data_claim_template(db: &MySQL) -> Option<PersistentVolumeClaim> {
    let storage = db.spec.storage.as_ref()?;
    Some(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
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

/// Generate the StatefulSet running the database members
pub fn generate_statefulset(
    db: &MySQL,
    version: &MySQLVersion,
    config: &OperatorConfig,
) -> StatefulSet {
    let db_name = db.name_any();
    let labels = standard_labels(&db_name);

    let mut containers = vec![mysql_container(db, version, &config.governing_service)];
    if let Some(monitor) = &db.spec.monitor {
        containers.push(exporter_container(db, version, monitor.prometheus_or_default().port));
    }

    let mut volumes = Vec::new();
    let claim_template = match db.spec.storage_type {
        StorageType::Durable => data_claim_template(db),
        StorageType::Ephemeral => None,
    };
    if claim_template.is_none() {
        volumes.push(Volume {
            name: "data".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }
    volumes.extend(init_script_volume(db));

    let pod_spec = PodSpec {
        containers,
        volumes: if volumes.is_empty() { None } else { Some(volumes) },
        node_selector: if db.spec.node_selector.is_empty() {
            None
        } else {
            Some(db.spec.node_selector.clone())
        },
        tolerations: if db.spec.tolerations.is_empty() {
            None
        } else {
            Some(db.spec.tolerations.iter().map(toleration).collect())
        },
        scheduler_name: db.spec.scheduler_name.clone(),
        affinity: generate_anti_affinity(&db_name, db.spec.anti_affinity),
        service_account_name: config.enable_rbac.then(|| db_name.clone()),
        termination_grace_period_seconds: Some(30),
        ..Default::default()
    };

    let template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(pod_spec),
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(db_name.clone()),
            namespace: db.namespace(),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_TEMPLATE_HASH.to_string(),
                template_hash(&template),
            )])),
            owner_references: Some(vec![owner_reference(db)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(config.governing_service.clone()),
            replicas: Some(db.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&db_name)),
                ..Default::default()
            },
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy {
                    partition: Some(0),
                    ..Default::default()
                }),
            }),
            pod_management_policy: Some("OrderedReady".to_string()),
            template,
            volume_claim_templates: claim_template.map(|c| vec![c]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Digest of a pod template, stored in an annotation
///
/// Truncated SHA-256 of the serialized template, 16 hex chars. Must stay
/// identical across operator builds or every StatefulSet is rolled.
pub fn template_hash(template: &PodTemplateSpec) -> String {
    let serialized = serde_json::to_string(template).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    digest[..8].iter().fold(String::with_capacity(16), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

/// Copy the operator-owned fields of `desired` onto a live StatefulSet
///
/// The pod template is only rewritten when its hash annotation changed, so
/// API server defaulting does not make every pass look like an update.
/// Selector, serviceName and claim templates are immutable and left alone.
pub fn merge_statefulset(current: &mut StatefulSet, desired: &StatefulSet) {
    upsert_map(&mut current.metadata.labels, desired.metadata.labels.as_ref());

    let Some(desired_spec) = desired.spec.as_ref() else {
        return;
    };
    let spec = current.spec.get_or_insert_with(StatefulSetSpec::default);
    spec.replicas = desired_spec.replicas;

    let desired_hash = desired
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_TEMPLATE_HASH));
    let live_hash = current
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_TEMPLATE_HASH));
    if desired_hash != live_hash {
        spec.template = desired_spec.template.clone();
        spec.update_strategy = desired_spec.update_strategy.clone();
        upsert_map(
            &mut current.metadata.annotations,
            desired.metadata.annotations.as_ref(),
        );
    }
}
