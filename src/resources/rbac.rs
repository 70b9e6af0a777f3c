//! ServiceAccount, Role and RoleBinding for database pods and snapshot jobs
//!
//! Two identities exist per database: `<name>` for the StatefulSet pods and
//! `<name>-snapshot` for backup and restore jobs.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::MySQL;
use crate::resources::common::{owner_reference, standard_labels};
use crate::resources::ensure::upsert_map;

fn metadata(db: &MySQL, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: db.namespace(),
        labels: Some(standard_labels(&db.name_any())),
        owner_references: Some(vec![owner_reference(db)]),
        ..Default::default()
    }
}

fn verbs(list: &[&str]) -> Vec<String> {
    list.iter().map(|v| v.to_string()).collect()
}

/// Generate a ServiceAccount
pub fn generate_service_account(db: &MySQL, name: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(db, name),
        ..Default::default()
    }
}

/// Generate the Role for a database identity
///
/// Pods may read their own peers for discovery and the auth secret.
pub fn generate_role(db: &MySQL, name: &str) -> Role {
    Role {
        metadata: metadata(db, name),
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec!["".to_string()]),
                resources: Some(vec!["pods".to_string()]),
                verbs: verbs(&["get", "list", "watch"]),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["".to_string()]),
                resources: Some(vec!["secrets".to_string()]),
                resource_names: Some(vec![db.auth_secret_name()]),
                verbs: verbs(&["get"]),
                ..Default::default()
            },
        ]),
    }
}

/// Generate the RoleBinding tying the ServiceAccount to its Role
pub fn generate_role_binding(db: &MySQL, name: &str) -> RoleBinding {
    RoleBinding {
        metadata: metadata(db, name),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: db.namespace(),
            ..Default::default()
        }]),
    }
}

pub fn merge_service_account(current: &mut ServiceAccount, desired: &ServiceAccount) {
    upsert_map(&mut current.metadata.labels, desired.metadata.labels.as_ref());
}

pub fn merge_role(current: &mut Role, desired: &Role) {
    upsert_map(&mut current.metadata.labels, desired.metadata.labels.as_ref());
    current.rules = desired.rules.clone();
}

pub fn merge_role_binding(current: &mut RoleBinding, desired: &RoleBinding) {
    upsert_map(&mut current.metadata.labels, desired.metadata.labels.as_ref());
    current.subjects = desired.subjects.clone();
}
