//! Create-or-patch combinators for child objects
//!
//! Every child object is looked up by its deterministic name. Absent objects
//! are created; present ones must carry this database's labels and then have
//! only their operator-owned fields rewritten through [`patch_with_retry`].

use std::collections::BTreeMap;
use std::fmt::Debug;

use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::controller::error::{Error, Result, is_kube_conflict, is_kube_not_found};
use crate::resources::common::{FIELD_MANAGER, is_owned_by};

/// Attempts made by [`patch_with_retry`] before giving up on write conflicts
pub const DEFAULT_PATCH_ATTEMPTS: u32 = 5;

/// Outcome of an ensure operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Created,
    Patched,
    Unchanged,
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verb::Created => write!(f, "created"),
            Verb::Patched => write!(f, "patched"),
            Verb::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Whether `updated` differs from `current` once serialized
pub fn needs_patch<K: Serialize>(current: &K, updated: &K) -> Result<bool> {
    Ok(serde_json::to_value(current)? != serde_json::to_value(updated)?)
}

/// Insert every entry of `desired` into `target`, keeping foreign keys
pub fn upsert_map(target: &mut Option<BTreeMap<String, String>>, desired: Option<&BTreeMap<String, String>>) {
    if let Some(desired) = desired {
        let map = target.get_or_insert_with(BTreeMap::new);
        for (k, v) in desired {
            map.insert(k.clone(), v.clone());
        }
    }
}

/// Read the latest object, apply `transform`, and replace it with the read
/// resource version. Conflicting writes are retried up to `max_attempts` times.
pub async fn patch_with_retry<K, F>(
    api: &Api<K>,
    name: &str,
    max_attempts: u32,
    transform: F,
) -> Result<Verb>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
    F: Fn(&mut K),
{
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };

    for attempt in 1..=max_attempts {
        let current = api.get(name).await?;
        let mut updated = current.clone();
        transform(&mut updated);

        if !needs_patch(&current, &updated)? {
            return Ok(Verb::Unchanged);
        }

        match api.replace(name, &params, &updated).await {
            Ok(_) => return Ok(Verb::Patched),
            Err(e) if is_kube_conflict(&e) && attempt < max_attempts => {
                debug!(name, attempt, "Write conflict, retrying with latest version");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::TransientError(format!(
        "gave up patching {} after {} conflicting writes",
        name, max_attempts
    )))
}

/// Create `desired` when absent, otherwise merge it into the existing object
///
/// `merge` copies the operator-owned fields of `desired` onto the live object.
/// An existing object that is not labelled for `db_name` is never adopted.
pub async fn ensure_object<K, F>(
    api: &Api<K>,
    kind: &'static str,
    db_name: &str,
    desired: &K,
    merge: F,
) -> Result<Verb>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
    F: Fn(&mut K, &K),
{
    let name = desired.name_any();
    match api.get_opt(&name).await? {
        None => {
            let params = PostParams {
                field_manager: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            };
            match api.create(&params, desired).await {
                Ok(_) => {
                    debug!(kind, name, "Created object");
                    Ok(Verb::Created)
                }
                // Lost a create race; the next pass takes the patch path
                Err(kube::Error::Api(e)) if e.code == 409 => Err(Error::TransientError(format!(
                    "{} {} was created concurrently",
                    kind, name
                ))),
                Err(e) => Err(e.into()),
            }
        }
        Some(existing) => {
            if !is_owned_by(existing.labels(), db_name) {
                return Err(Error::OwnershipConflictError { kind, name });
            }
            let verb = patch_with_retry(api, &name, DEFAULT_PATCH_ATTEMPTS, |current| {
                merge(current, desired)
            })
            .await?;
            debug!(kind, name, %verb, "Ensured object");
            Ok(verb)
        }
    }
}

/// Delete an object, treating absence as success. Returns whether it existed.
pub async fn delete_if_exists<K>(api: &Api<K>, name: &str) -> Result<bool>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(true),
        Err(e) if is_kube_not_found(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Delete every object matching a label selector
pub async fn delete_by_labels<K>(api: &Api<K>, selector: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.delete_collection(&DeleteParams::background(), &ListParams::default().labels(selector))
        .await?;
    Ok(())
}

/// Render a label map as a selector string
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
