//! Wait condition helpers for MySQL and DormantDatabase resources

use std::fmt::Debug;
use std::time::Duration;

use kube::Api;
use kube::runtime::wait::{Condition, await_condition};
use mysql_operator::FINALIZER;
use mysql_operator::crd::{DatabasePhase, DormantDatabase, DormantPhase, MySQL};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Short timeout: the tests check operator logic, not pod readiness
pub const FAST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Error, Debug)]
pub enum WaitError {
    #[error("Timeout waiting for condition")]
    Timeout,

    #[error("Watch error: {0}")]
    Watch(#[from] kube::runtime::wait::Error),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Resource not found after wait")]
    ResourceNotFound,
}

/// Condition that checks if MySQL is in a specific phase
pub fn is_phase(expected: DatabasePhase) -> impl Condition<MySQL> {
    move |obj: Option<&MySQL>| {
        obj.and_then(|db| db.status.as_ref())
            .map(|status| status.phase == expected)
            .unwrap_or(false)
    }
}

/// Condition that checks if the operator finalizer is present
pub fn has_finalizer() -> impl Condition<MySQL> {
    |obj: Option<&MySQL>| {
        obj.and_then(|db| db.metadata.finalizers.as_ref())
            .map(|f| f.iter().any(|name| name == FINALIZER))
            .unwrap_or(false)
    }
}

/// Condition that checks if observed_generation matches metadata.generation
pub fn generation_observed() -> impl Condition<MySQL> {
    |obj: Option<&MySQL>| {
        obj.map(|db| {
            db.metadata.generation.is_some()
                && db.status.as_ref().and_then(|s| s.observed_generation) == db.metadata.generation
        })
        .unwrap_or(false)
    }
}

/// Condition that checks if the status reason mentions `expected_substring`
pub fn has_reason(expected_substring: &str) -> impl Condition<MySQL> {
    let expected = expected_substring.to_string();
    move |obj: Option<&MySQL>| {
        obj.and_then(|db| db.status.as_ref())
            .and_then(|status| status.reason.as_ref())
            .is_some_and(|reason| reason.contains(&expected))
    }
}

/// Condition that checks if a DormantDatabase is in a specific phase
pub fn dormant_phase(expected: DormantPhase) -> impl Condition<DormantDatabase> {
    move |obj: Option<&DormantDatabase>| {
        obj.and_then(|d| d.status.as_ref())
            .map(|status| status.phase == expected)
            .unwrap_or(false)
    }
}

/// Condition that holds once the object is gone
pub fn is_deleted<K>() -> impl Condition<K> {
    |obj: Option<&K>| obj.is_none()
}

/// Wait for a condition on a named object with timeout
pub async fn wait_for<K, C>(api: &Api<K>, name: &str, condition: C, timeout: Duration) -> Result<Option<K>, WaitError>
where
    K: kube::Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    C: Condition<K>,
{
    tokio::time::timeout(timeout, await_condition(api.clone(), name, condition))
        .await
        .map_err(|_| WaitError::Timeout)?
        .map_err(WaitError::from)
}

/// Wait for an object to exist, polling with retry
pub async fn wait_for_resource<K>(api: &Api<K>, name: &str, timeout: Duration) -> Result<K, WaitError>
where
    K: kube::Resource + Clone + Debug + DeserializeOwned,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match api.get_opt(name).await? {
            Some(resource) => return Ok(resource),
            None if tokio::time::Instant::now() >= deadline => return Err(WaitError::ResourceNotFound),
            None => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
}
