//! Operator configuration
//!
//! Built once at startup from `MYSQL_OPERATOR_*` environment variables and
//! shared read-only with every controller, the webhook and the health checker.

use std::time::Duration;

use tracing::warn;

/// Default shared headless service name
pub const DEFAULT_GOVERNING_SERVICE: &str = "kubedb";

/// Immutable operator configuration
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Namespace the operator runs in
    pub operator_namespace: String,
    /// Name of the headless Service shared by all databases of a namespace
    pub governing_service: String,
    /// Create ServiceAccount/Role/RoleBinding per database
    pub enable_rbac: bool,
    /// Block the create path until all database pods are Ready
    pub wait_for_pods_ready: bool,
    /// Upper bound for the pod readiness wait
    pub pod_ready_timeout: Duration,
    /// Upper bound for the restore Job wait
    pub restore_timeout: Duration,
    /// Periodic resync interval for converged databases
    pub requeue_interval: Duration,
    /// How often the health checker probes running databases
    pub health_check_interval: Duration,
    /// Connect timeout for a single health probe
    pub health_check_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_namespace: "default".to_string(),
            governing_service: DEFAULT_GOVERNING_SERVICE.to_string(),
            enable_rbac: true,
            wait_for_pods_ready: false,
            pod_ready_timeout: Duration::from_secs(30 * 60),
            restore_timeout: Duration::from_secs(30 * 60),
            requeue_interval: Duration::from_secs(2 * 60),
            health_check_interval: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(5),
        }
    }
}

impl OperatorConfig {
    /// Build the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            operator_namespace: lookup("POD_NAMESPACE").unwrap_or(defaults.operator_namespace),
            governing_service: lookup("MYSQL_OPERATOR_GOVERNING_SERVICE")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.governing_service),
            enable_rbac: parse_or("MYSQL_OPERATOR_ENABLE_RBAC", &lookup, defaults.enable_rbac),
            wait_for_pods_ready: parse_or(
                "MYSQL_OPERATOR_WAIT_FOR_PODS_READY",
                &lookup,
                defaults.wait_for_pods_ready,
            ),
            pod_ready_timeout: secs_or(
                "MYSQL_OPERATOR_POD_READY_TIMEOUT_SECS",
                &lookup,
                defaults.pod_ready_timeout,
            ),
            restore_timeout: secs_or(
                "MYSQL_OPERATOR_RESTORE_TIMEOUT_SECS",
                &lookup,
                defaults.restore_timeout,
            ),
            requeue_interval: secs_or(
                "MYSQL_OPERATOR_RESYNC_PERIOD_SECS",
                &lookup,
                defaults.requeue_interval,
            ),
            health_check_interval: secs_or(
                "MYSQL_OPERATOR_HEALTH_CHECK_INTERVAL_SECS",
                &lookup,
                defaults.health_check_interval,
            ),
            health_check_timeout: secs_or(
                "MYSQL_OPERATOR_HEALTH_CHECK_TIMEOUT_SECS",
                &lookup,
                defaults.health_check_timeout,
            ),
        }
    }
}

fn parse_or<F, T>(key: &str, lookup: &F, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Ignoring unparseable configuration value");
            default
        }),
        None => default,
    }
}

fn secs_or<F>(key: &str, lookup: &F, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or::<F, u64>(key, lookup, 0) {
        0 => default,
        secs => Duration::from_secs(secs),
    }
}
