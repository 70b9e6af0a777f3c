//! Probe and metrics endpoints
//!
//! - `/healthz` answers as long as the process runs
//! - `/readyz` answers 200 once the controllers are watching
//! - `/metrics` serves the Prometheus text format

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Port of the probe and metrics server
pub const HEALTH_PORT: u16 = 8080;

/// Identifies one MySQL object
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DatabaseLabels {
    pub namespace: String,
    pub name: String,
}

impl DatabaseLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub phase: String,
}

/// Operator metrics, all prefixed `mysql_operator_`
pub struct Metrics {
    pub reconciliations_total: Family<DatabaseLabels, Counter>,
    pub reconciliation_errors_total: Family<DatabaseLabels, Counter>,
    pub reconcile_duration_seconds: Family<DatabaseLabels, Histogram>,
    /// Unix time of the last reconcile pass that succeeded
    pub last_reconcile_timestamp: Gauge,
    pub databases_total: Family<PhaseLabels, Gauge>,
    pub database_replicas_desired: Family<DatabaseLabels, Gauge>,
    pub database_replicas_ready: Family<DatabaseLabels, Gauge>,
    /// 1 when the last connection check succeeded
    pub database_accepting_connections: Family<DatabaseLabels, Gauge>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("mysql_operator");

        let reconciliations_total = Family::<DatabaseLabels, Counter>::default();
        registry.register(
            "reconciliations",
            "Reconcile passes per database",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<DatabaseLabels, Counter>::default();
        registry.register(
            "reconciliation_errors",
            "Reconcile passes that returned an error",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<DatabaseLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Duration of a reconcile pass",
            reconcile_duration_seconds.clone(),
        );

        let last_reconcile_timestamp = Gauge::default();
        registry.register(
            "last_reconcile_timestamp_seconds",
            "Unix time of the last successful reconcile pass",
            last_reconcile_timestamp.clone(),
        );

        let databases_total = Family::<PhaseLabels, Gauge>::default();
        registry.register(
            "databases",
            "MySQL databases by phase",
            databases_total.clone(),
        );

        let database_replicas_desired = Family::<DatabaseLabels, Gauge>::default();
        registry.register(
            "database_replicas_desired",
            "spec.replicas of each database",
            database_replicas_desired.clone(),
        );

        let database_replicas_ready = Family::<DatabaseLabels, Gauge>::default();
        registry.register(
            "database_replicas_ready",
            "Ready StatefulSet replicas of each database",
            database_replicas_ready.clone(),
        );

        let database_accepting_connections = Family::<DatabaseLabels, Gauge>::default();
        registry.register(
            "database_accepting_connections",
            "Whether the primary Service accepted a TCP connection on the last check",
            database_accepting_connections.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            last_reconcile_timestamp,
            databases_total,
            database_replicas_desired,
            database_replicas_ready,
            database_accepting_connections,
            registry,
        }
    }

    /// Count a reconcile pass and its duration
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = DatabaseLabels::new(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&DatabaseLabels::new(namespace, name))
            .inc();
    }

    pub fn mark_reconciled(&self) {
        self.last_reconcile_timestamp
            .set(chrono::Utc::now().timestamp());
    }

    /// Set the number of databases in `phase`
    pub fn set_databases_by_phase(&self, phase: &str, count: i64) {
        self.databases_total
            .get_or_create(&PhaseLabels {
                phase: phase.to_string(),
            })
            .set(count);
    }

    pub fn set_database_replicas(&self, namespace: &str, name: &str, desired: i64, ready: i64) {
        let labels = DatabaseLabels::new(namespace, name);
        self.database_replicas_desired.get_or_create(&labels).set(desired);
        self.database_replicas_ready.get_or_create(&labels).set(ready);
    }

    pub fn set_accepting_connections(&self, namespace: &str, name: &str, accepting: bool) {
        self.database_accepting_connections
            .get_or_create(&DatabaseLabels::new(namespace, name))
            .set(i64::from(accepting));
    }

    /// Render the registry in the Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Readiness flag and metrics shared by the controllers and the server
pub struct HealthState {
    ready: RwLock<bool>,
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.encode(),
    )
}

/// Router serving the probe and metrics endpoints
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve [`create_router`] on 0.0.0.0:[`HEALTH_PORT`]
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], HEALTH_PORT));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Health server listening on {}", addr);

    axum::serve(listener, create_router(state)).await
}
