//! Periodic connectivity probe for running databases
//!
//! Every tick the primary Service of each Running database is dialed on the
//! MySQL port. The `AcceptingConnection` condition is only written when the
//! probe result differs from what the status already says.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::api::ListParams;
use kube::{Api, ResourceExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::controller::context::Context;
use crate::controller::status::{StatusManager, condition_status, condition_types};
use crate::crd::{DatabasePhase, MySQL};
use crate::resources::common::{MYSQL_PORT, primary_service_dns};

/// Every phase, used to zero gauges for phases with no databases
const ALL_PHASES: [DatabasePhase; 7] = [
    DatabasePhase::Creating,
    DatabasePhase::Initializing,
    DatabasePhase::Running,
    DatabasePhase::Paused,
    DatabasePhase::Resuming,
    DatabasePhase::Failed,
    DatabasePhase::Terminating,
];

/// Number of databases in each phase
pub fn phase_counts(databases: &[MySQL]) -> BTreeMap<String, i64> {
    let mut counts: BTreeMap<String, i64> = ALL_PHASES.iter().map(|p| (p.to_string(), 0)).collect();
    for db in databases {
        *counts.entry(db.phase().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Whether the recorded `AcceptingConnection` condition disagrees with a probe
pub fn connection_state_changed(db: &MySQL, accepting: bool) -> bool {
    let want = if accepting {
        condition_status::TRUE
    } else {
        condition_status::FALSE
    };
    let recorded = db
        .status
        .as_ref()
        .and_then(|s| s.conditions.iter().find(|c| c.type_ == condition_types::ACCEPTING_CONNECTION))
        .map(|c| c.status.as_str());
    recorded != Some(want)
}

/// Dial `host:port` within `timeout`
pub async fn probe(host: &str, port: i32, timeout: Duration) -> Result<(), String> {
    let addr = format!("{}:{}", host, port);
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(format!("dial {}: {}", addr, e)),
        Err(_) => Err(format!("dial {}: timed out after {:?}", addr, timeout)),
    }
}

/// Run the checker until the task is cancelled
pub async fn run_health_checker(ctx: Arc<Context>) {
    info!(
        interval = ?ctx.config.health_check_interval,
        "Starting database health checker"
    );
    let mut ticker = tokio::time::interval(ctx.config.health_check_interval);
    loop {
        ticker.tick().await;
        if let Err(e) = check_all(&ctx).await {
            warn!(error = %e, "Health check pass failed");
        }
    }
}

async fn check_all(ctx: &Context) -> Result<(), kube::Error> {
    let api: Api<MySQL> = Api::all(ctx.client.clone());
    let databases = api.list(&ListParams::default()).await?.items;

    if let Some(health) = &ctx.health_state {
        for (phase, count) in phase_counts(&databases) {
            health.metrics.set_databases_by_phase(&phase, count);
        }
    }

    for db in databases.iter().filter(|db| db.phase() == DatabasePhase::Running) {
        check_one(ctx, db).await;
    }
    Ok(())
}

async fn check_one(ctx: &Context, db: &MySQL) {
    let ns = db.namespace().unwrap_or_default();
    let name = db.name_any();
    let host = primary_service_dns(&name, &ns);

    let result = probe(&host, MYSQL_PORT, ctx.config.health_check_timeout).await;
    let accepting = result.is_ok();
    if let Some(health) = &ctx.health_state {
        health.metrics.set_accepting_connections(&ns, &name, accepting);
    }

    if !connection_state_changed(db, accepting) {
        return;
    }

    let message = match &result {
        Ok(()) => "Database accepts connections".to_string(),
        Err(e) => e.clone(),
    };
    debug!(namespace = %ns, name = %name, accepting, "Connection state changed");
    let status = StatusManager::new(db, ctx, &ns);
    if let Err(e) = status.set_connection(accepting, &message).await {
        warn!(namespace = %ns, name = %name, error = %e, "Failed to record connection state");
    }
}
