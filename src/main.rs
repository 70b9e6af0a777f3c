use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use mysql_operator::health::{HealthState, run_health_server};
use mysql_operator::{
    OperatorConfig, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, run_webhook_server,
};
use mysql_operator::{run_controller, run_database_health_checker, run_dormant_controller};

/// Lease configuration
const LEASE_NAME: &str = "mysql-operator-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available".into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mysql_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    info!("Starting mysql-operator");

    let config = OperatorConfig::from_env();
    info!(
        governing_service = %config.governing_service,
        enable_rbac = config.enable_rbac,
        wait_for_pods_ready = config.wait_for_pods_ready,
        "Loaded operator configuration"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let namespace = config.operator_namespace.clone();

    let health_state = Arc::new(HealthState::new());

    // Probes and admission must work even as non-leader
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state).await {
                error!("Health server error: {}", e);
            }
        })
    };
    let webhook_handle = spawn_webhook_server(&client);

    info!(
        holder_id = %pod_name,
        namespace = %namespace,
        lease_name = LEASE_NAME,
        "Initializing leader election"
    );
    let lease_lock = lease_lock(&client, &namespace, &pod_name);
    acquire_leadership(&lease_lock).await;
    let lease_renewal_handle = tokio::spawn(renew_leadership(lease_lock));

    info!("Watching MySQL resources (apiVersion: kubedb.com/v1alpha1)");

    let controller_handle = {
        let client = client.clone();
        let config = config.clone();
        let health_state = health_state.clone();
        tokio::spawn(async move {
            run_controller(client, config, Some(health_state)).await;
        })
    };
    let dormant_handle = {
        let client = client.clone();
        let config = config.clone();
        tokio::spawn(async move {
            run_dormant_controller(client, config, None).await;
        })
    };
    let checker_handle = {
        let client = client.clone();
        let health_state = health_state.clone();
        tokio::spawn(async move {
            run_database_health_checker(client, config, Some(health_state)).await;
        })
    };

    let webhook_future = async {
        match webhook_handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("Webhook server task panicked: {}", e);
                }
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = controller_handle => log_exit("MySQL controller", result),
        result = dormant_handle => log_exit("DormantDatabase controller", result),
        result = checker_handle => log_exit("Health checker", result),
        result = health_handle => log_exit("Health server", result),
        _ = webhook_future => {}
        // Renewal only exits via process::exit() or panic
        Err(e) = lease_renewal_handle => {
            error!("Lease renewal task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
            health_state.set_ready(false).await;
            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

fn log_exit(task: &str, result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => warn!("{} exited", task),
        Err(e) => error!("{} task panicked: {}", task, e),
    }
}

/// Start the admission webhook when TLS material is mounted
fn spawn_webhook_server(client: &Client) -> Option<JoinHandle<()>> {
    if !(Path::new(WEBHOOK_CERT_PATH).exists() && Path::new(WEBHOOK_KEY_PATH).exists()) {
        info!(
            "TLS certificates not found at {} and {}, webhook server disabled",
            WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH
        );
        return None;
    }
    info!("TLS certificates found, starting webhook server");
    let client = client.clone();
    Some(tokio::spawn(async move {
        if let Err(e) = run_webhook_server(client, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH).await {
            error!("Webhook server error: {}", e);
        }
    }))
}

fn lease_lock(client: &Client, namespace: &str, holder_id: &str) -> LeaseLock {
    LeaseLock::new(
        client.clone(),
        namespace,
        LeaseLockParams {
            holder_id: holder_id.to_string(),
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
        },
    )
}

/// Block until this instance holds the lease
async fn acquire_leadership(lock: &LeaseLock) {
    info!("Waiting to acquire leadership...");
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }
}

/// Keep the lease; exit so Kubernetes restarts us into a new election if it is lost
async fn renew_leadership(lock: LeaseLock) {
    loop {
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {}
            Ok(_) => {
                error!("Lost leadership! Shutting down...");
                std::process::exit(1);
            }
            Err(e) => {
                error!("Failed to renew lease: {}. Shutting down...", e);
                std::process::exit(1);
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
