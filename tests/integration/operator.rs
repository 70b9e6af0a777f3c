//! Operator spawning utilities for integration tests
//!
//! Each test gets its own operator instance scoped to the test namespace, so
//! tests do not see each other's objects. The operator runs in the test's
//! tokio runtime.

use kube::Client;
use mysql_operator::{OperatorConfig, run_controller_scoped, run_dormant_controller};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A scoped operator that runs for the duration of a test
pub struct ScopedOperator {
    handle: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ScopedOperator {
    /// Start the MySQL and DormantDatabase controllers watching `namespace`
    ///
    /// They are stopped when the returned value is dropped.
    pub async fn start(client: Client, namespace: &str) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let namespace = namespace.to_string();
        let config = OperatorConfig {
            operator_namespace: namespace.clone(),
            ..Default::default()
        };

        tracing::info!(namespace = %namespace, "Starting scoped operator controllers...");

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = run_controller_scoped(client.clone(), config.clone(), None, Some(&namespace)) => {
                    tracing::debug!("MySQL controller exited");
                }
                _ = run_dormant_controller(client, config, Some(&namespace)) => {
                    tracing::debug!("DormantDatabase controller exited");
                }
                _ = shutdown_rx => {
                    tracing::debug!("Operator received shutdown signal");
                }
            }
        });

        // Give the controllers a moment to start watching
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        Self {
            handle,
            shutdown_tx: Some(shutdown_tx),
        }
    }
}

impl Drop for ScopedOperator {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}
