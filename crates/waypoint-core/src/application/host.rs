//! Polling loop around a [`WorkflowServer`].

use crate::{application::server::WorkflowServer, CoreError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Drives a server in passes of `batch_size`, sleeping `poll_interval` whenever
/// a pass finds nothing to do
pub struct WorkflowHost {
    server: WorkflowServer,
}

impl WorkflowHost {
    /// Create a host for `server`, using its configuration
    pub fn new(server: WorkflowServer) -> Self {
        Self { server }
    }

    /// The hosted server
    pub fn server(&self) -> &WorkflowServer {
        &self.server
    }

    /// Run passes until `shutdown` is cancelled and return the number of executions.
    ///
    /// Cancellation is observed between passes only; claimed workflows always
    /// finish their cycle. Store failures are logged and the loop backs off
    /// for one poll interval before trying again.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<usize, CoreError> {
        let batch_size = self.server.config().batch_size;
        let poll_interval = self.server.config().poll_interval();
        let mut total = 0;

        info!(batch_size, poll_interval_ms = self.server.config().poll_interval_ms, "Workflow host started");

        while !shutdown.is_cancelled() {
            let executed = match self.server.execute_workflows(batch_size).await {
                Ok(executed) => executed,
                Err(err) if err.is_infrastructure() => {
                    warn!(error = %err, "Workflow store unavailable, backing off");
                    0
                }
                Err(err) => {
                    error!(error = %err, "Workflow pass failed");
                    0
                }
            };
            total += executed;

            if executed == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }

        info!(executed = total, "Workflow host stopped");
        Ok(total)
    }

    /// Run passes until no workflow is eligible for selection.
    ///
    /// Workflows delayed by `resume_on` are not eligible, so this returns
    /// while delayed retries are still pending. Store failures propagate.
    pub async fn run_until_idle(&self) -> Result<usize, CoreError> {
        let batch_size = self.server.config().batch_size;
        let poll_interval = self.server.config().poll_interval();
        let mut total = 0;

        while self.server.get_active_count().await? > 0 {
            let executed = self.server.execute_workflows(batch_size).await?;
            total += executed;

            if executed == 0 {
                tokio::time::sleep(poll_interval).await;
            }
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::registry::WorkflowRegistry;
    use crate::domain::store::MockWorkflowStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn host(store: MockWorkflowStore) -> WorkflowHost {
        let config = EngineConfig {
            poll_interval_ms: 10,
            ..EngineConfig::default()
        };
        let server = WorkflowServer::new(Arc::new(store), WorkflowRegistry::new(), config).unwrap();
        WorkflowHost::new(server)
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled() -> Result<(), CoreError> {
        let mut store = MockWorkflowStore::new();
        store.expect_get_active().returning(|_| Ok(vec![]));

        let host = host(store);
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let executed = tokio::time::timeout(Duration::from_secs(5), host.run(shutdown))
            .await
            .expect("host did not stop")?;
        assert_eq!(executed, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_survives_store_failures() -> Result<(), CoreError> {
        let mut store = MockWorkflowStore::new();
        store
            .expect_get_active()
            .returning(|_| Err(CoreError::StateStoreError("connection refused".to_string())));

        let host = host(store);
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        assert_eq!(host.run(shutdown).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_until_idle_returns_when_nothing_is_due() -> Result<(), CoreError> {
        let mut store = MockWorkflowStore::new();
        store.expect_get_active_count().times(1).returning(|| Ok(0));
        store.expect_get_active().never();

        assert_eq!(host(store).run_until_idle().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_until_idle_propagates_store_failure() {
        let mut store = MockWorkflowStore::new();
        store
            .expect_get_active_count()
            .returning(|| Err(CoreError::StateStoreError("connection refused".to_string())));

        let result = host(store).run_until_idle().await;
        assert!(matches!(result, Err(CoreError::StateStoreError(_))));
    }
}
