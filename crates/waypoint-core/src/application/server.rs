use crate::{
    config::EngineConfig,
    domain::registry::{RunOutcome, WorkflowRegistry},
    domain::state_machine::{FireError, FireOutcome},
    domain::store::WorkflowStore,
    domain::workflow::{FailureDisposition, WorkflowDocument},
    CoreError,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// What a single execution attempt did to a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Fired successfully and saved back to the active partition
    Progressed(FireOutcome),

    /// Completed and moved to the completed partition
    Archived,

    /// Failed; scheduled for another attempt
    Retrying {
        /// Earliest instant of the next attempt
        resume_on: DateTime<Utc>,
    },

    /// Failed; excluded from scheduling until unsuspended
    Suspended,
}

/// Execution engine: claims due workflows, fires them and persists the result
#[derive(Clone)]
pub struct WorkflowServer {
    /// Store holding both partitions
    store: Arc<dyn WorkflowStore>,

    /// Known workflow types
    registry: WorkflowRegistry,

    /// Engine configuration
    config: EngineConfig,

    /// Bounds concurrent executions across passes
    permits: Arc<Semaphore>,
}

impl WorkflowServer {
    /// Create a new server
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        registry: WorkflowRegistry,
        config: EngineConfig,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let permits = Arc::new(Semaphore::new(config.max_degree_of_parallelism));

        Ok(Self {
            store,
            registry,
            config,
            permits,
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of workflows currently eligible for selection
    pub async fn get_active_count(&self) -> Result<usize, CoreError> {
        self.store.get_active_count().await
    }

    /// Run one pass over up to `count` due workflows.
    ///
    /// Returns how many workflows were executed; zero means the queue is
    /// empty. Action failures are absorbed into retry bookkeeping. A store
    /// failure fails the pass, but only after every claimed workflow has
    /// finished its cycle.
    pub async fn execute_workflows(&self, count: usize) -> Result<usize, CoreError> {
        let workflows = self.store.get_active(count).await?;
        if workflows.is_empty() {
            return Ok(0);
        }

        let claimed = workflows.len();
        debug!(claimed, "Claimed workflows");

        let mut tasks = JoinSet::new();
        for document in workflows {
            let server = self.clone();
            tasks.spawn(async move {
                let _permit = server
                    .permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| CoreError::Other(format!("Execution slots closed: {}", e)))?;
                server.execute_workflow(document).await
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| CoreError::Other(format!("Workflow execution task failed: {}", e)))
                .and_then(|outcome| outcome);

            if let Err(err) = result {
                error!(error = %err, "Workflow execution aborted");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(claimed),
        }
    }

    /// Synchronous form of [`Self::execute_workflows`] for callers without a runtime.
    ///
    /// Fails with a configuration error when called from inside a tokio runtime.
    pub fn execute_workflows_blocking(&self, count: usize) -> Result<usize, CoreError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(CoreError::ConfigurationError(
                "execute_workflows_blocking cannot run inside an async runtime; use execute_workflows"
                    .to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.max_degree_of_parallelism)
            .enable_all()
            .build()
            .map_err(|e| CoreError::Other(format!("Failed to start runtime: {}", e)))?;

        runtime.block_on(self.execute_workflows(count))
    }

    async fn execute_workflow(&self, document: WorkflowDocument) -> Result<ExecutionOutcome, CoreError> {
        let span = info_span!(
            "execute_workflow",
            workflow_id = %document.id(),
            qualified_name = document.qualified_name(),
            state = document.current_state(),
            trigger = document.resume_trigger(),
        );

        async move {
            let Some(runner) = self.registry.get(document.qualified_name()) else {
                let err = CoreError::ConfigurationError(format!(
                    "Workflow type {} is not registered",
                    document.qualified_name()
                ));
                return self.record_failure(document, err.into()).await;
            };

            let RunOutcome { document: mut updated, result } = runner.run(&document).await;
            match result {
                Ok(FireOutcome::Completed) => {
                    updated.clear_last_exception();
                    let completed = self.store.archive(&updated).await?;
                    info!(
                        completed_on = %completed.completed_on_utc,
                        retry_count = updated.retry_count(),
                        "Workflow completed"
                    );
                    Ok(ExecutionOutcome::Archived)
                }
                Ok(outcome) => {
                    updated.clear_last_exception();
                    self.store.save(&updated).await?;
                    debug!(
                        state = updated.current_state(),
                        next_trigger = updated.resume_trigger(),
                        resume_on = ?updated.resume_on(),
                        "Workflow progressed"
                    );
                    Ok(ExecutionOutcome::Progressed(outcome))
                }
                Err(err) => self.record_failure(updated, err).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn record_failure(
        &self,
        mut document: WorkflowDocument,
        err: FireError,
    ) -> Result<ExecutionOutcome, CoreError> {
        let disposition = document.record_failure(err.describe(), Utc::now(), err.is_retryable());
        self.store.save(&document).await?;

        match disposition {
            FailureDisposition::Retry { resume_on } => {
                warn!(
                    retry_count = document.retry_count(),
                    resume_on = %resume_on,
                    error = %err,
                    "Workflow failed, retry scheduled"
                );
                Ok(ExecutionOutcome::Retrying { resume_on })
            }
            FailureDisposition::Suspended => {
                error!(
                    retry_count = document.retry_count(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "Workflow suspended"
                );
                Ok(ExecutionOutcome::Suspended)
            }
        }
    }
}

impl std::fmt::Debug for WorkflowServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowServer")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
