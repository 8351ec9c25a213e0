use crate::{
    domain::store::WorkflowStore,
    domain::workflow::{WorkflowDocument, WorkflowType},
    CoreError,
};
use std::sync::Arc;

/// Service enforcing the single-instance constraint at registration time
pub struct WorkflowRegistrationService {
    /// Store holding the active partition
    store: Arc<dyn WorkflowStore>,
}

impl WorkflowRegistrationService {
    /// Create a new registration service
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Whether an active single-instance workflow of type `W` exists.
    ///
    /// A lone active workflow of the type that is not flagged single-instance
    /// means the type's flag and the store disagree; that is a configuration
    /// error.
    pub async fn is_single_instance_workflow_registered<W: WorkflowType>(&self) -> Result<bool, CoreError> {
        self.is_single_instance_registered(W::QUALIFIED_NAME).await
    }

    /// Untyped form of [`Self::is_single_instance_workflow_registered`]
    pub async fn is_single_instance_registered(&self, qualified_name: &str) -> Result<bool, CoreError> {
        let existing = self.store.get_all_by_qualified_name(qualified_name).await?;

        match existing.as_slice() {
            [] => Ok(false),
            [only] if !only.is_single_instance() => Err(CoreError::ConfigurationError(format!(
                "Workflow {} of type {} is active but not flagged single-instance",
                only.id(),
                qualified_name
            ))),
            _ => Ok(true),
        }
    }

    /// Persist `workflow`, refusing a second active single-instance workflow
    pub async fn register_workflow(&self, workflow: &WorkflowDocument) -> Result<(), CoreError> {
        self.ensure_registrable(workflow).await?;
        self.ensure_not_active(workflow).await?;
        self.store.save(workflow).await?;

        tracing::info!(
            workflow_id = %workflow.id(),
            qualified_name = workflow.qualified_name(),
            single_instance = workflow.is_single_instance(),
            "Workflow registered"
        );

        Ok(())
    }

    /// Persist a batch after checking each single-instance workflow
    pub async fn register_workflows(&self, workflows: &[WorkflowDocument]) -> Result<(), CoreError> {
        for (index, workflow) in workflows.iter().enumerate() {
            self.ensure_registrable(workflow).await?;

            let duplicate_in_batch = workflow.is_single_instance()
                && workflows[..index]
                    .iter()
                    .any(|earlier| earlier.qualified_name() == workflow.qualified_name());
            if duplicate_in_batch {
                return Err(CoreError::AlreadyRegistered(workflow.qualified_name().to_string()));
            }
        }

        for workflow in workflows {
            self.ensure_not_active(workflow).await?;
        }
        self.store.save_all(workflows).await?;

        tracing::info!(count = workflows.len(), "Workflows registered");
        Ok(())
    }

    async fn ensure_registrable(&self, workflow: &WorkflowDocument) -> Result<(), CoreError> {
        if !workflow.is_single_instance() {
            return Ok(());
        }

        let existing = self
            .store
            .get_all_by_qualified_name(workflow.qualified_name())
            .await?;
        if existing.iter().any(|active| active.id() != workflow.id()) {
            tracing::warn!(
                qualified_name = workflow.qualified_name(),
                "Single-instance workflow is already active"
            );
            return Err(CoreError::AlreadyRegistered(workflow.qualified_name().to_string()));
        }

        Ok(())
    }

    // Re-saving an active workflow would release a claim a server may hold on it
    async fn ensure_not_active(&self, workflow: &WorkflowDocument) -> Result<(), CoreError> {
        if self.store.get_or_default(workflow.id()).await?.is_some() {
            return Err(CoreError::ValidationError(format!(
                "Workflow {} is already registered",
                workflow.id()
            )));
        }
        Ok(())
    }
}
