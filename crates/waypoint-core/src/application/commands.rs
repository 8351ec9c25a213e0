//! Administrative mutations against the store.
//!
//! A command is assembled field by field, checked by [`Command::validate`]
//! and only then executed: fetch, mutate, persist, return the updated entity.

use crate::{
    domain::store::WorkflowStore,
    domain::workflow::{WorkflowDocument, WorkflowId},
    CoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// A single validated mutation
#[async_trait]
pub trait Command: Send + Sync {
    /// What a successful execution returns
    type Output: Send;

    /// Check that every required field is present
    fn validate(&self) -> Result<(), CoreError>;

    /// Validate, then apply the mutation
    async fn execute(&self) -> Result<Self::Output, CoreError>;
}

/// Put a suspended workflow back into rotation, due immediately
#[derive(Default)]
pub struct UnsuspendCommand {
    store: Option<Arc<dyn WorkflowStore>>,
    workflow_id: Option<WorkflowId>,
}

impl UnsuspendCommand {
    /// Create an empty command
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the workflow
    pub fn with_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Workflow to unsuspend
    pub fn with_workflow_id(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }
}

#[async_trait]
impl Command for UnsuspendCommand {
    type Output = WorkflowDocument;

    fn validate(&self) -> Result<(), CoreError> {
        if self.store.is_none() {
            return Err(CoreError::ConfigurationError(
                "UnsuspendCommand requires a workflow store".to_string(),
            ));
        }
        if self.workflow_id.is_none() {
            return Err(CoreError::ConfigurationError(
                "UnsuspendCommand requires a workflow id".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self) -> Result<WorkflowDocument, CoreError> {
        self.validate()?;
        let (Some(store), Some(id)) = (self.store.as_ref(), self.workflow_id) else {
            return Err(CoreError::ConfigurationError(
                "UnsuspendCommand is incomplete".to_string(),
            ));
        };

        let mut workflow = store.get_or_default(id).await?.ok_or_else(|| {
            CoreError::ConfigurationError(format!("No active workflow with id {}", id))
        })?;
        // Only suspended workflows are unclaimed; saving any other would release a live claim
        if !workflow.is_suspended() {
            return Err(CoreError::ConfigurationError(format!(
                "Workflow {} is not suspended",
                id
            )));
        }

        workflow.unsuspend(Utc::now());
        store.save(&workflow).await?;

        tracing::info!(
            workflow_id = %id,
            qualified_name = workflow.qualified_name(),
            retry_count = workflow.retry_count(),
            "Workflow unsuspended"
        );

        Ok(workflow)
    }
}
