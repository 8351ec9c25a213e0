use crate::{
    application::registration_service::WorkflowRegistrationService,
    domain::store::WorkflowStore,
    domain::workflow::{Workflow, WorkflowDocument, WorkflowId},
    CoreError,
};
use serde::Serialize;
use std::sync::Arc;

/// Producer-side facade for handing new workflows to the engine
pub struct WorkflowClient {
    registration: WorkflowRegistrationService,
}

impl WorkflowClient {
    /// Create a client writing to `store`
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            registration: WorkflowRegistrationService::new(store),
        }
    }

    /// Register a typed workflow and return its ID
    pub async fn register<D: Serialize>(&self, workflow: &Workflow<D>) -> Result<WorkflowId, CoreError> {
        let document = workflow.encode()?;
        self.register_document(&document).await
    }

    /// Register an already encoded workflow
    pub async fn register_document(&self, document: &WorkflowDocument) -> Result<WorkflowId, CoreError> {
        self.registration.register_workflow(document).await?;
        Ok(document.id())
    }

    /// Register a batch in a single store write
    pub async fn register_all(&self, documents: &[WorkflowDocument]) -> Result<Vec<WorkflowId>, CoreError> {
        self.registration.register_workflows(documents).await?;
        Ok(documents.iter().map(|document| document.id()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::MockWorkflowStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_encodes_and_saves() -> Result<(), CoreError> {
        let workflow = Workflow::new("mail.Digest", "Start", "Collect", false, json!({"user": 7}));
        let expected = workflow.id();

        let mut store = MockWorkflowStore::new();
        store.expect_get_or_default().returning(|_| Ok(None));
        store
            .expect_save()
            .withf(move |document| document.id() == expected && document.data == json!({"user": 7}))
            .times(1)
            .returning(|_| Ok(()));

        let client = WorkflowClient::new(Arc::new(store));
        assert_eq!(client.register(&workflow).await?, expected);
        Ok(())
    }

    #[tokio::test]
    async fn test_register_all_returns_ids_in_order() -> Result<(), CoreError> {
        let documents = vec![
            Workflow::new("mail.Digest", "Start", "Collect", false, json!({})),
            Workflow::new("mail.Digest", "Start", "Collect", false, json!({})),
        ];
        let expected: Vec<WorkflowId> = documents.iter().map(|d| d.id()).collect();

        let mut store = MockWorkflowStore::new();
        store.expect_get_or_default().returning(|_| Ok(None));
        store
            .expect_save_all()
            .withf(|batch| batch.len() == 2)
            .times(1)
            .returning(|_| Ok(()));

        let client = WorkflowClient::new(Arc::new(store));
        assert_eq!(client.register_all(&documents).await?, expected);
        Ok(())
    }
}
