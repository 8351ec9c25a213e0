//! Storage contract for active and completed workflows.
//!
//! External crates implement [`WorkflowStore`] to provide different
//! persistence mechanisms. Every implementation owes the server three things:
//! selection order, claim semantics and atomic archival.

use crate::domain::workflow::{CompletedWorkflow, Workflow, WorkflowDocument, WorkflowId, WorkflowType};
use crate::CoreError;
use async_trait::async_trait;

/// Default lease on a claimed workflow, in seconds
pub const DEFAULT_CLAIM_TIMEOUT_SECS: u64 = 300;

/// Longest lease honoured, in seconds (one year)
pub const MAX_CLAIM_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

/// Lease length for a configured claim timeout, clamped to [`MAX_CLAIM_TIMEOUT_SECS`]
pub fn claim_lease(claim_timeout: std::time::Duration) -> chrono::Duration {
    let clamped = claim_timeout.min(std::time::Duration::from_secs(MAX_CLAIM_TIMEOUT_SECS));
    chrono::Duration::from_std(clamped)
        .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_CLAIM_TIMEOUT_SECS as i64))
}

/// Persistence of workflow documents across the active and completed partitions.
///
/// `get_active` is a claim, not a read: a returned workflow is not handed to
/// another caller until it has been saved, archived or its claim has expired.
/// Results are ordered by [`Workflow::scheduling_key`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Claim up to `count` due, non-suspended workflows in scheduling order
    async fn get_active(&self, count: usize) -> Result<Vec<WorkflowDocument>, CoreError>;

    /// Number of workflows that are currently eligible for selection
    async fn get_active_count(&self) -> Result<usize, CoreError>;

    /// Load an active workflow, failing with `WorkflowNotFound` if absent
    async fn get(&self, id: WorkflowId) -> Result<WorkflowDocument, CoreError> {
        self.get_or_default(id)
            .await?
            .ok_or_else(|| CoreError::WorkflowNotFound(id.to_string()))
    }

    /// Load an active workflow if present
    async fn get_or_default(&self, id: WorkflowId) -> Result<Option<WorkflowDocument>, CoreError>;

    /// All active workflows with the given qualified name
    async fn get_all_by_qualified_name(
        &self,
        qualified_name: &str,
    ) -> Result<Vec<WorkflowDocument>, CoreError>;

    /// Load an archived workflow, failing with `CompletedWorkflowNotFound` if absent
    async fn get_completed(&self, id: WorkflowId) -> Result<CompletedWorkflow, CoreError> {
        self.get_completed_or_default(id)
            .await?
            .ok_or_else(|| CoreError::CompletedWorkflowNotFound(id.to_string()))
    }

    /// Load an archived workflow if present
    async fn get_completed_or_default(
        &self,
        id: WorkflowId,
    ) -> Result<Option<CompletedWorkflow>, CoreError>;

    /// Upsert into the active partition and release any claim on it
    async fn save(&self, workflow: &WorkflowDocument) -> Result<(), CoreError>;

    /// Upsert a batch into the active partition
    async fn save_all(&self, workflows: &[WorkflowDocument]) -> Result<(), CoreError> {
        for workflow in workflows {
            self.save(workflow).await?;
        }
        Ok(())
    }

    /// Atomically move a workflow from the active to the completed partition
    async fn archive(&self, workflow: &WorkflowDocument) -> Result<CompletedWorkflow, CoreError>;
}

/// Typed lookups on top of any [`WorkflowStore`]
#[async_trait]
pub trait WorkflowStoreExt: WorkflowStore {
    /// Load an active workflow of type `W`
    async fn get_typed<W: WorkflowType>(&self, id: WorkflowId) -> Result<Workflow<W::Data>, CoreError> {
        let document = self.get(id).await?;
        if document.qualified_name() != W::QUALIFIED_NAME {
            return Err(CoreError::ConfigurationError(format!(
                "Workflow {} is a {}, not a {}",
                id,
                document.qualified_name(),
                W::QUALIFIED_NAME
            )));
        }
        document.decode()
    }

    /// All active workflows of type `W`
    async fn get_all_by_type<W: WorkflowType>(&self) -> Result<Vec<Workflow<W::Data>>, CoreError> {
        self.get_all_by_qualified_name(W::QUALIFIED_NAME)
            .await?
            .iter()
            .map(|document| document.decode())
            .collect()
    }
}

impl<S: WorkflowStore + ?Sized> WorkflowStoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    crate::workflow_vocabulary! {
        enum SyncState { Start, Syncing, Done }
    }

    crate::workflow_vocabulary! {
        enum SyncTrigger { Sync, Finish }
    }

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    struct SyncData {
        records: u32,
    }

    struct SyncWorkflow;

    impl WorkflowType for SyncWorkflow {
        type State = SyncState;
        type Trigger = SyncTrigger;
        type Data = SyncData;

        const QUALIFIED_NAME: &'static str = "tests.Sync";
        const INITIAL_STATE: SyncState = SyncState::Start;
        const INITIAL_TRIGGER: SyncTrigger = SyncTrigger::Sync;
    }

    #[tokio::test]
    async fn test_get_typed_decodes_payload() -> Result<(), CoreError> {
        let workflow = SyncWorkflow::create(SyncData { records: 12 });
        let document = workflow.encode()?;
        let id = document.id();

        let mut store = MockWorkflowStore::new();
        store
            .expect_get()
            .returning(move |_| Ok(document.clone()));

        let loaded = store.get_typed::<SyncWorkflow>(id).await?;
        assert_eq!(loaded, workflow);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_all_by_type_decodes_each() -> Result<(), CoreError> {
        let first = SyncWorkflow::create(SyncData { records: 1 });
        let second = SyncWorkflow::create(SyncData { records: 2 });
        let documents = vec![first.encode()?, second.encode()?];

        let mut store = MockWorkflowStore::new();
        store
            .expect_get_all_by_qualified_name()
            .withf(|name| name.to_string() == "tests.Sync")
            .returning(move |_| Ok(documents.clone()));

        let loaded = store.get_all_by_type::<SyncWorkflow>().await?;
        assert_eq!(loaded, vec![first, second]);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_typed_rejects_other_type() {
        let document = Workflow::new("tests.Other", "Start", "Go", false, serde_json::json!({}));
        let id = document.id();

        let mut store = MockWorkflowStore::new();
        store
            .expect_get()
            .returning(move |_| Ok(document.clone()));

        let result = store.get_typed::<SyncWorkflow>(id).await;
        assert!(matches!(result, Err(CoreError::ConfigurationError(_))));
    }

    #[test]
    fn test_claim_lease_is_clamped() {
        assert_eq!(
            claim_lease(std::time::Duration::from_secs(30)),
            chrono::Duration::seconds(30)
        );
        assert_eq!(
            claim_lease(std::time::Duration::from_secs(10_000_000_000_000)),
            chrono::Duration::seconds(MAX_CLAIM_TIMEOUT_SECS as i64)
        );
        assert!(chrono::Utc::now()
            .checked_add_signed(claim_lease(std::time::Duration::MAX))
            .is_some());
    }
}
