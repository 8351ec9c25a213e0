use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use waypoint_core::{
    claim_lease, CompletedWorkflow, CoreError, WorkflowDocument, WorkflowId, WorkflowStore,
    DEFAULT_CLAIM_TIMEOUT_SECS,
};

/// An active workflow and the lease held on it, if any
#[derive(Debug, Clone)]
struct ActiveEntry {
    document: WorkflowDocument,
    claimed_until: Option<DateTime<Utc>>,
}

impl ActiveEntry {
    fn is_selectable(&self, now: DateTime<Utc>) -> bool {
        self.document.is_due(now) && self.claimed_until.map_or(true, |until| until <= now)
    }
}

#[derive(Debug, Default)]
struct Partitions {
    active: HashMap<WorkflowId, ActiveEntry>,
    completed: HashMap<WorkflowId, CompletedWorkflow>,
}

/// In-memory implementation of the WorkflowStore.
///
/// Both partitions sit behind a single lock, so claiming and archival are
/// atomic. Clones share the same data.
#[derive(Debug, Clone)]
pub struct InMemoryWorkflowStore {
    partitions: Arc<RwLock<Partitions>>,
    claim_timeout: chrono::Duration,
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkflowStore {
    /// Create an empty store with the default claim timeout
    pub fn new() -> Self {
        Self {
            partitions: Arc::new(RwLock::new(Partitions::default())),
            claim_timeout: claim_lease(Duration::from_secs(DEFAULT_CLAIM_TIMEOUT_SECS)),
        }
    }

    /// Change how long a claim is held before the workflow becomes selectable again
    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.claim_timeout = claim_lease(claim_timeout);
        self
    }

    /// Number of workflows in the active partition, suspended and claimed included
    pub async fn active_len(&self) -> usize {
        self.partitions.read().await.active.len()
    }

    /// Number of archived workflows
    pub async fn completed_len(&self) -> usize {
        self.partitions.read().await.completed.len()
    }

    fn reject_archived(partitions: &Partitions, id: WorkflowId) -> Result<(), CoreError> {
        if partitions.completed.contains_key(&id) {
            return Err(CoreError::ValidationError(format!(
                "Workflow {} is archived and cannot be saved",
                id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get_active(&self, count: usize) -> Result<Vec<WorkflowDocument>, CoreError> {
        let mut partitions = self.partitions.write().await;
        let now = Utc::now();

        let mut candidates: Vec<&mut ActiveEntry> = partitions
            .active
            .values_mut()
            .filter(|entry| entry.is_selectable(now))
            .collect();
        candidates.sort_by_key(|entry| entry.document.scheduling_key());

        let claimed_until = now
            .checked_add_signed(self.claim_timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let claimed: Vec<WorkflowDocument> = candidates
            .into_iter()
            .take(count)
            .map(|entry| {
                entry.claimed_until = Some(claimed_until);
                entry.document.clone()
            })
            .collect();

        trace!(claimed = claimed.len(), "Claimed active workflows");
        Ok(claimed)
    }

    async fn get_active_count(&self) -> Result<usize, CoreError> {
        let partitions = self.partitions.read().await;
        let now = Utc::now();

        Ok(partitions
            .active
            .values()
            .filter(|entry| entry.is_selectable(now))
            .count())
    }

    async fn get_or_default(&self, id: WorkflowId) -> Result<Option<WorkflowDocument>, CoreError> {
        let partitions = self.partitions.read().await;
        Ok(partitions.active.get(&id).map(|entry| entry.document.clone()))
    }

    async fn get_all_by_qualified_name(
        &self,
        qualified_name: &str,
    ) -> Result<Vec<WorkflowDocument>, CoreError> {
        let partitions = self.partitions.read().await;

        let mut matching: Vec<WorkflowDocument> = partitions
            .active
            .values()
            .filter(|entry| entry.document.qualified_name() == qualified_name)
            .map(|entry| entry.document.clone())
            .collect();
        matching.sort_by_key(|document| document.scheduling_key());

        Ok(matching)
    }

    async fn get_completed_or_default(
        &self,
        id: WorkflowId,
    ) -> Result<Option<CompletedWorkflow>, CoreError> {
        let partitions = self.partitions.read().await;
        Ok(partitions.completed.get(&id).cloned())
    }

    async fn save(&self, workflow: &WorkflowDocument) -> Result<(), CoreError> {
        let mut partitions = self.partitions.write().await;
        Self::reject_archived(&partitions, workflow.id())?;

        partitions.active.insert(
            workflow.id(),
            ActiveEntry {
                document: workflow.clone(),
                claimed_until: None,
            },
        );
        Ok(())
    }

    async fn save_all(&self, workflows: &[WorkflowDocument]) -> Result<(), CoreError> {
        let mut partitions = self.partitions.write().await;
        for workflow in workflows {
            Self::reject_archived(&partitions, workflow.id())?;
        }

        for workflow in workflows {
            partitions.active.insert(
                workflow.id(),
                ActiveEntry {
                    document: workflow.clone(),
                    claimed_until: None,
                },
            );
        }
        Ok(())
    }

    async fn archive(&self, workflow: &WorkflowDocument) -> Result<CompletedWorkflow, CoreError> {
        let mut partitions = self.partitions.write().await;
        let id = workflow.id();

        if partitions.active.remove(&id).is_none() {
            return Err(CoreError::WorkflowNotFound(id.to_string()));
        }

        let completed = CompletedWorkflow::new(workflow.clone(), Utc::now());
        partitions.completed.insert(id, completed.clone());

        debug!(workflow_id = %id, qualified_name = workflow.qualified_name(), "Workflow archived");
        Ok(completed)
    }
}
