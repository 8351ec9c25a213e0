use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool};
use tracing::{debug, trace};

use waypoint_core::{
    claim_lease, CompletedWorkflow, CoreError, WorkflowDocument, WorkflowId, WorkflowStore,
    DEFAULT_CLAIM_TIMEOUT_SECS,
};

use crate::{PostgresConfig, PostgresConnection};

const CLAIM_SQL: &str = r#"
    UPDATE workflows SET claimed_until = $2
    WHERE id IN (
        SELECT id FROM workflows
        WHERE NOT is_suspended
          AND NOT is_complete
          AND (resume_on IS NULL OR resume_on <= $1)
          AND (claimed_until IS NULL OR claimed_until <= $1)
        ORDER BY priority, retry_count, created_on, id
        LIMIT $3
        FOR UPDATE SKIP LOCKED
    )
    RETURNING document
"#;

const COUNT_SQL: &str = r#"
    SELECT COUNT(*) FROM workflows
    WHERE NOT is_suspended
      AND NOT is_complete
      AND (resume_on IS NULL OR resume_on <= $1)
      AND (claimed_until IS NULL OR claimed_until <= $1)
"#;

// Saving releases any claim. An id already in completed_workflows inserts nothing.
const UPSERT_SQL: &str = r#"
    INSERT INTO workflows (
        id, qualified_name, priority, retry_count, created_on, resume_on,
        is_suspended, is_complete, claimed_until, document, updated_at
    )
    SELECT $1::uuid, $2::text, $3::int4, $4::int8, $5::timestamptz, $6::timestamptz,
           $7::bool, $8::bool, NULL, $9::jsonb, NOW()
    WHERE NOT EXISTS (SELECT 1 FROM completed_workflows WHERE id = $1::uuid)
    ON CONFLICT (id) DO UPDATE SET
        qualified_name = EXCLUDED.qualified_name,
        priority = EXCLUDED.priority,
        retry_count = EXCLUDED.retry_count,
        created_on = EXCLUDED.created_on,
        resume_on = EXCLUDED.resume_on,
        is_suspended = EXCLUDED.is_suspended,
        is_complete = EXCLUDED.is_complete,
        claimed_until = NULL,
        document = EXCLUDED.document,
        updated_at = NOW()
"#;

fn store_error(context: &'static str) -> impl Fn(sqlx::Error) -> CoreError {
    move |e| CoreError::StateStoreError(format!("{}: {}", context, e))
}

/// PostgreSQL implementation of the WorkflowStore.
///
/// Selection marks rows with a `claimed_until` lease inside a
/// `FOR UPDATE SKIP LOCKED` subquery, so concurrent servers never receive
/// the same workflow while the lease holds.
#[derive(Debug, Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
    claim_timeout: chrono::Duration,
}

impl PostgresWorkflowStore {
    /// Create a store over an established connection
    pub fn new(connection: &PostgresConnection) -> Self {
        Self::from_pool(connection.pool().clone())
    }

    /// Create a store over an established connection, leasing claims for `config.claim_timeout_secs`
    pub fn from_config(connection: &PostgresConnection, config: &PostgresConfig) -> Self {
        Self::new(connection).with_claim_timeout(Duration::from_secs(config.claim_timeout_secs))
    }

    /// Create a store over an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            claim_timeout: claim_lease(Duration::from_secs(DEFAULT_CLAIM_TIMEOUT_SECS)),
        }
    }

    /// Change how long a claim is held before the workflow becomes selectable again
    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.claim_timeout = claim_lease(claim_timeout);
        self
    }

    /// Lease applied to claimed workflows
    pub fn claim_timeout(&self) -> chrono::Duration {
        self.claim_timeout
    }

    async fn upsert<'e, E>(executor: E, workflow: &WorkflowDocument) -> Result<(), CoreError>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(UPSERT_SQL)
            .bind(workflow.id().0)
            .bind(workflow.qualified_name())
            .bind(workflow.priority())
            .bind(i64::from(workflow.retry_count()))
            .bind(workflow.created_on())
            .bind(workflow.resume_on())
            .bind(workflow.is_suspended())
            .bind(workflow.is_complete())
            .bind(Json(workflow))
            .execute(executor)
            .await
            .map_err(store_error("Failed to save workflow"))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::ValidationError(format!(
                "Workflow {} is archived and cannot be saved",
                workflow.id()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    async fn get_active(&self, count: usize) -> Result<Vec<WorkflowDocument>, CoreError> {
        let now = Utc::now();
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        let claimed_until = now
            .checked_add_signed(self.claim_timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let rows: Vec<Json<WorkflowDocument>> = sqlx::query_scalar(CLAIM_SQL)
            .bind(now)
            .bind(claimed_until)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error("Failed to claim active workflows"))?;

        // RETURNING does not preserve the subquery order
        let mut claimed: Vec<WorkflowDocument> = rows.into_iter().map(|Json(document)| document).collect();
        claimed.sort_by_key(|document| document.scheduling_key());

        trace!(claimed = claimed.len(), "Claimed active workflows");
        Ok(claimed)
    }

    async fn get_active_count(&self) -> Result<usize, CoreError> {
        let count: i64 = sqlx::query_scalar(COUNT_SQL)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(store_error("Failed to count active workflows"))?;

        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn get_or_default(&self, id: WorkflowId) -> Result<Option<WorkflowDocument>, CoreError> {
        let row: Option<Json<WorkflowDocument>> =
            sqlx::query_scalar("SELECT document FROM workflows WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error("Failed to get workflow"))?;

        Ok(row.map(|Json(document)| document))
    }

    async fn get_all_by_qualified_name(
        &self,
        qualified_name: &str,
    ) -> Result<Vec<WorkflowDocument>, CoreError> {
        let rows: Vec<Json<WorkflowDocument>> = sqlx::query_scalar(
            "SELECT document FROM workflows WHERE qualified_name = $1 \
             ORDER BY priority, retry_count, created_on, id",
        )
        .bind(qualified_name)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("Failed to list workflows"))?;

        Ok(rows.into_iter().map(|Json(document)| document).collect())
    }

    async fn get_completed_or_default(
        &self,
        id: WorkflowId,
    ) -> Result<Option<CompletedWorkflow>, CoreError> {
        let row: Option<Json<CompletedWorkflow>> =
            sqlx::query_scalar("SELECT document FROM completed_workflows WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error("Failed to get completed workflow"))?;

        Ok(row.map(|Json(completed)| completed))
    }

    async fn save(&self, workflow: &WorkflowDocument) -> Result<(), CoreError> {
        Self::upsert(&self.pool, workflow).await
    }

    async fn save_all(&self, workflows: &[WorkflowDocument]) -> Result<(), CoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(store_error("Failed to begin transaction"))?;

        for workflow in workflows {
            Self::upsert(&mut *tx, workflow).await?;
        }

        tx.commit()
            .await
            .map_err(store_error("Failed to commit transaction"))?;
        Ok(())
    }

    async fn archive(&self, workflow: &WorkflowDocument) -> Result<CompletedWorkflow, CoreError> {
        let id = workflow.id();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(store_error("Failed to begin transaction"))?;

        let deleted = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(store_error("Failed to remove active workflow"))?;
        if deleted.rows_affected() == 0 {
            return Err(CoreError::WorkflowNotFound(id.to_string()));
        }

        let completed = CompletedWorkflow::new(workflow.clone(), Utc::now());
        sqlx::query(
            "INSERT INTO completed_workflows (id, qualified_name, completed_on_utc, document) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id.0)
        .bind(workflow.qualified_name())
        .bind(completed.completed_on_utc)
        .bind(Json(&completed))
        .execute(&mut *tx)
        .await
        .map_err(store_error("Failed to archive workflow"))?;

        tx.commit()
            .await
            .map_err(store_error("Failed to commit transaction"))?;

        debug!(workflow_id = %id, qualified_name = workflow.qualified_name(), "Workflow archived");
        Ok(completed)
    }
}
