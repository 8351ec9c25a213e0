/// Bookkeeping table for applied migrations
pub const MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS waypoint_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

/// Generate SQL migrations for the PostgreSQL workflow store
///
/// These migrations create the active and completed partitions and the
/// indexes that selection and single-instance lookups rely on.
pub fn generate_migrations() -> Vec<(&'static str, &'static str)> {
    vec![
        // Initial migration - Create both partitions
        (
            "20240601000000_initial_schema",
            r#"
            -- Active partition; document holds the full workflow, the other
            -- columns mirror the fields used for selection
            CREATE TABLE IF NOT EXISTS workflows (
                id UUID PRIMARY KEY,
                qualified_name TEXT NOT NULL,
                priority INTEGER NOT NULL,
                retry_count BIGINT NOT NULL,
                created_on TIMESTAMPTZ NOT NULL,
                resume_on TIMESTAMPTZ NULL,
                is_suspended BOOLEAN NOT NULL,
                is_complete BOOLEAN NOT NULL,
                claimed_until TIMESTAMPTZ NULL,
                document JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            -- Completed partition; document holds the CompletedWorkflow
            CREATE TABLE IF NOT EXISTS completed_workflows (
                id UUID PRIMARY KEY,
                qualified_name TEXT NOT NULL,
                completed_on_utc TIMESTAMPTZ NOT NULL,
                document JSONB NOT NULL
            );

            -- Single-instance lookups
            CREATE INDEX IF NOT EXISTS idx_workflows_qualified_name ON workflows(qualified_name);
            "#,
        ),
        // Selection order
        (
            "20240602000000_scheduling_index",
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflows_scheduling
                ON workflows(priority, retry_count, created_on, id)
                WHERE NOT is_suspended AND NOT is_complete;

            CREATE INDEX IF NOT EXISTS idx_completed_workflows_completed_on
                ON completed_workflows(completed_on_utc);
            "#,
        ),
    ]
}
