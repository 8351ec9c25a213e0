//! Registry of workflow types known to this process.
//!
//! Active workflows are stored type-erased; the registry maps each qualified
//! name to a runner that decodes the document into its concrete type, fires the
//! pending trigger and encodes the result again.

use crate::domain::state_machine::{FireError, FireOutcome, StateWorkflow};
use crate::domain::workflow::{Workflow, WorkflowDocument, WorkflowType};
use crate::CoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Result of running a workflow document through its state machine
#[derive(Debug)]
pub struct RunOutcome {
    /// The document after firing; on failure it reflects the pre-fire state
    pub document: WorkflowDocument,

    /// What firing did, or why it failed
    pub result: Result<FireOutcome, FireError>,
}

/// Type-erased executor for one workflow type
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    /// Qualified name served by this runner
    fn qualified_name(&self) -> &'static str;

    /// Whether workflows of this type are single-instance
    fn is_single_instance(&self) -> bool;

    /// Fire the document's `ResumeTrigger`
    async fn run(&self, document: &WorkflowDocument) -> RunOutcome;
}

struct TypedRunner<W: WorkflowType> {
    machine: StateWorkflow<W>,
    _marker: PhantomData<fn() -> W>,
}

impl<W: WorkflowType> TypedRunner<W> {
    fn failed(document: &WorkflowDocument, err: impl Into<FireError>) -> RunOutcome {
        RunOutcome {
            document: document.clone(),
            result: Err(err.into()),
        }
    }
}

#[async_trait]
impl<W: WorkflowType> WorkflowRunner for TypedRunner<W> {
    fn qualified_name(&self) -> &'static str {
        W::QUALIFIED_NAME
    }

    fn is_single_instance(&self) -> bool {
        W::SINGLE_INSTANCE
    }

    async fn run(&self, document: &WorkflowDocument) -> RunOutcome {
        let mut workflow: Workflow<W::Data> = match document.decode() {
            Ok(workflow) => workflow,
            Err(err) => return Self::failed(document, err),
        };

        match self.machine.fire_resume_trigger(&mut workflow).await {
            Ok(outcome) => match workflow.encode() {
                Ok(document) => RunOutcome {
                    document,
                    result: Ok(outcome),
                },
                Err(err) => Self::failed(document, err),
            },
            Err(err) => Self::failed(document, err),
        }
    }
}

/// Qualified name to runner table, populated at process start
#[derive(Default, Clone)]
pub struct WorkflowRegistry {
    runners: Arc<DashMap<String, Arc<dyn WorkflowRunner>>>,
}

impl WorkflowRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the state machine for workflow type `W`
    pub fn register<W: WorkflowType>(&self, machine: StateWorkflow<W>) -> Result<(), CoreError> {
        let name = W::QUALIFIED_NAME;
        if self.runners.contains_key(name) {
            return Err(CoreError::ConfigurationError(format!(
                "Workflow type {} is already registered",
                name
            )));
        }

        let runner = TypedRunner::<W> {
            machine,
            _marker: PhantomData,
        };
        self.runners.insert(name.to_string(), Arc::new(runner));
        debug!(qualified_name = name, "Registered workflow type");
        Ok(())
    }

    /// Runner for `qualified_name`, if registered
    pub fn get(&self, qualified_name: &str) -> Option<Arc<dyn WorkflowRunner>> {
        self.runners.get(qualified_name).map(|entry| entry.value().clone())
    }

    /// Whether `qualified_name` is registered
    pub fn contains(&self, qualified_name: &str) -> bool {
        self.runners.contains_key(qualified_name)
    }

    /// Registered qualified names, sorted
    pub fn qualified_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.runners.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    /// Whether no type is registered
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("types", &self.qualified_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::{ActionContext, WorkflowAction};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    crate::workflow_vocabulary! {
        enum CountState { Idle, Counting, Done }
    }

    crate::workflow_vocabulary! {
        enum CountTrigger { Count, Stop }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct CountData {
        count: u32,
    }

    struct CountWorkflow;

    impl WorkflowType for CountWorkflow {
        type State = CountState;
        type Trigger = CountTrigger;
        type Data = CountData;

        const QUALIFIED_NAME: &'static str = "tests.Count";
        const INITIAL_STATE: CountState = CountState::Idle;
        const INITIAL_TRIGGER: CountTrigger = CountTrigger::Count;
        const SINGLE_INSTANCE: bool = true;
    }

    struct Increment;

    #[async_trait]
    impl WorkflowAction<CountWorkflow> for Increment {
        async fn execute(&self, ctx: &mut ActionContext<'_, CountWorkflow>) -> anyhow::Result<()> {
            ctx.data_mut().count += 1;
            ctx.resume_with(CountTrigger::Stop);
            Ok(())
        }
    }

    fn machine() -> StateWorkflow<CountWorkflow> {
        StateWorkflow::builder()
            .permit(CountState::Idle, CountTrigger::Count, CountState::Counting)
            .permit(CountState::Counting, CountTrigger::Stop, CountState::Done)
            .on_entry(CountState::Counting, Increment)
            .terminal(CountState::Done)
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = WorkflowRegistry::new();
        registry.register(machine()).unwrap();

        let result = registry.register(machine());
        assert!(matches!(result, Err(CoreError::ConfigurationError(_))));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.qualified_names(), vec!["tests.Count".to_string()]);
    }

    #[tokio::test]
    async fn test_runner_round_trips_document() {
        let registry = WorkflowRegistry::new();
        registry.register(machine()).unwrap();

        let document = CountWorkflow::create(CountData::default()).encode().unwrap();
        let runner = registry.get("tests.Count").unwrap();
        assert!(runner.is_single_instance());

        let outcome = runner.run(&document).await;
        assert_eq!(outcome.result.unwrap(), FireOutcome::Advanced);
        assert_eq!(outcome.document.data, json!({"count": 1}));
        assert_eq!(outcome.document.current_state(), "Counting");
        assert_eq!(outcome.document.resume_trigger(), "Stop");
    }

    #[tokio::test]
    async fn test_runner_keeps_original_document_on_failure() {
        let registry = WorkflowRegistry::new();
        registry.register(machine()).unwrap();

        let mut document = CountWorkflow::create(CountData::default()).encode().unwrap();
        document.data = json!({"count": "lots"});
        let runner = registry.get("tests.Count").unwrap();

        let outcome = runner.run(&document).await;
        let err = outcome.result.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(outcome.document, document);
    }

    #[test]
    fn test_unknown_type() {
        let registry = WorkflowRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("tests.Missing").is_none());
        assert!(!registry.contains("tests.Missing"));
    }
}
