use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

/// Retry intervals (seconds) given to workflows that do not configure their own
pub const DEFAULT_RETRY_INTERVALS: [u64; 5] = [5, 10, 15, 10, 10];

/// Largest single retry interval honoured, in seconds (one year)
const MAX_RETRY_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Value object: Workflow ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Generate a new random workflow ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for WorkflowId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(WorkflowId)
            .map_err(|e| CoreError::ValidationError(format!("Invalid workflow id '{}': {}", s, e)))
    }
}

/// A closed set of names: the states or the triggers of one workflow type.
///
/// The table returned by [`Vocabulary::all`] is what maps the names persisted
/// in a workflow document back onto typed variants.
pub trait Vocabulary: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Every variant of the vocabulary
    fn all() -> &'static [Self];

    /// Stable persisted name of this variant
    fn name(&self) -> &'static str;

    /// Resolve a persisted name
    fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|v| v.name() == name)
    }
}

/// Declare a state or trigger enum and its [`Vocabulary`] table.
///
/// ```
/// waypoint_core::workflow_vocabulary! {
///     pub enum ExportState { Start, WritingFiles, Done }
/// }
/// ```
#[macro_export]
macro_rules! workflow_vocabulary {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl $crate::domain::workflow::Vocabulary for $name {
            fn all() -> &'static [Self] {
                &[$($name::$variant),+]
            }

            fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }
    };
}

/// A concrete kind of workflow: its vocabulary, its payload and its identity.
pub trait WorkflowType: Send + Sync + 'static {
    /// States of the workflow's machine
    type State: Vocabulary;

    /// Triggers of the workflow's machine
    type Trigger: Vocabulary;

    /// Workflow-specific fields persisted alongside the scheduling metadata
    type Data: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Stable type identifier used for polymorphic storage and single-instance lookups
    const QUALIFIED_NAME: &'static str;

    /// State a new workflow starts in
    const INITIAL_STATE: Self::State;

    /// Trigger fired on the first execution
    const INITIAL_TRIGGER: Self::Trigger;

    /// Whether at most one workflow of this type may be active at a time
    const SINGLE_INSTANCE: bool = false;

    /// Create a fresh workflow of this type
    fn create(data: Self::Data) -> Workflow<Self::Data> {
        Workflow::new(
            Self::QUALIFIED_NAME,
            Self::INITIAL_STATE.name(),
            Self::INITIAL_TRIGGER.name(),
            Self::SINGLE_INSTANCE,
            data,
        )
    }
}

/// Outcome of recording a failed execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// The workflow will be selected again once `resume_on` has passed
    Retry {
        /// Earliest instant of the next attempt
        resume_on: DateTime<Utc>,
    },

    /// Retry intervals are exhausted or the failure cannot be retried
    Suspended,
}

/// Aggregate: a persisted, resumable workflow.
///
/// `D` carries the workflow-specific fields. The storage-agnostic form uses a
/// JSON value payload, see [`WorkflowDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow<D = Value> {
    id: WorkflowId,
    qualified_name: String,
    current_state: String,
    resume_trigger: String,
    resume_on: Option<DateTime<Utc>>,
    priority: i32,
    retry_count: u32,
    retry_intervals: Vec<u64>,
    is_suspended: bool,
    is_single_instance: bool,
    is_complete: bool,
    last_exception: Option<String>,
    created_on: DateTime<Utc>,

    /// Workflow-specific fields
    pub data: D,
}

/// Workflow in its persisted, type-erased form
pub type WorkflowDocument = Workflow<Value>;

impl<D> Workflow<D> {
    /// Create a new workflow
    pub fn new(
        qualified_name: impl Into<String>,
        initial_state: impl Into<String>,
        initial_trigger: impl Into<String>,
        is_single_instance: bool,
        data: D,
    ) -> Self {
        Self {
            id: WorkflowId::new(),
            qualified_name: qualified_name.into(),
            current_state: initial_state.into(),
            resume_trigger: initial_trigger.into(),
            resume_on: None,
            priority: 0,
            retry_count: 0,
            retry_intervals: DEFAULT_RETRY_INTERVALS.to_vec(),
            is_suspended: false,
            is_single_instance,
            is_complete: false,
            last_exception: None,
            created_on: Utc::now(),
            data,
        }
    }

    /// Set the scheduling priority; lower values are selected first
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry intervals, in seconds
    pub fn with_retry_intervals(mut self, retry_intervals: Vec<u64>) -> Self {
        self.retry_intervals = retry_intervals;
        self
    }

    /// Delay the first execution
    pub fn with_resume_on(mut self, resume_on: DateTime<Utc>) -> Self {
        self.resume_on = Some(resume_on);
        self
    }

    /// Override the creation timestamp, for imports and backfills
    pub fn with_created_on(mut self, created_on: DateTime<Utc>) -> Self {
        self.created_on = created_on;
        self
    }

    /// Unique identifier
    pub fn id(&self) -> WorkflowId {
        self.id
    }

    /// Stable type identifier
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Name of the active state
    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    /// Name of the trigger fired on the next execution
    pub fn resume_trigger(&self) -> &str {
        &self.resume_trigger
    }

    /// Earliest instant of the next execution
    pub fn resume_on(&self) -> Option<DateTime<Utc>> {
        self.resume_on
    }

    /// Scheduling priority
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Number of failed execution attempts
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Delays between retries, in seconds
    pub fn retry_intervals(&self) -> &[u64] {
        &self.retry_intervals
    }

    /// Whether the workflow is excluded from scheduling
    pub fn is_suspended(&self) -> bool {
        self.is_suspended
    }

    /// Whether the workflow type is restricted to one active instance
    pub fn is_single_instance(&self) -> bool {
        self.is_single_instance
    }

    /// Whether the terminal state has been entered
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Most recent failure, message and trace
    pub fn last_exception(&self) -> Option<&str> {
        self.last_exception.as_deref()
    }

    /// Creation timestamp
    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    /// Change the scheduling priority
    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    /// Change the earliest instant of the next execution
    pub fn set_resume_on(&mut self, resume_on: Option<DateTime<Utc>>) {
        self.resume_on = resume_on;
    }

    /// Whether the workflow may be selected for execution at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_suspended && !self.is_complete && self.resume_on.map_or(true, |at| at <= now)
    }

    /// Total scheduling order: priority, then retries, then age, then identity
    pub fn scheduling_key(&self) -> (i32, u32, DateTime<Utc>, WorkflowId) {
        (self.priority, self.retry_count, self.created_on, self.id)
    }

    pub(crate) fn set_current_state(&mut self, state: &str) {
        self.current_state = state.to_string();
    }

    pub(crate) fn set_resume_trigger(&mut self, trigger: &str) {
        self.resume_trigger = trigger.to_string();
    }

    pub(crate) fn mark_complete(&mut self) {
        self.is_complete = true;
    }

    pub(crate) fn clear_last_exception(&mut self) {
        self.last_exception = None;
    }

    /// Record a failed attempt and decide between backoff and suspension.
    ///
    /// `retry_count` always increments. A retryable failure whose count is
    /// still within `retry_intervals` is delayed by the interval at
    /// `retry_count - 1`; anything else suspends the workflow.
    pub(crate) fn record_failure(
        &mut self,
        error: String,
        now: DateTime<Utc>,
        retryable: bool,
    ) -> FailureDisposition {
        self.last_exception = Some(error);
        self.retry_count = self.retry_count.saturating_add(1);

        let interval = self.retry_intervals.get(self.retry_count as usize - 1).copied();
        match interval {
            Some(seconds) if retryable => {
                let resume_on = now + seconds_to_duration(seconds);
                self.resume_on = Some(resume_on);
                self.is_suspended = false;
                FailureDisposition::Retry { resume_on }
            }
            _ => {
                self.resume_on = None;
                self.is_suspended = true;
                FailureDisposition::Suspended
            }
        }
    }

    pub(crate) fn unsuspend(&mut self, now: DateTime<Utc>) {
        self.is_suspended = false;
        self.resume_on = Some(now);
    }

    fn with_data<E>(self, data: E) -> Workflow<E> {
        Workflow {
            id: self.id,
            qualified_name: self.qualified_name,
            current_state: self.current_state,
            resume_trigger: self.resume_trigger,
            resume_on: self.resume_on,
            priority: self.priority,
            retry_count: self.retry_count,
            retry_intervals: self.retry_intervals,
            is_suspended: self.is_suspended,
            is_single_instance: self.is_single_instance,
            is_complete: self.is_complete,
            last_exception: self.last_exception,
            created_on: self.created_on,
            data,
        }
    }
}

impl<D: Serialize> Workflow<D> {
    /// Convert into the storage-agnostic document form
    pub fn encode(&self) -> Result<WorkflowDocument, CoreError> {
        let data = serde_json::to_value(&self.data).map_err(|e| {
            CoreError::SerializationError(format!(
                "Error serializing workflow {} ({}): {}",
                self.id, self.qualified_name, e
            ))
        })?;

        Ok(self.clone_header().with_data(data))
    }

    fn clone_header(&self) -> Workflow<()> {
        Workflow {
            id: self.id,
            qualified_name: self.qualified_name.clone(),
            current_state: self.current_state.clone(),
            resume_trigger: self.resume_trigger.clone(),
            resume_on: self.resume_on,
            priority: self.priority,
            retry_count: self.retry_count,
            retry_intervals: self.retry_intervals.clone(),
            is_suspended: self.is_suspended,
            is_single_instance: self.is_single_instance,
            is_complete: self.is_complete,
            last_exception: self.last_exception.clone(),
            created_on: self.created_on,
            data: (),
        }
    }
}

impl WorkflowDocument {
    /// Decode the payload into a concrete workflow type
    pub fn decode<D: DeserializeOwned>(&self) -> Result<Workflow<D>, CoreError> {
        let data = D::deserialize(&self.data).map_err(|e| {
            CoreError::SerializationError(format!(
                "Error deserializing workflow {} ({}): {}",
                self.id, self.qualified_name, e
            ))
        })?;

        Ok(self.clone_header().with_data(data))
    }
}

fn seconds_to_duration(seconds: u64) -> chrono::Duration {
    let clamped = std::time::Duration::from_secs(seconds.min(MAX_RETRY_INTERVAL_SECS));
    chrono::Duration::from_std(clamped).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Storage envelope pairing a workflow with its type discriminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContainer {
    /// Mirrors the workflow's ID
    pub id: WorkflowId,

    /// Type discriminator
    pub qualified_name: String,

    /// The workflow itself
    pub workflow: WorkflowDocument,
}

impl WorkflowContainer {
    /// Wrap a workflow document
    pub fn new(workflow: WorkflowDocument) -> Self {
        Self {
            id: workflow.id(),
            qualified_name: workflow.qualified_name().to_string(),
            workflow,
        }
    }
}

/// An archived workflow. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedWorkflow {
    /// The archived workflow
    pub workflow: WorkflowContainer,

    /// Archival timestamp
    pub completed_on_utc: DateTime<Utc>,
}

impl CompletedWorkflow {
    /// Wrap a finished workflow for the completed partition
    pub fn new(workflow: WorkflowDocument, completed_on_utc: DateTime<Utc>) -> Self {
        Self {
            workflow: WorkflowContainer::new(workflow),
            completed_on_utc,
        }
    }

    /// ID of the archived workflow
    pub fn id(&self) -> WorkflowId {
        self.workflow.id
    }

    /// The archived workflow document
    pub fn document(&self) -> &WorkflowDocument {
        &self.workflow.workflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    crate::workflow_vocabulary! {
        enum ReportState { Start, Rendering, Done }
    }

    crate::workflow_vocabulary! {
        enum ReportTrigger { Render, Finish }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    struct ReportData {
        pages: u32,
    }

    struct ReportWorkflow;

    impl WorkflowType for ReportWorkflow {
        type State = ReportState;
        type Trigger = ReportTrigger;
        type Data = ReportData;

        const QUALIFIED_NAME: &'static str = "reports.Report";
        const INITIAL_STATE: ReportState = ReportState::Start;
        const INITIAL_TRIGGER: ReportTrigger = ReportTrigger::Render;
    }

    #[test]
    fn test_workflow_creation() {
        let workflow = ReportWorkflow::create(ReportData { pages: 3 });

        assert_eq!(workflow.qualified_name(), "reports.Report");
        assert_eq!(workflow.current_state(), "Start");
        assert_eq!(workflow.resume_trigger(), "Render");
        assert_eq!(workflow.priority(), 0);
        assert_eq!(workflow.retry_count(), 0);
        assert_eq!(workflow.retry_intervals(), &DEFAULT_RETRY_INTERVALS);
        assert!(!workflow.is_suspended());
        assert!(!workflow.is_single_instance());
        assert!(!workflow.is_complete());
        assert!(workflow.last_exception().is_none());
        assert!(workflow.resume_on().is_none());
        assert!(workflow.created_on() <= Utc::now());
    }

    #[test]
    fn test_vocabulary_lookup() {
        assert_eq!(ReportState::from_name("Rendering"), Some(ReportState::Rendering));
        assert_eq!(ReportTrigger::from_name("Finish"), Some(ReportTrigger::Finish));
        assert_eq!(ReportTrigger::from_name("finish"), None);
        assert_eq!(ReportState::all().len(), 3);
        assert_eq!(ReportState::Done.name(), "Done");
    }

    #[test]
    fn test_retry_bookkeeping_until_suspension() {
        let mut workflow = ReportWorkflow::create(ReportData::default())
            .with_retry_intervals(vec![5, 10, 15, 10, 10]);

        let now = Utc::now();
        let expected = [5, 10, 15, 10, 10];

        for (attempt, seconds) in expected.iter().enumerate() {
            let disposition = workflow.record_failure("boom".to_string(), now, true);

            assert_eq!(workflow.retry_count(), attempt as u32 + 1);
            assert!(!workflow.is_suspended());
            assert_eq!(
                disposition,
                FailureDisposition::Retry {
                    resume_on: now + chrono::Duration::seconds(*seconds as i64)
                }
            );
            assert_eq!(workflow.resume_on(), Some(now + chrono::Duration::seconds(*seconds as i64)));
        }

        let disposition = workflow.record_failure("boom".to_string(), now, true);
        assert_eq!(disposition, FailureDisposition::Suspended);
        assert_eq!(workflow.retry_count(), 6);
        assert!(workflow.is_suspended());
        assert!(workflow.resume_on().is_none());
        assert_eq!(workflow.last_exception(), Some("boom"));
    }

    #[test]
    fn test_non_retryable_failure_suspends_immediately() {
        let mut workflow = ReportWorkflow::create(ReportData::default());

        let disposition = workflow.record_failure("bad trigger".to_string(), Utc::now(), false);

        assert_eq!(disposition, FailureDisposition::Suspended);
        assert_eq!(workflow.retry_count(), 1);
        assert!(workflow.is_suspended());
    }

    #[test]
    fn test_empty_retry_intervals_suspend_on_first_failure() {
        let mut workflow = ReportWorkflow::create(ReportData::default()).with_retry_intervals(vec![]);

        let disposition = workflow.record_failure("boom".to_string(), Utc::now(), true);

        assert_eq!(disposition, FailureDisposition::Suspended);
        assert!(workflow.is_suspended());
    }

    #[test]
    fn test_unsuspend_makes_workflow_due() {
        let mut workflow = ReportWorkflow::create(ReportData::default()).with_retry_intervals(vec![]);
        workflow.record_failure("boom".to_string(), Utc::now(), true);

        let now = Utc::now();
        assert!(!workflow.is_due(now));

        workflow.unsuspend(now);
        assert!(workflow.is_due(now));
        assert_eq!(workflow.resume_on(), Some(now));
        assert_eq!(workflow.retry_count(), 1);
    }

    #[test]
    fn test_is_due_respects_resume_on() {
        let now = Utc::now();
        let workflow = ReportWorkflow::create(ReportData::default())
            .with_resume_on(now + chrono::Duration::seconds(30));

        assert!(!workflow.is_due(now));
        assert!(workflow.is_due(now + chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_encode_and_decode_preserve_header() {
        let workflow = ReportWorkflow::create(ReportData { pages: 7 }).with_priority(3);

        let document = workflow.encode().unwrap();
        assert_eq!(document.data, json!({"pages": 7}));
        assert_eq!(document.id(), workflow.id());
        assert_eq!(document.priority(), 3);

        let decoded: Workflow<ReportData> = document.decode().unwrap();
        assert_eq!(decoded, workflow);
    }

    #[test]
    fn test_decode_rejects_foreign_payload() {
        let mut document = ReportWorkflow::create(ReportData::default()).encode().unwrap();
        document.data = json!({"pages": "many"});

        let result = document.decode::<ReportData>();
        assert!(matches!(result, Err(CoreError::SerializationError(_))));
    }

    #[test]
    fn test_scheduling_key_orders_by_priority_then_retries() {
        let now = Utc::now();
        let urgent = ReportWorkflow::create(ReportData::default())
            .with_priority(0)
            .with_created_on(now);
        let mut failing = ReportWorkflow::create(ReportData::default())
            .with_priority(0)
            .with_created_on(now - chrono::Duration::seconds(60));
        failing.record_failure("boom".to_string(), now, true);
        let relaxed = ReportWorkflow::create(ReportData::default())
            .with_priority(1)
            .with_created_on(now - chrono::Duration::seconds(120));

        let mut keys = vec![relaxed.scheduling_key(), failing.scheduling_key(), urgent.scheduling_key()];
        keys.sort();

        assert_eq!(keys[0].3, urgent.id());
        assert_eq!(keys[1].3, failing.id());
        assert_eq!(keys[2].3, relaxed.id());
    }

    #[test]
    fn test_completed_workflow_wraps_document() {
        let document = ReportWorkflow::create(ReportData::default()).encode().unwrap();
        let completed = CompletedWorkflow::new(document.clone(), Utc::now());

        assert_eq!(completed.id(), document.id());
        assert_eq!(completed.workflow.qualified_name, "reports.Report");
        assert_eq!(completed.document(), &document);
    }

    #[test]
    fn test_workflow_id_parsing() {
        let id = WorkflowId::new();
        assert_eq!(id.to_string().parse::<WorkflowId>().unwrap(), id);
        assert!(matches!("nope".parse::<WorkflowId>(), Err(CoreError::ValidationError(_))));
    }
}
