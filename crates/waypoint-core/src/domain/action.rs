//! Workflow actions: the user-supplied step logic run on entering a state.

use crate::domain::workflow::{Vocabulary, Workflow, WorkflowId, WorkflowType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A single unit of step logic for workflows of type `W`.
///
/// An action performs its work and then directs the next step through the
/// [`ActionContext`]: either a trigger that advances the machine, or the
/// trigger that re-enters the current state. Returning an error marks the
/// attempt as failed; retry and suspension are decided by the server, so an
/// action must not touch scheduling state on failure.
///
/// Actions can run more than once for the same step (a crash between the
/// action and persistence re-executes it) and should tolerate that.
#[async_trait]
pub trait WorkflowAction<W: WorkflowType>: Send + Sync {
    /// Execute the step
    async fn execute(&self, ctx: &mut ActionContext<'_, W>) -> anyhow::Result<()>;
}

/// Typed view of a workflow handed to an action
pub struct ActionContext<'a, W: WorkflowType> {
    workflow: &'a mut Workflow<W::Data>,
    state: W::State,
}

impl<'a, W: WorkflowType> ActionContext<'a, W> {
    pub(crate) fn new(workflow: &'a mut Workflow<W::Data>, state: W::State) -> Self {
        Self { workflow, state }
    }

    /// ID of the running workflow
    pub fn id(&self) -> WorkflowId {
        self.workflow.id()
    }

    /// The state being entered
    pub fn state(&self) -> W::State {
        self.state
    }

    /// The trigger currently scheduled to fire next
    pub fn resume_trigger(&self) -> Option<W::Trigger> {
        W::Trigger::from_name(self.workflow.resume_trigger())
    }

    /// Failed attempts so far
    pub fn retry_count(&self) -> u32 {
        self.workflow.retry_count()
    }

    /// Workflow-specific fields
    pub fn data(&self) -> &W::Data {
        &self.workflow.data
    }

    /// Mutable workflow-specific fields
    pub fn data_mut(&mut self) -> &mut W::Data {
        &mut self.workflow.data
    }

    /// Read-only access to the whole workflow
    pub fn workflow(&self) -> &Workflow<W::Data> {
        self.workflow
    }

    /// Fire `trigger` on the next execution, as soon as possible
    pub fn resume_with(&mut self, trigger: W::Trigger) {
        self.workflow.set_resume_trigger(trigger.name());
        self.workflow.set_resume_on(None);
    }

    /// Fire `trigger` on the next execution, no earlier than `at`
    pub fn resume_at(&mut self, trigger: W::Trigger, at: DateTime<Utc>) {
        self.workflow.set_resume_trigger(trigger.name());
        self.workflow.set_resume_on(Some(at));
    }

    /// Fire `trigger` on the next execution, no earlier than `delay` from now
    pub fn resume_after(&mut self, trigger: W::Trigger, delay: std::time::Duration) {
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.resume_at(trigger, Utc::now() + delay);
    }
}
