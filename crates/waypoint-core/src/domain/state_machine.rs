//! State workflows: a typed finite-state machine per workflow type.
//!
//! A [`StateWorkflow`] declares which triggers are legal from which states and
//! binds the entry of each state to a [`WorkflowAction`]. Firing a trigger
//! moves the workflow to the target state and runs that state's action
//! synchronously; entering the terminal state marks the workflow complete.

use crate::domain::action::{ActionContext, WorkflowAction};
use crate::domain::workflow::{Vocabulary, Workflow, WorkflowType};
use crate::CoreError;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Failure while firing a trigger
#[derive(Debug, Error)]
pub enum FireError {
    /// The workflow definition and the persisted workflow disagree; never retried
    #[error(transparent)]
    Configuration(#[from] CoreError),

    /// The entry action raised an error; retried with backoff
    #[error("{0:#}")]
    Action(anyhow::Error),
}

impl FireError {
    /// Whether retrying the same trigger could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FireError::Configuration(err) => !err.is_configuration(),
            FireError::Action(_) => true,
        }
    }

    /// Full description (message, cause chain and trace) for `LastException`
    pub fn describe(&self) -> String {
        match self {
            FireError::Configuration(err) => err.to_string(),
            FireError::Action(err) => format!("{:?}", err),
        }
    }
}

/// What firing a trigger did to the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// Moved to a different state
    Advanced,

    /// Re-entered the state it was already in
    Reentered,

    /// Entered the terminal state
    Completed,
}

/// Finite-state machine for workflows of type `W`
pub struct StateWorkflow<W: WorkflowType> {
    transitions: HashMap<(W::State, W::Trigger), W::State>,
    entry_actions: HashMap<W::State, Arc<dyn WorkflowAction<W>>>,
    terminal: W::State,
}

impl<W: WorkflowType> StateWorkflow<W> {
    /// Start declaring a state workflow
    pub fn builder() -> StateWorkflowBuilder<W> {
        StateWorkflowBuilder::new()
    }

    /// The terminal state
    pub fn terminal_state(&self) -> W::State {
        self.terminal
    }

    /// Whether `trigger` may be fired from `state`
    pub fn can_fire(&self, state: W::State, trigger: W::Trigger) -> bool {
        self.transitions.contains_key(&(state, trigger))
    }

    /// Triggers permitted from `state`, in vocabulary order
    pub fn permitted_triggers(&self, state: W::State) -> Vec<W::Trigger> {
        W::Trigger::all()
            .iter()
            .copied()
            .filter(|trigger| self.can_fire(state, *trigger))
            .collect()
    }

    /// Resolve the workflow's persisted state name
    pub fn current_state(&self, workflow: &Workflow<W::Data>) -> Result<W::State, CoreError> {
        W::State::from_name(workflow.current_state()).ok_or_else(|| {
            CoreError::ConfigurationError(format!(
                "Workflow {} is in state '{}' which is not part of {}",
                workflow.id(),
                workflow.current_state(),
                W::QUALIFIED_NAME
            ))
        })
    }

    /// Fire the trigger named by the workflow's `ResumeTrigger`
    pub async fn fire_resume_trigger(
        &self,
        workflow: &mut Workflow<W::Data>,
    ) -> Result<FireOutcome, FireError> {
        let trigger = W::Trigger::from_name(workflow.resume_trigger()).ok_or_else(|| {
            CoreError::ConfigurationError(format!(
                "Workflow {} has resume trigger '{}' which is not part of {}",
                workflow.id(),
                workflow.resume_trigger(),
                W::QUALIFIED_NAME
            ))
        })?;

        self.fire(workflow, trigger).await
    }

    /// Fire `trigger` against the workflow's current state.
    ///
    /// On success the workflow is in the target state and, unless that state
    /// is terminal, its `ResumeTrigger` is permitted from there.
    pub async fn fire(
        &self,
        workflow: &mut Workflow<W::Data>,
        trigger: W::Trigger,
    ) -> Result<FireOutcome, FireError> {
        let source = self.current_state(workflow)?;
        let target = *self.transitions.get(&(source, trigger)).ok_or_else(|| {
            CoreError::IllegalTrigger {
                qualified_name: W::QUALIFIED_NAME.to_string(),
                state: source.name().to_string(),
                trigger: trigger.name().to_string(),
            }
        })?;

        trace!(
            workflow_id = %workflow.id(),
            from = source.name(),
            to = target.name(),
            trigger = trigger.name(),
            "Firing trigger"
        );
        workflow.set_current_state(target.name());

        if target == self.terminal {
            workflow.mark_complete();
            return Ok(FireOutcome::Completed);
        }

        if let Some(action) = self.entry_actions.get(&target) {
            workflow.set_resume_on(None);
            let mut ctx = ActionContext::<W>::new(workflow, target);
            let result = AssertUnwindSafe(action.execute(&mut ctx)).catch_unwind().await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(FireError::Action(err)),
                Err(panic) => {
                    return Err(FireError::Action(anyhow::anyhow!(
                        "Action for state '{}' panicked: {}",
                        target.name(),
                        panic_message(panic.as_ref())
                    )))
                }
            }
        }

        let next = W::Trigger::from_name(workflow.resume_trigger());
        match next {
            Some(next) if self.can_fire(target, next) => {}
            _ => {
                return Err(FireError::Configuration(CoreError::ConfigurationError(format!(
                    "Resume trigger '{}' is not permitted from state '{}' of {}",
                    workflow.resume_trigger(),
                    target.name(),
                    W::QUALIFIED_NAME
                ))))
            }
        }

        if source == target {
            Ok(FireOutcome::Reentered)
        } else {
            Ok(FireOutcome::Advanced)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Builder for [`StateWorkflow`]
pub struct StateWorkflowBuilder<W: WorkflowType> {
    transitions: Vec<(W::State, W::Trigger, W::State)>,
    entry_actions: Vec<(W::State, Arc<dyn WorkflowAction<W>>)>,
    terminal: Option<W::State>,
}

impl<W: WorkflowType> StateWorkflowBuilder<W> {
    fn new() -> Self {
        Self {
            transitions: Vec::new(),
            entry_actions: Vec::new(),
            terminal: None,
        }
    }

    /// Permit `trigger` to move the workflow from `from` to `to`
    pub fn permit(mut self, from: W::State, trigger: W::Trigger, to: W::State) -> Self {
        self.transitions.push((from, trigger, to));
        self
    }

    /// Permit `trigger` to re-enter `state`, running its entry action again
    pub fn permit_reentry(self, state: W::State, trigger: W::Trigger) -> Self {
        self.permit(state, trigger, state)
    }

    /// Run `action` whenever `state` is entered
    pub fn on_entry(self, state: W::State, action: impl WorkflowAction<W> + 'static) -> Self {
        self.on_entry_shared(state, Arc::new(action))
    }

    /// Run a shared action instance whenever `state` is entered
    pub fn on_entry_shared(mut self, state: W::State, action: Arc<dyn WorkflowAction<W>>) -> Self {
        self.entry_actions.push((state, action));
        self
    }

    /// Declare the terminal state; entering it completes the workflow
    pub fn terminal(mut self, state: W::State) -> Self {
        self.terminal = Some(state);
        self
    }

    /// Validate the declarations and build the machine
    pub fn build(self) -> Result<StateWorkflow<W>, CoreError> {
        let name = W::QUALIFIED_NAME;
        let terminal = self.terminal.ok_or_else(|| {
            CoreError::ConfigurationError(format!("{} declares no terminal state", name))
        })?;

        let mut transitions = HashMap::with_capacity(self.transitions.len());
        for (from, trigger, to) in self.transitions {
            if from == terminal {
                return Err(CoreError::ConfigurationError(format!(
                    "{}: terminal state '{}' cannot have outgoing transitions",
                    name,
                    terminal.name()
                )));
            }
            if let Some(existing) = transitions.insert((from, trigger), to) {
                if existing != to {
                    return Err(CoreError::ConfigurationError(format!(
                        "{}: trigger '{}' from state '{}' targets both '{}' and '{}'",
                        name,
                        trigger.name(),
                        from.name(),
                        existing.name(),
                        to.name()
                    )));
                }
            }
        }

        let mut entry_actions: HashMap<W::State, Arc<dyn WorkflowAction<W>>> = HashMap::new();
        for (state, action) in self.entry_actions {
            if state == terminal {
                return Err(CoreError::ConfigurationError(format!(
                    "{}: terminal state '{}' cannot have an entry action",
                    name,
                    terminal.name()
                )));
            }
            if entry_actions.insert(state, action).is_some() {
                return Err(CoreError::ConfigurationError(format!(
                    "{}: state '{}' has more than one entry action",
                    name,
                    state.name()
                )));
            }
        }

        for to in transitions.values() {
            if *to != terminal && !entry_actions.contains_key(to) {
                return Err(CoreError::ConfigurationError(format!(
                    "{}: state '{}' is entered by a transition but has no entry action",
                    name,
                    to.name()
                )));
            }
        }

        if !transitions.contains_key(&(W::INITIAL_STATE, W::INITIAL_TRIGGER)) {
            return Err(CoreError::ConfigurationError(format!(
                "{}: initial trigger '{}' is not permitted from initial state '{}'",
                name,
                W::INITIAL_TRIGGER.name(),
                W::INITIAL_STATE.name()
            )));
        }

        Ok(StateWorkflow {
            transitions,
            entry_actions,
            terminal,
        })
    }
}
