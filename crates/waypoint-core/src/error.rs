use thiserror::Error;

/// Core error type for the Waypoint engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Active workflow not found
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Archived workflow not found
    #[error("Completed workflow not found: {0}")]
    CompletedWorkflowNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A trigger was fired from a state that does not permit it
    #[error("Trigger '{trigger}' is not permitted from state '{state}' of workflow type {qualified_name}")]
    IllegalTrigger {
        /// Workflow type
        qualified_name: String,
        /// State the workflow was in
        state: String,
        /// Trigger that was fired
        trigger: String,
    },

    /// A single-instance workflow of this type is already active
    #[error("Workflow already registered: {0}")]
    AlreadyRegistered(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Whether the error is a configuration error: the workflow definition,
    /// the persisted document or the caller's input disagree, and retrying
    /// cannot help.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoreError::ConfigurationError(_)
                | CoreError::IllegalTrigger { .. }
                | CoreError::SerializationError(_)
        )
    }

    /// Whether the error originates from the storage layer.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, CoreError::StateStoreError(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
