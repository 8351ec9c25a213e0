/// Workflow entity and vocabularies
pub mod workflow;

/// Step logic invoked on state entry
pub mod action;

/// Finite-state machine per workflow type
pub mod state_machine;

/// Workflow type registry
pub mod registry;

/// Storage interfaces
pub mod store;
