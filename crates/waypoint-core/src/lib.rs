//! Waypoint Core - Durable workflow execution engine
//!
//! Long-running business processes are modeled as finite-state machines whose
//! state is persisted between steps, so execution can suspend, crash and
//! resume without losing progress. This crate defines the workflow entity,
//! the state-machine and action contracts, the storage interface and the
//! execution server. Storage adapters live in separate crates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - workflow entity, state machines and storage contract
pub mod domain;

/// Application services - registration, commands and execution
pub mod application;

/// Engine configuration
pub mod config;

/// Tracing setup
pub mod telemetry;

/// Error types
pub mod error;

pub use error::CoreError;

pub use config::EngineConfig;

pub use domain::action::{ActionContext, WorkflowAction};
pub use domain::registry::{RunOutcome, WorkflowRegistry, WorkflowRunner};
pub use domain::state_machine::{FireError, FireOutcome, StateWorkflow, StateWorkflowBuilder};
pub use domain::store::{
    claim_lease, WorkflowStore, WorkflowStoreExt, DEFAULT_CLAIM_TIMEOUT_SECS, MAX_CLAIM_TIMEOUT_SECS,
};
pub use domain::workflow::{
    CompletedWorkflow, FailureDisposition, Vocabulary, Workflow, WorkflowContainer, WorkflowDocument,
    WorkflowId, WorkflowType, DEFAULT_RETRY_INTERVALS,
};

pub use application::client::WorkflowClient;
pub use application::commands::{Command, UnsuspendCommand};
pub use application::host::WorkflowHost;
pub use application::registration_service::WorkflowRegistrationService;
pub use application::server::{ExecutionOutcome, WorkflowServer};

/// Re-exported so adapters and tests share the same cancellation type
pub use tokio_util::sync::CancellationToken;
