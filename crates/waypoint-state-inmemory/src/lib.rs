//! In-memory workflow store for the Waypoint engine
//!
//! This crate provides an in-memory implementation of the `WorkflowStore`
//! interface defined in waypoint-core. It honours the same ordering, claim and
//! archival rules as the relational store and is primarily useful for
//! development, testing and single-process deployments where persistence is
//! not required.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Lease-based in-memory store
pub mod store;
pub use store::InMemoryWorkflowStore;
