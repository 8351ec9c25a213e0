/// Single-instance registration service
pub mod registration_service;

/// Producer-side client
pub mod client;

/// Administrative commands
pub mod commands;

/// Workflow execution server
pub mod server;

/// Polling host loop
pub mod host;
