//! Shared domain types for Baton.
//!
//! This crate contains the data model used across the Baton workflow engine:
//! workflow and task instances, the definition graph, task policies, queue
//! naming, configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod definition;
pub mod error;
pub mod queue;
pub mod task;
pub mod workflow;

/// JSON object used for task and workflow input/output payloads.
pub type Payload = serde_json::Map<String, serde_json::Value>;
