//! Infrastructure layer for Baton.
//!
//! Contains implementations of the repository traits defined in `baton-core`:
//! SQLite storage (execution, metadata, work queues), in-memory collaborators
//! for tests and single-process embedding, filesystem payload storage, and the
//! engine configuration loader.

pub mod config;
pub mod memory;
pub mod sqlite;
pub mod storage;
