//! Orchestration logic and repository trait definitions for Baton.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, plus the decision engine, task expansion and the
//! orchestration loop built on top of them. It depends only on
//! `baton-types` -- never on `baton-infra` or any database/IO crate.

pub mod repository;
pub mod workflow;
