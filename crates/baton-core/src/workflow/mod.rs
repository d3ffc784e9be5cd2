//! Workflow engine core: definitions, decisions and the orchestration loop.
//!
//! - `definition` -- YAML definition parsing, validation and discovery
//! - `expression` -- JEXL evaluation for decision cases and lambdas
//! - `parameters` -- `${...}` input resolution against the workflow context
//! - `mapper` -- expands definition nodes into task instances
//! - `retry` -- task retry policy
//! - `payload` -- offloading of oversized payloads
//! - `system_task` -- built-in task types run by the engine itself
//! - `control` -- the engine surface system tasks call back into
//! - `decider` -- pure decision engine over one workflow snapshot
//! - `listener` -- terminal status notifications
//! - `executor` -- orchestration loop applying decisions durably
//! - `sweeper` -- periodic re-evaluation via the decider queue
//! - `coordinator` -- background execution of asynchronous system tasks

pub mod control;
pub mod coordinator;
pub mod decider;
pub mod definition;
pub mod executor;
pub mod expression;
pub mod listener;
pub mod mapper;
pub mod parameters;
pub mod payload;
pub mod retry;
pub mod sweeper;
pub mod system_task;
