//! Observability setup shared by Baton binaries.

pub mod tracing_setup;
