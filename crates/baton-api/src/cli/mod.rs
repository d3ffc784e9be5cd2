//! CLI command definitions for the `batond` binary.

pub mod definition;
pub mod serve;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Durable workflow orchestration daemon.
#[derive(Parser)]
#[command(name = "batond", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory (defaults to BATON_DATA_DIR or ~/.baton).
    #[arg(long, global = true, env = "BATON_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the sweeper and the system task coordinator until interrupted.
    Serve,

    /// Register workflow and task definitions from a YAML file.
    Register {
        /// Path to a definition file (a bare workflow or a bundle).
        file: PathBuf,
    },

    /// Start a workflow instance.
    Start {
        /// Workflow definition name.
        name: String,

        /// Definition version (latest when omitted).
        #[arg(long)]
        version: Option<u32>,

        /// Workflow input as a JSON object.
        #[arg(long, default_value = "{}")]
        input: String,

        /// Correlation id recorded on the instance.
        #[arg(long)]
        correlation_id: Option<String>,
    },

    /// Print a workflow instance with its tasks as JSON.
    Show {
        /// Workflow instance id.
        workflow_id: String,
    },

    /// List running instances of a workflow type.
    Running {
        /// Workflow definition name.
        name: String,
    },

    /// Terminate a running workflow instance.
    Terminate {
        /// Workflow instance id.
        workflow_id: String,

        /// Reason recorded on the instance.
        #[arg(long, default_value = "terminated by operator")]
        reason: String,
    },
}
