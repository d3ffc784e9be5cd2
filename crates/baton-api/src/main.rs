//! Baton daemon entry point.
//!
//! Binary name: `batond`
//!
//! Parses CLI arguments, opens the data directory and dispatches to the
//! command handler. `serve` drives workflows in the background until
//! interrupted.

mod cli;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    baton_observe::tracing_setup::init_tracing(cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let state = AppState::init(cli.data_dir).await?;

    let result = match cli.command {
        Commands::Serve => cli::serve::serve(state).await,
        Commands::Register { file } => cli::definition::register(&state, &file).await,
        Commands::Start {
            name,
            version,
            input,
            correlation_id,
        } => cli::workflow::start(&state, name, version, &input, correlation_id).await,
        Commands::Show { workflow_id } => cli::workflow::show(&state, &workflow_id).await,
        Commands::Running { name } => cli::workflow::running(&state, &name).await,
        Commands::Terminate { workflow_id, reason } => {
            cli::workflow::terminate(&state, &workflow_id, &reason).await
        }
    };

    baton_observe::tracing_setup::shutdown_tracing();
    result
}
