//! Background drivers: the sweeper and the system task coordinator.

use anyhow::Result;
use baton_core::workflow::coordinator::SystemTaskCoordinator;
use baton_core::workflow::sweeper::Sweeper;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Run both drivers until Ctrl+C or SIGTERM, then let them finish their
/// current batch.
pub async fn serve(state: AppState) -> Result<()> {
    let cancel = CancellationToken::new();

    let sweeper = Sweeper::new(state.executor.clone(), state.locks.clone());
    let sweeper_cancel = cancel.clone();
    let sweeper_handle = tokio::spawn(async move { sweeper.run(sweeper_cancel).await });

    let coordinator = SystemTaskCoordinator::new(state.executor.clone(), state.locks.clone());
    let coordinator_cancel = cancel.clone();
    let coordinator_handle = tokio::spawn(async move { coordinator.run(coordinator_cancel).await });

    tracing::info!(data_dir = %state.data_dir.display(), "batond running, press Ctrl+C to stop");
    shutdown_signal().await;
    tracing::info!("shutdown requested");
    cancel.cancel();

    sweeper_handle.await?;
    coordinator_handle.await?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
