//! Workflow instance commands: start, show, list running, terminate.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use baton_core::repository::LockService;
use baton_core::workflow::control::StartWorkflowRequest;
use serde_json::Value;
use uuid::Uuid;

use crate::state::AppState;

pub async fn start(
    state: &AppState,
    name: String,
    version: Option<u32>,
    input: &str,
    correlation_id: Option<String>,
) -> Result<()> {
    let input = match serde_json::from_str::<Value>(input).context("--input is not valid JSON")? {
        Value::Object(map) => map,
        other => bail!("--input must be a JSON object, got {other}"),
    };
    let request = StartWorkflowRequest {
        version,
        correlation_id,
        ..StartWorkflowRequest::new(name, input)
    };
    let workflow_id = state.executor.start_workflow(request).await?;
    println!("{workflow_id}");
    Ok(())
}

pub async fn show(state: &AppState, workflow_id: &str) -> Result<()> {
    let workflow = state.executor.get_workflow(parse_id(workflow_id)?, true).await?;
    println!("{}", serde_json::to_string_pretty(&workflow)?);
    Ok(())
}

pub async fn running(state: &AppState, name: &str) -> Result<()> {
    for id in state.executor.get_running_workflow_ids(name).await? {
        println!("{id}");
    }
    Ok(())
}

/// Terminate under the workflow lock so a running daemon's sweep of the
/// same instance cannot interleave.
pub async fn terminate(state: &AppState, workflow_id: &str, reason: &str) -> Result<()> {
    let id = parse_id(workflow_id)?;
    let config = state.executor.config();
    let lock_id = id.to_string();
    let Some(token) = state
        .locks
        .acquire_lock(
            &lock_id,
            Duration::from_millis(config.lock_timeout_ms),
            Duration::from_millis(config.lock_lease_ms),
        )
        .await?
    else {
        bail!("workflow {workflow_id} is busy, try again");
    };
    let result = state.executor.terminate_workflow(id, reason).await;
    state.locks.release_lock(&lock_id, token).await?;
    result?;
    println!("terminated {workflow_id}");
    Ok(())
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("'{raw}' is not a workflow id"))
}
