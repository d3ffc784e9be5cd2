//! Definition registration.

use std::path::Path;

use anyhow::{Context, Result};
use baton_core::repository::MetadataStore;
use baton_core::workflow::definition::load_definitions_file;

use crate::state::AppState;

/// Register every task and workflow definition in `file`. Task definitions
/// go first so the workflows that reference them validate on start.
pub async fn register(state: &AppState, file: &Path) -> Result<()> {
    let bundle = load_definitions_file(file)
        .with_context(|| format!("failed to load definitions from {}", file.display()))?;

    for def in &bundle.task_defs {
        state.metadata.register_task_def(def).await?;
        println!("registered task {}", def.name);
    }
    for def in &bundle.workflow_defs {
        state.metadata.register_workflow_def(def).await?;
        println!("registered workflow {} v{}", def.name, def.version);
    }
    tracing::info!(
        file = %file.display(),
        task_defs = bundle.task_defs.len(),
        workflow_defs = bundle.workflow_defs.len(),
        "definitions registered"
    );
    Ok(())
}
