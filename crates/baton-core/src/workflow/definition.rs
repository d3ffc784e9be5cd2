//! Definition parsing, validation, and filesystem discovery.
//!
//! Definition files are YAML. A file holds either a single workflow
//! definition or a bundle of task definitions and workflow definitions:
//!
//! ```yaml
//! task_defs:
//!   - name: encode
//!     retry_count: 2
//! workflow_defs:
//!   - name: media
//!     tasks:
//!       - name: encode
//!         task_reference_name: encode_ref
//!         type: SIMPLE
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use baton_types::definition::{NodeKind, TaskDef, WorkflowDef, WorkflowTask};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating definitions.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Task and workflow definitions loaded from one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionBundle {
    #[serde(default)]
    pub task_defs: Vec<TaskDef>,
    #[serde(default)]
    pub workflow_defs: Vec<WorkflowDef>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DefinitionDocument {
    Workflow(WorkflowDef),
    Bundle(DefinitionBundle),
}

/// Parse a YAML document into a validated [`DefinitionBundle`].
///
/// A bare workflow definition is accepted and returned as a bundle with a
/// single workflow.
pub fn parse_definitions_yaml(yaml: &str) -> Result<DefinitionBundle, DefinitionError> {
    let doc: DefinitionDocument =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::ParseError(e.to_string()))?;
    let bundle = match doc {
        DefinitionDocument::Workflow(def) => DefinitionBundle {
            task_defs: Vec::new(),
            workflow_defs: vec![def],
        },
        DefinitionDocument::Bundle(bundle) => bundle,
    };
    for def in &bundle.workflow_defs {
        validate_definition(def)?;
    }
    for def in &bundle.task_defs {
        validate_task_def(def)?;
    }
    Ok(bundle)
}

/// Parse a single workflow definition and validate it.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDef, DefinitionError> {
    let def: WorkflowDef =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

pub fn serialize_definitions_yaml(bundle: &DefinitionBundle) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(bundle).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a workflow definition.
///
/// Checks:
/// - Name is non-empty and uses only alphanumerics, `-` and `_`
/// - Version is at least 1
/// - Reference names are non-empty and unique across the whole graph
/// - Every fork (static or dynamic) is immediately followed by a JOIN
/// - Fork branches are non-empty
/// - JOIN and EXCLUSIVE_JOIN only wait on references that exist
/// - Decisions carry a case parameter or a case expression
/// - Sub-workflow, lambda and event nodes carry their required targets
pub fn validate_definition(def: &WorkflowDef) -> Result<(), DefinitionError> {
    if def.name.is_empty() {
        return Err(DefinitionError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }
    if !def
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DefinitionError::ValidationError(format!(
            "workflow name '{}' contains invalid characters (only alphanumerics, '-' and '_' allowed)",
            def.name
        )));
    }
    if def.version == 0 {
        return Err(DefinitionError::ValidationError(
            "workflow version must be >= 1".to_string(),
        ));
    }
    if let Some(failure) = &def.failure_workflow {
        if failure.trim().is_empty() {
            return Err(DefinitionError::ValidationError(
                "failure_workflow must not be blank".to_string(),
            ));
        }
    }

    let nodes = def.all_nodes();
    let mut refs = HashSet::new();
    for node in &nodes {
        if node.task_reference_name.is_empty() {
            return Err(DefinitionError::ValidationError(format!(
                "node '{}' has an empty task_reference_name",
                node.name
            )));
        }
        if !refs.insert(node.task_reference_name.as_str()) {
            return Err(DefinitionError::ValidationError(format!(
                "duplicate task_reference_name: '{}'",
                node.task_reference_name
            )));
        }
    }

    validate_sequence(&def.tasks)?;
    for node in &nodes {
        validate_node(node, &refs)?;
    }
    Ok(())
}

fn validate_sequence(sequence: &[WorkflowTask]) -> Result<(), DefinitionError> {
    for (i, node) in sequence.iter().enumerate() {
        let is_fork = matches!(
            node.kind,
            NodeKind::ForkJoin { .. } | NodeKind::ForkJoinDynamic { .. }
        );
        if is_fork && !matches!(sequence.get(i + 1).map(|n| &n.kind), Some(NodeKind::Join { .. })) {
            return Err(DefinitionError::ValidationError(format!(
                "fork '{}' must be immediately followed by a JOIN",
                node.task_reference_name
            )));
        }
        for list in node.children() {
            validate_sequence(list)?;
        }
    }
    Ok(())
}

fn validate_node(node: &WorkflowTask, refs: &HashSet<&str>) -> Result<(), DefinitionError> {
    let invalid = |msg: String| Err(DefinitionError::ValidationError(msg));
    let r = &node.task_reference_name;
    match &node.kind {
        NodeKind::Simple => {
            if node.name.is_empty() {
                return invalid(format!("simple node '{r}' needs a task name"));
            }
        }
        NodeKind::Decision {
            case_value_param,
            case_expression,
            ..
        } => {
            if case_value_param.is_none() && case_expression.is_none() {
                return invalid(format!(
                    "decision '{r}' needs case_value_param or case_expression"
                ));
            }
        }
        NodeKind::ForkJoin { fork_tasks } => {
            if fork_tasks.is_empty() || fork_tasks.iter().any(Vec::is_empty) {
                return invalid(format!("fork '{r}' must have non-empty branches"));
            }
        }
        NodeKind::Join { join_on }
        | NodeKind::ExclusiveJoin { join_on, .. } => {
            if let Some(missing) = join_on.iter().find(|j| !refs.contains(j.as_str())) {
                return invalid(format!("join '{r}' waits on unknown reference '{missing}'"));
            }
        }
        NodeKind::SubWorkflow { sub_workflow_param } => {
            if sub_workflow_param.name.is_empty() {
                return invalid(format!("sub-workflow '{r}' needs a workflow name"));
            }
        }
        NodeKind::Lambda { script_expression } => {
            if script_expression.trim().is_empty() {
                return invalid(format!("lambda '{r}' needs a script_expression"));
            }
        }
        NodeKind::Event { sink } => {
            if sink.trim().is_empty() {
                return invalid(format!("event '{r}' needs a sink"));
            }
        }
        NodeKind::ForkJoinDynamic { .. } | NodeKind::Wait | NodeKind::Terminate => {}
    }
    if let Some(task_def) = &node.task_definition {
        validate_task_def(task_def)?;
    }
    Ok(())
}

/// Validate a task definition's policy fields.
pub fn validate_task_def(def: &TaskDef) -> Result<(), DefinitionError> {
    if def.name.is_empty() {
        return Err(DefinitionError::ValidationError(
            "task definition name must not be empty".to_string(),
        ));
    }
    if def.rate_limit_per_frequency.is_some() && def.rate_limit_frequency_in_seconds == 0 {
        return Err(DefinitionError::ValidationError(format!(
            "task definition '{}' has a rate limit with a zero-second window",
            def.name
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a definition file.
pub fn load_definitions_file(path: &Path) -> Result<DefinitionBundle, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_definitions_yaml(&content)
}

/// Save a bundle, creating parent directories as needed.
pub fn save_definitions_file(path: &Path, bundle: &DefinitionBundle) -> Result<(), DefinitionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_definitions_yaml(bundle)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover every definition file under `base_dir`.
///
/// Scans `.yaml` and `.yml` files recursively. Files that fail to parse or
/// validate are logged and skipped.
pub fn discover_definitions(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, DefinitionBundle)>, DefinitionError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, DefinitionBundle)>,
) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            match load_definitions_file(&path) {
                Ok(bundle) => results.push((path, bundle)),
                Err(e) => tracing::warn!(?path, error = %e, "skipping invalid definition file"),
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
