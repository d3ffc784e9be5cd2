//! Input parameter resolution.
//!
//! Definition nodes declare `input_parameters` whose string values may
//! reference workflow and task state with `${...}` paths:
//!
//! - `${workflow.input.<key>}` / `${workflow.output.<key>}`
//! - `${workflow.workflow_id}`, `${workflow.correlation_id}`, ...
//! - `${<task_ref>.output.<key>}` / `${<task_ref>.input.<key>}`
//!
//! A string that is exactly one reference resolves to the raw JSON value (so
//! objects and numbers keep their type). References embedded in a longer
//! string are rendered as text. `$${` escapes a literal `${`. Unknown paths
//! resolve to `null`.

use serde_json::{Value, json};

use baton_types::Payload;
use baton_types::definition::TaskDef;
use baton_types::workflow::Workflow;

/// Build the lookup context for `workflow`.
///
/// Each task reference maps to its latest instance.
pub fn build_context(workflow: &Workflow) -> Value {
    let mut ctx = serde_json::Map::new();
    ctx.insert(
        "workflow".to_string(),
        json!({
            "input": workflow.input,
            "output": workflow.output,
            "status": workflow.status,
            "workflow_id": workflow.workflow_id.to_string(),
            "workflow_type": workflow.workflow_type,
            "version": workflow.version,
            "correlation_id": workflow.correlation_id,
            "parent_workflow_id": workflow.parent_workflow_id.map(|id| id.to_string()),
            "parent_workflow_task_id": workflow.parent_workflow_task_id.map(|id| id.to_string()),
            "reason_for_incompletion": workflow.reason_for_incompletion,
            "task_to_domain": workflow.task_to_domain,
        }),
    );

    let mut tasks: Vec<_> = workflow.tasks.iter().collect();
    tasks.sort_by_key(|t| (t.seq == 0, t.seq));
    for task in tasks {
        ctx.insert(
            task.reference_task_name.clone(),
            json!({
                "input": task.input,
                "output": task.output,
                "status": task.status,
                "task_id": task.task_id.to_string(),
                "task_type": task.task_type,
                "reference_task_name": task.reference_task_name,
                "retry_count": task.retry_count,
                "poll_count": task.poll_count,
                "domain": task.domain,
                "worker_id": task.worker_id,
                "reason_for_incompletion": task.reason_for_incompletion,
                "callback_after_secs": task.callback_after_secs,
            }),
        );
    }
    Value::Object(ctx)
}

/// Resolve a node's `input_parameters` against `workflow`.
///
/// Keys from the task definition's `input_template` that the parameters do
/// not set are merged in underneath.
pub fn resolve_task_input(
    params: &Payload,
    workflow: &Workflow,
    task_def: Option<&TaskDef>,
) -> Payload {
    let ctx = build_context(workflow);
    let mut input = resolve_payload(params, &ctx);
    if let Some(def) = task_def {
        for (key, value) in resolve_payload(&def.input_template, &ctx) {
            input.entry(key).or_insert(value);
        }
    }
    input
}

/// Resolve every value of `params` against a prepared context.
pub fn resolve_payload(params: &Payload, ctx: &Value) -> Payload {
    params
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, ctx)))
        .collect()
}

/// Resolve a single value, recursing into arrays and objects.
pub fn resolve_value(value: &Value, ctx: &Value) -> Value {
    match value {
        Value::String(s) => resolve_string(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, ctx)).collect()),
        Value::Object(map) => Value::Object(resolve_payload(map, ctx)),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, ctx: &Value) -> Value {
    if let Some(path) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        if !path.contains("${") && !path.contains('}') {
            return lookup(ctx, path.trim()).cloned().unwrap_or(Value::Null);
        }
    }
    if !s.contains("${") {
        return Value::String(s.to_string());
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find("${") {
        if pos > 0 && rest.as_bytes()[pos - 1] == b'$' {
            out.push_str(&rest[..pos - 1]);
            out.push_str("${");
            rest = &rest[pos + 2..];
            continue;
        }
        out.push_str(&rest[..pos]);
        match rest[pos + 2..].find('}') {
            Some(end) => {
                let path = rest[pos + 2..pos + 2 + end].trim();
                let value = lookup(ctx, path).cloned().unwrap_or(Value::Null);
                out.push_str(&value_to_string(&value));
                rest = &rest[pos + 2 + end + 1..];
            }
            None => {
                out.push_str(&rest[pos..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

/// Walk a dotted path with optional `[index]` suffixes, e.g. `a.items[0].id`.
fn lookup<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = ctx;
    for segment in path.split('.') {
        let (name, indices) = match segment.find('[') {
            Some(i) => (&segment[..i], &segment[i..]),
            None => (segment, ""),
        };
        if !name.is_empty() {
            current = current.get(name)?;
        }
        for index in indices.split('[').filter(|p| !p.is_empty()) {
            let index: usize = index.strip_suffix(']')?.trim().parse().ok()?;
            current = current.get(index)?;
        }
    }
    Some(current)
}

/// Convert a JSON value to a display string for embedded references.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
