//! Decision nodes.

use baton_types::definition::NodeKind;
use baton_types::task::{DECISION, Task, TaskStatus};
use chrono::Utc;
use serde_json::{Value, json};

use super::{MapperContext, MapperError, TaskMapper};
use crate::workflow::expression::{ExpressionEvaluator, case_label};

/// Input key recording that a decision scheduled the first task of a case.
pub const HAS_CHILDREN: &str = "has_children";

/// Expands a DECISION node into the decision task followed by the expansion
/// of the first node of the selected case.
///
/// The case comes from `case_expression` when set, else from the input value
/// named by `case_value_param`. An unmatched case falls back to
/// `default_case`; an empty selection schedules no children.
pub struct DecisionMapper {
    evaluator: ExpressionEvaluator,
}

impl DecisionMapper {
    pub fn new() -> Self {
        Self {
            evaluator: ExpressionEvaluator::new(),
        }
    }

    fn case_value(
        &self,
        ctx: &MapperContext<'_>,
        case_value_param: Option<&str>,
        case_expression: Option<&str>,
    ) -> Result<String, MapperError> {
        if let Some(expr) = case_expression {
            return self
                .evaluator
                .evaluate_case(expr, &ctx.task_input)
                .map_err(|e| MapperError::Expression {
                    task: ctx.node.task_reference_name.clone(),
                    reason: e.to_string(),
                });
        }
        let value = case_value_param
            .and_then(|param| ctx.task_input.get(param))
            .unwrap_or(&Value::Null);
        Ok(case_label(value))
    }
}

impl Default for DecisionMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskMapper for DecisionMapper {
    fn map(&self, ctx: &MapperContext<'_>) -> Result<Vec<Task>, MapperError> {
        let NodeKind::Decision {
            case_value_param,
            case_expression,
            decision_cases,
            default_case,
        } = &ctx.node.kind
        else {
            return Err(MapperError::InvalidDefinition(format!(
                "'{}' is not a decision node",
                ctx.node.task_reference_name
            )));
        };
        let case = self.case_value(ctx, case_value_param.as_deref(), case_expression.as_deref())?;

        let mut decision = ctx.new_task(DECISION, TaskStatus::InProgress);
        decision.input.insert("case".to_string(), json!(case));
        decision
            .output
            .insert("case_output".to_string(), json!([case]));
        decision.start_time = Some(Utc::now());

        let selected = decision_cases.get(&case).unwrap_or(default_case);
        let mut tasks = Vec::new();
        if let Some(first) = selected.first() {
            decision.input.insert(HAS_CHILDREN.to_string(), json!("true"));
            tasks = ctx.expand_child(first)?;
        }
        tasks.insert(0, decision);
        Ok(tasks)
    }
}
