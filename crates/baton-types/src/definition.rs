//! Workflow definition graph and task policies.
//!
//! A `WorkflowDef` is an ordered list of `WorkflowTask` nodes. Control-flow
//! nodes (decisions, forks) nest further node lists, so the graph is a tree
//! of sequences. Successor resolution lives on the node variants via
//! [`WorkflowTask::next`] and is surfaced as [`WorkflowDef::next_node`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Payload;
use crate::task;

// ---------------------------------------------------------------------------
// Task policies
// ---------------------------------------------------------------------------

/// How the delay before a retry grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryLogic {
    #[default]
    Fixed,
    ExponentialBackoff,
}

/// What happens when a task exceeds `timeout_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeoutPolicy {
    AlertOnly,
    Retry,
    #[default]
    TimeOutWf,
}

/// Per task-type execution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    #[serde(default)]
    pub retry_logic: RetryLogic,
    /// Hard timeout measured from start; 0 disables it.
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,
    /// Maximum silence from a worker while IN_PROGRESS; 0 disables it.
    #[serde(default = "default_response_timeout_seconds")]
    pub response_timeout_seconds: u64,
    /// Maximum tasks of this type in flight at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent_exec_limit: Option<u32>,
    /// Maximum tasks started per `rate_limit_frequency_in_seconds` window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_frequency: Option<u32>,
    #[serde(default = "default_rate_limit_frequency")]
    pub rate_limit_frequency_in_seconds: u64,
    /// Defaults merged underneath the resolved task input.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub input_template: Payload,
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    60
}

fn default_response_timeout_seconds() -> u64 {
    3600
}

fn default_rate_limit_frequency() -> u64 {
    1
}

impl TaskDef {
    /// A policy with every field at its default value.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            retry_count: default_retry_count(),
            retry_delay_seconds: default_retry_delay_seconds(),
            retry_logic: RetryLogic::default(),
            timeout_seconds: 0,
            timeout_policy: TimeoutPolicy::default(),
            response_timeout_seconds: default_response_timeout_seconds(),
            concurrent_exec_limit: None,
            rate_limit_per_frequency: None,
            rate_limit_frequency_in_seconds: default_rate_limit_frequency(),
            input_template: Payload::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Definition nodes
// ---------------------------------------------------------------------------

/// Target of a SUB_WORKFLOW node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubWorkflowParams {
    pub name: String,
    /// Pinned version; the latest registered version when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

/// Type tag of a definition node, used as the expander registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskType {
    Simple,
    Decision,
    ForkJoin,
    ForkJoinDynamic,
    Join,
    ExclusiveJoin,
    SubWorkflow,
    Lambda,
    Wait,
    Event,
    Terminate,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Simple => "SIMPLE",
            TaskType::Decision => "DECISION",
            TaskType::ForkJoin => "FORK_JOIN",
            TaskType::ForkJoinDynamic => "FORK_JOIN_DYNAMIC",
            TaskType::Join => "JOIN",
            TaskType::ExclusiveJoin => "EXCLUSIVE_JOIN",
            TaskType::SubWorkflow => "SUB_WORKFLOW",
            TaskType::Lambda => "LAMBDA",
            TaskType::Wait => "WAIT",
            TaskType::Event => "EVENT",
            TaskType::Terminate => "TERMINATE",
        }
    }
}

/// Variant-specific data of a definition node, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Simple,
    Decision {
        /// Input key whose value selects the case.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        case_value_param: Option<String>,
        /// JEXL expression evaluated against the task input; wins over
        /// `case_value_param` when both are set.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        case_expression: Option<String>,
        #[serde(default)]
        decision_cases: BTreeMap<String, Vec<WorkflowTask>>,
        #[serde(default)]
        default_case: Vec<WorkflowTask>,
    },
    ForkJoin {
        fork_tasks: Vec<Vec<WorkflowTask>>,
    },
    #[serde(alias = "DYNAMIC_FORK")]
    ForkJoinDynamic {
        /// Input key holding the list of branch nodes.
        dynamic_fork_tasks_param: String,
        /// Input key holding a map of branch reference name to branch input.
        dynamic_fork_tasks_input_param_name: String,
    },
    Join {
        #[serde(default)]
        join_on: Vec<String>,
    },
    ExclusiveJoin {
        #[serde(default)]
        join_on: Vec<String>,
        #[serde(default)]
        default_exclusive_join_task: Vec<String>,
    },
    SubWorkflow {
        sub_workflow_param: SubWorkflowParams,
    },
    Lambda {
        script_expression: String,
    },
    Wait,
    Event {
        sink: String,
    },
    Terminate,
}

/// One node of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// Task definition name (for SIMPLE nodes) or a descriptive label.
    pub name: String,
    /// Unique within one workflow instance.
    pub task_reference_name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_parameters: Payload,
    /// A failure on an optional node does not fail the workflow.
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub start_delay: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<TaskDef>,
}

impl WorkflowTask {
    pub fn new(
        name: impl Into<String>,
        task_reference_name: impl Into<String>,
        kind: NodeKind,
    ) -> Self {
        Self {
            name: name.into(),
            task_reference_name: task_reference_name.into(),
            kind,
            description: None,
            input_parameters: Payload::new(),
            optional: false,
            start_delay: 0,
            task_definition: None,
        }
    }

    pub fn task_type(&self) -> TaskType {
        match &self.kind {
            NodeKind::Simple => TaskType::Simple,
            NodeKind::Decision { .. } => TaskType::Decision,
            NodeKind::ForkJoin { .. } => TaskType::ForkJoin,
            NodeKind::ForkJoinDynamic { .. } => TaskType::ForkJoinDynamic,
            NodeKind::Join { .. } => TaskType::Join,
            NodeKind::ExclusiveJoin { .. } => TaskType::ExclusiveJoin,
            NodeKind::SubWorkflow { .. } => TaskType::SubWorkflow,
            NodeKind::Lambda { .. } => TaskType::Lambda,
            NodeKind::Wait => TaskType::Wait,
            NodeKind::Event { .. } => TaskType::Event,
            NodeKind::Terminate => TaskType::Terminate,
        }
    }

    /// Runtime `task_type` of instances expanded from this node.
    pub fn runtime_type(&self) -> &str {
        match &self.kind {
            NodeKind::Simple => &self.name,
            NodeKind::Decision { .. } => task::DECISION,
            NodeKind::ForkJoin { .. } | NodeKind::ForkJoinDynamic { .. } => task::FORK,
            NodeKind::Join { .. } => task::JOIN,
            NodeKind::ExclusiveJoin { .. } => task::EXCLUSIVE_JOIN,
            NodeKind::SubWorkflow { .. } => task::SUB_WORKFLOW,
            NodeKind::Lambda { .. } => task::LAMBDA,
            NodeKind::Wait => task::WAIT,
            NodeKind::Event { .. } => task::EVENT,
            NodeKind::Terminate => task::TERMINATE,
        }
    }

    /// Nested node sequences: decision cases followed by the default case, or
    /// fork branches. Empty for every other variant.
    pub fn children(&self) -> Vec<&[WorkflowTask]> {
        match &self.kind {
            NodeKind::Decision {
                decision_cases,
                default_case,
                ..
            } => {
                let mut lists: Vec<&[WorkflowTask]> =
                    decision_cases.values().map(Vec::as_slice).collect();
                lists.push(default_case.as_slice());
                lists
            }
            NodeKind::ForkJoin { fork_tasks } => fork_tasks.iter().map(Vec::as_slice).collect(),
            _ => Vec::new(),
        }
    }

    /// `true` if this node or any node nested under it has `ref_name`.
    pub fn has(&self, ref_name: &str) -> bool {
        self.task_reference_name == ref_name
            || self
                .children()
                .iter()
                .any(|list| list.iter().any(|child| child.has(ref_name)))
    }

    /// Find the node with `ref_name` in this subtree.
    pub fn find(&self, ref_name: &str) -> Option<&WorkflowTask> {
        if self.task_reference_name == ref_name {
            return Some(self);
        }
        self.children()
            .into_iter()
            .flat_map(|list| list.iter())
            .find_map(|child| child.find(ref_name))
    }

    /// Collect this node and every nested node, depth first.
    pub fn collect_all<'a>(&'a self, out: &mut Vec<&'a WorkflowTask>) {
        out.push(self);
        for list in self.children() {
            for child in list {
                child.collect_all(out);
            }
        }
    }

    /// Successor of `ref_name` inside this node's nested sequences.
    ///
    /// Returns `None` when the successor lies outside this node; the caller
    /// then continues in the enclosing sequence. A fork branch that runs to
    /// its end defers to `parent` so nested forks resume in the outer
    /// sequence.
    pub fn next<'a>(
        &'a self,
        ref_name: &str,
        parent: Option<&'a WorkflowTask>,
    ) -> Option<&'a WorkflowTask> {
        let is_fork = match &self.kind {
            NodeKind::Decision { .. } => false,
            NodeKind::ForkJoin { .. } => true,
            _ => return None,
        };

        for list in self.children() {
            let mut found = false;
            let mut it = list.iter();
            while let Some(node) = it.next() {
                if node.task_reference_name == ref_name {
                    found = true;
                    break;
                }
                if let Some(next) = node.next(ref_name, Some(self)) {
                    return Some(next);
                }
                if node.has(ref_name) {
                    break;
                }
            }
            if let Some(next) = it.next() {
                return Some(next);
            }
            if is_fork && found {
                if let Some(parent) = parent {
                    return parent.next(&self.task_reference_name, Some(parent));
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// WorkflowDef
// ---------------------------------------------------------------------------

/// A named, versioned workflow blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    pub tasks: Vec<WorkflowTask>,
    /// Documented input keys (informational).
    #[serde(default)]
    pub input_parameters: Vec<String>,
    /// Expressions evaluated into the workflow output on completion.
    #[serde(default)]
    pub output_parameters: Payload,
    /// Workflow started on failure; may be `${workflow.input.<key>}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_workflow: Option<String>,
    #[serde(default = "default_restartable")]
    pub restartable: bool,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_version() -> u32 {
    1
}

fn default_restartable() -> bool {
    true
}

fn default_schema_version() -> u32 {
    2
}

impl WorkflowDef {
    pub fn new(name: impl Into<String>, version: u32, tasks: Vec<WorkflowTask>) -> Self {
        Self {
            name: name.into(),
            description: None,
            version,
            tasks,
            input_parameters: Vec::new(),
            output_parameters: Payload::new(),
            failure_workflow: None,
            restartable: true,
            schema_version: default_schema_version(),
        }
    }

    /// Resolve the node that follows `ref_name`, honouring decision and fork
    /// nesting. `None` means the reference is the end of its path.
    pub fn next_node(&self, ref_name: &str) -> Option<&WorkflowTask> {
        let mut it = self.tasks.iter();
        while let Some(node) = it.next() {
            if let Some(next) = node.next(ref_name, None) {
                return Some(next);
            }
            if node.task_reference_name == ref_name || node.has(ref_name) {
                return it.next();
            }
        }
        None
    }

    /// Find a node anywhere in the graph by reference name.
    pub fn node_by_ref(&self, ref_name: &str) -> Option<&WorkflowTask> {
        self.tasks.iter().find_map(|node| node.find(ref_name))
    }

    /// Every node in the graph, nested ones included.
    pub fn all_nodes(&self) -> Vec<&WorkflowTask> {
        let mut out = Vec::new();
        for node in &self.tasks {
            node.collect_all(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(ref_name: &str) -> WorkflowTask {
        WorkflowTask::new(ref_name.trim_end_matches("_ref"), ref_name, NodeKind::Simple)
    }

    fn fork_def() -> WorkflowDef {
        WorkflowDef::new(
            "fanout",
            1,
            vec![
                WorkflowTask::new(
                    "fork",
                    "fork_ref",
                    NodeKind::ForkJoin {
                        fork_tasks: vec![
                            vec![simple("a1_ref"), simple("a2_ref")],
                            vec![simple("b1_ref")],
                        ],
                    },
                ),
                WorkflowTask::new(
                    "join",
                    "join_ref",
                    NodeKind::Join {
                        join_on: vec!["a2_ref".into(), "b1_ref".into()],
                    },
                ),
                simple("after_ref"),
            ],
        )
    }

    #[test]
    fn test_next_node_linear() {
        let def = WorkflowDef::new("linear", 1, vec![simple("t0_ref"), simple("t1_ref")]);
        assert_eq!(def.next_node("t0_ref").unwrap().task_reference_name, "t1_ref");
        assert!(def.next_node("t1_ref").is_none());
        assert!(def.next_node("unknown_ref").is_none());
    }

    #[test]
    fn test_next_node_inside_fork_branch() {
        let def = fork_def();
        assert_eq!(def.next_node("a1_ref").unwrap().task_reference_name, "a2_ref");
        // End of a branch resolves to the join following the fork.
        assert_eq!(def.next_node("a2_ref").unwrap().task_reference_name, "join_ref");
        assert_eq!(def.next_node("b1_ref").unwrap().task_reference_name, "join_ref");
        assert_eq!(def.next_node("fork_ref").unwrap().task_reference_name, "join_ref");
        assert_eq!(def.next_node("join_ref").unwrap().task_reference_name, "after_ref");
    }

    #[test]
    fn test_next_node_inside_decision_case() {
        let mut cases = BTreeMap::new();
        cases.insert("hd".to_string(), vec![simple("hd1_ref"), simple("hd2_ref")]);
        let def = WorkflowDef::new(
            "branching",
            1,
            vec![
                WorkflowTask::new(
                    "route",
                    "route_ref",
                    NodeKind::Decision {
                        case_value_param: Some("quality".into()),
                        case_expression: None,
                        decision_cases: cases,
                        default_case: vec![simple("sd_ref")],
                    },
                ),
                simple("publish_ref"),
            ],
        );

        assert_eq!(def.next_node("hd1_ref").unwrap().task_reference_name, "hd2_ref");
        assert_eq!(def.next_node("hd2_ref").unwrap().task_reference_name, "publish_ref");
        assert_eq!(def.next_node("sd_ref").unwrap().task_reference_name, "publish_ref");
        assert_eq!(def.next_node("route_ref").unwrap().task_reference_name, "publish_ref");
    }

    #[test]
    fn test_node_lookup_and_all_nodes() {
        let def = fork_def();
        assert!(def.node_by_ref("b1_ref").is_some());
        assert!(def.node_by_ref("zzz").is_none());
        let refs: Vec<&str> = def
            .all_nodes()
            .iter()
            .map(|n| n.task_reference_name.as_str())
            .collect();
        assert_eq!(refs, vec!["fork_ref", "a1_ref", "a2_ref", "b1_ref", "join_ref", "after_ref"]);
    }

    #[test]
    fn test_runtime_types() {
        let def = fork_def();
        assert_eq!(def.tasks[0].runtime_type(), "FORK");
        assert_eq!(def.tasks[1].runtime_type(), "JOIN");
        assert_eq!(def.tasks[2].runtime_type(), "after");
        assert_eq!(def.tasks[0].task_type(), TaskType::ForkJoin);
    }

    #[test]
    fn test_node_deserializes_tagged_kind() {
        let json = serde_json::json!({
            "name": "child",
            "task_reference_name": "child_ref",
            "type": "SUB_WORKFLOW",
            "sub_workflow_param": {"name": "encode-flow"},
            "optional": true
        });
        let node: WorkflowTask = serde_json::from_value(json).unwrap();
        assert!(node.optional);
        match node.kind {
            NodeKind::SubWorkflow { sub_workflow_param } => {
                assert_eq!(sub_workflow_param.name, "encode-flow");
                assert!(sub_workflow_param.version.is_none());
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_task_def_defaults() {
        let def: TaskDef = serde_json::from_value(serde_json::json!({"name": "encode"})).unwrap();
        assert_eq!(def.retry_count, 3);
        assert_eq!(def.retry_delay_seconds, 60);
        assert_eq!(def.retry_logic, RetryLogic::Fixed);
        assert_eq!(def.timeout_policy, TimeoutPolicy::TimeOutWf);
        assert_eq!(def.response_timeout_seconds, 3600);
    }
}
