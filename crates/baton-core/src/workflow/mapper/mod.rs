//! Task expansion: turning a definition node into runtime task instances.
//!
//! Each node variant has a [`TaskMapper`]. Control-flow mappers (decision,
//! forks) expand nested nodes through the same [`TaskExpander`], so one
//! expansion may yield several tasks. Mappers are pure: they never touch
//! storage, and every collaborator they need arrives in [`MapperContext`].

mod decision;
mod fork;
mod simple;
mod system;

use std::collections::HashMap;

use baton_types::Payload;
use baton_types::definition::{TaskDef, TaskType, WorkflowDef, WorkflowTask};
use baton_types::task::{Task, TaskStatus};
use baton_types::workflow::Workflow;
use uuid::Uuid;

use super::parameters;

pub use decision::{DecisionMapper, HAS_CHILDREN};
pub use fork::{
    DEFAULT_EXCLUSIVE_JOIN_TASK, DynamicForkMapper, ExclusiveJoinMapper, FORKED_TASK_INPUTS,
    FORKED_TASKS, ForkJoinMapper, JOIN_ON, JoinMapper,
};
pub use simple::SimpleMapper;
pub use system::{
    EventMapper, LambdaMapper, SCRIPT_EXPRESSION, SINK, SUB_WORKFLOW_ID, SUB_WORKFLOW_INPUT,
    SUB_WORKFLOW_NAME, SUB_WORKFLOW_VERSION, SubWorkflowMapper, TERMINATION_REASON,
    TERMINATION_STATUS, TerminateMapper, WORKFLOW_OUTPUT, WaitMapper,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a node cannot be expanded. Every variant fails the workflow.
#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    #[error("no task definition registered for '{0}'")]
    MissingTaskDef(String),

    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid input for '{task}': {reason}")]
    InvalidInput { task: String, reason: String },

    #[error("case evaluation failed for '{task}': {reason}")]
    Expression { task: String, reason: String },

    #[error("no expander registered for node type {0}")]
    UnknownType(&'static str),
}

// ---------------------------------------------------------------------------
// Task definition catalog
// ---------------------------------------------------------------------------

/// Snapshot of registered task definitions, fetched once per decide pass.
#[derive(Debug, Clone, Default)]
pub struct TaskDefCatalog {
    defs: HashMap<String, TaskDef>,
}

impl TaskDefCatalog {
    pub fn new(defs: Vec<TaskDef>) -> Self {
        Self {
            defs: defs.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TaskDef> {
        self.defs.get(name)
    }

    /// Policy for a node: the embedded definition, else the registered one.
    pub fn resolve<'a>(&'a self, node: &'a WorkflowTask) -> Option<&'a TaskDef> {
        node.task_definition.as_ref().or_else(|| self.get(&node.name))
    }
}

// ---------------------------------------------------------------------------
// Mapper trait and context
// ---------------------------------------------------------------------------

/// Everything a mapper may read while expanding one node.
pub struct MapperContext<'a> {
    pub workflow_def: &'a WorkflowDef,
    pub workflow: &'a Workflow,
    pub node: &'a WorkflowTask,
    pub task_def: Option<&'a TaskDef>,
    /// Node input parameters resolved against the workflow.
    pub task_input: Payload,
    pub task_id: Uuid,
    pub retry_count: u32,
    pub retried_task_id: Option<Uuid>,
    pub task_defs: &'a TaskDefCatalog,
    pub expander: &'a TaskExpander,
}

impl MapperContext<'_> {
    /// A task for this node with identity, routing and policy fields set.
    pub fn new_task(&self, task_type: &str, status: TaskStatus) -> Task {
        let mut task = Task::new(
            self.task_id,
            self.workflow.workflow_id,
            &self.workflow.workflow_type,
            &self.node.task_reference_name,
            task_type,
            status,
        );
        task.task_def_name = self.node.name.clone();
        task.correlation_id = self.workflow.correlation_id.clone();
        task.input = self.task_input.clone();
        task.retry_count = self.retry_count;
        task.retried_task_id = self.retried_task_id;
        let mut snapshot = self.node.clone();
        if snapshot.task_definition.is_none() {
            snapshot.task_definition = self.task_def.cloned();
        }
        task.workflow_task = Some(snapshot);
        if let Some(def) = self.task_def {
            task.response_timeout_secs = def.response_timeout_seconds;
        }
        task
    }

    /// Expand a nested node with this context's retry lineage.
    pub fn expand_child(&self, node: &WorkflowTask) -> Result<Vec<Task>, MapperError> {
        self.expander.expand(
            self.workflow_def,
            self.workflow,
            node,
            self.retry_count,
            None,
            self.task_defs,
        )
    }
}

/// Expands one node variant into tasks.
pub trait TaskMapper: Send + Sync {
    fn map(&self, ctx: &MapperContext<'_>) -> Result<Vec<Task>, MapperError>;
}

// ---------------------------------------------------------------------------
// TaskExpander
// ---------------------------------------------------------------------------

/// Registry of mappers keyed by node type.
pub struct TaskExpander {
    mappers: HashMap<TaskType, Box<dyn TaskMapper>>,
}

impl TaskExpander {
    /// An expander with no mappers registered.
    pub fn empty() -> Self {
        Self {
            mappers: HashMap::new(),
        }
    }

    /// An expander with a mapper for every node type.
    pub fn with_defaults() -> Self {
        let mut expander = Self::empty();
        expander.register(TaskType::Simple, Box::new(SimpleMapper));
        expander.register(TaskType::Decision, Box::new(DecisionMapper::new()));
        expander.register(TaskType::ForkJoin, Box::new(ForkJoinMapper));
        expander.register(TaskType::ForkJoinDynamic, Box::new(DynamicForkMapper));
        expander.register(TaskType::Join, Box::new(JoinMapper));
        expander.register(TaskType::ExclusiveJoin, Box::new(ExclusiveJoinMapper));
        expander.register(TaskType::SubWorkflow, Box::new(SubWorkflowMapper));
        expander.register(TaskType::Lambda, Box::new(LambdaMapper));
        expander.register(TaskType::Wait, Box::new(WaitMapper));
        expander.register(TaskType::Event, Box::new(EventMapper));
        expander.register(TaskType::Terminate, Box::new(TerminateMapper));
        expander
    }

    pub fn register(&mut self, task_type: TaskType, mapper: Box<dyn TaskMapper>) {
        self.mappers.insert(task_type, mapper);
    }

    /// Expand `node` into tasks, resolving its input against `workflow`.
    ///
    /// `workflow` must have its offloaded payloads populated.
    pub fn expand(
        &self,
        workflow_def: &WorkflowDef,
        workflow: &Workflow,
        node: &WorkflowTask,
        retry_count: u32,
        retried_task_id: Option<Uuid>,
        task_defs: &TaskDefCatalog,
    ) -> Result<Vec<Task>, MapperError> {
        let task_type = node.task_type();
        let mapper = self
            .mappers
            .get(&task_type)
            .ok_or(MapperError::UnknownType(task_type.as_str()))?;
        let task_def = task_defs.resolve(node);
        let task_input = parameters::resolve_task_input(&node.input_parameters, workflow, task_def);
        let ctx = MapperContext {
            workflow_def,
            workflow,
            node,
            task_def,
            task_input,
            task_id: Uuid::now_v7(),
            retry_count,
            retried_task_id,
            task_defs,
            expander: self,
        };
        mapper.map(&ctx)
    }

    /// Like [`expand`](Self::expand), with extra input merged over the
    /// resolved input of the first produced task. Used for dynamic fork
    /// branches whose input is supplied at runtime.
    pub fn expand_with_input(
        &self,
        workflow_def: &WorkflowDef,
        workflow: &Workflow,
        node: &WorkflowTask,
        retry_count: u32,
        task_defs: &TaskDefCatalog,
        extra_input: &Payload,
    ) -> Result<Vec<Task>, MapperError> {
        let mut tasks = self.expand(workflow_def, workflow, node, retry_count, None, task_defs)?;
        if let Some(first) = tasks.first_mut() {
            for (key, value) in extra_input {
                first.input.insert(key.clone(), value.clone());
            }
        }
        Ok(tasks)
    }
}

impl Default for TaskExpander {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use baton_types::definition::{NodeKind, TaskDef, WorkflowDef, WorkflowTask};
    use baton_types::workflow::Workflow;
    use serde_json::json;
    use uuid::Uuid;

    use super::TaskDefCatalog;

    pub fn simple(ref_name: &str) -> WorkflowTask {
        WorkflowTask::new(ref_name.trim_end_matches("_ref"), ref_name, NodeKind::Simple)
    }

    pub fn catalog(names: &[&str]) -> TaskDefCatalog {
        TaskDefCatalog::new(names.iter().map(|n| TaskDef::new(*n)).collect())
    }

    pub fn workflow(def: &WorkflowDef) -> Workflow {
        let mut wf = Workflow::new(
            Uuid::now_v7(),
            &def.name,
            def.version,
            json!({ "kind": "hd", "file": "a.mp4" }).as_object().cloned().unwrap(),
        );
        wf.correlation_id = Some("corr-1".to_string());
        wf
    }
}
