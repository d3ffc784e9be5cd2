//! System tasks: task types the engine executes itself.
//!
//! Synchronous system tasks run inline during a decide pass: `start` when a
//! new instance is created, `execute` whenever the decider re-offers a
//! non-terminal instance. Asynchronous ones are queued like worker tasks
//! and driven by the system task coordinator through
//! `WorkflowExecutor::execute_system_task`.

mod event;
mod flow;
mod lambda;
mod sub_workflow;

use std::collections::HashMap;
use std::sync::Arc;

use baton_types::error::ApplicationError;
use baton_types::task::Task;
use baton_types::workflow::Workflow;
use futures_util::future::BoxFuture;

use super::control::WorkflowControl;

pub use event::EventTask;
pub use flow::{DecisionTask, ExclusiveJoinTask, ForkTask, JoinTask, TerminateTask, WaitTask};
pub use lambda::LambdaTask;
pub use sub_workflow::SubWorkflowTask;

/// A task type implemented by the engine.
///
/// Methods mutate `task` in place; the caller persists it. Failures that
/// belong to the task (bad input, a missing child definition) are recorded
/// on the task. `Err` is reserved for collaborator failures.
pub trait SystemTask: Send + Sync {
    /// Runtime task type this implementation handles.
    fn task_type(&self) -> &'static str;

    /// Asynchronous tasks are queued instead of run inline.
    fn is_async(&self) -> bool {
        false
    }

    /// Visibility timeout while the coordinator executes this task.
    fn retry_time_secs(&self) -> u64 {
        30
    }

    fn start<'a>(
        &'a self,
        _workflow: &'a Workflow,
        _task: &'a mut Task,
        _control: &'a dyn WorkflowControl,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(async { Ok(()) })
    }

    /// Re-check a started task. Returns `true` when the task changed.
    fn execute<'a>(
        &'a self,
        _workflow: &'a Workflow,
        _task: &'a mut Task,
        _control: &'a dyn WorkflowControl,
    ) -> BoxFuture<'a, Result<bool, ApplicationError>> {
        Box::pin(async { Ok(false) })
    }

    /// Called when the owning workflow is terminated while this task runs.
    fn cancel<'a>(
        &'a self,
        _workflow: &'a Workflow,
        _task: &'a mut Task,
        _control: &'a dyn WorkflowControl,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(async { Ok(()) })
    }
}

/// System tasks keyed by runtime task type.
#[derive(Clone)]
pub struct SystemTaskRegistry {
    tasks: HashMap<&'static str, Arc<dyn SystemTask>>,
}

impl SystemTaskRegistry {
    pub fn empty() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// A registry holding every built-in system task.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(DecisionTask));
        registry.register(Arc::new(ForkTask));
        registry.register(Arc::new(JoinTask));
        registry.register(Arc::new(ExclusiveJoinTask));
        registry.register(Arc::new(WaitTask));
        registry.register(Arc::new(TerminateTask));
        registry.register(Arc::new(SubWorkflowTask));
        registry.register(Arc::new(LambdaTask::new()));
        registry.register(Arc::new(EventTask));
        registry
    }

    pub fn register(&mut self, task: Arc<dyn SystemTask>) {
        self.tasks.insert(task.task_type(), task);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn SystemTask>> {
        self.tasks.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.tasks.contains_key(task_type)
    }

    /// Task types whose instances are queued for the coordinator.
    pub fn async_task_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.is_async())
            .map(|(name, _)| *name)
            .collect();
        types.sort_unstable();
        types
    }
}

impl Default for SystemTaskRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A scripted [`WorkflowControl`] for exercising system tasks alone.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::workflow::control::StartWorkflowRequest;
    use uuid::Uuid;

    #[derive(Default)]
    pub struct MockControl {
        pub workflows: Mutex<HashMap<Uuid, Workflow>>,
        pub started: Mutex<Vec<StartWorkflowRequest>>,
        pub terminated: Mutex<Vec<(Uuid, String)>>,
        pub published: Mutex<Vec<(String, Uuid)>>,
        pub fail_start: Option<String>,
    }

    impl WorkflowControl for MockControl {
        fn load_workflow(
            &self,
            workflow_id: Uuid,
            _include_tasks: bool,
        ) -> BoxFuture<'_, Result<Workflow, ApplicationError>> {
            Box::pin(async move {
                self.workflows
                    .lock()
                    .unwrap()
                    .get(&workflow_id)
                    .cloned()
                    .ok_or_else(|| ApplicationError::NotFound(workflow_id.to_string()))
            })
        }

        fn start_workflow(
            &self,
            request: StartWorkflowRequest,
        ) -> BoxFuture<'_, Result<Uuid, ApplicationError>> {
            Box::pin(async move {
                if let Some(msg) = &self.fail_start {
                    return Err(ApplicationError::NotFound(msg.clone()));
                }
                let id = Uuid::now_v7();
                let wf = Workflow::new(id, &request.name, 1, request.input.clone().unwrap_or_default());
                self.workflows.lock().unwrap().insert(id, wf);
                self.started.lock().unwrap().push(request);
                Ok(id)
            })
        }

        fn terminate_workflow<'a>(
            &'a self,
            workflow_id: Uuid,
            reason: &'a str,
        ) -> BoxFuture<'a, Result<(), ApplicationError>> {
            Box::pin(async move {
                self.terminated
                    .lock()
                    .unwrap()
                    .push((workflow_id, reason.to_string()));
                Ok(())
            })
        }

        fn publish<'a>(
            &'a self,
            queue: &'a str,
            message_id: Uuid,
        ) -> BoxFuture<'a, Result<(), ApplicationError>> {
            Box::pin(async move {
                self.published
                    .lock()
                    .unwrap()
                    .push((queue.to_string(), message_id));
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_types::task::{DECISION, EVENT, JOIN, SUB_WORKFLOW};

    #[test]
    fn test_default_registry_contents() {
        let registry = SystemTaskRegistry::with_defaults();
        assert!(registry.contains(DECISION));
        assert!(registry.contains(JOIN));
        assert!(registry.contains(SUB_WORKFLOW));
        assert!(!registry.contains("encode"));
        assert_eq!(registry.async_task_types(), vec![EVENT]);
    }

    #[test]
    fn test_register_replaces_by_type() {
        struct AsyncJoin;
        impl SystemTask for AsyncJoin {
            fn task_type(&self) -> &'static str {
                JOIN
            }
            fn is_async(&self) -> bool {
                true
            }
        }
        let mut registry = SystemTaskRegistry::with_defaults();
        registry.register(Arc::new(AsyncJoin));
        assert!(registry.get(JOIN).unwrap().is_async());
        assert_eq!(registry.async_task_types(), vec![EVENT, JOIN]);
    }
}
