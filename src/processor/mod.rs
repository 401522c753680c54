//! Pluggable units of work.
//!
//! A [`TaskProcessor`] performs the actual work of a task and reports the
//! outcome as a [`TaskResult`]. The engine finds the processor for a task
//! through [`TaskProcessorDiscovery`]; tasks without a processor are fork or
//! join markers and complete immediately.

pub mod rest;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{ElementRole, JobTaskMessage, Task, TaskState, TaskType};

pub use rest::{InventoryClient, RestApiTaskProcessor, RestRequest, StaticInventory};

/// Outcome of a processor run: the state to apply and the journal entries to
/// append.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub state: TaskState,
    pub messages: Vec<JobTaskMessage>,
}

impl TaskResult {
    pub fn new(state: TaskState, messages: Vec<JobTaskMessage>) -> Self {
        Self { state, messages }
    }

    pub fn completed(messages: Vec<JobTaskMessage>) -> Self {
        Self::new(TaskState::Completed, messages)
    }

    pub fn active(messages: Vec<JobTaskMessage>) -> Self {
        Self::new(TaskState::Active, messages)
    }

    pub fn rejected(messages: Vec<JobTaskMessage>) -> Self {
        Self::new(TaskState::Rejected, messages)
    }

    pub fn failed(messages: Vec<JobTaskMessage>) -> Self {
        Self::new(TaskState::Failed, messages)
    }
}

/// Performs the work of a task. Implementations should classify their own
/// failures; an `Err` (or a panic) is turned into a `FAILED` result by the
/// engine.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn execute(&self, task: &Task) -> anyhow::Result<TaskResult>;
}

/// Finds the processor responsible for a task.
pub trait TaskProcessorDiscovery: Send + Sync {
    fn resolve(&self, task: &Task) -> Option<Arc<dyn TaskProcessor>>;
}

/// Discovery backed by a lookup table keyed on task type, optionally
/// refined by the role of the target element.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    by_type: HashMap<TaskType, Arc<dyn TaskProcessor>>,
    by_role: HashMap<(TaskType, ElementRole), Arc<dyn TaskProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, task_type: TaskType, processor: Arc<dyn TaskProcessor>) -> Self {
        self.by_type.insert(task_type, processor);
        self
    }

    /// Processor for tasks of `task_type` targeting elements of `role`.
    /// Takes precedence over the plain type registration.
    pub fn register_for_role(
        mut self,
        task_type: TaskType,
        role: ElementRole,
        processor: Arc<dyn TaskProcessor>,
    ) -> Self {
        self.by_role.insert((task_type, role), processor);
        self
    }
}

impl TaskProcessorDiscovery for ProcessorRegistry {
    fn resolve(&self, task: &Task) -> Option<Arc<dyn TaskProcessor>> {
        task.element()
            .element_role
            .as_ref()
            .and_then(|role| {
                self.by_role
                    .get(&(task.task_type().clone(), role.clone()))
            })
            .or_else(|| self.by_type.get(task.task_type()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonCode;
    use crate::model::{ElementBinding, TaskId, TaskName};

    struct Fixed(TaskState);

    #[async_trait]
    impl TaskProcessor for Fixed {
        async fn execute(&self, _task: &Task) -> anyhow::Result<TaskResult> {
            Ok(TaskResult::new(self.0, Vec::new()))
        }
    }

    fn task(task_type: &str, role: Option<&str>) -> Task {
        Task::new(
            TaskId::new("A").unwrap(),
            TaskName::new("A").unwrap(),
            TaskType::new(task_type).unwrap(),
        )
        .with_element(ElementBinding {
            element_role: role.map(|r| ElementRole::new(r).unwrap()),
            ..ElementBinding::default()
        })
    }

    #[tokio::test]
    async fn resolves_by_role_then_type() {
        let registry = ProcessorRegistry::new()
            .register(
                TaskType::new("upgrade").unwrap(),
                Arc::new(Fixed(TaskState::Completed)),
            )
            .register_for_role(
                TaskType::new("upgrade").unwrap(),
                ElementRole::new("spine").unwrap(),
                Arc::new(Fixed(TaskState::Active)),
            );

        let spine = task("upgrade", Some("spine"));
        let processor = registry.resolve(&spine).unwrap();
        assert_eq!(processor.execute(&spine).await.unwrap().state, TaskState::Active);

        let leaf = task("upgrade", Some("leaf"));
        let processor = registry.resolve(&leaf).unwrap();
        assert_eq!(processor.execute(&leaf).await.unwrap().state, TaskState::Completed);

        assert!(registry.resolve(&task("fork", None)).is_none());
    }

    #[test]
    fn result_constructors() {
        let m = JobTaskMessage::new(ReasonCode::JOB1001E_REST_API_CALL_REJECTED, "conflict");
        let r = TaskResult::rejected(vec![m.clone()]);
        assert_eq!(r.state, TaskState::Rejected);
        assert_eq!(r.messages, vec![m]);
        assert_eq!(TaskResult::failed(Vec::new()).state, TaskState::Failed);
        assert_eq!(TaskResult::active(Vec::new()).state, TaskState::Active);
        assert_eq!(TaskResult::completed(Vec::new()).state, TaskState::Completed);
    }
}
