use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{
    ElementAlias, ElementId, ElementName, ElementRole, GroupId, GroupName, GroupType, TaskId,
    TaskName, TaskType, UserName,
};
use super::state::{Severity, TaskState};
use crate::error::ReasonCode;

/// Network element a task operates on. All fields are absent for tasks that
/// do not target an element, e.g. fork and join markers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementBinding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<ElementId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_name: Option<ElementName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_alias: Option<ElementAlias>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_role: Option<ElementRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<GroupName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_type: Option<GroupType>,
}

impl ElementBinding {
    pub fn is_bound(&self) -> bool {
        self.element_id.is_some()
    }
}

/// One journal entry. Entries are appended and never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTaskMessage {
    pub reason: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<UserName>,
    pub message: String,
    pub date_created: DateTime<Utc>,
}

impl JobTaskMessage {
    /// System-generated entry; severity comes from the reason code.
    pub fn new(reason: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            reason: reason.code().to_string(),
            severity: reason.severity(),
            user_name: None,
            message: message.into(),
            date_created: Utc::now(),
        }
    }

    pub fn by(mut self, user_name: UserName) -> Self {
        self.user_name = Some(user_name);
        self
    }
}

/// Named directed edge between two tasks of the same job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: TaskId,
    pub to: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A node of the job's task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    task_id: TaskId,
    task_name: TaskName,
    task_type: TaskType,
    #[serde(default)]
    element: ElementBinding,
    state: TaskState,
    canary: bool,
    #[serde(default)]
    parameter: serde_json::Value,
    date_modified: DateTime<Utc>,
    #[serde(default)]
    messages: Vec<JobTaskMessage>,
    #[serde(default)]
    successors: Vec<Transition>,
}

impl Task {
    pub fn new(task_id: TaskId, task_name: TaskName, task_type: TaskType) -> Self {
        Self {
            task_id,
            task_name,
            task_type,
            element: ElementBinding::default(),
            state: TaskState::Ready,
            canary: false,
            parameter: serde_json::Value::Null,
            date_modified: Utc::now(),
            messages: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn with_element(mut self, element: ElementBinding) -> Self {
        self.element = element;
        self
    }

    pub fn with_parameter(mut self, parameter: serde_json::Value) -> Self {
        self.parameter = parameter;
        self
    }

    pub fn with_canary(mut self, canary: bool) -> Self {
        self.canary = canary;
        self
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn task_name(&self) -> &TaskName {
        &self.task_name
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn element(&self) -> &ElementBinding {
        &self.element
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_canary(&self) -> bool {
        self.canary
    }

    pub fn is_succeeded(&self) -> bool {
        self.state.is_succeeded()
    }

    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }

    pub fn is_suspended(&self) -> bool {
        self.state == TaskState::Suspended
    }

    pub fn parameter(&self) -> &serde_json::Value {
        &self.parameter
    }

    pub fn date_modified(&self) -> DateTime<Utc> {
        self.date_modified
    }

    pub fn messages(&self) -> &[JobTaskMessage] {
        &self.messages
    }

    pub fn successors(&self) -> &[Transition] {
        &self.successors
    }

    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
        self.date_modified = Utc::now();
    }

    /// Returns `true` if the value changed.
    pub fn set_parameter(&mut self, parameter: serde_json::Value) -> bool {
        if self.parameter == parameter {
            return false;
        }
        self.parameter = parameter;
        self.date_modified = Utc::now();
        true
    }

    /// Returns `true` if the value changed.
    pub fn set_canary(&mut self, canary: bool) -> bool {
        if self.canary == canary {
            return false;
        }
        self.canary = canary;
        self.date_modified = Utc::now();
        true
    }

    pub fn append(&mut self, message: JobTaskMessage) {
        self.messages.push(message);
    }

    /// Adds an edge to `to`, or renames the existing one. At most one edge
    /// exists per successor.
    pub fn add_successor(&mut self, to: TaskId, name: Option<String>) {
        if let Some(existing) = self.successors.iter_mut().find(|t| t.to == to) {
            existing.name = name;
            return;
        }
        self.successors.push(Transition {
            from: self.task_id.clone(),
            to,
            name,
        });
    }

    pub fn remove_successor(&mut self, to: &TaskId) -> Option<Transition> {
        let index = self.successors.iter().position(|t| &t.to == to)?;
        Some(self.successors.remove(index))
    }

    pub(crate) fn successor_mut(&mut self, to: &TaskId) -> Option<&mut Transition> {
        self.successors.iter_mut().find(|t| &t.to == to)
    }

    /// Ids of the tasks this task fans out to.
    pub fn successor_ids(&self) -> Vec<TaskId> {
        self.successors.iter().map(|t| t.to.clone()).collect()
    }

    #[cfg(test)]
    pub(crate) fn set_date_modified(&mut self, date_modified: DateTime<Utc>) {
        self.date_modified = date_modified;
    }
}
