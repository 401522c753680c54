//! Wire representation of a job definition.
//!
//! Field names are part of the interop contract with the API layer and must
//! not change. [`JobSubmission::validate`] checks the structure of the
//! definition (unique ids, known endpoints, acyclic graph) before the editor
//! touches any persisted state.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{JobError, Result};
use crate::model::{
    ElementAlias, ElementId, ElementName, ElementRole, GroupId, GroupName, JobApplication,
    JobName, JobSchedule, JobType, TaskId, TaskName, TaskType,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<GroupName>,
    pub job_name: JobName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_application: Option<JobApplication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<JobSchedule>,
    #[serde(default)]
    pub tasks: Vec<TaskSubmission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_task_id: Option<TaskId>,
    #[serde(default)]
    pub transitions: Vec<TransitionSubmission>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub task_name: TaskName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<ElementId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_name: Option<ElementName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_alias: Option<ElementAlias>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_role: Option<ElementRole>,
    #[serde(default)]
    pub canary: bool,
    #[serde(default)]
    pub parameter: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionSubmission {
    pub from: TaskId,
    pub to: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl JobSubmission {
    /// Reads a submission from a `.toml` file, or JSON for any other
    /// extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(serde_json::from_str(&contents)?)
        }
    }

    /// Declared start task, defaulting to the first submitted task.
    pub fn start_task_id(&self) -> Option<&TaskId> {
        self.start_task_id
            .as_ref()
            .or_else(|| self.tasks.first().map(|t| &t.task_id))
    }

    /// Structural checks. Nothing is mutated when this fails.
    pub fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(invalid("a job needs at least one task"));
        }

        let mut ids = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if !ids.insert(&task.task_id) {
                return Err(invalid(format!("duplicate task id {}", task.task_id)));
            }
        }

        if let Some(start) = self.start_task_id()
            && !ids.contains(start)
        {
            return Err(invalid(format!("start task {start} is not part of the job")));
        }

        let mut pairs = HashSet::with_capacity(self.transitions.len());
        for transition in &self.transitions {
            for end in [&transition.from, &transition.to] {
                if !ids.contains(end) {
                    return Err(invalid(format!(
                        "transition {} -> {} references unknown task {end}",
                        transition.from, transition.to
                    )));
                }
            }
            if !pairs.insert((&transition.from, &transition.to)) {
                return Err(invalid(format!(
                    "duplicate transition {} -> {}",
                    transition.from, transition.to
                )));
            }
        }

        self.ensure_acyclic()
    }

    /// Kahn's algorithm: whatever cannot be peeled off in topological order
    /// sits on or behind a cycle.
    fn ensure_acyclic(&self) -> Result<()> {
        let mut in_degree: HashMap<&TaskId, usize> =
            self.tasks.iter().map(|t| (&t.task_id, 0)).collect();
        let mut edges: HashMap<&TaskId, Vec<&TaskId>> = HashMap::new();
        for transition in &self.transitions {
            edges.entry(&transition.from).or_default().push(&transition.to);
            if let Some(degree) = in_degree.get_mut(&transition.to) {
                *degree += 1;
            }
        }

        let mut queue: VecDeque<&TaskId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for next in edges.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }

        if visited == self.tasks.len() {
            return Ok(());
        }
        let stuck: BTreeSet<&TaskId> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id)
            .collect();
        match stuck.into_iter().next() {
            Some(id) => Err(JobError::CyclicTaskGraph(id.clone())),
            None => Err(invalid("task graph is not acyclic")),
        }
    }
}

fn invalid(message: impl Into<String>) -> JobError {
    JobError::InvalidSubmission(message.into())
}
