use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{GroupId, GroupName, JobApplication, JobId, JobName, JobType, TaskId, UserName};
use super::state::{JobState, TaskState};
use super::task::{Task, Transition};
use crate::error::{JobError, Result};

/// When a job is supposed to run. Stored with the job, evaluated elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_resume: bool,
}

/// Aggregate root of one orchestration run: the task graph plus the
/// job-level state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    job_id: JobId,
    pub job_name: JobName,
    pub job_type: Option<JobType>,
    pub job_application: Option<JobApplication>,
    pub user_name: Option<UserName>,
    pub group_id: Option<GroupId>,
    pub group_name: Option<GroupName>,
    pub schedule: Option<JobSchedule>,
    state: JobState,
    tasks: HashMap<TaskId, Task>,
    start: Option<TaskId>,
    date_created: DateTime<Utc>,
    date_modified: DateTime<Utc>,
}

impl Job {
    pub fn new(job_name: JobName) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::generate(),
            job_name,
            job_type: None,
            job_application: None,
            user_name: None,
            group_id: None,
            group_name: None,
            schedule: None,
            state: JobState::Ready,
            tasks: HashMap::new(),
            start: None,
            date_created: now,
            date_modified: now,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == JobState::Ready
    }

    pub fn date_created(&self) -> DateTime<Utc> {
        self.date_created
    }

    pub fn date_modified(&self) -> DateTime<Utc> {
        self.date_modified
    }

    pub fn start_task(&self) -> Option<&TaskId> {
        self.start.as_ref()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.values_mut()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn contains_task(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn task(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn task_mut(&mut self, task_id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(task_id)
    }

    /// Like [`Job::task`], failing with `TaskNotFound`.
    pub fn get_task(&self, task_id: &TaskId) -> Result<&Task> {
        self.tasks.get(task_id).ok_or_else(|| self.task_not_found(task_id))
    }

    pub fn get_task_mut(&mut self, task_id: &TaskId) -> Result<&mut Task> {
        let job_id = self.job_id.clone();
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| JobError::TaskNotFound {
                job_id,
                task_id: task_id.clone(),
            })
    }

    fn task_not_found(&self, task_id: &TaskId) -> JobError {
        JobError::TaskNotFound {
            job_id: self.job_id.clone(),
            task_id: task_id.clone(),
        }
    }

    /// Graph edits are only permitted before the job starts.
    pub fn ensure_editable(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(JobError::JobSettingsImmutable {
                job_id: self.job_id.clone(),
                state: self.state,
            })
        }
    }

    pub fn add_task(&mut self, task: Task) -> Result<()> {
        self.ensure_editable()?;
        self.tasks.insert(task.task_id().clone(), task);
        self.touch();
        Ok(())
    }

    /// Removes the task together with every transition pointing at it.
    pub fn remove_task(&mut self, task_id: &TaskId) -> Result<Option<Task>> {
        self.ensure_editable()?;
        let removed = self.tasks.remove(task_id);
        if removed.is_some() {
            for task in self.tasks.values_mut() {
                task.remove_successor(task_id);
            }
            if self.start.as_ref() == Some(task_id) {
                self.start = None;
            }
            self.touch();
        }
        Ok(removed)
    }

    pub fn set_start(&mut self, task_id: &TaskId) -> Result<()> {
        self.ensure_editable()?;
        if !self.tasks.contains_key(task_id) {
            return Err(self.task_not_found(task_id));
        }
        if self.start.as_ref() != Some(task_id) {
            self.start = Some(task_id.clone());
            self.touch();
        }
        Ok(())
    }

    /// All transitions of the job.
    pub fn transitions(&self) -> Vec<Transition> {
        self.tasks
            .values()
            .flat_map(|t| t.successors().iter().cloned())
            .collect()
    }

    /// Tasks with a transition into `task_id`.
    pub fn predecessors(&self, task_id: &TaskId) -> Vec<&TaskId> {
        self.tasks
            .values()
            .filter(|t| t.successors().iter().any(|s| &s.to == task_id))
            .map(|t| t.task_id())
            .collect()
    }

    /// `true` iff any predecessor of the task has not completed.
    pub fn is_blocked(&self, task_id: &TaskId) -> bool {
        self.tasks.values().any(|t| {
            !t.is_succeeded() && t.successors().iter().any(|s| &s.to == task_id)
        })
    }

    /// Moves a waiting task between `READY` and `BLOCKED` to match its
    /// predecessors and returns the state it left. Other states are left
    /// alone.
    pub fn refresh_blocked(&mut self, task_id: &TaskId) -> Option<TaskState> {
        let blocked = self.is_blocked(task_id);
        let task = self.tasks.get_mut(task_id)?;
        let previous = task.state();
        match (previous, blocked) {
            (TaskState::Blocked, false) => task.set_state(TaskState::Ready),
            (TaskState::Ready, true) => task.set_state(TaskState::Blocked),
            _ => return None,
        }
        Some(previous)
    }

    /// Tasks that can be dispatched right now.
    pub fn dispatchable_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.state().is_dispatchable() && !self.is_blocked(t.task_id()))
            .map(|t| t.task_id().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Starts a `READY` job: the job becomes `ACTIVE` and every task still
    /// waiting for a predecessor is marked `BLOCKED`. Returns the tasks that
    /// moved, with the state they left, or `None` if the job was not
    /// `READY`.
    pub fn activate(&mut self) -> Option<Vec<(TaskId, TaskState)>> {
        if !self.is_ready() {
            return None;
        }
        self.state = JobState::Active;
        let mut ids: Vec<TaskId> = self.tasks.keys().cloned().collect();
        ids.sort();
        let moved = ids
            .into_iter()
            .filter_map(|id| self.refresh_blocked(&id).map(|previous| (id, previous)))
            .collect();
        self.touch();
        Some(moved)
    }

    /// State the job should be in given its tasks: a job that has not
    /// finished but holds a failed, rejected or timed out task is `FAILED`.
    pub fn settled_state(&self) -> JobState {
        let unfinished = matches!(self.state, JobState::Ready | JobState::Active | JobState::Confirm);
        if unfinished && self.tasks.values().any(Task::is_failed) {
            JobState::Failed
        } else {
            self.state
        }
    }

    /// Catches up on task failures recorded without a job transition, e.g.
    /// by the bulk expiry sweep. Returns `true` if the job failed.
    pub fn settle_failures(&mut self) -> bool {
        if self.settled_state() == JobState::Failed && self.state != JobState::Failed {
            self.failed();
            return true;
        }
        false
    }

    /// Returns whether every task completed. If so, a job that has not
    /// finished or failed becomes `COMPLETED`; a failed job completes only
    /// after it was resumed.
    pub fn completed(&mut self) -> bool {
        let done = self.tasks.values().all(Task::is_succeeded);
        if done && matches!(self.state, JobState::Ready | JobState::Active | JobState::Confirm) {
            self.state = JobState::Completed;
            self.touch();
        }
        done
    }

    /// Marks a non-terminal job as `FAILED`. Idempotent.
    pub fn failed(&mut self) {
        if !self.state.is_terminal() && self.state != JobState::Failed {
            self.state = JobState::Failed;
            self.touch();
        }
    }

    /// Stalls a running job until a canary task is confirmed.
    pub fn await_confirmation(&mut self) {
        if matches!(self.state, JobState::Ready | JobState::Active) {
            self.state = JobState::Confirm;
            self.touch();
        }
    }

    /// Operator confirmation of the canary tasks. Every task in `CONFIRM`
    /// becomes `SUSPENDED`, ready for fan-out, and the job is `ACTIVE`
    /// again. Returns the suspended tasks.
    pub fn confirm(&mut self) -> Result<Vec<TaskId>> {
        if self.state != JobState::Confirm {
            return Err(JobError::JobNotConfirmable {
                job_id: self.job_id.clone(),
                state: self.state,
            });
        }
        let mut suspended = Vec::new();
        for task in self.tasks.values_mut() {
            if task.state() == TaskState::Confirm {
                task.set_state(TaskState::Suspended);
                suspended.push(task.task_id().clone());
            }
        }
        suspended.sort();
        self.state = JobState::Active;
        self.touch();
        Ok(suspended)
    }

    /// Returns `true` if the job changed. Cancelling a `FAILED` or
    /// `CANCELLED` job is a no-op.
    pub fn cancel(&mut self) -> Result<bool> {
        match self.state {
            JobState::Completed => Err(JobError::CannotCancelCompletedJob(self.job_id.clone())),
            JobState::Failed | JobState::Cancelled => Ok(false),
            JobState::Ready | JobState::Active | JobState::Confirm => {
                self.state = JobState::Cancelled;
                self.touch();
                Ok(true)
            }
        }
    }

    /// Resumes a `FAILED` or `CANCELLED` job. Failed tasks are reset so they
    /// can run again; returns the tasks that are dispatchable afterwards.
    pub fn resume(&mut self) -> Result<Vec<TaskId>> {
        match self.state {
            JobState::Completed => {
                return Err(JobError::CannotResumeCompletedJob(self.job_id.clone()));
            }
            JobState::Failed | JobState::Cancelled => {}
            state => {
                return Err(JobError::JobNotResumable {
                    job_id: self.job_id.clone(),
                    state,
                });
            }
        }
        let failed: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.is_failed())
            .map(|t| t.task_id().clone())
            .collect();
        for id in &failed {
            if let Some(task) = self.tasks.get_mut(id) {
                task.set_state(TaskState::Ready);
            }
            self.refresh_blocked(id);
        }
        let awaiting_confirmation = self
            .tasks
            .values()
            .any(|t| t.state() == TaskState::Confirm);
        self.state = if awaiting_confirmation {
            JobState::Confirm
        } else {
            JobState::Active
        };
        self.touch();
        // Late reports may have completed every task while the job was failed.
        self.completed();
        Ok(self.dispatchable_tasks())
    }

    fn touch(&mut self) {
        self.date_modified = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskName, TaskType};

    fn task(id: &str, state: TaskState) -> Task {
        let mut t = Task::new(
            TaskId::new(id).unwrap(),
            TaskName::new(id).unwrap(),
            TaskType::new("noop").unwrap(),
        );
        t.set_state(state);
        t
    }

    fn id(s: &str) -> TaskId {
        TaskId::new(s).unwrap()
    }

    fn job_with(states: &[TaskState]) -> Job {
        let mut job = Job::new(JobName::new("test").unwrap());
        for (i, state) in states.iter().enumerate() {
            job.add_task(task(&format!("t{i}"), *state)).unwrap();
        }
        job
    }

    fn chain(ids: &[&str]) -> Job {
        let mut job = Job::new(JobName::new("chain").unwrap());
        for s in ids {
            job.add_task(task(s, TaskState::Ready)).unwrap();
        }
        for pair in ids.windows(2) {
            job.task_mut(&id(pair[0]))
                .unwrap()
                .add_successor(id(pair[1]), Some("success".into()));
        }
        job.set_start(&id(ids[0])).unwrap();
        job
    }

    #[test]
    fn cannot_complete_job_with_unfinished_or_failed_tasks() {
        for other in [
            TaskState::Ready,
            TaskState::Blocked,
            TaskState::Active,
            TaskState::Confirm,
            TaskState::Suspended,
            TaskState::Rejected,
            TaskState::Failed,
            TaskState::Timeout,
        ] {
            let mut job = job_with(&[TaskState::Completed, other]);
            assert!(!job.completed(), "{other}");
            assert_eq!(job.state(), JobState::Ready);
        }
    }

    #[test]
    fn can_complete_job_with_completed_tasks() {
        let mut job = job_with(&[TaskState::Completed, TaskState::Completed]);
        assert!(job.completed());
        assert_eq!(job.state(), JobState::Completed);
    }

    #[test]
    fn completed_does_not_revive_cancelled_job() {
        let mut job = job_with(&[TaskState::Completed]);
        job.cancel().unwrap();
        assert!(job.completed());
        assert_eq!(job.state(), JobState::Cancelled);
    }

    #[test]
    fn completed_does_not_revive_failed_job() {
        let mut job = job_with(&[TaskState::Completed]);
        job.failed();
        assert!(job.completed());
        assert_eq!(job.state(), JobState::Failed);
    }

    #[test]
    fn failed_is_idempotent_and_respects_terminal_states() {
        let mut job = job_with(&[TaskState::Failed]);
        job.failed();
        job.failed();
        assert_eq!(job.state(), JobState::Failed);

        let mut done = job_with(&[TaskState::Completed]);
        done.completed();
        done.failed();
        assert_eq!(done.state(), JobState::Completed);
    }

    #[test]
    fn graph_is_immutable_once_started() {
        let mut job = chain(&["A", "B"]);
        assert!(job.activate().is_some());
        assert!(job.activate().is_none());
        let err = job.add_task(task("C", TaskState::Ready)).unwrap_err();
        assert!(matches!(err, JobError::JobSettingsImmutable { .. }));
        assert!(job.remove_task(&id("A")).is_err());
        assert!(job.set_start(&id("B")).is_err());
    }

    #[test]
    fn set_start_requires_existing_task() {
        let mut job = chain(&["A"]);
        let err = job.set_start(&id("missing")).unwrap_err();
        assert!(matches!(err, JobError::TaskNotFound { .. }));
        assert_eq!(job.start_task(), Some(&id("A")));
    }

    #[test]
    fn removing_a_task_removes_incident_transitions() {
        let mut job = chain(&["A", "B", "C"]);
        job.remove_task(&id("B")).unwrap();
        assert!(job.transitions().is_empty());
        assert_eq!(job.task_count(), 2);

        job.remove_task(&id("A")).unwrap();
        assert_eq!(job.start_task(), None);
    }

    #[test]
    fn join_is_blocked_until_all_predecessors_complete() {
        let mut job = Job::new(JobName::new("join").unwrap());
        for s in ["A", "B", "D"] {
            job.add_task(task(s, TaskState::Ready)).unwrap();
        }
        job.task_mut(&id("A")).unwrap().add_successor(id("D"), None);
        job.task_mut(&id("B")).unwrap().add_successor(id("D"), None);
        assert_eq!(job.activate(), Some(vec![(id("D"), TaskState::Ready)]));

        assert_eq!(job.task(&id("D")).unwrap().state(), TaskState::Blocked);
        assert_eq!(job.predecessors(&id("D")).len(), 2);
        assert!(job.is_blocked(&id("D")));

        job.task_mut(&id("A")).unwrap().set_state(TaskState::Completed);
        assert!(job.is_blocked(&id("D")));

        job.task_mut(&id("B")).unwrap().set_state(TaskState::Completed);
        assert!(!job.is_blocked(&id("D")));
        assert_eq!(job.refresh_blocked(&id("D")), Some(TaskState::Blocked));
        assert_eq!(job.refresh_blocked(&id("D")), None);
        assert_eq!(job.task(&id("D")).unwrap().state(), TaskState::Ready);
        assert_eq!(job.dispatchable_tasks(), vec![id("D")]);
    }

    #[test]
    fn confirm_suspends_canary_tasks() {
        let mut job = job_with(&[TaskState::Confirm, TaskState::Ready]);
        assert!(job.confirm().is_err());

        job.activate();
        job.await_confirmation();
        assert_eq!(job.state(), JobState::Confirm);

        let suspended = job.confirm().unwrap();
        assert_eq!(suspended, vec![id("t0")]);
        assert_eq!(job.state(), JobState::Active);
        assert!(job.task(&id("t0")).unwrap().is_suspended());
    }

    #[test]
    fn cancel_transitions() {
        let mut job = job_with(&[TaskState::Ready]);
        assert!(job.cancel().unwrap());
        assert!(!job.cancel().unwrap());
        assert_eq!(job.state(), JobState::Cancelled);

        let mut failed = job_with(&[TaskState::Failed]);
        failed.failed();
        assert!(!failed.cancel().unwrap());
        assert_eq!(failed.state(), JobState::Failed);

        let mut done = job_with(&[TaskState::Completed]);
        done.completed();
        let err = done.cancel().unwrap_err();
        assert!(matches!(err, JobError::CannotCancelCompletedJob(_)));
    }

    #[test]
    fn resume_resets_failed_tasks() {
        let mut job = chain(&["A", "B"]);
        job.activate();
        job.task_mut(&id("A")).unwrap().set_state(TaskState::Rejected);
        job.failed();

        let ready = job.resume().unwrap();
        assert_eq!(job.state(), JobState::Active);
        assert_eq!(ready, vec![id("A")]);
        assert_eq!(job.task(&id("A")).unwrap().state(), TaskState::Ready);
        assert_eq!(job.task(&id("B")).unwrap().state(), TaskState::Blocked);
    }

    #[test]
    fn resume_rules() {
        let mut running = job_with(&[TaskState::Ready]);
        running.activate();
        assert!(matches!(
            running.resume().unwrap_err(),
            JobError::JobNotResumable { .. }
        ));

        let mut done = job_with(&[TaskState::Completed]);
        done.completed();
        assert!(matches!(
            done.resume().unwrap_err(),
            JobError::CannotResumeCompletedJob(_)
        ));

        let mut cancelled = job_with(&[TaskState::Confirm]);
        cancelled.cancel().unwrap();
        cancelled.resume().unwrap();
        assert_eq!(cancelled.state(), JobState::Confirm);
    }

    #[test]
    fn resume_completes_job_whose_tasks_all_completed() {
        let mut job = job_with(&[TaskState::Completed]);
        job.failed();
        assert!(job.resume().unwrap().is_empty());
        assert_eq!(job.state(), JobState::Completed);
    }

    #[test]
    fn timed_out_tasks_settle_running_job_as_failed() {
        let mut job = chain(&["A", "B"]);
        job.activate();
        assert!(!job.settle_failures());
        job.task_mut(&id("A")).unwrap().set_state(TaskState::Timeout);
        job.task_mut(&id("B")).unwrap().set_state(TaskState::Timeout);
        assert_eq!(job.state(), JobState::Active);
        assert_eq!(job.settled_state(), JobState::Failed);

        assert!(job.settle_failures());
        assert!(!job.settle_failures());
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.resume().unwrap(), vec![id("A")]);
        assert_eq!(job.task(&id("B")).unwrap().state(), TaskState::Blocked);
    }

    #[test]
    fn settle_leaves_cancelled_job_alone() {
        let mut job = job_with(&[TaskState::Failed]);
        job.cancel().unwrap();
        assert_eq!(job.settled_state(), JobState::Cancelled);
        assert!(!job.settle_failures());
    }

    #[test]
    fn job_serialization_roundtrip() {
        let job = chain(&["A", "B"]);
        let json = serde_json::to_string(&job).unwrap();
        let parsed: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.job_id(), job.job_id());
        assert_eq!(parsed.transitions(), job.transitions());
        assert_eq!(parsed.start_task(), Some(&id("A")));
    }
}
