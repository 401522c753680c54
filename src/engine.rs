//! Task execution and state propagation.
//!
//! Running a task happens in three steps:
//!
//! 1. *Claim*: in one atomic repository update the task moves from
//!    `READY`/`BLOCKED` to `ACTIVE`, provided the job accepts dispatch and no
//!    predecessor is pending. A second dispatch of the same task finds it
//!    `ACTIVE` and does nothing, so a task runs at most once per claim.
//! 2. *Process*: the processor runs outside any lock.
//! 3. *Apply*: a second atomic update applies the outcome through
//!    [`TaskProcessingService::update_task`], but only if the task is still
//!    `ACTIVE`; an expiry that won the race is not overwritten.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{JobError, ReasonCode, Result};
use crate::events::{EventSink, TaskStateChangedEvent};
use crate::model::{Job, JobId, JobTaskMessage, Task, TaskId, TaskState, UserName};
use crate::processor::{TaskProcessorDiscovery, TaskResult};
use crate::repository::JobRepository;

pub struct TaskProcessingService {
    repository: Arc<dyn JobRepository>,
    processors: Arc<dyn TaskProcessorDiscovery>,
    events: Arc<dyn EventSink>,
}

impl TaskProcessingService {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        processors: Arc<dyn TaskProcessorDiscovery>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repository,
            processors,
            events,
        }
    }

    /// Runs one task and returns the successors that became eligible for
    /// dispatch. Blocked, already claimed or finished tasks are a no-op.
    pub async fn execute_task(&self, job_id: &JobId, task_id: &TaskId) -> Result<Vec<TaskId>> {
        let Some(task) = self.claim(job_id, task_id)? else {
            return Ok(Vec::new());
        };
        let result = self.run_processor(task).await;
        self.apply(job_id, task_id, result)
    }

    fn claim(&self, job_id: &JobId, task_id: &TaskId) -> Result<Option<Task>> {
        let mut claimed = None;
        self.repository.update(job_id, &mut |job| {
            claimed = None;
            self.settle(job);
            if !job.state().accepts_dispatch() {
                debug!(%job_id, %task_id, job_state = %job.state(), "job does not accept dispatch");
                return Ok(());
            }
            let state = job.get_task(task_id)?.state();
            if job.is_blocked(task_id) {
                debug!(%job_id, %task_id, "task is blocked by a pending predecessor");
                return Ok(());
            }
            if !state.is_dispatchable() {
                debug!(%job_id, %task_id, task_state = %state, "task is not dispatchable");
                return Ok(());
            }
            self.start(job)?;
            self.set_task_state(job, task_id, TaskState::Active)?;
            claimed = Some(job.get_task(task_id)?.clone());
            Ok(())
        })?;
        Ok(claimed)
    }

    async fn run_processor(&self, task: Task) -> TaskResult {
        let Some(processor) = self.processors.resolve(&task) else {
            // Fork and join markers carry no work of their own.
            debug!(task_id = %task.task_id(), "no processor, completing structural task");
            return TaskResult::completed(Vec::new());
        };
        let task_id = task.task_id().clone();
        let handle = tokio::spawn(async move { processor.execute(&task).await });
        match handle.await {
            Ok(Ok(result)) if result.state.is_reportable() => result,
            Ok(Ok(result)) => processor_failed(
                &task_id,
                format!("processor reported unsupported state {}", result.state),
            ),
            Ok(Err(e)) => processor_failed(&task_id, format!("{e:#}")),
            Err(e) => processor_failed(&task_id, format!("processor aborted: {e}")),
        }
    }

    fn apply(&self, job_id: &JobId, task_id: &TaskId, result: TaskResult) -> Result<Vec<TaskId>> {
        let mut successors = Vec::new();
        self.repository.update(job_id, &mut |job| {
            successors.clear();
            let current = job.get_task(task_id)?.state();
            if current != TaskState::Active {
                warn!(%job_id, %task_id, task_state = %current, outcome = %result.state,
                      "task changed while processing, dropping outcome");
                return Ok(());
            }
            successors = self.update_task(job, task_id, result.state, result.messages.clone())?;
            Ok(())
        })?;
        Ok(successors)
    }

    /// Applies a new task state and propagates it to the job. Returns the
    /// successors to dispatch, which is empty unless the task completed and
    /// is not held back for canary confirmation.
    pub fn update_task(
        &self,
        job: &mut Job,
        task_id: &TaskId,
        new_state: TaskState,
        messages: Vec<JobTaskMessage>,
    ) -> Result<Vec<TaskId>> {
        self.settle(job);
        let task = job.get_task_mut(task_id)?;
        for message in messages {
            task.append(message);
        }
        let canary = task.is_canary();
        let suspended = task.is_suspended();

        if job.state().is_terminal() {
            // The outcome is recorded, the finished job stays as it is. A
            // canary still waits for confirmation should the job be resumed.
            let recorded = if new_state == TaskState::Completed && canary && !suspended {
                TaskState::Confirm
            } else {
                new_state
            };
            self.set_task_state(job, task_id, recorded)?;
            return Ok(Vec::new());
        }

        if new_state.is_failed() {
            self.set_task_state(job, task_id, new_state)?;
            job.failed();
            info!(job_id = %job.job_id(), %task_id, task_state = %new_state, "task failed, job failed");
            return Ok(Vec::new());
        }

        if new_state == TaskState::Completed && canary && !suspended {
            self.set_task_state(job, task_id, TaskState::Confirm)?;
            job.await_confirmation();
            info!(job_id = %job.job_id(), %task_id, "canary task completed, awaiting confirmation");
            return Ok(Vec::new());
        }

        self.set_task_state(job, task_id, new_state)?;
        if new_state != TaskState::Completed {
            return Ok(Vec::new());
        }

        let successors = job.get_task(task_id)?.successor_ids();
        for successor in &successors {
            if let Some(previous) = job.refresh_blocked(successor) {
                self.record_move(job, successor, previous)?;
            }
        }
        if job.completed() {
            info!(job_id = %job.job_id(), "all tasks completed, job completed");
        }
        Ok(successors)
    }

    /// Externally reported task outcome, e.g. the completion of an
    /// asynchronous remote operation.
    pub fn update_task_state(
        &self,
        job_id: &JobId,
        task_id: &TaskId,
        new_state: TaskState,
        user_name: Option<UserName>,
    ) -> Result<Vec<TaskId>> {
        if !new_state.is_reportable() {
            return Err(JobError::InvalidTaskState(new_state));
        }
        let mut successors = Vec::new();
        self.repository.update(job_id, &mut |job| {
            let task = job.get_task(task_id)?;
            if task.is_succeeded() {
                return Err(JobError::CannotModifyCompletedTask(task_id.clone()));
            }
            self.settle(job);
            self.start(job)?;
            let mut message = JobTaskMessage::new(
                ReasonCode::JOB0202I_TASK_STATE_UPDATED,
                format!("Task state reported as {new_state}."),
            );
            if let Some(user_name) = &user_name {
                message = message.by(user_name.clone());
            }
            successors = self.update_task(job, task_id, new_state, vec![message])?;
            Ok(())
        })?;
        Ok(successors)
    }

    /// Confirms all canary tasks awaiting confirmation and returns their
    /// successors for dispatch. The canary flag is kept.
    pub fn confirm(&self, job_id: &JobId, user_name: Option<UserName>) -> Result<Vec<TaskId>> {
        let mut successors = Vec::new();
        self.repository.update(job_id, &mut |job| {
            successors.clear();
            self.settle(job);
            for task_id in job.confirm()? {
                self.publish(job.job_id(), &task_id, TaskState::Confirm, TaskState::Suspended);
                let mut message = JobTaskMessage::new(
                    ReasonCode::JOB0103I_JOB_CONFIRMED,
                    "Canary task confirmed.",
                );
                if let Some(user_name) = &user_name {
                    message = message.by(user_name.clone());
                }
                successors.extend(self.update_task(
                    job,
                    &task_id,
                    TaskState::Completed,
                    vec![message],
                )?);
            }
            Ok(())
        })?;
        successors.sort();
        successors.dedup();
        info!(reason = %ReasonCode::JOB0103I_JOB_CONFIRMED, %job_id, successors = successors.len(), "job confirmed");
        Ok(successors)
    }

    pub fn cancel(&self, job_id: &JobId) -> Result<()> {
        let mut changed = false;
        self.repository.update(job_id, &mut |job| {
            self.settle(job);
            changed = job.cancel()?;
            Ok(())
        })?;
        if changed {
            info!(reason = %ReasonCode::JOB0104I_JOB_CANCELLED, %job_id, "job cancelled");
        }
        Ok(())
    }

    /// Resumes a failed or cancelled job and returns the tasks to dispatch.
    pub fn resume(&self, job_id: &JobId) -> Result<Vec<TaskId>> {
        let mut ready = Vec::new();
        self.repository.update(job_id, &mut |job| {
            self.settle(job);
            let reset: Vec<(TaskId, TaskState)> = job
                .tasks()
                .filter(|t| t.is_failed())
                .map(|t| (t.task_id().clone(), t.state()))
                .collect();
            ready = job.resume()?;
            for (task_id, previous) in reset {
                let task = job.get_task_mut(&task_id)?;
                let state = task.state();
                task.append(JobTaskMessage::new(
                    ReasonCode::JOB0105I_JOB_RESUMED,
                    format!("Task reset from {previous} to {state} on job resume."),
                ));
                self.publish(job.job_id(), &task_id, previous, state);
            }
            Ok(())
        })?;
        info!(reason = %ReasonCode::JOB0105I_JOB_RESUMED, %job_id, ready = ready.len(), "job resumed");
        Ok(ready)
    }

    /// Starts a `READY` job; tasks it blocks are journaled and published.
    fn start(&self, job: &mut Job) -> Result<()> {
        let Some(moved) = job.activate() else {
            return Ok(());
        };
        info!(job_id = %job.job_id(), job_name = %job.job_name, "job started");
        for (task_id, previous) in moved {
            self.record_move(job, &task_id, previous)?;
        }
        Ok(())
    }

    /// A job left running with failed tasks, e.g. after a bulk sweep, fails
    /// on its next update.
    fn settle(&self, job: &mut Job) {
        if job.settle_failures() {
            warn!(job_id = %job.job_id(), "job holds failed tasks, job failed");
        }
    }

    /// Sets the task state, journals the change and publishes the event.
    fn set_task_state(&self, job: &mut Job, task_id: &TaskId, state: TaskState) -> Result<()> {
        let job_id = job.job_id().clone();
        let task = job.get_task_mut(task_id)?;
        let previous = task.state();
        task.set_state(state);
        if previous != state {
            journal_change(task, previous, state);
        }
        self.publish(&job_id, task_id, previous, state);
        Ok(())
    }

    /// Journals and publishes a `READY`/`BLOCKED` move the job made itself.
    fn record_move(&self, job: &mut Job, task_id: &TaskId, previous: TaskState) -> Result<()> {
        let job_id = job.job_id().clone();
        let task = job.get_task_mut(task_id)?;
        let state = task.state();
        journal_change(task, previous, state);
        self.publish(&job_id, task_id, previous, state);
        Ok(())
    }

    fn publish(&self, job_id: &JobId, task_id: &TaskId, previous: TaskState, state: TaskState) {
        self.events.publish(TaskStateChangedEvent::new(
            job_id.clone(),
            task_id.clone(),
            previous,
            state,
        ));
    }
}

fn journal_change(task: &mut Task, previous: TaskState, state: TaskState) {
    task.append(JobTaskMessage::new(
        ReasonCode::JOB0202I_TASK_STATE_UPDATED,
        format!("Task state changed from {previous} to {state}."),
    ));
}

fn processor_failed(task_id: &TaskId, detail: String) -> TaskResult {
    warn!(reason = %ReasonCode::JOB0300E_TASK_PROCESSOR_CALL_FAILED, %task_id, "{detail}");
    TaskResult::failed(vec![JobTaskMessage::new(
        ReasonCode::JOB0300E_TASK_PROCESSOR_CALL_FAILED,
        format!("Task processor call failed: {detail}"),
    )])
}
