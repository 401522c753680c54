use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::JobsConfig;
use crate::editor::JobEditor;
use crate::engine::TaskProcessingService;
use crate::error::{JobError, ReasonCode, Result};
use crate::events::{BroadcastEventSink, TaskStateChangedEvent};
use crate::expiry::{ExpirySweeper, TaskExpiryManager};
use crate::model::{
    ElementAlias, ElementId, ElementName, ElementRole, GroupId, GroupName, Job, JobApplication,
    JobId, JobName, JobState, JobTaskMessage, JobType, Task, TaskId, TaskName, TaskState,
    TaskType, UserName,
};
use crate::processor::{
    InventoryClient, ProcessorRegistry, RestApiTaskProcessor, StaticInventory,
    TaskProcessorDiscovery,
};
use crate::repository::{InMemoryJobRepository, JobRepository};
use crate::submission::JobSubmission;

/// Task type served by the REST processor.
pub const REST_TASK_TYPE: &str = "rest";

/// Read view of one task together with the job it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub job_id: JobId,
    pub job_name: JobName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_application: Option<JobApplication>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<GroupName>,
    pub task_id: TaskId,
    pub task_name: TaskName,
    pub task_type: TaskType,
    pub task_state: TaskState,
    pub canary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<ElementId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_name: Option<ElementName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_alias: Option<ElementAlias>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_role: Option<ElementRole>,
    pub parameter: serde_json::Value,
    pub date_modified: DateTime<Utc>,
    pub messages: Vec<JobTaskMessage>,
}

impl TaskInfo {
    pub fn new(job: &Job, task: &Task) -> Self {
        let element = task.element();
        Self {
            job_id: job.job_id().clone(),
            job_name: job.job_name.clone(),
            job_type: job.job_type.clone(),
            job_application: job.job_application.clone(),
            group_id: job.group_id.clone(),
            group_name: job.group_name.clone(),
            task_id: task.task_id().clone(),
            task_name: task.task_name().clone(),
            task_type: task.task_type().clone(),
            task_state: task.state(),
            canary: task.is_canary(),
            element_id: element.element_id.clone(),
            element_name: element.element_name.clone(),
            element_alias: element.element_alias.clone(),
            element_role: element.element_role.clone(),
            parameter: task.parameter().clone(),
            date_modified: task.date_modified(),
            messages: task.messages().to_vec(),
        }
    }
}

type Dispatches = JoinSet<(TaskId, Result<Vec<TaskId>>)>;

/// Process-wide context: owns the repository, engine, expiry manager and
/// event channel, and exposes the job and task operations of the API layer.
/// Created once at startup; [`JobOrchestrator::shutdown`] stops background
/// work.
pub struct JobOrchestrator {
    repository: Arc<dyn JobRepository>,
    engine: Arc<TaskProcessingService>,
    expiry: Arc<TaskExpiryManager>,
    editor: JobEditor,
    events: Arc<BroadcastEventSink>,
    sweeper: Option<ExpirySweeper>,
}

impl JobOrchestrator {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        processors: Arc<dyn TaskProcessorDiscovery>,
        events: Arc<BroadcastEventSink>,
        config: &JobsConfig,
    ) -> Self {
        let engine = Arc::new(TaskProcessingService::new(
            repository.clone(),
            processors,
            events.clone(),
        ));
        let expiry = Arc::new(TaskExpiryManager::new(
            repository.clone(),
            engine.clone(),
            config.task_timeout(),
        ));
        Self {
            repository,
            engine,
            expiry,
            editor: JobEditor::new(),
            events,
            sweeper: None,
        }
    }

    /// In-memory orchestrator with the REST processor registered for
    /// `rest` tasks.
    pub fn from_config(config: &JobsConfig) -> Result<Self> {
        let inventory: Option<Arc<dyn InventoryClient>> = if config.elements.is_empty() {
            None
        } else {
            Some(Arc::new(StaticInventory::new(config.elements.clone())))
        };
        let rest = RestApiTaskProcessor::new(
            inventory,
            config.default_endpoint.clone(),
            config.connect_timeout(),
            config.request_timeout(),
        )?;
        let registry = ProcessorRegistry::new().register(TaskType::new(REST_TASK_TYPE)?, Arc::new(rest));
        Ok(Self::new(
            Arc::new(InMemoryJobRepository::new()),
            Arc::new(registry),
            Arc::new(BroadcastEventSink::new(config.event_buffer)),
            config,
        ))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskStateChangedEvent> {
        self.events.subscribe()
    }

    /// Starts the periodic expiry sweep. A running sweeper is kept.
    pub fn start_sweeper(&mut self, config: &JobsConfig) {
        if self.sweeper.is_none() {
            self.sweeper = Some(ExpirySweeper::spawn(self.expiry.clone(), config.sweep_interval()));
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown().await;
        }
        debug!("orchestrator shut down");
    }

    // --- jobs ---

    pub fn submit_job(&self, submission: &JobSubmission, user_name: Option<UserName>) -> Result<JobId> {
        let job = self.editor.create_job(submission, user_name)?;
        let job_id = job.job_id().clone();
        self.repository.create(job)?;
        info!(reason = %ReasonCode::JOB0107I_JOB_STORED, %job_id, "job stored");
        Ok(job_id)
    }

    pub fn update_job(&self, job_id: &JobId, submission: &JobSubmission) -> Result<()> {
        self.repository
            .update(job_id, &mut |job| self.editor.update_job(job, submission))?;
        info!(reason = %ReasonCode::JOB0101I_JOB_SETTINGS_UPDATED, %job_id, "job updated");
        Ok(())
    }

    pub fn get_job(&self, job_id: &JobId) -> Result<Job> {
        self.repository.find(job_id)
    }

    /// Removes a job that is not running.
    pub fn remove_job(&self, job_id: &JobId) -> Result<Job> {
        let removed = self.repository.remove_if(job_id, &mut |job| {
            let state = job.settled_state();
            if state.is_running() {
                return Err(JobError::JobNotRemovable {
                    job_id: job_id.clone(),
                    state,
                });
            }
            Ok(())
        })?;
        info!(reason = %ReasonCode::JOB0108I_JOB_REMOVED, %job_id, "job removed");
        Ok(removed)
    }

    pub fn confirm(&self, job_id: &JobId, user_name: Option<UserName>) -> Result<Vec<TaskId>> {
        self.engine.confirm(job_id, user_name)
    }

    pub fn cancel(&self, job_id: &JobId) -> Result<()> {
        self.engine.cancel(job_id)
    }

    pub fn resume(&self, job_id: &JobId) -> Result<Vec<TaskId>> {
        self.engine.resume(job_id)
    }

    // --- tasks ---

    pub fn get_task(&self, job_id: &JobId, task_id: &TaskId) -> Result<TaskInfo> {
        let job = self.repository.find(job_id)?;
        let task = self.owned(job.get_task(task_id))?;
        Ok(TaskInfo::new(&job, task))
    }

    pub async fn execute_task(&self, job_id: &JobId, task_id: &TaskId) -> Result<Vec<TaskId>> {
        self.owned(self.engine.execute_task(job_id, task_id).await)
    }

    pub fn update_task_state(
        &self,
        job_id: &JobId,
        task_id: &TaskId,
        state: TaskState,
        user_name: Option<UserName>,
    ) -> Result<Vec<TaskId>> {
        self.owned(self.engine.update_task_state(job_id, task_id, state, user_name))
    }

    /// Replaces the parameter payload of a task of a job that is not
    /// running. The comment is kept in the task journal.
    pub fn set_task_parameters(
        &self,
        job_id: &JobId,
        task_id: &TaskId,
        parameter: serde_json::Value,
        comment: &str,
        user_name: Option<UserName>,
    ) -> Result<()> {
        let result = self.repository.update(job_id, &mut |job| {
            job.settle_failures();
            if job.state().is_running() {
                return Err(JobError::CannotModifyTaskOfRunningJob {
                    job_id: job_id.clone(),
                    task_id: task_id.clone(),
                });
            }
            let task = job.get_task_mut(task_id)?;
            if task.is_succeeded() {
                return Err(JobError::CannotModifyCompletedTask(task_id.clone()));
            }
            task.set_parameter(parameter.clone());
            let mut message = JobTaskMessage::new(ReasonCode::JOB0206I_TASK_PARAMETER_UPDATED, comment);
            if let Some(user_name) = &user_name {
                message = message.by(user_name.clone());
            }
            task.append(message);
            Ok(())
        });
        self.owned(result)?;
        info!(reason = %ReasonCode::JOB0206I_TASK_PARAMETER_UPDATED, %job_id, %task_id, "task parameters updated");
        Ok(())
    }

    pub fn expire_task(&self, job_id: &JobId, task_id: &TaskId) -> Result<bool> {
        self.owned(self.expiry.expire(job_id, task_id))
    }

    /// One expiry sweep relative to `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<(JobId, TaskId)>> {
        self.expiry.sweep(now)
    }

    /// Sweep with an explicit cutoff.
    pub fn expire_overdue_tasks(&self, cutoff: DateTime<Utc>) -> Result<Vec<(JobId, TaskId)>> {
        self.expiry.expire_overdue_tasks(cutoff)
    }

    /// A task missing from the named job may exist in another one.
    fn owned<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Err(JobError::TaskNotFound { job_id, task_id }) => match self.repository.owner_of(&task_id)? {
                Some(owner) if owner != job_id => Err(JobError::TaskOwnedByOtherJob {
                    job_id,
                    task_id,
                    owner,
                }),
                _ => Err(JobError::TaskNotFound { job_id, task_id }),
            },
            other => other,
        }
    }

    // --- driver ---

    /// Drives a job until nothing is left to dispatch: the start task of a
    /// new job (or every dispatchable task of a resumed one) and then every
    /// successor, concurrently. With `auto_confirm` a job stalled on a canary
    /// is confirmed and continues. Returns the final job.
    pub async fn run_job(&self, job_id: &JobId, auto_confirm: bool) -> Result<Job> {
        let job = self.repository.find(job_id)?;
        let initial = if job.is_ready() {
            match job.start_task() {
                Some(start) => vec![start.clone()],
                None => {
                    return Err(JobError::InvalidSubmission(format!(
                        "job {job_id} has no start task"
                    )));
                }
            }
        } else {
            job.dispatchable_tasks()
        };
        info!(%job_id, job_name = %job.job_name, "running job");

        let mut in_flight = Dispatches::new();
        for task_id in initial {
            self.dispatch(&mut in_flight, job_id, task_id);
        }

        loop {
            while let Some(joined) = in_flight.join_next().await {
                let (task_id, result) =
                    joined.map_err(|e| JobError::Storage(format!("task dispatch aborted: {e}")))?;
                let successors = result?;
                debug!(%job_id, %task_id, successors = successors.len(), "task dispatch finished");
                for next in successors {
                    self.dispatch(&mut in_flight, job_id, next);
                }
            }

            let state = self.repository.find(job_id)?.state();
            if !(auto_confirm && state == JobState::Confirm) {
                break;
            }
            for next in self.engine.confirm(job_id, None)? {
                self.dispatch(&mut in_flight, job_id, next);
            }
        }

        let job = self.repository.find(job_id)?;
        info!(%job_id, job_state = %job.state(), "job run finished");
        Ok(job)
    }

    fn dispatch(&self, in_flight: &mut Dispatches, job_id: &JobId, task_id: TaskId) {
        let engine = self.engine.clone();
        let job_id = job_id.clone();
        in_flight.spawn(async move {
            let result = engine.execute_task(&job_id, &task_id).await;
            (task_id, result)
        });
    }
}
