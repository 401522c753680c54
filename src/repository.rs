//! Persistence boundary of the engine.
//!
//! [`JobRepository::update`] is the engine's unit of atomicity: it reads a
//! job, applies a mutation and stores the result, holding exclusive write
//! access for the duration. A failed mutation leaves the stored job
//! untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{JobError, ReasonCode, Result};
use crate::model::{Job, JobId, JobTaskMessage, TaskId, TaskState, Transition};

pub trait JobRepository: Send + Sync {
    /// Stores a new job.
    fn create(&self, job: Job) -> Result<()>;

    /// Snapshot of the stored job.
    fn find(&self, job_id: &JobId) -> Result<Job>;

    /// Atomic read-modify-write of one job.
    fn update(&self, job_id: &JobId, apply: &mut dyn FnMut(&mut Job) -> Result<()>)
    -> Result<()>;

    /// Removes the job if `check` accepts it. The check sees the latest
    /// state and no update can interleave with the removal.
    fn remove_if(&self, job_id: &JobId, check: &mut dyn FnMut(&Job) -> Result<()>) -> Result<Job>;

    /// All transitions of a job.
    fn transitions(&self, job_id: &JobId) -> Result<Vec<Transition>>;

    /// Some job containing a task with this id, if any.
    fn owner_of(&self, task_id: &TaskId) -> Result<Option<JobId>>;

    /// Set-based conditional update: every task of a started job that is
    /// still pending and was last modified before `cutoff` becomes
    /// `TIMEOUT`. Returns the affected tasks. No events, no job state
    /// changes.
    fn mark_overdue_as_timeout(&self, cutoff: DateTime<Utc>) -> Result<Vec<(JobId, TaskId)>>;
}

/// Process-local repository. Each job sits behind its own lock, so
/// independent jobs never contend. A job lock may be held while taking the
/// index lock, never the other way round.
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<JobId, Arc<Mutex<Job>>>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self) -> Result<MutexGuard<'_, HashMap<JobId, Arc<Mutex<Job>>>>> {
        self.jobs
            .lock()
            .map_err(|_| JobError::Storage("job index lock poisoned".into()))
    }

    fn slot(&self, job_id: &JobId) -> Result<Arc<Mutex<Job>>> {
        self.index()?
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::JobNotFound(job_id.clone()))
    }

    fn all_slots(&self) -> Result<Vec<Arc<Mutex<Job>>>> {
        Ok(self.index()?.values().cloned().collect())
    }

    /// Whether `slot` is still the stored slot of the job, i.e. the job was
    /// not removed while the caller waited for its lock.
    fn is_indexed(&self, job_id: &JobId, slot: &Arc<Mutex<Job>>) -> Result<bool> {
        Ok(self
            .index()?
            .get(job_id)
            .is_some_and(|stored| Arc::ptr_eq(stored, slot)))
    }
}

fn lock_job(slot: &Mutex<Job>) -> Result<MutexGuard<'_, Job>> {
    slot.lock()
        .map_err(|_| JobError::Storage("job lock poisoned".into()))
}

impl JobRepository for InMemoryJobRepository {
    fn create(&self, job: Job) -> Result<()> {
        let mut index = self.index()?;
        if index.contains_key(job.job_id()) {
            return Err(JobError::Storage(format!(
                "job {} already exists",
                job.job_id()
            )));
        }
        index.insert(job.job_id().clone(), Arc::new(Mutex::new(job)));
        Ok(())
    }

    fn find(&self, job_id: &JobId) -> Result<Job> {
        let slot = self.slot(job_id)?;
        let job = lock_job(&slot)?;
        Ok(job.clone())
    }

    fn update(
        &self,
        job_id: &JobId,
        apply: &mut dyn FnMut(&mut Job) -> Result<()>,
    ) -> Result<()> {
        let slot = self.slot(job_id)?;
        let mut stored = lock_job(&slot)?;
        if !self.is_indexed(job_id, &slot)? {
            return Err(JobError::JobNotFound(job_id.clone()));
        }
        let mut working = stored.clone();
        apply(&mut working)?;
        *stored = working;
        Ok(())
    }

    fn remove_if(&self, job_id: &JobId, check: &mut dyn FnMut(&Job) -> Result<()>) -> Result<Job> {
        let slot = self.slot(job_id)?;
        let job = lock_job(&slot)?;
        check(&job)?;
        self.index()?
            .remove(job_id)
            .filter(|stored| Arc::ptr_eq(stored, &slot))
            .ok_or_else(|| JobError::JobNotFound(job_id.clone()))?;
        Ok(job.clone())
    }

    fn transitions(&self, job_id: &JobId) -> Result<Vec<Transition>> {
        let slot = self.slot(job_id)?;
        let job = lock_job(&slot)?;
        Ok(job.transitions())
    }

    fn owner_of(&self, task_id: &TaskId) -> Result<Option<JobId>> {
        for slot in self.all_slots()? {
            let job = lock_job(&slot)?;
            if job.contains_task(task_id) {
                return Ok(Some(job.job_id().clone()));
            }
        }
        Ok(None)
    }

    fn mark_overdue_as_timeout(&self, cutoff: DateTime<Utc>) -> Result<Vec<(JobId, TaskId)>> {
        let mut expired = Vec::new();
        for slot in self.all_slots()? {
            let mut job = lock_job(&slot)?;
            if job.is_ready() || !self.is_indexed(job.job_id(), &slot)? {
                continue;
            }
            let job_id = job.job_id().clone();
            for task in job.tasks_mut() {
                if task.state().is_pending() && task.date_modified() < cutoff {
                    let previous = task.state();
                    task.set_state(TaskState::Timeout);
                    task.append(JobTaskMessage::new(
                        ReasonCode::JOB0207W_TASK_TIMED_OUT,
                        format!("Task expired in state {previous}; no report before {cutoff}."),
                    ));
                    expired.push((job_id.clone(), task.task_id().clone()));
                }
            }
        }
        debug!(count = expired.len(), %cutoff, "marked overdue tasks as timed out");
        Ok(expired)
    }
}
