//! Forced termination of tasks that never reported back.
//!
//! The periodic sweep is a bulk conditional update in the repository: cheap,
//! silent, and without job-state side effects. Expiring a single task goes
//! through the engine and raises the full notification protocol.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::TaskProcessingService;
use crate::error::{JobError, ReasonCode, Result};
use crate::model::{JobId, JobTaskMessage, TaskId, TaskState};
use crate::repository::JobRepository;

pub struct TaskExpiryManager {
    repository: Arc<dyn JobRepository>,
    engine: Arc<TaskProcessingService>,
    timeout: Duration,
}

impl TaskExpiryManager {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        engine: Arc<TaskProcessingService>,
        timeout: Duration,
    ) -> Self {
        Self {
            repository,
            engine,
            timeout,
        }
    }

    /// Times out every pending task of a started job last modified before
    /// `cutoff`.
    pub fn expire_overdue_tasks(&self, cutoff: DateTime<Utc>) -> Result<Vec<(JobId, TaskId)>> {
        let expired = self.repository.mark_overdue_as_timeout(cutoff)?;
        for (job_id, task_id) in &expired {
            warn!(reason = %ReasonCode::JOB0207W_TASK_TIMED_OUT, %job_id, %task_id, "task timed out");
        }
        Ok(expired)
    }

    /// Sweep relative to `now` using the configured task timeout.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<(JobId, TaskId)>> {
        let timeout = chrono::Duration::from_std(self.timeout)
            .map_err(|e| JobError::Config(format!("task timeout out of range: {e}")))?;
        self.expire_overdue_tasks(now - timeout)
    }

    /// Times out one pending task and fails its job. Returns `false` if the
    /// task had already finished.
    pub fn expire(&self, job_id: &JobId, task_id: &TaskId) -> Result<bool> {
        let mut expired = false;
        self.repository.update(job_id, &mut |job| {
            let state = job.get_task(task_id)?.state();
            expired = state.is_pending();
            if !expired {
                return Ok(());
            }
            let message = JobTaskMessage::new(
                ReasonCode::JOB0207W_TASK_TIMED_OUT,
                format!("Task expired in state {state}."),
            );
            self.engine
                .update_task(job, task_id, TaskState::Timeout, vec![message])?;
            Ok(())
        })?;
        if expired {
            warn!(reason = %ReasonCode::JOB0207W_TASK_TIMED_OUT, %job_id, %task_id, "task expired");
        }
        Ok(expired)
    }
}

/// Background task running [`TaskExpiryManager::sweep`] on a fixed
/// interval until [`ExpirySweeper::shutdown`] is called.
pub struct ExpirySweeper {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    pub fn spawn(manager: Arc<TaskExpiryManager>, interval: Duration) -> Self {
        let (shutdown, mut stop) = oneshot::channel();
        let handle = tokio::spawn(async move {
            info!(reason = %ReasonCode::JOB0001I_EXPIRY_SWEEPER_STARTED, interval_secs = interval.as_secs(), "expiry sweeper started");
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.sweep(Utc::now()) {
                            error!(reason = %e.reason(), "expiry sweep failed: {e}");
                        }
                    }
                }
            }
            info!(reason = %ReasonCode::JOB0002I_EXPIRY_SWEEPER_STOPPED, "expiry sweeper stopped");
        });
        Self { shutdown, handle }
    }

    /// Stops the sweeper and waits for the running sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            error!("expiry sweeper terminated abnormally: {e}");
        }
    }
}
