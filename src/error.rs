use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{JobId, JobState, Severity, TaskId, TaskState, ValidationError};

/// Catalogue of reason codes attached to journal entries and errors.
///
/// The letter after the number encodes the severity: `I` info, `W` warning,
/// `E` error.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    JOB0001I_EXPIRY_SWEEPER_STARTED,
    JOB0002I_EXPIRY_SWEEPER_STOPPED,
    JOB0100E_JOB_NOT_FOUND,
    JOB0101I_JOB_SETTINGS_UPDATED,
    JOB0102E_JOB_SETTINGS_IMMUTABLE,
    JOB0103I_JOB_CONFIRMED,
    JOB0104I_JOB_CANCELLED,
    JOB0105I_JOB_RESUMED,
    JOB0106E_CANNOT_CANCEL_COMPLETED_JOB,
    JOB0107I_JOB_STORED,
    JOB0108I_JOB_REMOVED,
    JOB0110E_CANNOT_RESUME_COMPLETED_JOB,
    JOB0111E_JOB_NOT_REMOVABLE,
    JOB0112E_JOB_NOT_CONFIRMABLE,
    JOB0113E_JOB_NOT_RESUMABLE,
    JOB0114E_CYCLIC_TASK_GRAPH,
    JOB0115E_INVALID_JOB_SUBMISSION,
    JOB0200E_TASK_NOT_FOUND,
    JOB0201E_CANNOT_MODIFY_COMPLETED_TASK,
    JOB0202I_TASK_STATE_UPDATED,
    JOB0203E_TASK_OWNED_BY_OTHER_JOB,
    JOB0204E_CANNOT_MODIFY_TASK_OF_RUNNING_JOB,
    JOB0206I_TASK_PARAMETER_UPDATED,
    JOB0207W_TASK_TIMED_OUT,
    JOB0208E_INVALID_TASK_STATE,
    JOB0300E_TASK_PROCESSOR_CALL_FAILED,
    JOB1000I_REST_API_CALL_SUCCEEDED,
    JOB1001E_REST_API_CALL_REJECTED,
    JOB1002E_REST_API_CALL_FAILED,
    JOB9000E_INVALID_VALUE,
    JOB9001E_STORAGE_FAILURE,
    JOB9002E_CONFIGURATION_ERROR,
}

impl ReasonCode {
    pub fn code(self) -> &'static str {
        use ReasonCode::*;
        match self {
            JOB0001I_EXPIRY_SWEEPER_STARTED => "JOB0001I_EXPIRY_SWEEPER_STARTED",
            JOB0002I_EXPIRY_SWEEPER_STOPPED => "JOB0002I_EXPIRY_SWEEPER_STOPPED",
            JOB0100E_JOB_NOT_FOUND => "JOB0100E_JOB_NOT_FOUND",
            JOB0101I_JOB_SETTINGS_UPDATED => "JOB0101I_JOB_SETTINGS_UPDATED",
            JOB0102E_JOB_SETTINGS_IMMUTABLE => "JOB0102E_JOB_SETTINGS_IMMUTABLE",
            JOB0103I_JOB_CONFIRMED => "JOB0103I_JOB_CONFIRMED",
            JOB0104I_JOB_CANCELLED => "JOB0104I_JOB_CANCELLED",
            JOB0105I_JOB_RESUMED => "JOB0105I_JOB_RESUMED",
            JOB0106E_CANNOT_CANCEL_COMPLETED_JOB => "JOB0106E_CANNOT_CANCEL_COMPLETED_JOB",
            JOB0107I_JOB_STORED => "JOB0107I_JOB_STORED",
            JOB0108I_JOB_REMOVED => "JOB0108I_JOB_REMOVED",
            JOB0110E_CANNOT_RESUME_COMPLETED_JOB => "JOB0110E_CANNOT_RESUME_COMPLETED_JOB",
            JOB0111E_JOB_NOT_REMOVABLE => "JOB0111E_JOB_NOT_REMOVABLE",
            JOB0112E_JOB_NOT_CONFIRMABLE => "JOB0112E_JOB_NOT_CONFIRMABLE",
            JOB0113E_JOB_NOT_RESUMABLE => "JOB0113E_JOB_NOT_RESUMABLE",
            JOB0114E_CYCLIC_TASK_GRAPH => "JOB0114E_CYCLIC_TASK_GRAPH",
            JOB0115E_INVALID_JOB_SUBMISSION => "JOB0115E_INVALID_JOB_SUBMISSION",
            JOB0200E_TASK_NOT_FOUND => "JOB0200E_TASK_NOT_FOUND",
            JOB0201E_CANNOT_MODIFY_COMPLETED_TASK => "JOB0201E_CANNOT_MODIFY_COMPLETED_TASK",
            JOB0202I_TASK_STATE_UPDATED => "JOB0202I_TASK_STATE_UPDATED",
            JOB0203E_TASK_OWNED_BY_OTHER_JOB => "JOB0203E_TASK_OWNED_BY_OTHER_JOB",
            JOB0204E_CANNOT_MODIFY_TASK_OF_RUNNING_JOB => {
                "JOB0204E_CANNOT_MODIFY_TASK_OF_RUNNING_JOB"
            }
            JOB0206I_TASK_PARAMETER_UPDATED => "JOB0206I_TASK_PARAMETER_UPDATED",
            JOB0207W_TASK_TIMED_OUT => "JOB0207W_TASK_TIMED_OUT",
            JOB0208E_INVALID_TASK_STATE => "JOB0208E_INVALID_TASK_STATE",
            JOB0300E_TASK_PROCESSOR_CALL_FAILED => "JOB0300E_TASK_PROCESSOR_CALL_FAILED",
            JOB1000I_REST_API_CALL_SUCCEEDED => "JOB1000I_REST_API_CALL_SUCCEEDED",
            JOB1001E_REST_API_CALL_REJECTED => "JOB1001E_REST_API_CALL_REJECTED",
            JOB1002E_REST_API_CALL_FAILED => "JOB1002E_REST_API_CALL_FAILED",
            JOB9000E_INVALID_VALUE => "JOB9000E_INVALID_VALUE",
            JOB9001E_STORAGE_FAILURE => "JOB9001E_STORAGE_FAILURE",
            JOB9002E_CONFIGURATION_ERROR => "JOB9002E_CONFIGURATION_ERROR",
        }
    }

    /// Severity encoded by the letter following the numeric part.
    pub fn severity(self) -> Severity {
        match self.code().as_bytes().get(7) {
            Some(b'E') => Severity::Error,
            Some(b'W') => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {job_id} is {state} and can no longer be edited")]
    JobSettingsImmutable { job_id: JobId, state: JobState },

    #[error("job {0} is completed and cannot be cancelled")]
    CannotCancelCompletedJob(JobId),

    #[error("job {0} is completed and cannot be resumed")]
    CannotResumeCompletedJob(JobId),

    #[error("job {job_id} is {state} and cannot be resumed")]
    JobNotResumable { job_id: JobId, state: JobState },

    #[error("job {job_id} is {state} and does not await confirmation")]
    JobNotConfirmable { job_id: JobId, state: JobState },

    #[error("job {job_id} is {state} and cannot be removed")]
    JobNotRemovable { job_id: JobId, state: JobState },

    #[error("task graph contains a cycle through task {0}")]
    CyclicTaskGraph(TaskId),

    #[error("invalid job submission: {0}")]
    InvalidSubmission(String),

    #[error("task {task_id} not found in job {job_id}")]
    TaskNotFound { job_id: JobId, task_id: TaskId },

    #[error("task {0} is completed and cannot be modified")]
    CannotModifyCompletedTask(TaskId),

    #[error("task {task_id} is owned by job {owner}, not by job {job_id}")]
    TaskOwnedByOtherJob {
        job_id: JobId,
        task_id: TaskId,
        owner: JobId,
    },

    #[error("task {task_id} belongs to running job {job_id}")]
    CannotModifyTaskOfRunningJob { job_id: JobId, task_id: TaskId },

    #[error("task state {0} cannot be reported for a task")]
    InvalidTaskState(TaskState),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl JobError {
    /// Reason code reported to callers for this error.
    pub fn reason(&self) -> ReasonCode {
        use ReasonCode::*;
        match self {
            JobError::JobNotFound(_) => JOB0100E_JOB_NOT_FOUND,
            JobError::JobSettingsImmutable { .. } => JOB0102E_JOB_SETTINGS_IMMUTABLE,
            JobError::CannotCancelCompletedJob(_) => JOB0106E_CANNOT_CANCEL_COMPLETED_JOB,
            JobError::CannotResumeCompletedJob(_) => JOB0110E_CANNOT_RESUME_COMPLETED_JOB,
            JobError::JobNotResumable { .. } => JOB0113E_JOB_NOT_RESUMABLE,
            JobError::JobNotConfirmable { .. } => JOB0112E_JOB_NOT_CONFIRMABLE,
            JobError::JobNotRemovable { .. } => JOB0111E_JOB_NOT_REMOVABLE,
            JobError::CyclicTaskGraph(_) => JOB0114E_CYCLIC_TASK_GRAPH,
            JobError::InvalidSubmission(_) => JOB0115E_INVALID_JOB_SUBMISSION,
            JobError::TaskNotFound { .. } => JOB0200E_TASK_NOT_FOUND,
            JobError::CannotModifyCompletedTask(_) => JOB0201E_CANNOT_MODIFY_COMPLETED_TASK,
            JobError::TaskOwnedByOtherJob { .. } => JOB0203E_TASK_OWNED_BY_OTHER_JOB,
            JobError::CannotModifyTaskOfRunningJob { .. } => {
                JOB0204E_CANNOT_MODIFY_TASK_OF_RUNNING_JOB
            }
            JobError::InvalidTaskState(_) => JOB0208E_INVALID_TASK_STATE,
            JobError::Validation(_) => JOB9000E_INVALID_VALUE,
            JobError::Storage(_) => JOB9001E_STORAGE_FAILURE,
            JobError::Config(_) | JobError::Io(_) | JobError::Json(_) | JobError::Toml(_) => {
                JOB9002E_CONFIGURATION_ERROR
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_follows_code_letter() {
        assert_eq!(ReasonCode::JOB0103I_JOB_CONFIRMED.severity(), Severity::Info);
        assert_eq!(ReasonCode::JOB0207W_TASK_TIMED_OUT.severity(), Severity::Warning);
        assert_eq!(
            ReasonCode::JOB1001E_REST_API_CALL_REJECTED.severity(),
            Severity::Error
        );
    }

    #[test]
    fn reason_code_display_is_full_code() {
        assert_eq!(
            ReasonCode::JOB0100E_JOB_NOT_FOUND.to_string(),
            "JOB0100E_JOB_NOT_FOUND"
        );
    }

    #[test]
    fn errors_map_to_reason_codes() {
        let job_id = JobId::generate();
        let err = JobError::CannotCancelCompletedJob(job_id.clone());
        assert_eq!(err.reason(), ReasonCode::JOB0106E_CANNOT_CANCEL_COMPLETED_JOB);

        let err = JobError::JobSettingsImmutable {
            job_id,
            state: JobState::Active,
        };
        assert_eq!(err.reason(), ReasonCode::JOB0102E_JOB_SETTINGS_IMMUTABLE);
        assert!(err.to_string().contains("ACTIVE"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<JobError>();
    }
}
