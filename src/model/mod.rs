mod ids;
mod job;
mod state;
mod task;

pub use ids::{
    ElementAlias, ElementId, ElementName, ElementRole, GroupId, GroupName, GroupType,
    JobApplication, JobId, JobName, JobType, TaskId, TaskName, TaskType, UserName,
    ValidationError,
};
pub use job::{Job, JobSchedule};
pub use state::{JobState, Severity, TaskState};
pub use task::{ElementBinding, JobTaskMessage, Task, Transition};
