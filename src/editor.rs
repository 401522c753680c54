//! Creating jobs from submissions and reconciling resubmitted definitions.
//!
//! Reconciliation is a three-way diff applied separately to tasks (keyed by
//! task id) and transitions (keyed by the `(from, to)` pair): matching
//! entities are updated in place, unmatched persisted ones are removed and
//! unmatched submitted ones are added. Submission order is irrelevant and
//! resubmitting an unchanged definition changes nothing.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::{ReasonCode, Result};
use crate::model::{ElementBinding, Job, Task, TaskId, UserName};
use crate::submission::{JobSubmission, TaskSubmission, TransitionSubmission};

#[derive(Debug, Default, Clone, Copy)]
pub struct JobEditor;

impl JobEditor {
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `READY` job from a submission.
    pub fn create_job(&self, submission: &JobSubmission, user_name: Option<UserName>) -> Result<Job> {
        let mut job = Job::new(submission.job_name.clone());
        job.user_name = user_name;
        self.update_job(&mut job, submission)?;
        info!(job_id = %job.job_id(), job_name = %job.job_name, tasks = job.task_count(), "job created");
        Ok(job)
    }

    /// Reconciles a `READY` job with a resubmitted definition. The job is
    /// untouched if the job is not editable or the submission is invalid.
    pub fn update_job(&self, job: &mut Job, submission: &JobSubmission) -> Result<()> {
        job.ensure_editable()?;
        submission.validate()?;

        apply_settings(job, submission);
        reconcile_tasks(job, submission)?;
        if let Some(start) = submission.start_task_id() {
            job.set_start(start)?;
        }
        reconcile_transitions(job, &submission.transitions)?;
        Ok(())
    }
}

fn apply_settings(job: &mut Job, submission: &JobSubmission) {
    job.job_name = submission.job_name.clone();
    job.job_type = submission.job_type.clone();
    job.job_application = submission.job_application.clone();
    job.group_id = submission.group_id.clone();
    job.group_name = submission.group_name.clone();
    job.schedule = submission.schedule.clone();
    debug!(reason = %ReasonCode::JOB0101I_JOB_SETTINGS_UPDATED, job_id = %job.job_id(), "job settings applied");
}

fn reconcile_tasks(job: &mut Job, submission: &JobSubmission) -> Result<()> {
    let mut submitted: HashMap<TaskId, &TaskSubmission> = submission
        .tasks
        .iter()
        .map(|t| (t.task_id.clone(), t))
        .collect();

    let existing: Vec<TaskId> = job.tasks().map(|t| t.task_id().clone()).collect();
    let mut orphans = Vec::new();
    for task_id in existing {
        match submitted.remove(&task_id) {
            Some(update) => {
                let task = job.get_task_mut(&task_id)?;
                let changed = task.set_parameter(update.parameter.clone()) | task.set_canary(update.canary);
                if changed {
                    debug!(%task_id, "task updated");
                }
            }
            None => orphans.push(task_id),
        }
    }

    for new in submission.tasks.iter().filter(|t| submitted.contains_key(&t.task_id)) {
        let task = build_task(job, new);
        debug!(task_id = %new.task_id, "task added");
        job.add_task(task)?;
    }

    for task_id in orphans {
        debug!(%task_id, "task removed");
        job.remove_task(&task_id)?;
    }
    Ok(())
}

fn reconcile_transitions(job: &mut Job, transitions: &[TransitionSubmission]) -> Result<()> {
    let mut submitted: HashMap<(TaskId, TaskId), &TransitionSubmission> = transitions
        .iter()
        .map(|t| ((t.from.clone(), t.to.clone()), t))
        .collect();

    for existing in job.transitions() {
        let key = (existing.from.clone(), existing.to.clone());
        let source = job.get_task_mut(&existing.from)?;
        match submitted.remove(&key) {
            Some(update) => {
                if let Some(edge) = source.successor_mut(&existing.to) {
                    edge.name = update.name.clone();
                }
            }
            None => {
                source.remove_successor(&existing.to);
                debug!(from = %existing.from, to = %existing.to, "transition removed");
            }
        }
    }

    for new in transitions {
        if submitted.contains_key(&(new.from.clone(), new.to.clone())) {
            job.get_task_mut(&new.from)?
                .add_successor(new.to.clone(), new.name.clone());
            debug!(from = %new.from, to = %new.to, "transition added");
        }
    }
    Ok(())
}

/// New task bound to its element within the job's group.
fn build_task(job: &Job, submitted: &TaskSubmission) -> Task {
    let element = ElementBinding {
        element_id: submitted.element_id.clone(),
        element_name: submitted.element_name.clone(),
        element_alias: submitted.element_alias.clone(),
        element_role: submitted.element_role.clone(),
        group_id: job.group_id.clone(),
        group_name: job.group_name.clone(),
        group_type: None,
    };
    Task::new(
        submitted.task_id.clone(),
        submitted.task_name.clone(),
        submitted.task_type.clone(),
    )
    .with_element(element)
    .with_parameter(submitted.parameter.clone())
    .with_canary(submitted.canary)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::error::JobError;
    use crate::model::{ElementId, GroupId, JobName, TaskState};
    use crate::submission::testing::submission;

    fn tid(s: &str) -> TaskId {
        TaskId::new(s).unwrap()
    }

    fn edges(job: &Job) -> BTreeSet<(String, String, Option<String>)> {
        job.transitions()
            .into_iter()
            .map(|t| (t.from.to_string(), t.to.to_string(), t.name))
            .collect()
    }

    fn task_ids(job: &Job) -> BTreeSet<String> {
        job.tasks().map(|t| t.task_id().to_string()).collect()
    }

    #[test]
    fn creates_job_from_submission() {
        let mut s = submission(&["A", "B", "C"], &[("A", "B"), ("A", "C")]);
        s.group_id = Some(GroupId::new("pod-1").unwrap());
        s.tasks[1].element_id = Some(ElementId::new("leaf1").unwrap());
        s.tasks[1].canary = true;

        let job = JobEditor::new()
            .create_job(&s, Some(UserName::new("ops").unwrap()))
            .unwrap();

        assert!(job.is_ready());
        assert_eq!(job.task_count(), 3);
        assert_eq!(job.start_task(), Some(&tid("A")));
        assert_eq!(job.user_name.as_ref().unwrap().as_str(), "ops");
        assert_eq!(edges(&job).len(), 2);

        let b = job.task(&tid("B")).unwrap();
        assert!(b.is_canary());
        assert_eq!(b.state(), TaskState::Ready);
        assert_eq!(b.element().element_id.as_ref().unwrap().as_str(), "leaf1");
        assert_eq!(b.element().group_id.as_ref().unwrap().as_str(), "pod-1");
    }

    #[test]
    fn resubmitting_identical_definition_is_a_no_op() {
        let editor = JobEditor::new();
        let s = submission(&["A", "B"], &[("A", "B")]);
        let mut job = editor.create_job(&s, None).unwrap();
        let modified = job.task(&tid("A")).unwrap().date_modified();
        let before = edges(&job);

        editor.update_job(&mut job, &s).unwrap();

        assert_eq!(task_ids(&job), BTreeSet::from(["A".to_string(), "B".to_string()]));
        assert_eq!(edges(&job), before);
        assert_eq!(job.task(&tid("A")).unwrap().date_modified(), modified);
    }

    #[test]
    fn submission_order_does_not_matter() {
        let editor = JobEditor::new();
        let s = submission(&["A", "B", "C"], &[("A", "B"), ("B", "C")]);
        let mut job = editor.create_job(&s, None).unwrap();

        let mut shuffled = s.clone();
        shuffled.tasks.reverse();
        shuffled.transitions.reverse();
        shuffled.start_task_id = Some(tid("A"));
        editor.update_job(&mut job, &shuffled).unwrap();

        assert_eq!(task_ids(&job).len(), 3);
        assert_eq!(edges(&job), edges(&editor.create_job(&s, None).unwrap()));
        assert_eq!(job.start_task(), Some(&tid("A")));
    }

    #[test]
    fn diff_updates_inserts_and_deletes() {
        let editor = JobEditor::new();
        let mut job = editor
            .create_job(&submission(&["A", "B", "C"], &[("A", "B"), ("B", "C")]), None)
            .unwrap();

        let mut next = submission(&["A", "B", "D"], &[("A", "B"), ("A", "D")]);
        next.tasks[0].parameter = json!({"path": "/v2"});
        next.tasks[1].canary = true;
        next.transitions[0].name = Some("on-success".into());
        editor.update_job(&mut job, &next).unwrap();

        assert_eq!(
            task_ids(&job),
            BTreeSet::from(["A".to_string(), "B".to_string(), "D".to_string()])
        );
        assert_eq!(
            edges(&job),
            BTreeSet::from([
                ("A".to_string(), "B".to_string(), Some("on-success".to_string())),
                ("A".to_string(), "D".to_string(), Some("success".to_string())),
            ])
        );
        assert_eq!(job.task(&tid("A")).unwrap().parameter()["path"], "/v2");
        assert!(job.task(&tid("B")).unwrap().is_canary());
    }

    #[test]
    fn refreshes_job_settings() {
        let editor = JobEditor::new();
        let mut job = editor.create_job(&submission(&["A"], &[]), None).unwrap();
        let mut next = submission(&["A"], &[]);
        next.job_name = JobName::new("renamed").unwrap();
        next.group_id = Some(GroupId::new("pod-2").unwrap());
        editor.update_job(&mut job, &next).unwrap();
        assert_eq!(job.job_name.as_str(), "renamed");
        assert_eq!(job.group_id.as_ref().unwrap().as_str(), "pod-2");
    }

    #[test]
    fn started_job_is_immutable() {
        let editor = JobEditor::new();
        let s = submission(&["A", "B"], &[("A", "B")]);
        let mut job = editor.create_job(&s, None).unwrap();
        job.activate();

        let err = editor
            .update_job(&mut job, &submission(&["A"], &[]))
            .unwrap_err();
        assert!(matches!(err, JobError::JobSettingsImmutable { .. }));
        assert_eq!(job.task_count(), 2);
    }

    #[test]
    fn invalid_submission_leaves_job_untouched() {
        let editor = JobEditor::new();
        let mut job = editor
            .create_job(&submission(&["A", "B"], &[("A", "B")]), None)
            .unwrap();

        let cyclic = submission(&["A", "B", "C"], &[("A", "B"), ("B", "A")]);
        let err = editor.update_job(&mut job, &cyclic).unwrap_err();
        assert_eq!(err.reason(), ReasonCode::JOB0114E_CYCLIC_TASK_GRAPH);
        assert_eq!(task_ids(&job).len(), 2);
        assert_eq!(edges(&job).len(), 1);
    }
}
