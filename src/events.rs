//! Task state change notifications.
//!
//! Events are published synchronously from inside the repository update that
//! persisted the change, so observers see them before the triggering call
//! returns and in causal order per task.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::model::{JobId, TaskId, TaskState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStateChangedEvent {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub previous: TaskState,
    pub state: TaskState,
    pub date_created: DateTime<Utc>,
}

impl TaskStateChangedEvent {
    pub fn new(job_id: JobId, task_id: TaskId, previous: TaskState, state: TaskState) -> Self {
        Self {
            job_id,
            task_id,
            previous,
            state,
            date_created: Utc::now(),
        }
    }
}

/// Receives every task state change. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: TaskStateChangedEvent);
}

/// Fans events out to any number of subscribers over a tokio broadcast
/// channel. Publishing without subscribers drops the event.
pub struct BroadcastEventSink {
    sender: broadcast::Sender<TaskStateChangedEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskStateChangedEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: TaskStateChangedEvent) {
        trace!(job_id = %event.job_id, task_id = %event.task_id, state = %event.state, "publishing task event");
        // An error only means nobody is listening.
        let _ = self.sender.send(event);
    }
}

/// Keeps every published event in memory.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<TaskStateChangedEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskStateChangedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: TaskStateChangedEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
