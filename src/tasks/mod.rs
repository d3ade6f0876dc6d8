//! Detect task status changes in the message flow and decide which ones the user wants to
//! hear about.
//!
//! The service repeats `task_status` frames (after a reconnect, or when several agents report
//! on the same task), so consumers cannot treat every frame as a change. [`TaskTracker`]
//! remembers the last status of every task and reports only real transitions.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use bitflags::bitflags;

use crate::Client;
use crate::types::{MessageType, TaskStatus, TaskStatusUpdate};
use crate::ws::Unsubscribe;

/// A task status transition.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskChange {
    /// First time this task was seen
    Created { task_id: String, status: TaskStatus },
    /// The task moved from one status to another
    StatusChanged {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

impl TaskChange {
    #[must_use]
    pub fn task_id(&self) -> &str {
        match self {
            Self::Created { task_id, .. } | Self::StatusChanged { task_id, .. } => task_id,
        }
    }

    /// The status the task is in after this change.
    #[must_use]
    pub fn status(&self) -> &TaskStatus {
        match self {
            Self::Created { status, .. } => status,
            Self::StatusChanged { to, .. } => to,
        }
    }
}

bitflags! {
    /// Which task changes should surface as user notifications.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NotificationPreferences: u8 {
        const CREATED = 1 << 0;
        const STARTED = 1 << 1;
        const COMPLETED = 1 << 2;
        const FAILED = 1 << 3;
        const CANCELLED = 1 << 4;
    }
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self::COMPLETED | Self::FAILED
    }
}

impl NotificationPreferences {
    /// Whether `change` is one of the selected kinds.
    #[must_use]
    pub fn should_notify(self, change: &TaskChange) -> bool {
        let wanted = match change {
            TaskChange::Created { .. } => Self::CREATED,
            TaskChange::StatusChanged { to, .. } => match to {
                TaskStatus::Running => Self::STARTED,
                TaskStatus::Completed => Self::COMPLETED,
                TaskStatus::Failed => Self::FAILED,
                TaskStatus::Cancelled => Self::CANCELLED,
                TaskStatus::Pending | TaskStatus::Unknown(_) => return false,
            },
        };
        self.contains(wanted)
    }
}

/// Last known status of every task seen so far.
#[derive(Debug, Default, Clone)]
pub struct TaskTracker {
    statuses: HashMap<String, TaskStatus>,
}

impl TaskTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `update`. Returns the change it represents, or `None` if the task already had
    /// this status.
    pub fn observe(&mut self, update: &TaskStatusUpdate) -> Option<TaskChange> {
        let previous = self
            .statuses
            .insert(update.task_id.clone(), update.status.clone());

        match previous {
            None => Some(TaskChange::Created {
                task_id: update.task_id.clone(),
                status: update.status.clone(),
            }),
            Some(from) if from == update.status => None,
            Some(from) => Some(TaskChange::StatusChanged {
                task_id: update.task_id.clone(),
                from,
                to: update.status.clone(),
            }),
        }
    }

    /// Diff a full task list against what is known, in input order.
    ///
    /// Tasks missing from `snapshot` are kept; a partial page of results does not mean the
    /// other tasks are gone.
    pub fn reconcile<'a, I>(&mut self, snapshot: I) -> Vec<TaskChange>
    where
        I: IntoIterator<Item = &'a TaskStatusUpdate>,
    {
        snapshot
            .into_iter()
            .filter_map(|update| self.observe(update))
            .collect()
    }

    /// Stop tracking a task. Returns its last known status.
    pub fn forget(&mut self, task_id: &str) -> Option<TaskStatus> {
        self.statuses.remove(task_id)
    }

    #[must_use]
    pub fn status(&self, task_id: &str) -> Option<&TaskStatus> {
        self.statuses.get(task_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Feed every `task_status` message received by `client` through this tracker and call
    /// `handler` for the changes `preferences` selects.
    ///
    /// Frames whose payload is not a task status update are ignored.
    pub fn attach<F>(
        self,
        client: &Client,
        preferences: NotificationPreferences,
        handler: F,
    ) -> Unsubscribe
    where
        F: Fn(&TaskChange) + Send + Sync + 'static,
    {
        let tracker = Mutex::new(self);

        client.on(MessageType::TaskStatus, move |message| {
            let Some(update) = message.as_task_status() else {
                return;
            };
            let change = tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observe(&update);

            if let Some(change) = change
                && preferences.should_notify(&change)
            {
                handler(&change);
            }
        })
    }
}
