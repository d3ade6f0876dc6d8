//! Typed views over the `data` payload of application messages.
//!
//! The transport never validates payloads. These helpers are for consumers that want
//! structured access; a payload that does not match yields `None` rather than an error.

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::serde_as;

use super::{Message, MessageType};
use crate::Timestamp;
use crate::serde_helpers::{StringFromAny, TimestampMillis};

impl Message {
    fn payload_as<T: for<'de> Deserialize<'de>>(&self, kind: MessageType) -> Option<T> {
        if self.kind == kind {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }

    /// Try to extract the payload as a task status update.
    #[must_use]
    pub fn as_task_status(&self) -> Option<TaskStatusUpdate> {
        self.payload_as(MessageType::TaskStatus)
    }

    /// Try to extract the payload as a notification.
    #[must_use]
    pub fn as_notification(&self) -> Option<Notification> {
        self.payload_as(MessageType::Notification)
    }

    /// Try to extract the payload as an agent update.
    #[must_use]
    pub fn as_agent_update(&self) -> Option<AgentUpdate> {
        self.payload_as(MessageType::AgentUpdate)
    }

    /// Try to extract the payload as a system status report.
    #[must_use]
    pub fn as_system_status(&self) -> Option<SystemStatus> {
        self.payload_as(MessageType::SystemStatus)
    }

    /// Try to extract the payload as a service error.
    #[must_use]
    pub fn as_error(&self) -> Option<ErrorPayload> {
        self.payload_as(MessageType::Error)
    }
}

/// Lifecycle status of a task run by the service.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, not started yet
    Pending,
    /// Being worked on
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped before finishing
    Cancelled,
    /// Unknown status from the service (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

impl TaskStatus {
    /// Whether the task can no longer change status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Payload of a `task_status` message.
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct TaskStatusUpdate {
    /// Task identifier; numeric ids are accepted and kept as strings
    #[serde_as(as = "StringFromAny")]
    #[builder(into)]
    pub task_id: String,
    /// New status
    pub status: TaskStatus,
    /// Completion percentage, when the service reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Error message for failed tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub error: Option<String>,
    /// When the status changed, in Unix milliseconds
    #[serde_as(as = "Option<TimestampMillis>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

/// Severity of a notification.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
    /// Unknown level from the service (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

/// Payload of a `notification` message.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct Notification {
    /// Short headline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub title: Option<String>,
    /// Body text. Older services send this as `msg`.
    #[serde(alias = "msg")]
    #[builder(into)]
    pub message: String,
    /// Severity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<NotificationLevel>,
    /// Task the notification refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub task_id: Option<String>,
}

/// Payload of an `agent_update` message.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct AgentUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub message: Option<String>,
    /// Anything else the agent reported
    #[serde(flatten)]
    #[builder(default)]
    pub extra: serde_json::Map<String, Value>,
}

/// Overall health reported in a `system_status` message.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SystemHealth {
    Healthy,
    Degraded,
    Down,
    /// Unknown health value from the service (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

/// Payload of a `system_status` message.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct SystemStatus {
    pub status: SystemHealth,
    /// Tasks currently running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tasks: Option<u64>,
    /// Tasks waiting to start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_tasks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub message: Option<String>,
}

/// Payload of an `error` message.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct ErrorPayload {
    #[builder(into)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub code: Option<String>,
}
