//! Wire envelope exchanged with the task service.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::serde_as;
use uuid::Uuid;

use crate::Timestamp;
use crate::serde_helpers::{TimestampMillis, from_slice_with_path};
use crate::ws::error::WsError;

pub mod payload;

pub use payload::{
    AgentUpdate, ErrorPayload, Notification, NotificationLevel, SystemHealth, SystemStatus,
    TaskStatus, TaskStatusUpdate,
};

/// The closed set of message types.
///
/// Frames whose `type` is not one of these fail to parse and are dropped by the dispatcher.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageType {
    /// A task changed state
    TaskStatus,
    /// A user-facing notification
    Notification,
    /// Progress or status from an agent working on a task
    AgentUpdate,
    /// Service-wide health and load
    SystemStatus,
    /// An error reported by the service
    Error,
    /// Keep-alive; never delivered to subscribers
    Heartbeat,
}

impl MessageType {
    /// Every message type, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::TaskStatus,
        Self::Notification,
        Self::AgentUpdate,
        Self::SystemStatus,
        Self::Error,
        Self::Heartbeat,
    ];
}

/// A single frame, in either direction.
///
/// Outbound messages are stamped with the current time and, if they have none, a fresh `id`
/// when they are sent, so the values set here for those two fields are placeholders.
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct Message {
    /// Message type
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Production time in Unix milliseconds, assigned by the sender
    #[serde_as(as = "TimestampMillis")]
    #[builder(default = now_millis())]
    pub timestamp: Timestamp,
    /// Type-specific payload; not validated by the transport
    #[serde(default, skip_serializing_if = "Value::is_null")]
    #[builder(default)]
    pub data: Value,
    /// Unique identifier of an outbound message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub id: Option<String>,
    /// Pairs a request with its response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub correlation_id: Option<String>,
}

impl Message {
    /// Create a message of the given type carrying `data`.
    #[must_use]
    pub fn new(kind: MessageType, data: Value) -> Self {
        Self::builder().kind(kind).data(data).build()
    }

    /// Create a keep-alive message.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::builder().kind(MessageType::Heartbeat).build()
    }

    /// Whether this is a keep-alive message.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.kind == MessageType::Heartbeat
    }

    /// The production time as a UTC date, if it is in range.
    #[must_use]
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Stamp the send time and assign an id if there is none.
    pub(crate) fn stamp(&mut self) {
        self.timestamp = now_millis();
        if self.id.is_none() {
            self.id = Some(new_id());
        }
    }
}

/// Current time in Unix milliseconds.
#[must_use]
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// A fresh identifier for messages and correlation ids.
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Deserialize messages from the byte slice.
///
/// Handles both single objects and arrays of messages.
/// Returns an empty vector for empty or whitespace-only input.
pub fn parse_messages(bytes: &[u8]) -> std::result::Result<Vec<Message>, WsError> {
    // Handle empty or whitespace-only input (server keepalive frames)
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |start| &bytes[start..]);

    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.first() == Some(&b'[') {
        from_slice_with_path(trimmed)
    } else {
        let msg: Message = from_slice_with_path(trimmed)?;
        Ok(vec![msg])
    }
}
