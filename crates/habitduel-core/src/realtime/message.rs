use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::challenge::UserId;
use crate::error::ValidationError;

/// Action carried by a live payload: `{"action": "START" | "STOP"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiveAction {
    Start,
    Stop,
}

/// Inbound live payload. The sender's identity never comes from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRequest {
    pub action: LiveAction,
}

impl LiveRequest {
    pub fn from_json(payload: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(payload).map_err(|e| ValidationError::UnsupportedPayload(e.to_string()))
    }
}

/// Authenticated identity attached to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    On,
    Off,
    Error,
}

/// Message published on a challenge channel.
///
/// ```json
/// {"senderId": 1, "status": "ON", "startedAt": "2026-01-15T09:00:00Z"}
/// {"senderId": 1, "status": "OFF", "accumulatedTime": 250}
/// {"senderId": 1, "status": "ERROR", "message": "..."}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerMessage {
    pub sender_id: UserId,
    pub status: SignalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Week total in seconds after the stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accumulated_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TimerMessage {
    pub fn on(sender_id: UserId, started_at: DateTime<Utc>) -> Self {
        Self {
            sender_id,
            status: SignalStatus::On,
            started_at: Some(started_at),
            accumulated_time: None,
            message: None,
        }
    }

    pub fn off(sender_id: UserId, accumulated_time: u64) -> Self {
        Self {
            sender_id,
            status: SignalStatus::Off,
            started_at: None,
            accumulated_time: Some(accumulated_time),
            message: None,
        }
    }

    pub fn error(sender_id: UserId, message: impl Into<String>) -> Self {
        Self {
            sender_id,
            status: SignalStatus::Error,
            started_at: None,
            accumulated_time: None,
            message: Some(message.into()),
        }
    }
}
