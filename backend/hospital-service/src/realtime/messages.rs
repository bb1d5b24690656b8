/// WebSocket message types for the realtime gateway
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Notification, NotificationType, PatientStatus, QueueEntryStatus, QueueItem,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    Added,
    Removed,
}

/// Events pushed from the server to connected staff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// Connection established; lists the channels joined
    Connected {
        connection_id: Uuid,
        user_id: Uuid,
        channels: Vec<String>,
        timestamp: i64,
    },

    /// A persisted notification for the receiving user
    Notification {
        id: Uuid,
        notification_type: NotificationType,
        title: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        created_at: DateTime<Utc>,
    },

    /// A visit joined or left a department queue
    QueueUpdated {
        department: String,
        action: QueueAction,
        visit_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        item: Option<QueueItem>,
    },

    /// A queue entry changed status in place
    QueueStatusChanged {
        department: String,
        visit_id: Uuid,
        status: QueueEntryStatus,
    },

    PatientStatusChanged {
        patient_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        visit_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous: Option<PatientStatus>,
        status: PatientStatus,
        changed_by: Uuid,
    },

    /// Free-form queue update relayed from a client
    QueueChanged {
        department: String,
        data: serde_json::Value,
        changed_by: Uuid,
    },

    Subscribed { channel: String },

    Unsubscribed { channel: String },

    Ping { timestamp: i64 },

    Pong { timestamp: i64 },

    Error { code: String, message: String },
}

impl RealtimeEvent {
    pub fn pong() -> Self {
        RealtimeEvent::Pong {
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        RealtimeEvent::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&Notification> for RealtimeEvent {
    fn from(n: &Notification) -> Self {
        RealtimeEvent::Notification {
            id: n.id,
            notification_type: n.notification_type,
            title: n.title.clone(),
            message: n.message.clone(),
            data: n.data.clone(),
            created_at: n.created_at,
        }
    }
}

/// Messages sent by clients over the socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    SubscribeDepartment {
        department: String,
    },
    UnsubscribeDepartment {
        department: String,
    },
    /// Relayed to every connection as `patient_status_changed`
    PatientStatusUpdate {
        patient_id: Uuid,
        #[serde(default)]
        visit_id: Option<Uuid>,
        status: PatientStatus,
    },
    /// Relayed to the department audience as `queue_changed`
    QueueUpdate {
        department: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}
