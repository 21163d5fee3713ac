use crate::common::models::{Attachment, EnrichedMessage, MessageContent, MessageId, ThreadId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every frame on the wire is `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// First-frame authentication for clients that cannot set handshake headers
    Auth { token: String },
    JoinThread { thread_id: ThreadId },
    LeaveThread { thread_id: ThreadId },
    SendMessage {
        thread_id: ThreadId,
        body: String,
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        attachments: Option<Vec<Attachment>>,
    },
    Typing { thread_id: ThreadId },
    StopTyping { thread_id: ThreadId },
    MarkRead { message_ids: Vec<MessageId>, thread_id: ThreadId },
    Heartbeat,
}

impl ClientEvent {
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Auth { .. } => "auth",
            ClientEvent::JoinThread { .. } => "join_thread",
            ClientEvent::LeaveThread { .. } => "leave_thread",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::StopTyping { .. } => "stop_typing",
            ClientEvent::MarkRead { .. } => "mark_read",
            ClientEvent::Heartbeat => "heartbeat",
        }
    }

    pub fn send_message(thread_id: &str, content: MessageContent) -> Self {
        ClientEvent::SendMessage {
            thread_id: thread_id.to_string(),
            body: content.body,
            subject: content.subject,
            attachments: content.attachments,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Authenticated { user_id: UserId },
    UserOnline { user_id: UserId },
    UserOffline { user_id: UserId },
    JoinedThread { thread_id: ThreadId },
    LeftThread { thread_id: ThreadId },
    NewMessage(Box<EnrichedMessage>),
    MessageSent(Box<EnrichedMessage>),
    MessageDelivered {
        message_id: MessageId,
        thread_id: ThreadId,
        delivered_at: DateTime<Utc>,
    },
    MessageRead {
        message_ids: Vec<MessageId>,
        thread_id: ThreadId,
        read_by: UserId,
        read_at: DateTime<Utc>,
    },
    UserTyping { user_id: UserId, thread_id: ThreadId },
    UserStopTyping { user_id: UserId, thread_id: ThreadId },
    HeartbeatAck,
    Error { message: String },
}

impl ServerEvent {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error { message: message.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Authenticated { .. } => "authenticated",
            ServerEvent::UserOnline { .. } => "user_online",
            ServerEvent::UserOffline { .. } => "user_offline",
            ServerEvent::JoinedThread { .. } => "joined_thread",
            ServerEvent::LeftThread { .. } => "left_thread",
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::MessageSent(_) => "message_sent",
            ServerEvent::MessageDelivered { .. } => "message_delivered",
            ServerEvent::MessageRead { .. } => "message_read",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::UserStopTyping { .. } => "user_stop_typing",
            ServerEvent::HeartbeatAck => "heartbeat_ack",
            ServerEvent::Error { .. } => "error",
        }
    }
}
