//! Best-effort "you have a new message" side channel.
//!
//! Sends hand notifications to a bounded queue drained by one background task, so
//! a slow sink never stalls message persistence. Failures are logged and dropped.

use crate::common::models::{ThreadId, UserId};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const PREVIEW_CHARS: usize = 100;
pub const NOTIFICATION_CHANNEL: &str = "notifications";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageNotification {
    pub recipient_id: UserId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub thread_id: ThreadId,
    pub message_preview: String,
}

impl NewMessageNotification {
    pub fn new(recipient_id: &str, sender_id: &str, sender_name: String, thread_id: &str, body: &str) -> Self {
        Self {
            recipient_id: recipient_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name,
            thread_id: thread_id.to_string(),
            message_preview: body.chars().take(PREVIEW_CHARS).collect(),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &NewMessageNotification) -> anyhow::Result<()>;
}

/// Default sink: just records the notification.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, notification: &NewMessageNotification) -> anyhow::Result<()> {
        info!(
            "[NOTIFY] {} -> {} in thread {}",
            notification.sender_id, notification.recipient_id, notification.thread_id
        );
        Ok(())
    }
}

/// Publishes notifications on a Redis channel for the notification service to pick up.
pub struct RedisNotificationSink {
    manager: ConnectionManager,
    channel: String,
}

impl RedisNotificationSink {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager,
            channel: NOTIFICATION_CHANNEL.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for RedisNotificationSink {
    async fn deliver(&self, notification: &NewMessageNotification) -> anyhow::Result<()> {
        let payload = serde_json::to_string(notification)?;
        let mut conn = self.manager.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        debug!("[NOTIFY] Published to '{}' ({} subscribers)", self.channel, receivers);
        Ok(())
    }
}

/// Cheap handle for enqueueing notifications.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<NewMessageNotification>,
}

impl NotificationDispatcher {
    /// Spawns the drain task. It ends once every dispatcher handle is dropped.
    pub fn spawn(sink: Arc<dyn NotificationSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<NewMessageNotification>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if let Err(e) = sink.deliver(&notification).await {
                    error!(
                        "[NOTIFY] Failed to notify {} about thread {}: {}",
                        notification.recipient_id, notification.thread_id, e
                    );
                }
            }
            debug!("[NOTIFY] Dispatcher drained, worker exiting");
        });
        (Self { tx }, worker)
    }

    /// Never waits. Returns false when the notification was dropped.
    pub fn dispatch(&self, notification: NewMessageNotification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(n)) => {
                warn!("[NOTIFY] Queue full, dropping notification for {}", n.recipient_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                warn!("[NOTIFY] Dispatcher closed, dropping notification for {}", n.recipient_id);
                false
            }
        }
    }
}
