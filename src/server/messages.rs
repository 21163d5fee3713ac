//! Message lifecycle: creation, authorization, pagination, delivery/read
//! transitions, unread counting and search. Transport-independent.

use crate::common::models::{
    Attachment, EnrichedMessage, Message, MessageContent, MessageId, MessageStatus, Page, PageMeta, PageRequest,
    Thread,
};
use crate::server::config::ServerConfig;
use crate::server::database::{from_millis, from_millis_opt, now_millis, Database};
use crate::server::error::{MessagingError, MessagingResult};
use crate::server::notifications::{NewMessageNotification, NotificationDispatcher};
use crate::server::threads::load_thread;
use crate::server::users;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::sync::Arc;

pub const DEFAULT_MESSAGE_PAGE: u32 = 50;
pub const DEFAULT_SEARCH_PAGE: u32 = 20;

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, thread_id, sender_id, recipient_id, subject, body, attachments, status, is_read, read_at, delivered_at, created_at";

pub(crate) fn message_from_row(row: &SqliteRow) -> MessagingResult<Message> {
    let attachments: Option<String> = row.try_get("attachments")?;
    let attachments = match attachments {
        Some(raw) => Some(serde_json::from_str::<Vec<Attachment>>(&raw)?),
        None => None,
    };
    let status: String = row.try_get("status")?;
    Ok(Message {
        id: row.try_get("id")?,
        thread_id: row.try_get("thread_id")?,
        sender_id: row.try_get("sender_id")?,
        recipient_id: row.try_get("recipient_id")?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        attachments,
        status: status.parse().map_err(MessagingError::Validation)?,
        is_read: row.try_get("is_read")?,
        read_at: from_millis_opt(row.try_get("read_at")?),
        delivered_at: from_millis_opt(row.try_get("delivered_at")?),
        created_at: from_millis(row.try_get("created_at")?),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct MessageLimits {
    pub max_body_chars: usize,
    pub max_subject_chars: usize,
    pub max_attachments: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        let cfg = ServerConfig::default();
        Self::from_config(&cfg)
    }
}

impl MessageLimits {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_body_chars: config.max_message_length,
            max_subject_chars: config.max_subject_length,
            max_attachments: config.max_attachments,
        }
    }

    fn check(&self, content: &MessageContent) -> MessagingResult<()> {
        if content.body.trim().is_empty() {
            return Err(MessagingError::validation("message body is empty"));
        }
        if content.body.chars().count() > self.max_body_chars {
            return Err(MessagingError::validation(format!(
                "message body exceeds {} characters",
                self.max_body_chars
            )));
        }
        if let Some(subject) = &content.subject {
            if subject.chars().count() > self.max_subject_chars {
                return Err(MessagingError::validation(format!(
                    "subject exceeds {} characters",
                    self.max_subject_chars
                )));
            }
        }
        if let Some(attachments) = &content.attachments {
            if attachments.len() > self.max_attachments {
                return Err(MessagingError::validation(format!(
                    "at most {} attachments allowed",
                    self.max_attachments
                )));
            }
            if attachments.iter().any(|a| a.name.trim().is_empty() || a.url.trim().is_empty()) {
                return Err(MessagingError::validation("attachment requires a name and a url"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageQuery {
    pub unread_only: bool,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub thread_id: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Messages that actually changed state, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub message_ids: Vec<MessageId>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn count(&self) -> usize {
        self.message_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.message_ids.is_empty()
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn push_id_list(query: &mut QueryBuilder<'_, Sqlite>, ids: &[MessageId]) {
    query.push(" AND id IN (");
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");
}

fn push_search_filter(query: &mut QueryBuilder<'_, Sqlite>, user_id: &str, pattern: &str, thread_id: Option<&str>) {
    query.push(" WHERE (sender_id = ");
    query.push_bind(user_id.to_string());
    query.push(" OR recipient_id = ");
    query.push_bind(user_id.to_string());
    query.push(") AND (body LIKE ");
    query.push_bind(pattern.to_string());
    query.push(" ESCAPE '\\' OR subject LIKE ");
    query.push_bind(pattern.to_string());
    query.push(" ESCAPE '\\')");
    if let Some(thread_id) = thread_id {
        query.push(" AND thread_id = ");
        query.push_bind(thread_id.to_string());
    }
}

#[derive(Clone)]
pub struct MessageService {
    db: Arc<Database>,
    notifier: Option<NotificationDispatcher>,
    limits: MessageLimits,
}

impl MessageService {
    pub fn new(db: Arc<Database>, notifier: Option<NotificationDispatcher>, limits: MessageLimits) -> Self {
        Self { db, notifier, limits }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Loads the thread and checks `user_id` takes part in it.
    pub async fn authorize(&self, user_id: &str, thread_id: &str) -> MessagingResult<Thread> {
        let thread = load_thread(&self.db, thread_id)
            .await?
            .ok_or_else(|| MessagingError::not_found("Thread not found"))?;
        if !thread.has_participant(user_id) {
            return Err(MessagingError::forbidden("Not authorized to access this thread"));
        }
        Ok(thread)
    }

    pub async fn send_message(&self, sender_id: &str, thread_id: &str, content: MessageContent) -> MessagingResult<Message> {
        let thread = load_thread(&self.db, thread_id)
            .await?
            .ok_or_else(|| MessagingError::not_found("Thread not found"))?;
        let recipient_id = thread
            .other_participant(sender_id)
            .ok_or_else(|| MessagingError::forbidden("Not authorized to send messages in this thread"))?
            .to_string();
        self.limits.check(&content)?;

        let attachments_json = match &content.attachments {
            Some(list) if !list.is_empty() => Some(serde_json::to_string(list)?),
            _ => None,
        };
        let subject = content.subject.filter(|s| !s.trim().is_empty());
        let attachments = content.attachments.filter(|list| !list.is_empty());
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = now_millis();

        let mut tx = self.db.pool.begin().await?;
        sqlx::query(
            "INSERT INTO messages (id, thread_id, sender_id, recipient_id, subject, body, attachments, status, is_read, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'sent', 0, ?)",
        )
        .bind(&id)
        .bind(thread_id)
        .bind(sender_id)
        .bind(&recipient_id)
        .bind(&subject)
        .bind(&content.body)
        .bind(&attachments_json)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE threads SET last_message_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("[MSG] {} sent {} in thread {}", sender_id, id, thread_id);

        let message = Message {
            id,
            thread_id: thread_id.to_string(),
            sender_id: sender_id.to_string(),
            recipient_id,
            subject,
            body: content.body,
            attachments,
            status: MessageStatus::Sent,
            is_read: false,
            read_at: None,
            delivered_at: None,
            created_at: from_millis(created_at),
        };
        self.notify_recipient(&message);
        Ok(message)
    }

    fn notify_recipient(&self, message: &Message) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let db = self.db.clone();
        let recipient = message.recipient_id.clone();
        let sender = message.sender_id.clone();
        let thread = message.thread_id.clone();
        let body = message.body.clone();
        tokio::spawn(async move {
            let sender_name = users::display_name(&db, &sender).await;
            notifier.dispatch(NewMessageNotification::new(&recipient, &sender, sender_name, &thread, &body));
        });
    }

    /// Newest first, enriched with sender/recipient profiles.
    pub async fn get_messages(&self, user_id: &str, thread_id: &str, query: MessageQuery) -> MessagingResult<Page<EnrichedMessage>> {
        self.authorize(user_id, thread_id).await?;
        let window = PageRequest::new(query.page, query.limit, DEFAULT_MESSAGE_PAGE);
        let unread_clause = if query.unread_only { " AND is_read = 0" } else { "" };

        let rows = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE thread_id = ?{} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            MESSAGE_COLUMNS, unread_clause
        ))
        .bind(thread_id)
        .bind(window.limit as i64)
        .bind(window.offset())
        .fetch_all(&self.db.pool)
        .await?;
        let messages = rows.iter().map(message_from_row).collect::<MessagingResult<Vec<_>>>()?;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM messages WHERE thread_id = ?{}",
            unread_clause
        ))
        .bind(thread_id)
        .fetch_one(&self.db.pool)
        .await?;

        Ok(Page {
            data: self.enrich(messages).await?,
            meta: PageMeta::new(total, window.page, window.limit),
        })
    }

    pub async fn enrich(&self, messages: Vec<Message>) -> MessagingResult<Vec<EnrichedMessage>> {
        let profiles = users::get_user_profiles(
            &self.db,
            messages.iter().flat_map(|m| [m.sender_id.as_str(), m.recipient_id.as_str()]),
        )
        .await?;
        Ok(messages
            .into_iter()
            .map(|message| EnrichedMessage {
                sender: profiles.get(&message.sender_id).cloned(),
                recipient: profiles.get(&message.recipient_id).cloned(),
                thread: None,
                message,
            })
            .collect())
    }

    pub async fn enrich_one(&self, message: Message) -> MessagingResult<EnrichedMessage> {
        let mut enriched = self.enrich(vec![message]).await?;
        enriched
            .pop()
            .ok_or_else(|| MessagingError::not_found("Message not found"))
    }

    /// Marks the listed messages read on behalf of their recipient. Messages addressed
    /// to someone else, or already read, are skipped silently.
    pub async fn mark_as_read(&self, user_id: &str, message_ids: &[MessageId]) -> MessagingResult<StatusChange> {
        let now = now_millis();
        if message_ids.is_empty() {
            return Ok(StatusChange { message_ids: Vec::new(), at: from_millis(now) });
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE messages SET status = 'read', is_read = 1, read_at = ");
        query.push_bind(now);
        query.push(" WHERE recipient_id = ");
        query.push_bind(user_id.to_string());
        query.push(" AND is_read = 0");
        push_id_list(&mut query, message_ids);
        query.push(" RETURNING id");

        let rows = query.build().fetch_all(&self.db.pool).await?;
        let updated = rows
            .iter()
            .map(|row| row.try_get::<String, _>("id"))
            .collect::<Result<Vec<_>, _>>()?;
        debug!("[MSG] {} marked {}/{} messages read", user_id, updated.len(), message_ids.len());
        Ok(StatusChange { message_ids: updated, at: from_millis(now) })
    }

    /// Marks every unread message in the thread addressed to `user_id` as read.
    pub async fn mark_thread_as_read(&self, user_id: &str, thread_id: &str) -> MessagingResult<StatusChange> {
        self.authorize(user_id, thread_id).await?;
        let now = now_millis();
        let rows = sqlx::query(
            "UPDATE messages SET status = 'read', is_read = 1, read_at = ? \
             WHERE thread_id = ? AND recipient_id = ? AND is_read = 0 RETURNING id",
        )
        .bind(now)
        .bind(thread_id)
        .bind(user_id)
        .fetch_all(&self.db.pool)
        .await?;
        let updated = rows
            .iter()
            .map(|row| row.try_get::<String, _>("id"))
            .collect::<Result<Vec<_>, _>>()?;
        debug!("[MSG] {} marked thread {} read ({} messages)", user_id, thread_id, updated.len());
        Ok(StatusChange { message_ids: updated, at: from_millis(now) })
    }

    /// `sent` -> `delivered`. Rows in any other status are left alone, so repeating
    /// the call is harmless.
    pub async fn mark_as_delivered(&self, message_ids: &[MessageId]) -> MessagingResult<StatusChange> {
        let now = now_millis();
        if message_ids.is_empty() {
            return Ok(StatusChange { message_ids: Vec::new(), at: from_millis(now) });
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE messages SET status = 'delivered', delivered_at = ");
        query.push_bind(now);
        query.push(" WHERE status = 'sent'");
        push_id_list(&mut query, message_ids);
        query.push(" RETURNING id");

        let rows = query.build().fetch_all(&self.db.pool).await?;
        let updated = rows
            .iter()
            .map(|row| row.try_get::<String, _>("id"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StatusChange { message_ids: updated, at: from_millis(now) })
    }

    pub async fn unread_count(&self, user_id: &str) -> MessagingResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE recipient_id = ? AND is_read = 0")
            .bind(user_id)
            .fetch_one(&self.db.pool)
            .await?;
        Ok(count)
    }

    pub async fn get_message(&self, message_id: &str) -> MessagingResult<Option<Message>> {
        let row = sqlx::query(&format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS))
            .bind(message_id)
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    /// Case-insensitive substring search over body and subject of the caller's messages.
    pub async fn search_messages(&self, user_id: &str, term: &str, query: SearchQuery) -> MessagingResult<Page<EnrichedMessage>> {
        let term = term.trim();
        if term.is_empty() {
            return Err(MessagingError::validation("search query is empty"));
        }
        let window = PageRequest::new(query.page, query.limit, DEFAULT_SEARCH_PAGE);
        let pattern = escape_like(term);
        let thread_id = query.thread_id.as_deref();

        let mut select: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {} FROM messages", MESSAGE_COLUMNS));
        push_search_filter(&mut select, user_id, &pattern, thread_id);
        select.push(" ORDER BY created_at DESC, rowid DESC LIMIT ");
        select.push_bind(window.limit as i64);
        select.push(" OFFSET ");
        select.push_bind(window.offset());
        let rows = select.build().fetch_all(&self.db.pool).await?;
        let messages = rows.iter().map(message_from_row).collect::<MessagingResult<Vec<_>>>()?;

        let mut count: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM messages");
        push_search_filter(&mut count, user_id, &pattern, thread_id);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.db.pool).await?;

        let contexts = users::get_thread_contexts(&self.db, messages.iter().map(|m| m.thread_id.as_str())).await?;
        let mut enriched = self.enrich(messages).await?;
        for hit in &mut enriched {
            hit.thread = contexts.get(&hit.message.thread_id).cloned();
        }

        Ok(Page {
            data: enriched,
            meta: PageMeta::new(total, window.page, window.limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::models::UserProfile;
    use crate::server::threads::{ThreadLink, ThreadService};

    async fn setup() -> (MessageService, Thread) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        for (id, first) in [("x", "Xena"), ("y", "Yuri"), ("z", "Zed")] {
            db.upsert_user(&UserProfile {
                id: id.into(),
                first_name: first.into(),
                last_name: "Test".into(),
                profile_photo: None,
            })
            .await
            .unwrap();
        }
        let threads = ThreadService::new(db.clone(), None);
        let thread = threads.open_thread("x", "y", ThreadLink::default()).await.unwrap();
        (MessageService::new(db, None, MessageLimits::default()), thread)
    }

    fn text(body: &str) -> MessageContent {
        MessageContent { body: body.into(), ..Default::default() }
    }

    #[tokio::test]
    async fn send_creates_sent_message_at_head_of_thread() {
        let (svc, thread) = setup().await;
        svc.send_message("x", &thread.id, text("first")).await.unwrap();
        let sent = svc.send_message("x", &thread.id, text("Hi")).await.unwrap();
        assert_eq!(sent.status, MessageStatus::Sent);
        assert_eq!(sent.recipient_id, "y");

        let page = svc.get_messages("y", &thread.id, MessageQuery::default()).await.unwrap();
        assert_eq!(page.meta.total, 2);
        assert_eq!(page.data[0].message.id, sent.id);
        assert_eq!(page.data[0].sender.as_ref().unwrap().first_name, "Xena");
        assert_eq!(page.data[0].recipient.as_ref().unwrap().first_name, "Yuri");

        let stored = load_thread(svc.database(), &thread.id).await.unwrap().unwrap();
        assert_eq!(stored.last_message_at, Some(sent.created_at));
    }

    #[tokio::test]
    async fn outsiders_cannot_send_or_read() {
        let (svc, thread) = setup().await;
        assert!(matches!(
            svc.send_message("z", &thread.id, text("hello")).await,
            Err(MessagingError::Forbidden(_))
        ));
        assert!(matches!(
            svc.get_messages("z", &thread.id, MessageQuery::default()).await,
            Err(MessagingError::Forbidden(_))
        ));
        assert!(matches!(
            svc.send_message("x", "missing", text("hello")).await,
            Err(MessagingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_content_is_rejected() {
        let (svc, thread) = setup().await;
        assert!(matches!(
            svc.send_message("x", &thread.id, text("   ")).await,
            Err(MessagingError::Validation(_))
        ));
        let long = "a".repeat(MessageLimits::default().max_body_chars + 1);
        assert!(matches!(
            svc.send_message("x", &thread.id, text(&long)).await,
            Err(MessagingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn attachments_round_trip_through_storage() {
        let (svc, thread) = setup().await;
        let content = MessageContent {
            body: "see attached".into(),
            subject: Some("Offer".into()),
            attachments: Some(vec![Attachment {
                name: "offer.pdf".into(),
                url: "s3://docs/offer.pdf".into(),
                mime_type: Some("application/pdf".into()),
                size: Some(1024),
            }]),
        };
        let sent = svc.send_message("x", &thread.id, content).await.unwrap();
        let stored = svc.get_message(&sent.id).await.unwrap().unwrap();
        assert_eq!(stored, sent);
    }

    #[tokio::test]
    async fn mark_read_only_applies_to_recipient() {
        let (svc, thread) = setup().await;
        let m = svc.send_message("x", &thread.id, text("Hi")).await.unwrap();
        assert_eq!(svc.unread_count("y").await.unwrap(), 1);

        // The sender cannot mark their own message read.
        let change = svc.mark_as_read("x", &[m.id.clone()]).await.unwrap();
        assert!(change.is_empty());
        assert_eq!(svc.get_message(&m.id).await.unwrap().unwrap().status, MessageStatus::Sent);

        let change = svc.mark_as_read("y", &[m.id.clone(), "unknown".into()]).await.unwrap();
        assert_eq!(change.message_ids, vec![m.id.clone()]);
        let stored = svc.get_message(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Read);
        assert!(stored.is_read);
        assert!(stored.read_at.is_some());
        assert_eq!(svc.unread_count("y").await.unwrap(), 0);

        // Already read: nothing changes the second time.
        assert!(svc.mark_as_read("y", &[m.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delivery_is_idempotent_and_never_downgrades_read() {
        let (svc, thread) = setup().await;
        let a = svc.send_message("x", &thread.id, text("a")).await.unwrap();
        let b = svc.send_message("x", &thread.id, text("b")).await.unwrap();
        svc.mark_as_read("y", &[b.id.clone()]).await.unwrap();

        let ids = vec![a.id.clone(), b.id.clone()];
        let first = svc.mark_as_delivered(&ids).await.unwrap();
        assert_eq!(first.message_ids, vec![a.id.clone()]);
        let after_once = svc.get_message(&a.id).await.unwrap().unwrap();

        let second = svc.mark_as_delivered(&ids).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(svc.get_message(&a.id).await.unwrap().unwrap(), after_once);
        assert_eq!(after_once.status, MessageStatus::Delivered);
        assert_eq!(svc.get_message(&b.id).await.unwrap().unwrap().status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn thread_mark_all_read_and_unread_filter() {
        let (svc, thread) = setup().await;
        svc.send_message("x", &thread.id, text("one")).await.unwrap();
        svc.send_message("x", &thread.id, text("two")).await.unwrap();
        svc.send_message("y", &thread.id, text("reply")).await.unwrap();

        let unread = svc
            .get_messages("y", &thread.id, MessageQuery { unread_only: true, ..Default::default() })
            .await
            .unwrap();
        // "reply" is unread too, addressed to x.
        assert_eq!(unread.meta.total, 3);

        let change = svc.mark_thread_as_read("y", &thread.id).await.unwrap();
        assert_eq!(change.count(), 2);
        assert_eq!(svc.unread_count("y").await.unwrap(), 0);
        assert_eq!(svc.unread_count("x").await.unwrap(), 1);
        assert!(matches!(
            svc.mark_thread_as_read("z", &thread.id).await,
            Err(MessagingError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn pagination_reports_next_page() {
        let (svc, thread) = setup().await;
        for i in 0..5 {
            svc.send_message("x", &thread.id, text(&format!("m{}", i))).await.unwrap();
        }
        let page = svc
            .get_messages("x", &thread.id, MessageQuery { page: Some(2), limit: Some(2), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].message.body, "m2");
        assert_eq!(page.meta.total_pages, 3);
        assert!(page.meta.has_next_page);
    }

    #[tokio::test]
    async fn search_is_scoped_case_insensitive_and_literal() {
        let (svc, thread) = setup().await;
        let threads = ThreadService::new(svc.database().clone(), None);
        let other = threads.open_thread("y", "z", ThreadLink::default()).await.unwrap();

        svc.send_message("x", &thread.id, text("Interview on Monday")).await.unwrap();
        svc.send_message("y", &thread.id, text("monday works, 100% sure")).await.unwrap();
        svc.send_message("z", &other.id, text("Monday standup")).await.unwrap();

        let hits = svc.search_messages("x", "MONDAY", SearchQuery::default()).await.unwrap();
        assert_eq!(hits.meta.total, 2);
        assert_eq!(hits.data[0].message.body, "monday works, 100% sure");
        assert_eq!(hits.data[0].thread.as_ref().unwrap().id, thread.id);

        let literal = svc.search_messages("y", "100%", SearchQuery::default()).await.unwrap();
        assert_eq!(literal.meta.total, 1);
        let wildcard = svc.search_messages("y", "%", SearchQuery::default()).await.unwrap();
        assert_eq!(wildcard.meta.total, 1);

        let narrowed = svc
            .search_messages(
                "y",
                "monday",
                SearchQuery { thread_id: Some(other.id.clone()), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(narrowed.meta.total, 1);
        assert_eq!(narrowed.data[0].message.sender_id, "z");

        assert!(matches!(
            svc.search_messages("x", "  ", SearchQuery::default()).await,
            Err(MessagingError::Validation(_))
        ));
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "%50\\%\\_off\\\\%");
    }
}
