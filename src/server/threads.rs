use crate::common::models::{
    canonical_pair, Page, PageMeta, PageRequest, Participant, Thread, ThreadView, UserId, UserProfile,
};
use crate::server::database::{from_millis, from_millis_opt, now_millis, Database};
use crate::server::error::{MessagingError, MessagingResult};
use crate::server::messages::{message_from_row, MESSAGE_COLUMNS};
use crate::server::presence::PresenceTracker;
use crate::server::users;
use log::{info, warn};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_THREAD_PAGE: u32 = 20;

const THREAD_COLUMNS: &str = "id, participant_a, participant_b, job_id, application_id, last_message_at, is_archived, created_at";

fn thread_from_row(row: &SqliteRow) -> MessagingResult<Thread> {
    Ok(Thread {
        id: row.try_get("id")?,
        participant_a: row.try_get("participant_a")?,
        participant_b: row.try_get("participant_b")?,
        job_id: row.try_get("job_id")?,
        application_id: row.try_get("application_id")?,
        last_message_at: from_millis_opt(row.try_get("last_message_at")?),
        is_archived: row.try_get("is_archived")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

pub(crate) async fn load_thread(db: &Database, thread_id: &str) -> MessagingResult<Option<Thread>> {
    let row = sqlx::query(&format!("SELECT {} FROM threads WHERE id = ?", THREAD_COLUMNS))
        .bind(thread_id)
        .fetch_optional(&db.pool)
        .await?;
    row.as_ref().map(thread_from_row).transpose()
}

/// Optional link from a conversation to an external job or application record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadLink {
    pub job_id: Option<String>,
    pub application_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ThreadQuery {
    pub archived: Option<bool>,
    pub job_id: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

fn push_thread_filter(query: &mut QueryBuilder<'_, Sqlite>, user_id: &str, filter: &ThreadQuery) {
    query.push(" WHERE (participant_a = ");
    query.push_bind(user_id.to_string());
    query.push(" OR participant_b = ");
    query.push_bind(user_id.to_string());
    query.push(")");
    if let Some(archived) = filter.archived {
        query.push(" AND is_archived = ");
        query.push_bind(archived);
    }
    if let Some(job_id) = &filter.job_id {
        query.push(" AND job_id = ");
        query.push_bind(job_id.clone());
    }
}

#[derive(Clone)]
pub struct ThreadService {
    db: Arc<Database>,
    presence: Option<PresenceTracker>,
}

impl ThreadService {
    pub fn new(db: Arc<Database>, presence: Option<PresenceTracker>) -> Self {
        Self { db, presence }
    }

    /// Returns the conversation between the two users for this link, creating it
    /// on first contact.
    pub async fn open_thread(&self, user_id: &str, recipient_id: &str, link: ThreadLink) -> MessagingResult<Thread> {
        if user_id == recipient_id {
            return Err(MessagingError::validation("cannot open a thread with yourself"));
        }
        if !users::user_exists(&self.db, recipient_id).await? {
            return Err(MessagingError::not_found("Recipient not found"));
        }

        let (participant_a, participant_b) = canonical_pair(user_id, recipient_id);
        let existing = sqlx::query(&format!(
            "SELECT {} FROM threads WHERE participant_a = ? AND participant_b = ? AND job_id IS ? AND application_id IS ? \
             ORDER BY created_at LIMIT 1",
            THREAD_COLUMNS
        ))
        .bind(&participant_a)
        .bind(&participant_b)
        .bind(&link.job_id)
        .bind(&link.application_id)
        .fetch_optional(&self.db.pool)
        .await?;
        if let Some(row) = existing {
            return thread_from_row(&row);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = now_millis();
        sqlx::query(
            "INSERT INTO threads (id, participant_a, participant_b, job_id, application_id, last_message_at, is_archived, created_at) \
             VALUES (?, ?, ?, ?, ?, NULL, 0, ?)",
        )
        .bind(&id)
        .bind(&participant_a)
        .bind(&participant_b)
        .bind(&link.job_id)
        .bind(&link.application_id)
        .bind(created_at)
        .execute(&self.db.pool)
        .await?;
        info!("[THREAD] Opened {} between {} and {}", id, participant_a, participant_b);

        Ok(Thread {
            id,
            participant_a,
            participant_b,
            job_id: link.job_id,
            application_id: link.application_id,
            last_message_at: None,
            is_archived: false,
            created_at: from_millis(created_at),
        })
    }

    async fn authorized(&self, user_id: &str, thread_id: &str) -> MessagingResult<Thread> {
        let thread = load_thread(&self.db, thread_id)
            .await?
            .ok_or_else(|| MessagingError::not_found("Thread not found"))?;
        if !thread.has_participant(user_id) {
            return Err(MessagingError::forbidden("Not authorized to view this thread"));
        }
        Ok(thread)
    }

    async fn online_flags(&self, ids: &[UserId]) -> HashMap<UserId, bool> {
        let Some(presence) = &self.presence else {
            return HashMap::new();
        };
        match presence.batch_status(ids).await {
            Ok(status) => status,
            Err(e) => {
                warn!("[THREAD] Presence lookup failed, reporting everyone offline: {}", e);
                HashMap::new()
            }
        }
    }

    fn participants_of(
        thread: &Thread,
        profiles: &HashMap<String, UserProfile>,
        online: &HashMap<UserId, bool>,
    ) -> Vec<Participant> {
        thread
            .participants()
            .iter()
            .map(|id| Participant {
                profile: profiles.get(*id).cloned().unwrap_or_else(|| UserProfile::placeholder(id)),
                is_online: online.get(*id).copied().unwrap_or(false),
            })
            .collect()
    }

    pub async fn get_thread(&self, user_id: &str, thread_id: &str) -> MessagingResult<ThreadView> {
        let thread = self.authorized(user_id, thread_id).await?;
        let ids: Vec<UserId> = thread.participants().iter().map(|s| s.to_string()).collect();
        let profiles = users::get_user_profiles(&self.db, ids.iter().map(String::as_str)).await?;
        let online = self.online_flags(&ids).await;
        Ok(ThreadView {
            participants: Self::participants_of(&thread, &profiles, &online),
            thread,
            last_message: None,
            unread_count: None,
        })
    }

    /// The caller's conversations, most recently active first.
    pub async fn list_threads(&self, user_id: &str, filter: ThreadQuery) -> MessagingResult<Page<ThreadView>> {
        let window = PageRequest::new(filter.page, filter.limit, DEFAULT_THREAD_PAGE);

        let mut select: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {} FROM threads", THREAD_COLUMNS));
        push_thread_filter(&mut select, user_id, &filter);
        select.push(" ORDER BY COALESCE(last_message_at, created_at) DESC, rowid DESC LIMIT ");
        select.push_bind(window.limit as i64);
        select.push(" OFFSET ");
        select.push_bind(window.offset());
        let rows = select.build().fetch_all(&self.db.pool).await?;
        let threads = rows.iter().map(thread_from_row).collect::<MessagingResult<Vec<_>>>()?;

        let mut count: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM threads");
        push_thread_filter(&mut count, user_id, &filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.db.pool).await?;

        let mut ids: Vec<UserId> = threads
            .iter()
            .flat_map(|t| t.participants().map(str::to_string))
            .collect();
        ids.sort();
        ids.dedup();
        let profiles = users::get_user_profiles(&self.db, ids.iter().map(String::as_str)).await?;
        let online = self.online_flags(&ids).await;

        let mut views = Vec::with_capacity(threads.len());
        for thread in threads {
            let last_message = sqlx::query(&format!(
                "SELECT {} FROM messages WHERE thread_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
                MESSAGE_COLUMNS
            ))
            .bind(&thread.id)
            .fetch_optional(&self.db.pool)
            .await?
            .as_ref()
            .map(message_from_row)
            .transpose()?;
            let unread: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM messages WHERE thread_id = ? AND recipient_id = ? AND is_read = 0",
            )
            .bind(&thread.id)
            .bind(user_id)
            .fetch_one(&self.db.pool)
            .await?;

            views.push(ThreadView {
                participants: Self::participants_of(&thread, &profiles, &online),
                thread,
                last_message,
                unread_count: Some(unread),
            });
        }

        Ok(Page {
            data: views,
            meta: PageMeta::new(total, window.page, window.limit),
        })
    }

    /// Archiving is the only way a thread goes away; rows are never deleted.
    pub async fn set_archived(&self, user_id: &str, thread_id: &str, archived: bool) -> MessagingResult<ThreadView> {
        self.authorized(user_id, thread_id).await?;
        sqlx::query("UPDATE threads SET is_archived = ? WHERE id = ?")
            .bind(archived)
            .bind(thread_id)
            .execute(&self.db.pool)
            .await?;
        info!("[THREAD] {} set archived={} on {}", user_id, archived, thread_id);
        self.get_thread(user_id, thread_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::models::MessageContent;
    use crate::server::messages::{MessageLimits, MessageService};
    use crate::server::presence::InMemoryPresenceStore;
    use std::time::Duration;

    async fn seeded() -> (Arc<Database>, PresenceTracker) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        for (id, first) in [("ann", "Ann"), ("bob", "Bob"), ("cid", "Cid")] {
            db.upsert_user(&UserProfile {
                id: id.into(),
                first_name: first.into(),
                last_name: "Doe".into(),
                profile_photo: None,
            })
            .await
            .unwrap();
        }
        let presence = PresenceTracker::new(
            Arc::new(InMemoryPresenceStore::new()),
            Duration::from_secs(300),
            Duration::from_millis(500),
        );
        (db, presence)
    }

    #[tokio::test]
    async fn open_thread_is_find_or_create_per_link() {
        let (db, presence) = seeded().await;
        let svc = ThreadService::new(db, Some(presence));
        let first = svc.open_thread("bob", "ann", ThreadLink::default()).await.unwrap();
        assert_eq!((first.participant_a.as_str(), first.participant_b.as_str()), ("ann", "bob"));

        let again = svc.open_thread("ann", "bob", ThreadLink::default()).await.unwrap();
        assert_eq!(again.id, first.id);

        let for_job = svc
            .open_thread("ann", "bob", ThreadLink { job_id: Some("job-1".into()), application_id: None })
            .await
            .unwrap();
        assert_ne!(for_job.id, first.id);

        assert!(matches!(
            svc.open_thread("ann", "ann", ThreadLink::default()).await,
            Err(MessagingError::Validation(_))
        ));
        assert!(matches!(
            svc.open_thread("ann", "ghost", ThreadLink::default()).await,
            Err(MessagingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn get_thread_reports_profiles_and_presence() {
        let (db, presence) = seeded().await;
        presence.set_online("bob", "conn-1").await.unwrap();
        let svc = ThreadService::new(db, Some(presence));
        let thread = svc.open_thread("ann", "bob", ThreadLink::default()).await.unwrap();

        let view = svc.get_thread("ann", &thread.id).await.unwrap();
        let bob = view.participants.iter().find(|p| p.profile.id == "bob").unwrap();
        let ann = view.participants.iter().find(|p| p.profile.id == "ann").unwrap();
        assert!(bob.is_online);
        assert!(!ann.is_online);
        assert_eq!(bob.profile.first_name, "Bob");

        assert!(matches!(svc.get_thread("cid", &thread.id).await, Err(MessagingError::Forbidden(_))));
        assert!(matches!(svc.get_thread("ann", "nope").await, Err(MessagingError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_threads_orders_by_activity_with_unread_counts() {
        let (db, presence) = seeded().await;
        let svc = ThreadService::new(db.clone(), Some(presence));
        let messages = MessageService::new(db, None, MessageLimits::default());
        let with_bob = svc.open_thread("ann", "bob", ThreadLink::default()).await.unwrap();
        let with_cid = svc.open_thread("ann", "cid", ThreadLink::default()).await.unwrap();

        let body = |b: &str| MessageContent { body: b.into(), ..Default::default() };
        messages.send_message("cid", &with_cid.id, body("older")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        messages.send_message("bob", &with_bob.id, body("newer")).await.unwrap();
        messages.send_message("bob", &with_bob.id, body("newest")).await.unwrap();

        let page = svc.list_threads("ann", ThreadQuery::default()).await.unwrap();
        assert_eq!(page.meta.total, 2);
        assert_eq!(page.data[0].thread.id, with_bob.id);
        assert_eq!(page.data[0].unread_count, Some(2));
        assert_eq!(page.data[0].last_message.as_ref().unwrap().body, "newest");
        assert_eq!(page.data[1].unread_count, Some(1));

        let bobs = svc.list_threads("bob", ThreadQuery::default()).await.unwrap();
        assert_eq!(bobs.meta.total, 1);
        assert_eq!(bobs.data[0].unread_count, Some(0));
    }

    #[tokio::test]
    async fn archiving_filters_listing() {
        let (db, presence) = seeded().await;
        let svc = ThreadService::new(db, Some(presence));
        let thread = svc.open_thread("ann", "bob", ThreadLink::default()).await.unwrap();
        svc.open_thread("ann", "cid", ThreadLink::default()).await.unwrap();

        let view = svc.set_archived("bob", &thread.id, true).await.unwrap();
        assert!(view.thread.is_archived);
        assert!(matches!(
            svc.set_archived("cid", &thread.id, true).await,
            Err(MessagingError::Forbidden(_))
        ));

        let active = svc
            .list_threads("ann", ThreadQuery { archived: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(active.meta.total, 1);
        let archived = svc
            .list_threads("ann", ThreadQuery { archived: Some(true), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(archived.data[0].thread.id, thread.id);
    }
}
