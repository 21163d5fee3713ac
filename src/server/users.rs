// Profile and thread-context lookups used to enrich outgoing messages
use crate::common::models::{ThreadContext, UserProfile};
use crate::server::database::Database;
use crate::server::error::MessagingError;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn distinct<'a, I: IntoIterator<Item = &'a str>>(ids: I) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// One query for all requested profiles. Unknown ids are simply absent from the map.
pub async fn get_user_profiles<'a, I>(db: &Database, ids: I) -> Result<HashMap<String, UserProfile>, MessagingError>
where
    I: IntoIterator<Item = &'a str>,
{
    let ids = distinct(ids);
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT id, first_name, last_name, profile_photo FROM users WHERE id IN (");
    let mut separated = query.separated(", ");
    for id in &ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    let rows = query.build().fetch_all(&db.pool).await?;
    let mut profiles = HashMap::with_capacity(rows.len());
    for row in rows {
        let profile = UserProfile {
            id: row.try_get("id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            profile_photo: row.try_get("profile_photo")?,
        };
        profiles.insert(profile.id.clone(), profile);
    }
    Ok(profiles)
}

pub async fn user_exists(db: &Database, user_id: &str) -> Result<bool, MessagingError> {
    let found = sqlx::query("SELECT 1 FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&db.pool)
        .await?;
    Ok(found.is_some())
}

/// "First Last" for notification copy, `Someone` when unknown.
pub async fn display_name(db: &Arc<Database>, user_id: &str) -> String {
    match get_user_profiles(db, [user_id]).await {
        Ok(profiles) => profiles
            .get(user_id)
            .and_then(UserProfile::display_name)
            .unwrap_or_else(|| "Someone".to_string()),
        Err(e) => {
            log::warn!("[USERS] Failed to load display name for {}: {}", user_id, e);
            "Someone".to_string()
        }
    }
}

pub async fn get_thread_contexts<'a, I>(db: &Database, ids: I) -> Result<HashMap<String, ThreadContext>, MessagingError>
where
    I: IntoIterator<Item = &'a str>,
{
    let ids = distinct(ids);
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id, job_id, application_id FROM threads WHERE id IN (");
    let mut separated = query.separated(", ");
    for id in &ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    let rows = query.build().fetch_all(&db.pool).await?;
    let mut contexts = HashMap::with_capacity(rows.len());
    for row in rows {
        let context = ThreadContext {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            application_id: row.try_get("application_id")?,
        };
        contexts.insert(context.id.clone(), context);
    }
    Ok(contexts)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.upsert_user(&UserProfile {
            id: "x".into(),
            first_name: "Ahmed".into(),
            last_name: "Anjims".into(),
            profile_photo: Some("https://cdn/ahmed.jpg".into()),
        })
        .await
        .unwrap();
        db.upsert_user(&UserProfile::placeholder("y")).await.unwrap();
        db
    }

    #[tokio::test]
    async fn batch_lookup_skips_unknown_and_duplicates() {
        let db = seeded().await;
        let profiles = get_user_profiles(&db, ["x", "y", "x", "ghost"]).await.unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles["x"].first_name, "Ahmed");
        assert!(get_user_profiles(&db, std::iter::empty()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn display_name_falls_back_to_someone() {
        let db = Arc::new(seeded().await);
        assert_eq!(display_name(&db, "x").await, "Ahmed Anjims");
        assert_eq!(display_name(&db, "y").await, "Someone");
        assert_eq!(display_name(&db, "ghost").await, "Someone");
    }
}
