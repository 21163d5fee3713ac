// Dumps threads and recent messages. `db_inspect add-user <id> <first> <last>` seeds a profile.
use ruggine_messaging::common::models::UserProfile;
use ruggine_messaging::server::database::{from_millis, Database};
use sqlx::Row;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let db_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/ruggine_messaging.db".to_string());
    println!("Connecting to {}", db_url);
    let db = Database::connect(&db_url).await?;
    db.migrate().await?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("add-user") {
        let [_, id, first, last] = args.as_slice() else {
            anyhow::bail!("usage: db_inspect add-user <id> <first_name> <last_name>");
        };
        db.upsert_user(&UserProfile {
            id: id.clone(),
            first_name: first.clone(),
            last_name: last.clone(),
            profile_photo: None,
        })
        .await?;
        println!("user {} saved", id);
        return Ok(());
    }

    println!("\n-- users --");
    let rows = sqlx::query("SELECT id, first_name, last_name FROM users ORDER BY id")
        .fetch_all(&db.pool)
        .await?;
    for r in rows.iter() {
        let id: String = r.try_get("id")?;
        let first: String = r.try_get("first_name")?;
        let last: String = r.try_get("last_name")?;
        println!("id={} name={} {}", id, first, last);
    }

    println!("\n-- threads --");
    let rows = sqlx::query(
        "SELECT id, participant_a, participant_b, job_id, last_message_at, is_archived FROM threads \
         ORDER BY COALESCE(last_message_at, created_at) DESC",
    )
    .fetch_all(&db.pool)
    .await?;
    for r in rows.iter() {
        let id: String = r.try_get("id")?;
        let a: String = r.try_get("participant_a")?;
        let b: String = r.try_get("participant_b")?;
        let job_id: Option<String> = r.try_get("job_id")?;
        let last: Option<i64> = r.try_get("last_message_at")?;
        let archived: bool = r.try_get("is_archived")?;
        println!(
            "id={} participants={},{} job={} last_message_at={} archived={}",
            id,
            a,
            b,
            job_id.unwrap_or_else(|| "-".to_string()),
            last.map(|ms| from_millis(ms).to_rfc3339()).unwrap_or_else(|| "-".to_string()),
            archived
        );
    }

    println!("\n-- messages (last 20) --");
    let rows = sqlx::query(
        "SELECT id, thread_id, sender_id, recipient_id, body, status, created_at FROM messages \
         ORDER BY created_at DESC, rowid DESC LIMIT 20",
    )
    .fetch_all(&db.pool)
    .await?;
    for r in rows.iter() {
        let id: String = r.try_get("id")?;
        let thread_id: String = r.try_get("thread_id")?;
        let sender_id: String = r.try_get("sender_id")?;
        let recipient_id: String = r.try_get("recipient_id")?;
        let body: String = r.try_get("body")?;
        let status: String = r.try_get("status")?;
        let created_at: i64 = r.try_get("created_at")?;
        println!(
            "id={} thread={} {}->{} status={} body_len={} created_at={}",
            id,
            thread_id,
            sender_id,
            recipient_id,
            status,
            body.chars().count(),
            from_millis(created_at).to_rfc3339()
        );
    }

    Ok(())
}
