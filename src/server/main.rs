// src/server/main.rs
// Entry point for the messaging gateway
use log::{error, info, warn};
use ruggine_messaging::server::auth::TokenVerifier;
use ruggine_messaging::server::config::ServerConfig;
use ruggine_messaging::server::connection::Server;
use ruggine_messaging::server::database::Database;
use ruggine_messaging::server::messages::{MessageLimits, MessageService};
use ruggine_messaging::server::notifications::{
    LogNotificationSink, NotificationDispatcher, NotificationSink, RedisNotificationSink,
};
use ruggine_messaging::server::presence::{InMemoryPresenceStore, PresenceStore, PresenceTracker, RedisPresenceStore};
use ruggine_messaging::server::websocket::ChatGateway;
use ruggine_messaging::utils::{logger, performance};
use std::sync::Arc;

async fn presence_store(config: &ServerConfig) -> Arc<dyn PresenceStore> {
    match &config.redis_url {
        Some(url) => match RedisPresenceStore::connect(url).await {
            Ok(store) => {
                match store.health_check().await {
                    Ok(true) => info!("[PRESENCE] Using Redis at {}", url),
                    Ok(false) => warn!("[PRESENCE] Redis at {} answered PING unexpectedly", url),
                    Err(e) => warn!("[PRESENCE] Redis at {} not answering yet: {}", url, e),
                }
                Arc::new(store)
            }
            Err(e) => {
                warn!("[PRESENCE] Redis unavailable ({}), falling back to in-memory presence", e);
                Arc::new(InMemoryPresenceStore::new())
            }
        },
        None => {
            info!("[PRESENCE] REDIS_URL not set, using in-memory presence");
            Arc::new(InMemoryPresenceStore::new())
        }
    }
}

async fn notification_sink(config: &ServerConfig) -> Arc<dyn NotificationSink> {
    if let Some(url) = &config.redis_url {
        match RedisNotificationSink::connect(url).await {
            Ok(sink) => return Arc::new(sink),
            Err(e) => warn!("[NOTIFY] Redis publisher unavailable ({}), notifications will only be logged", e),
        }
    }
    Arc::new(LogNotificationSink)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;
    logger::init(&config.log_level);

    let database = Arc::new(Database::connect(&config.database_url).await?);
    info!("[DB] Running migrations...");
    database.migrate().await.map_err(|e| {
        error!("[DB] Migration failed: {}", e);
        e
    })?;

    let presence = PresenceTracker::new(presence_store(&config).await, config.presence_ttl(), config.presence_timeout());
    let (notifier, _notify_worker) =
        NotificationDispatcher::spawn(notification_sink(&config).await, config.notification_queue_capacity);

    let messages = MessageService::new(database.clone(), Some(notifier), MessageLimits::from_config(&config));
    let gateway = Arc::new(ChatGateway::new(messages, presence, TokenVerifier::from_config(&config)));

    let stats_gateway = gateway.clone();
    let stats_db = database.clone();
    let stats_path = config.stats_log_path.clone();
    let stats_interval = std::time::Duration::from_secs(config.stats_interval_secs.max(1));
    tokio::spawn(async move {
        info!("[STATS] Logging every {:?} to {}", stats_interval, stats_path);
        performance::start_stats_logger(stats_gateway, stats_db, stats_path, stats_interval).await;
    });

    let server = Server::new(gateway, config);
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("[SERVER] Shutting down"),
    }
    Ok(())
}
