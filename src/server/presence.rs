//! Presence tracking: which user is reachable, and through which connection.
//!
//! A user maps to at most one connection handle. A newer connection overwrites
//! the older one (last write wins), so only the most recently connected device
//! receives direct emissions and delivery receipts. Entries expire after a fixed
//! TTL unless refreshed by a heartbeat.

use crate::common::models::{ConnectionId, UserId};
use crate::server::error::MessagingError;
use async_trait::async_trait;
use log::{debug, info, warn};
use redis::aio::ConnectionManager;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Ephemeral key-value store with per-key expiry.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), MessagingError>;
    async fn get(&self, key: &str) -> Result<Option<String>, MessagingError>;
    /// Extends the expiry of an existing key. Returns false when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, MessagingError>;
    async fn delete(&self, key: &str) -> Result<(), MessagingError>;
    /// Deletes `key` only while it still holds `expected`, as one atomic step.
    /// Returns whether the key was removed.
    async fn delete_if(&self, key: &str, expected: &str) -> Result<bool, MessagingError>;
    /// One lookup for many keys; the result is positionally aligned with `keys`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, MessagingError>;
}

/// Process-local store, used when no Redis is configured and in tests.
#[derive(Clone, Default)]
pub struct InMemoryPresenceStore {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), MessagingError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, MessagingError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, MessagingError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get_mut(key) {
            Some((_, deadline)) if *deadline > now => {
                *deadline = now + ttl;
                Ok(true)
            }
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), MessagingError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn delete_if(&self, key: &str, expected: &str) -> Result<bool, MessagingError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, deadline)) if value == expected && *deadline > Instant::now() => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, MessagingError> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|k| match entries.get(k) {
                Some((value, deadline)) if *deadline > now => Some(value.clone()),
                _ => None,
            })
            .collect())
    }
}

/// Redis-backed store shared by every gateway instance.
#[derive(Clone)]
pub struct RedisPresenceStore {
    manager: ConnectionManager,
}

const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

fn redis_err(e: redis::RedisError) -> MessagingError {
    MessagingError::Presence(e.to_string())
}

impl RedisPresenceStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        info!("[PRESENCE] Connected to Redis at {}", redis_url);
        Ok(Self { manager })
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        let mut conn = self.manager.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await.map_err(redis_err)?;
        Ok(pong == "PONG")
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), MessagingError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, MessagingError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await.map_err(redis_err)?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, MessagingError> {
        let mut conn = self.manager.clone();
        let updated: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;
        Ok(updated == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), MessagingError> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await.map_err(redis_err)?;
        Ok(())
    }

    async fn delete_if(&self, key: &str, expected: &str) -> Result<bool, MessagingError> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_err)?;
        Ok(removed == 1)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, MessagingError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await.map_err(redis_err)?;
        Ok(values)
    }
}

const KEY_PREFIX: &str = "presence:";

fn presence_key(user_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, user_id)
}

/// Online/offline/refresh/batch semantics over a [`PresenceStore`].
/// No access control here; callers decide who may ask.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    ttl: Duration,
    timeout: Duration,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn PresenceStore>, ttl: Duration, timeout: Duration) -> Self {
        Self { store, ttl, timeout }
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, MessagingError>
    where
        F: Future<Output = Result<T, MessagingError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("[PRESENCE] {} timed out after {:?}", op, self.timeout);
                Err(MessagingError::Presence(format!("{} timed out", op)))
            }
        }
    }

    /// Records `connection` as the user's reachable handle, replacing any previous one.
    pub async fn set_online(&self, user_id: &str, connection: &str) -> Result<(), MessagingError> {
        let key = presence_key(user_id);
        self.bounded("set_online", self.store.set_with_ttl(&key, connection, self.ttl)).await?;
        debug!("[PRESENCE] {} online via {}", user_id, connection);
        Ok(())
    }

    /// Extends the TTL. An already-expired entry stays expired.
    pub async fn refresh(&self, user_id: &str) -> Result<(), MessagingError> {
        let key = presence_key(user_id);
        let extended = self.bounded("refresh", self.store.expire(&key, self.ttl)).await?;
        if !extended {
            debug!("[PRESENCE] refresh for {} ignored, entry already expired", user_id);
        }
        Ok(())
    }

    pub async fn set_offline(&self, user_id: &str) -> Result<(), MessagingError> {
        let key = presence_key(user_id);
        self.bounded("set_offline", self.store.delete(&key)).await?;
        debug!("[PRESENCE] {} offline", user_id);
        Ok(())
    }

    /// Clears the entry only if it still names `connection`. A successor that
    /// already overwrote the handle keeps it. Returns whether the entry was cleared.
    pub async fn set_offline_if(&self, user_id: &str, connection: &str) -> Result<bool, MessagingError> {
        let key = presence_key(user_id);
        let cleared = self.bounded("set_offline_if", self.store.delete_if(&key, connection)).await?;
        if cleared {
            debug!("[PRESENCE] {} offline ({} closed)", user_id, connection);
        } else {
            debug!("[PRESENCE] {} kept online, handle no longer {}", user_id, connection);
        }
        Ok(cleared)
    }

    pub async fn is_online(&self, user_id: &str) -> Result<bool, MessagingError> {
        Ok(self.connection_handle(user_id).await?.is_some())
    }

    pub async fn connection_handle(&self, user_id: &str) -> Result<Option<ConnectionId>, MessagingError> {
        let key = presence_key(user_id);
        self.bounded("connection_handle", self.store.get(&key)).await
    }

    /// Online flag for every distinct identity, answered with a single store lookup.
    pub async fn batch_status(&self, user_ids: &[UserId]) -> Result<HashMap<UserId, bool>, MessagingError> {
        let mut seen = HashSet::new();
        let unique: Vec<UserId> = user_ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect();
        if unique.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = unique.iter().map(|id| presence_key(id)).collect();
        let values = self.bounded("batch_status", self.store.get_many(&keys)).await?;
        Ok(unique
            .into_iter()
            .zip(values.into_iter().chain(std::iter::repeat(None)))
            .map(|(id, value)| (id, value.is_some()))
            .collect())
    }
}

/// Identities from a comma-separated list such as `a,b, c`, as used by the batch
/// status lookup. Blank entries are skipped.
pub fn parse_user_ids(list: &str) -> Vec<UserId> {
    list.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
