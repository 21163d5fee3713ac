#![allow(dead_code)]

use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use ruggine_messaging::common::models::{ConnectionId, Thread, UserProfile};
use ruggine_messaging::common::protocol::ServerEvent;
use ruggine_messaging::server::auth::{Claims, TokenVerifier};
use ruggine_messaging::server::database::Database;
use ruggine_messaging::server::error::MessagingError;
use ruggine_messaging::server::messages::{MessageLimits, MessageService};
use ruggine_messaging::server::presence::{InMemoryPresenceStore, PresenceStore, PresenceTracker};
use ruggine_messaging::server::threads::{ThreadLink, ThreadService};
use ruggine_messaging::server::websocket::ChatGateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const SECRET: &str = "integration-secret";

pub fn mint(user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + 3600,
        iat: Some(now),
        iss: None,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

/// Presence backend that is always down.
pub struct BrokenPresenceStore;

#[async_trait]
impl PresenceStore for BrokenPresenceStore {
    async fn set_with_ttl(&self, _: &str, _: &str, _: Duration) -> Result<(), MessagingError> {
        Err(MessagingError::Presence("connection refused".into()))
    }
    async fn get(&self, _: &str) -> Result<Option<String>, MessagingError> {
        Err(MessagingError::Presence("connection refused".into()))
    }
    async fn expire(&self, _: &str, _: Duration) -> Result<bool, MessagingError> {
        Err(MessagingError::Presence("connection refused".into()))
    }
    async fn delete(&self, _: &str) -> Result<(), MessagingError> {
        Err(MessagingError::Presence("connection refused".into()))
    }
    async fn delete_if(&self, _: &str, _: &str) -> Result<bool, MessagingError> {
        Err(MessagingError::Presence("connection refused".into()))
    }
    async fn get_many(&self, _: &[String]) -> Result<Vec<Option<String>>, MessagingError> {
        Err(MessagingError::Presence("connection refused".into()))
    }
}

/// In-memory store where another device registers for `key` at the worst moment:
/// right before a conditional delete runs.
pub struct SuccessorStore {
    pub inner: InMemoryPresenceStore,
    pub key: String,
    pub successor: String,
}

#[async_trait]
impl PresenceStore for SuccessorStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), MessagingError> {
        self.inner.set_with_ttl(key, value, ttl).await
    }
    async fn get(&self, key: &str) -> Result<Option<String>, MessagingError> {
        self.inner.get(key).await
    }
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, MessagingError> {
        self.inner.expire(key, ttl).await
    }
    async fn delete(&self, key: &str) -> Result<(), MessagingError> {
        self.inner.delete(key).await
    }
    async fn delete_if(&self, key: &str, expected: &str) -> Result<bool, MessagingError> {
        if key == self.key {
            self.inner.set_with_ttl(key, &self.successor, Duration::from_secs(300)).await?;
        }
        self.inner.delete_if(key, expected).await
    }
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, MessagingError> {
        self.inner.get_many(keys).await
    }
}

pub struct Harness {
    pub db: Arc<Database>,
    pub gateway: Arc<ChatGateway>,
    pub threads: ThreadService,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(InMemoryPresenceStore::new())).await
    }

    pub async fn with_store(store: Arc<dyn PresenceStore>) -> Self {
        let db = Arc::new(Database::in_memory().await.unwrap());
        for (id, first, last) in [("x", "Xavier", "Lind"), ("y", "Yara", "Holm"), ("z", "Zoe", "Berg")] {
            db.upsert_user(&UserProfile {
                id: id.into(),
                first_name: first.into(),
                last_name: last.into(),
                profile_photo: None,
            })
            .await
            .unwrap();
        }
        let presence = PresenceTracker::new(store, Duration::from_secs(300), Duration::from_millis(200));
        let messages = MessageService::new(db.clone(), None, MessageLimits::default());
        let gateway = Arc::new(ChatGateway::new(messages, presence.clone(), TokenVerifier::new(SECRET, None)));
        let threads = ThreadService::new(db.clone(), Some(presence));
        Self { db, gateway, threads }
    }

    pub async fn thread(&self, a: &str, b: &str) -> Thread {
        self.threads.open_thread(a, b, ThreadLink::default()).await.unwrap()
    }

    /// Attaches a connection the same way the socket transport does.
    pub async fn attach(&self, user_id: &str) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.gateway.connect(user_id, tx).await;
        let mut client = Client { id, rx };
        client.drain();
        client
    }
}

pub struct Client {
    pub id: ConnectionId,
    pub rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Client {
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(ServerEvent::name).collect()
    }
}
