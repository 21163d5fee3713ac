//! Connection gateway: binds connections to identities, keeps the per-thread
//! broadcast groups and routes client events.
//!
//! Each connection is represented by an unbounded outbox drained by its writer
//! task. Emitting never waits on a peer, so a slow member cannot hold up the
//! rest of a group.

use crate::common::models::{ConnectionId, MessageContent, MessageId, ThreadId, UserId};
use crate::common::protocol::{ClientEvent, ServerEvent};
use crate::server::auth::TokenVerifier;
use crate::server::error::{MessagingError, MessagingResult};
use crate::server::messages::MessageService;
use crate::server::presence::PresenceTracker;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

struct ConnectionEntry {
    user_id: UserId,
    outbox: Outbox,
    threads: HashSet<ThreadId>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    groups: HashMap<ThreadId, HashSet<ConnectionId>>,
}

impl Registry {
    /// True when the connection is local and its outbox took the event.
    fn emit(&self, connection_id: &str, event: ServerEvent) -> bool {
        let Some(entry) = self.connections.get(connection_id) else {
            return false;
        };
        if entry.outbox.send(event).is_err() {
            debug!("[WS:SEND] Outbox of {} already closed", connection_id);
            return false;
        }
        true
    }

    /// Returns the members that accepted the event.
    fn emit_to_group(&self, thread_id: &str, except: Option<&str>, event: &ServerEvent) -> Vec<&str> {
        let Some(members) = self.groups.get(thread_id) else {
            return Vec::new();
        };
        members
            .iter()
            .map(String::as_str)
            .filter(|member| Some(*member) != except)
            .filter(|member| self.emit(member, event.clone()))
            .collect()
    }

    fn emit_to_all(&self, except: &str, event: &ServerEvent) {
        for id in self.connections.keys() {
            if id != except {
                self.emit(id, event.clone());
            }
        }
    }

    fn in_group(&self, thread_id: &str, connection_id: &str) -> bool {
        self.groups
            .get(thread_id)
            .map(|members| members.contains(connection_id))
            .unwrap_or(false)
    }

    fn owned_by(&self, connection_id: &str, user_id: &str) -> bool {
        self.connections
            .get(connection_id)
            .map(|c| c.user_id == user_id)
            .unwrap_or(false)
    }
}

/// Snapshot used by the stats logger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub connections: usize,
    pub online_users: usize,
    pub thread_groups: usize,
}

pub struct ChatGateway {
    registry: Mutex<Registry>,
    messages: MessageService,
    presence: PresenceTracker,
    verifier: TokenVerifier,
}

impl ChatGateway {
    pub fn new(messages: MessageService, presence: PresenceTracker, verifier: TokenVerifier) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            messages,
            presence,
            verifier,
        }
    }

    pub fn messages(&self) -> &MessageService {
        &self.messages
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Verifies the bearer token presented at handshake.
    pub fn authenticate(&self, token: Option<&str>) -> MessagingResult<UserId> {
        let token = token.ok_or_else(|| MessagingError::Authentication("missing bearer token".to_string()))?;
        self.verifier.verify(token)
    }

    /// Registers an authenticated connection, marks the user online and tells everyone else.
    pub async fn connect(&self, user_id: &str, outbox: Outbox) -> ConnectionId {
        let connection_id = Uuid::new_v4().to_string();
        {
            let mut registry = self.registry.lock().await;
            registry.connections.insert(
                connection_id.clone(),
                ConnectionEntry {
                    user_id: user_id.to_string(),
                    outbox,
                    threads: HashSet::new(),
                },
            );
            registry.emit(&connection_id, ServerEvent::Authenticated { user_id: user_id.to_string() });
        }

        if let Err(e) = self.presence.set_online(user_id, &connection_id).await {
            warn!("[PRESENCE] Could not mark {} online: {}", user_id, e);
        }

        let registry = self.registry.lock().await;
        registry.emit_to_all(&connection_id, &ServerEvent::UserOnline { user_id: user_id.to_string() });
        info!("[WS:CONN] {} connected as {} ({} open)", user_id, connection_id, registry.connections.len());
        connection_id
    }

    /// Unbinds the connection. Presence is cleared only while it still points at this
    /// connection, so a displaced device closing does not take its successor offline.
    pub async fn disconnect(&self, connection_id: &str) {
        let (user_id, still_connected_here) = {
            let mut registry = self.registry.lock().await;
            let Some(entry) = registry.connections.remove(connection_id) else {
                return;
            };
            for thread_id in &entry.threads {
                if let Some(members) = registry.groups.get_mut(thread_id) {
                    members.remove(connection_id);
                    if members.is_empty() {
                        registry.groups.remove(thread_id);
                    }
                }
            }
            let still_connected = registry.connections.values().any(|c| c.user_id == entry.user_id);
            (entry.user_id, still_connected)
        };

        // Compare-and-delete, so a successor that registered meanwhile keeps its entry.
        let went_offline = match self.presence.set_offline_if(&user_id, connection_id).await {
            Ok(cleared) => cleared,
            Err(e) => {
                warn!("[PRESENCE] Could not clear {} on disconnect: {}", user_id, e);
                !still_connected_here
            }
        };

        if went_offline {
            let registry = self.registry.lock().await;
            registry.emit_to_all(connection_id, &ServerEvent::UserOffline { user_id: user_id.clone() });
        }
        info!("[WS:CONN] {} disconnected ({})", user_id, connection_id);
    }

    /// Raw text frame from a bound connection. Malformed frames are dropped.
    pub async fn handle_frame(&self, connection_id: &str, frame: &str) {
        match ClientEvent::parse(frame) {
            Ok(event) => self.handle_event(connection_id, event).await,
            Err(e) => debug!("[WS:RECV] Ignoring malformed frame from {}: {}", connection_id, e),
        }
    }

    pub async fn handle_event(&self, connection_id: &str, event: ClientEvent) {
        let Some(user_id) = self.bound_user(connection_id).await else {
            debug!("[WS:RECV] Ignoring {} from unbound connection {}", event.name(), connection_id);
            return;
        };

        match event {
            ClientEvent::Auth { .. } => {
                debug!("[WS:RECV] {} is already authenticated", connection_id);
            }
            ClientEvent::JoinThread { thread_id } => self.join(connection_id, thread_id).await,
            ClientEvent::LeaveThread { thread_id } => self.leave(connection_id, thread_id).await,
            ClientEvent::SendMessage { thread_id, body, subject, attachments } => {
                let content = MessageContent { body, subject, attachments };
                if let Err(e) = self.send(connection_id, &user_id, &thread_id, content).await {
                    self.report(connection_id, "send_message", e).await;
                }
            }
            ClientEvent::Typing { thread_id } => {
                let registry = self.registry.lock().await;
                registry.emit_to_group(
                    &thread_id,
                    Some(connection_id),
                    &ServerEvent::UserTyping { user_id, thread_id: thread_id.clone() },
                );
            }
            ClientEvent::StopTyping { thread_id } => {
                let registry = self.registry.lock().await;
                registry.emit_to_group(
                    &thread_id,
                    Some(connection_id),
                    &ServerEvent::UserStopTyping { user_id, thread_id: thread_id.clone() },
                );
            }
            ClientEvent::MarkRead { message_ids, thread_id } => {
                if let Err(e) = self.mark_read(connection_id, &user_id, &thread_id, &message_ids).await {
                    self.report(connection_id, "mark_read", e).await;
                }
            }
            ClientEvent::Heartbeat => {
                if let Err(e) = self.presence.refresh(&user_id).await {
                    warn!("[PRESENCE] Heartbeat refresh for {} failed: {}", user_id, e);
                }
                self.registry.lock().await.emit(connection_id, ServerEvent::HeartbeatAck);
            }
        }
    }

    async fn bound_user(&self, connection_id: &str) -> Option<UserId> {
        let registry = self.registry.lock().await;
        registry.connections.get(connection_id).map(|c| c.user_id.clone())
    }

    async fn join(&self, connection_id: &str, thread_id: ThreadId) {
        let mut registry = self.registry.lock().await;
        if let Some(entry) = registry.connections.get_mut(connection_id) {
            entry.threads.insert(thread_id.clone());
        }
        registry
            .groups
            .entry(thread_id.clone())
            .or_default()
            .insert(connection_id.to_string());
        debug!("[WS:GROUP] {} joined thread {}", connection_id, thread_id);
        registry.emit(connection_id, ServerEvent::JoinedThread { thread_id });
    }

    async fn leave(&self, connection_id: &str, thread_id: ThreadId) {
        let mut registry = self.registry.lock().await;
        if let Some(entry) = registry.connections.get_mut(connection_id) {
            entry.threads.remove(&thread_id);
        }
        if let Some(members) = registry.groups.get_mut(&thread_id) {
            members.remove(connection_id);
            if members.is_empty() {
                registry.groups.remove(&thread_id);
            }
        }
        debug!("[WS:GROUP] {} left thread {}", connection_id, thread_id);
        registry.emit(connection_id, ServerEvent::LeftThread { thread_id });
    }

    /// Where the recipient can be reached directly. Presence failures count as offline.
    async fn recipient_handle(&self, recipient_id: &str) -> Option<ConnectionId> {
        match self.presence.connection_handle(recipient_id).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("[PRESENCE] Lookup for {} failed, treating as offline: {}", recipient_id, e);
                None
            }
        }
    }

    /// Persists, fans out, and marks delivered only once a connection owned by the
    /// recipient has actually taken the `new_message`.
    async fn send(&self, connection_id: &str, user_id: &str, thread_id: &str, content: MessageContent) -> MessagingResult<()> {
        let message = self.messages.send_message(user_id, thread_id, content).await?;
        let message_id = message.id.clone();
        let recipient_id = message.recipient_id.clone();
        let enriched = self.messages.enrich_one(message).await?;
        let recipient_handle = self.recipient_handle(&recipient_id).await;

        let reached: Vec<ConnectionId> = {
            let registry = self.registry.lock().await;
            let new_message = ServerEvent::NewMessage(Box::new(enriched.clone()));
            let mut reached: Vec<ConnectionId> = registry
                .emit_to_group(thread_id, None, &new_message)
                .into_iter()
                .filter(|member| registry.owned_by(member, &recipient_id))
                .map(str::to_string)
                .collect();
            if let Some(handle) = &recipient_handle {
                if !registry.in_group(thread_id, handle)
                    && registry.owned_by(handle, &recipient_id)
                    && registry.emit(handle, new_message)
                {
                    reached.push(handle.clone());
                }
            }
            registry.emit(connection_id, ServerEvent::MessageSent(Box::new(enriched)));
            reached
        };

        if recipient_handle.is_none() {
            debug!("[MSG] {} offline, {} stays sent", recipient_id, message_id);
            return Ok(());
        }
        if reached.is_empty() {
            debug!("[MSG] No live connection of {} took {}, it stays sent", recipient_id, message_id);
            return Ok(());
        }

        // message_sent is already out, so a failure here must not surface as a send error.
        let delivered = match self.messages.mark_as_delivered(std::slice::from_ref(&message_id)).await {
            Ok(change) => change,
            Err(e) => {
                error!("[MSG] Marking {} delivered failed: {}", message_id, e);
                return Ok(());
            }
        };
        if delivered.message_ids.contains(&message_id) {
            let receipt = ServerEvent::MessageDelivered {
                message_id,
                thread_id: thread_id.to_string(),
                delivered_at: delivered.at,
            };
            let registry = self.registry.lock().await;
            registry.emit(connection_id, receipt.clone());
            for connection in reached.iter().filter(|c| c.as_str() != connection_id) {
                registry.emit(connection, receipt.clone());
            }
        }
        Ok(())
    }

    async fn mark_read(
        &self,
        connection_id: &str,
        user_id: &str,
        thread_id: &str,
        message_ids: &[MessageId],
    ) -> MessagingResult<()> {
        let change = self.messages.mark_as_read(user_id, message_ids).await?;
        if change.is_empty() {
            debug!("[MSG] mark_read by {} changed nothing", user_id);
            return Ok(());
        }
        let receipt = ServerEvent::MessageRead {
            message_ids: change.message_ids,
            thread_id: thread_id.to_string(),
            read_by: user_id.to_string(),
            read_at: change.at,
        };
        self.registry
            .lock()
            .await
            .emit_to_group(thread_id, Some(connection_id), &receipt);
        Ok(())
    }

    async fn report(&self, connection_id: &str, event: &str, err: MessagingError) {
        match &err {
            MessagingError::Validation(reason) => {
                debug!("[WS:RECV] Dropping invalid {} from {}: {}", event, connection_id, reason);
                return;
            }
            e if e.is_business_rule() => {
                info!("[WS:RECV] {} from {} rejected: {}", event, connection_id, e);
            }
            e => {
                error!("[WS:RECV] {} from {} failed: {}", event, connection_id, e);
            }
        }
        self.registry
            .lock()
            .await
            .emit(connection_id, ServerEvent::error(err.client_message()));
    }

    pub async fn stats(&self) -> GatewayStats {
        let registry = self.registry.lock().await;
        let users: HashSet<&str> = registry.connections.values().map(|c| c.user_id.as_str()).collect();
        GatewayStats {
            connections: registry.connections.len(),
            online_users: users.len(),
            thread_groups: registry.groups.len(),
        }
    }
}
