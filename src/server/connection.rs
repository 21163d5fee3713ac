use crate::common::protocol::{ClientEvent, ServerEvent};
use crate::server::auth::{bearer_from_header, token_from_query};
use crate::server::config::ServerConfig;
use crate::server::websocket::ChatGateway;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type WsReader = SplitStream<WebSocketStream<TcpStream>>;

/// What the upgrade request told us before the socket was accepted.
#[derive(Debug, Default)]
struct Handshake {
    token: Option<String>,
}

fn normalized(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

pub struct Server {
    pub gateway: Arc<ChatGateway>,
    pub config: ServerConfig,
}

impl Server {
    pub fn new(gateway: Arc<ChatGateway>, config: ServerConfig) -> Self {
        Self { gateway, config }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        self.serve(listener).await
    }

    /// Accept loop: one task per connection.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!("[SERVER] Listening on ws://{}{}", listener.local_addr()?, self.config.ws_path);
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("[SERVER] Accept failed: {}", e);
                    continue;
                }
            };
            let gateway = self.gateway.clone();
            let ws_path = self.config.ws_path.clone();
            let auth_timeout = self.config.auth_timeout();
            tokio::spawn(async move {
                if let Err(e) = handle_socket(gateway, stream, peer, ws_path, auth_timeout).await {
                    debug!("[SERVER] Connection {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_socket(
    gateway: Arc<ChatGateway>,
    stream: TcpStream,
    peer: SocketAddr,
    ws_path: String,
    auth_timeout: Duration,
) -> anyhow::Result<()> {
    let mut handshake = Handshake::default();
    let expected_path = normalized(&ws_path).to_string();
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if normalized(req.uri().path()) != expected_path {
            let mut refusal = ErrorResponse::new(Some("unknown namespace".to_string()));
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            return Err(refusal);
        }
        handshake.token = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_from_header)
            .or_else(|| token_from_query(req.uri().query()));
        Ok(resp)
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let token = match handshake.token {
        Some(token) => Some(token),
        None => first_frame_token(&mut ws_receiver, auth_timeout).await,
    };
    let user_id = match gateway.authenticate(token.as_deref()) {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!("[WS:AUTH] Rejected {}: {}", peer, e);
            let frame = ServerEvent::error(e.client_message()).to_frame()?;
            let _ = ws_sender.send(Message::Text(frame)).await;
            let _ = ws_sender.close().await;
            return Ok(());
        }
    };
    info!("[WS:AUTH] {} authenticated as {}", peer, user_id);

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let connection_id = gateway.connect(&user_id, tx).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    error!("[WS:SEND] Could not encode {}: {}", event.name(), e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let reader_gateway = gateway.clone();
    let reader_connection = connection_id.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => reader_gateway.handle_frame(&reader_connection, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("[WS:RECV] Socket error on {}: {}", reader_connection, e);
                    break;
                }
            }
        }
    });

    // Whichever side stops first ends the connection.
    tokio::select! {
        _ = &mut send_task => receive_task.abort(),
        _ = &mut receive_task => send_task.abort(),
    }

    gateway.disconnect(&connection_id).await;
    Ok(())
}

/// Fallback for clients that cannot set handshake headers: `{"event":"auth","data":{"token":"..."}}`
/// as the first frame, within the auth timeout.
async fn first_frame_token(ws_receiver: &mut WsReader, auth_timeout: Duration) -> Option<String> {
    match tokio::time::timeout(auth_timeout, ws_receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => match ClientEvent::parse(&text) {
            Ok(ClientEvent::Auth { token }) => Some(token),
            _ => None,
        },
        Ok(_) => None,
        Err(_) => {
            debug!("[WS:AUTH] No auth frame within {:?}", auth_timeout);
            None
        }
    }
}
