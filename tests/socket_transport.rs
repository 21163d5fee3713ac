mod common;

use common::{mint, Harness};
use futures_util::{SinkExt, StreamExt};
use ruggine_messaging::common::protocol::ServerEvent;
use ruggine_messaging::server::config::ServerConfig;
use ruggine_messaging::server::connection::Server;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

async fn start(h: &Harness) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        auth_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let server = Server::new(h.gateway.clone(), config);
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

async fn next_event<S>(stream: &mut S) -> Option<ServerEvent>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), stream.next()).await.ok()??;
        match frame.ok()? {
            Message::Text(text) => return ServerEvent::parse(&text).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn bearer_header_authenticates() {
    let h = Harness::new().await;
    let addr = start(&h).await;

    let mut request = format!("ws://{}/messaging", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("authorization", HeaderValue::from_str(&format!("Bearer {}", mint("x"))).unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    assert_eq!(next_event(&mut ws).await, Some(ServerEvent::Authenticated { user_id: "x".into() }));
    assert!(h.gateway.presence().is_online("x").await.unwrap());

    ws.send(Message::Text(r#"{"event":"heartbeat"}"#.into())).await.unwrap();
    assert_eq!(next_event(&mut ws).await, Some(ServerEvent::HeartbeatAck));

    ws.close(None).await.unwrap();
    // Cleanup runs on the server side once the close is processed.
    for _ in 0..50 {
        if !h.gateway.presence().is_online("x").await.unwrap() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!h.gateway.presence().is_online("x").await.unwrap());
}

#[tokio::test]
async fn query_token_and_first_frame_auth_are_accepted() {
    let h = Harness::new().await;
    let addr = start(&h).await;

    let url = format!("ws://{}/messaging?token={}", addr, mint("y"));
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    assert_eq!(next_event(&mut ws).await, Some(ServerEvent::Authenticated { user_id: "y".into() }));

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/messaging", addr)).await.unwrap();
    let auth = format!(r#"{{"event":"auth","data":{{"token":"{}"}}}}"#, mint("z"));
    ws.send(Message::Text(auth)).await.unwrap();
    assert_eq!(next_event(&mut ws).await, Some(ServerEvent::Authenticated { user_id: "z".into() }));
}

#[tokio::test]
async fn invalid_token_is_refused_and_closed() {
    let h = Harness::new().await;
    let addr = start(&h).await;

    let url = format!("ws://{}/messaging?token=forged", addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    assert!(matches!(next_event(&mut ws).await, Some(ServerEvent::Error { .. })));
    assert_eq!(next_event(&mut ws).await, None);
    assert_eq!(h.gateway.stats().await.connections, 0);
}

#[tokio::test]
async fn silent_client_times_out() {
    let h = Harness::new().await;
    let addr = start(&h).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/messaging", addr)).await.unwrap();
    assert!(matches!(next_event(&mut ws).await, Some(ServerEvent::Error { .. })));
}

#[tokio::test]
async fn other_namespaces_are_not_found() {
    let h = Harness::new().await;
    let addr = start(&h).await;
    let url = format!("ws://{}/chat?token={}", addr, mint("x"));
    assert!(tokio_tungstenite::connect_async(url).await.is_err());
}
