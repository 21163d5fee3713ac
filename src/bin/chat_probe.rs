// Manual WebSocket probe against a running gateway.
//
//   chat_probe <token> <thread_id> [message]
//
// Connects with the token as a bearer header, joins the thread, optionally sends
// `message`, then prints every event until the server closes or Ctrl+C.
use futures_util::{SinkExt, StreamExt};
use ruggine_messaging::common::models::MessageContent;
use ruggine_messaging::common::protocol::{ClientEvent, ServerEvent};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut args = std::env::args().skip(1);
    let (Some(token), Some(thread_id)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: chat_probe <token> <thread_id> [message]");
    };
    let body = args.next();

    let host = std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("SERVER_PORT").unwrap_or_else(|_| "5001".to_string());
    let path = std::env::var("WS_PATH").unwrap_or_else(|_| "/messaging".to_string());
    let url = Url::parse(&format!("ws://{}:{}{}", host, port, path))?;
    println!("Connecting to {}", url);

    let mut request = url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert("authorization", HeaderValue::from_str(&format!("Bearer {}", token))?);
    let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
    let (mut sender, mut receiver) = ws_stream.split();

    let mut outgoing = vec![ClientEvent::JoinThread { thread_id: thread_id.clone() }];
    if let Some(body) = body {
        outgoing.push(ClientEvent::send_message(&thread_id, MessageContent { body, ..Default::default() }));
    }
    for event in outgoing {
        println!(">> {}", event.name());
        sender.send(Message::Text(serde_json::to_string(&event)?)).await?;
    }

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => match ServerEvent::parse(&text) {
                    Ok(event) => println!("<< {} {}", event.name(), text),
                    Err(_) => println!("<< (unrecognised) {}", text),
                },
                Some(Ok(Message::Close(_))) | None => {
                    println!("connection closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    println!("socket error: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                let _ = sender.close().await;
                break;
            }
        }
    }
    Ok(())
}
