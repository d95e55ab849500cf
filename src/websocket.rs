//! WebSocket echo channel for `/echo`
//!
//! The upgrade handshake is answered directly from the hyper service; once
//! the connection is switched, a spawned task runs the echo loop over the
//! upgraded IO until the peer closes or the connection fails.

use crate::error::{json_error_response, ErrorCode};
use futures::{SinkExt, StreamExt};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Message, Role};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

/// Prefix prepended to every echoed message
pub const ECHO_PREFIX: &str = "Message text was: ";

/// Browser client served on plain `GET /echo`
pub const ECHO_PAGE: &str = r#"<!DOCTYPE html>
<html>
    <head>
        <title>Chat</title>
    </head>
    <body>
        <h1>WebSocket Chat</h1>
        <form action="" onsubmit="sendMessage(event)">
            <input type="text" id="messageText" autocomplete="off"/>
            <button>Send</button>
        </form>
        <ul id='messages'>
        </ul>
        <script>
            var ws = new WebSocket(window.location.href.replace("http", "ws"));
            ws.onmessage = function(event) {
                var messages = document.getElementById('messages')
                var message = document.createElement('li')
                var content = document.createTextNode(event.data)
                message.appendChild(content)
                messages.appendChild(message)
            };
            function sendMessage(event) {
                var input = document.getElementById("messageText")
                ws.send(input.value)
                input.value = ''
                event.preventDefault()
            }
        </script>
    </body>
</html>
"#;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    #[error("unsupported Sec-WebSocket-Version {0:?}, expected 13")]
    UnsupportedVersion(String),
}

/// Check if a request is a WebSocket upgrade request
pub fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    let has_upgrade_connection = req
        .headers()
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().contains("upgrade"))
        .unwrap_or(false);

    let wants_websocket = req
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    has_upgrade_connection && wants_websocket
}

/// Validate the handshake headers and compute `Sec-WebSocket-Accept`
pub fn accept_key<B>(req: &Request<B>) -> Result<String, HandshakeError> {
    let version = req
        .headers()
        .get(SEC_WEBSOCKET_VERSION)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string())
        .unwrap_or_default();
    if version != "13" {
        return Err(HandshakeError::UnsupportedVersion(version));
    }

    let key = req
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .ok_or(HandshakeError::MissingKey)?;
    Ok(derive_accept_key(key.as_bytes()))
}

/// Text sent back for an inbound message
pub fn echo_reply(text: &str) -> String {
    format!("{}{}", ECHO_PREFIX, text)
}

/// Answer a WebSocket upgrade on `/echo` and spawn the echo loop
pub fn handle_upgrade(
    req: Request<Incoming>,
    client_addr: SocketAddr,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let accept = match accept_key(&req) {
        Ok(accept) => accept,
        Err(e) => {
            debug!(addr = %client_addr, error = %e, "Rejected WebSocket handshake");
            return json_error_response(ErrorCode::InvalidUpgrade, e.to_string());
        }
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
                debug!(addr = %client_addr, "WebSocket connection open");
                echo_loop(ws, client_addr).await;
            }
            Err(e) => {
                debug!(addr = %client_addr, error = %e, "Failed to upgrade client connection");
            }
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "Upgrade")
        .header(UPGRADE, "websocket")
        .header(SEC_WEBSOCKET_ACCEPT, accept)
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .expect("valid response builder")
}

/// Echo text messages until the peer closes or the connection fails
pub async fn echo_loop<S>(mut ws: WebSocketStream<S>, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(addr = %peer, text = %text.as_str(), "WebSocket received text");
                if let Err(e) = ws.send(Message::Text(echo_reply(text.as_str()).into())).await {
                    debug!(addr = %peer, error = %e, "WebSocket send failed");
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(addr = %peer, error = %e, "WebSocket connection closed with error");
                break;
            }
        }
    }
    debug!(addr = %peer, "WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn upgrade_request() -> http::request::Builder {
        Request::builder()
            .uri("/echo")
            .header("connection", "keep-alive, Upgrade")
            .header("upgrade", "websocket")
    }

    #[test]
    fn test_is_upgrade_request() {
        let req = upgrade_request().body(()).unwrap();
        assert!(is_upgrade_request(&req));

        let plain = Request::builder().uri("/echo").body(()).unwrap();
        assert!(!is_upgrade_request(&plain));

        let h2c = Request::builder()
            .uri("/echo")
            .header("connection", "Upgrade")
            .header("upgrade", "h2c")
            .body(())
            .unwrap();
        assert!(!is_upgrade_request(&h2c));
    }

    #[test]
    fn test_accept_key_rfc_sample() {
        let req = upgrade_request()
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .header("sec-websocket-version", "13")
            .body(())
            .unwrap();
        assert_eq!(accept_key(&req).unwrap(), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_accept_key_rejects_bad_handshake() {
        let missing_key = upgrade_request()
            .header("sec-websocket-version", "13")
            .body(())
            .unwrap();
        assert_eq!(accept_key(&missing_key), Err(HandshakeError::MissingKey));

        let old_version = upgrade_request()
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .header("sec-websocket-version", "8")
            .body(())
            .unwrap();
        assert_eq!(
            accept_key(&old_version),
            Err(HandshakeError::UnsupportedVersion("8".to_string()))
        );
    }

    #[test]
    fn test_echo_reply_preserves_text() {
        assert_eq!(echo_reply("hi"), "Message text was: hi");
        assert_eq!(echo_reply("  spaced \n"), "Message text was:   spaced \n");
        assert_eq!(echo_reply(""), "Message text was: ");
    }

    #[tokio::test]
    async fn test_echo_loop_over_duplex() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let handle = tokio::spawn(echo_loop(server, peer()));

        client.send(Message::Text("hi".into())).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply, Message::Text("Message text was: hi".into()));

        // Binary frames are not echoed; the next reply answers the next text
        client.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
        client.send(Message::Text("héllo ✓".into())).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply, Message::Text("Message text was: héllo ✓".into()));

        client.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_echo_loop_ends_when_peer_drops() {
        let (client_io, server_io) = tokio::io::duplex(1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let handle = tokio::spawn(echo_loop(server, peer()));

        drop(client_io);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
