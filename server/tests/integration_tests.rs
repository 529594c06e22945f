//! Integration tests for the VisionRTC server.
//!
//! Each test binds an ephemeral port and talks to the server over real
//! HTTP and WebSocket connections. Peer transports are mocked so no
//! network beyond loopback is needed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use visionrtc_server::{AppState, ServerConfig, ServerResult};
use visionrtc_webrtc::testing::{MockTransportFactory, VIDEO_OFFER};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    task: JoinHandle<ServerResult<()>>,
}

async fn start_test_server() -> TestServer {
    let config = ServerConfig::default();
    let webrtc = Arc::new(config.webrtc.to_webrtc_config());
    let state = Arc::new(
        AppState::with_transports(&config, webrtc, Arc::new(MockTransportFactory::new()))
            .unwrap(),
    );

    let listener = visionrtc_server::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let server_state = state.clone();
    let task = tokio::spawn(async move {
        let origins = vec!["*".to_string()];
        visionrtc_server::serve(listener, server_state, &origins).await
    });

    TestServer { addr, state, task }
}

/// Minimal HTTP/1.1 GET returning (status, body)
async fn http_get(addr: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8_lossy(&raw).to_string();

    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

async fn connect_ws(addr: SocketAddr) -> Ws {
    let url = format!("ws://{}/ws", addr);
    let (stream, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket connect failed");
    stream
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next text frame as JSON, or `None` on timeout
async fn recv_json(ws: &mut Ws, wait: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) | Err(_) => return None,
        }
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = start_test_server().await;

    let (status, body) = http_get(server.addr, "/health").await;
    assert_eq!(status, 200);

    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 0);
    assert_eq!(health["sessions"], 0);
}

#[tokio::test]
async fn test_malformed_message_gets_error() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr).await;

    ws.send(Message::Text("definitely not json".into())).await.unwrap();
    let reply = recv_json(&mut ws, Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply["error"], "MalformedMessage");
    assert!(reply["detail"].as_str().is_some());

    // Connection survives and still answers
    send_json(&mut ws, json!({ "offer": VIDEO_OFFER })).await;
    let reply = recv_json(&mut ws, Duration::from_secs(2)).await.unwrap();
    assert!(reply["answer"].as_str().unwrap().contains("m=video"));
}

#[tokio::test]
async fn test_answers_addressed_per_client() {
    let server = start_test_server().await;
    let mut first = connect_ws(server.addr).await;
    let mut second = connect_ws(server.addr).await;

    send_json(&mut first, json!({ "offer": VIDEO_OFFER })).await;
    let reply = recv_json(&mut first, Duration::from_secs(2)).await.unwrap();
    assert!(reply.get("answer").is_some());
    assert!(recv_json(&mut second, Duration::from_millis(200)).await.is_none());

    send_json(&mut second, json!({ "offer": { "sdp": VIDEO_OFFER, "type": "offer" } })).await;
    let reply = recv_json(&mut second, Duration::from_secs(2)).await.unwrap();
    assert!(reply.get("answer").is_some());
    assert!(recv_json(&mut first, Duration::from_millis(200)).await.is_none());

    assert_eq!(server.state.hub.manager().session_count().await, 2);
    assert_eq!(server.state.hub.connection_count(), 2);
}

#[tokio::test]
async fn test_sessions_endpoint() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr).await;

    send_json(&mut ws, json!({ "offer": VIDEO_OFFER })).await;
    recv_json(&mut ws, Duration::from_secs(2)).await.unwrap();

    let (status, body) = http_get(server.addr, "/sessions").await;
    assert_eq!(status, 200);
    let listing: Value = serde_json::from_str(&body).unwrap();
    let sessions = listing["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["state"], "answer_created");
    assert_eq!(listing["stats"]["answers_created"], 1);

    let client_id = sessions[0]["client_id"].as_str().unwrap().to_string();
    let (status, body) = http_get(server.addr, &format!("/sessions/{}", client_id)).await;
    assert_eq!(status, 200);
    let info: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(info["client_id"], client_id);

    let (status, _) = http_get(server.addr, &format!("/sessions/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, 404);
    let (status, _) = http_get(server.addr, "/sessions/not-a-uuid").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_socket_close_removes_session() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr).await;

    send_json(&mut ws, json!({ "offer": VIDEO_OFFER })).await;
    recv_json(&mut ws, Duration::from_secs(2)).await.unwrap();
    assert_eq!(server.state.hub.manager().session_count().await, 1);

    ws.close(None).await.unwrap();
    drop(ws);

    let manager = server.state.hub.manager().clone();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while manager.session_count().await > 0 || server.state.hub.connection_count() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "session was not torn down");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr).await;

    send_json(&mut ws, json!({ "offer": VIDEO_OFFER })).await;
    recv_json(&mut ws, Duration::from_secs(2)).await.unwrap();

    server.state.shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .expect("server did not stop")
        .unwrap();
    tokio_test::assert_ok!(result);

    // Open sockets observe the same token and tear their sessions down
    let manager = server.state.hub.manager().clone();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while manager.session_count().await > 0 {
        assert!(tokio::time::Instant::now() < deadline, "session survived shutdown");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
