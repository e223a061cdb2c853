//! End-to-end integration tests using a real WebSocket client.

use std::net::SocketAddr;
use std::time::Duration;

use echoplex_core::connection::{Inbound, Outbound};
use echoplex_core::pipeline::{self, Completion, InboundLimit};
use echoplex_core::{Connection, ConnectionError, Headers, Message, Route};
use echoplex_server::{EchoplexServer, ServerConfig};
use futures::{SinkExt, StreamExt, future, stream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{CONTENT_TYPE, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a test server on an ephemeral port.
async fn boot_server(config: ServerConfig) -> (SocketAddr, EchoplexServer, JoinHandle<()>) {
    let server = EchoplexServer::new(config);
    let (addr, handle) = server.listen().await.unwrap();
    (addr, server, handle)
}

async fn boot_default() -> (SocketAddr, EchoplexServer, JoinHandle<()>) {
    boot_server(ServerConfig::default()).await
}

async fn connect(addr: SocketAddr, route: Route) -> WsStream {
    let url = format!("ws://{addr}{}", route.path());
    let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    ws
}

async fn connect_with_content_type(addr: SocketAddr, route: Route, value: &str) -> WsStream {
    let mut req = format!("ws://{addr}{}", route.path())
        .into_client_request()
        .unwrap();
    let _ = req
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_str(value).unwrap());
    let (ws, _) = timeout(TIMEOUT, connect_async(req)).await.unwrap().unwrap();
    ws
}

/// Read text frames until the server closes. Panics if it never does.
async fn read_until_close(ws: &mut WsStream) -> Vec<String> {
    let mut out = Vec::new();
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("server never closed") {
            Some(Ok(WsMessage::Text(t))) => out.push(t.as_str().to_owned()),
            Some(Ok(WsMessage::Binary(b))) => out.push(String::from_utf8_lossy(&b).into_owned()),
            Some(Ok(WsMessage::Close(_)) | Err(_)) | None => break,
            Some(Ok(_)) => {}
        }
    }
    out
}

async fn next_text(ws: &mut WsStream) -> String {
    loop {
        match timeout(TIMEOUT, ws.next()).await.unwrap() {
            Some(Ok(WsMessage::Text(t))) => return t.as_str().to_owned(),
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Client-side [`Connection`] over a tungstenite stream, so tests can drive
/// the same pipeline the server runs.
fn client_connection(ws: WsStream) -> Connection {
    let (sink, stream) = ws.split();
    let inbound: Inbound = stream
        .take_while(|frame| future::ready(matches!(frame, Ok(m) if !m.is_close())))
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(WsMessage::Text(t)) => Some(Message::Text(t.as_str().to_owned())),
                Ok(WsMessage::Binary(b)) => Some(Message::Binary(b)),
                _ => None,
            })
        })
        .map(Ok)
        .boxed();
    let outbound: Outbound = Box::pin(
        sink.sink_map_err(|e| ConnectionError::Transport(e.to_string()))
            .with(|m: Message| {
                future::ready(Ok::<_, ConnectionError>(match m {
                    Message::Text(t) => WsMessage::Text(t.into()),
                    Message::Binary(b) => WsMessage::Binary(b),
                }))
            }),
    );
    Connection::new("test-client", Headers::new(), inbound, outbound)
}

async fn wait_for_no_connections(server: &EchoplexServer) {
    timeout(TIMEOUT, async {
        while server.registry().connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connections never released");
}

// ── /server-to-client ──

#[tokio::test]
async fn server_to_client_sends_fixed_sequence_then_closes() {
    let (addr, _server, _handle) = boot_default().await;
    let mut ws = connect(addr, Route::ServerToClient).await;
    assert_eq!(read_until_close(&mut ws).await, ["Hello", "World", ":)"]);
}

#[tokio::test]
async fn reconnecting_behaves_identically() {
    let (addr, server, _handle) = boot_default().await;
    for _ in 0..3 {
        let mut ws = connect(addr, Route::ServerToClient).await;
        assert_eq!(read_until_close(&mut ws).await, ["Hello", "World", ":)"]);
    }
    wait_for_no_connections(&server).await;
}

// ── /duplex ──

#[tokio::test]
async fn duplex_doubles_integers_via_client_pipeline() {
    let (addr, _server, _handle) = boot_default().await;
    let mut conn = client_connection(connect(addr, Route::Duplex).await);

    let outbound = stream::iter(["1", "2", "3"].map(Message::text));
    let cancel = CancellationToken::new();
    let report = timeout(
        TIMEOUT,
        pipeline::run_duplex(&mut conn, outbound, InboundLimit::Bounded(3), &cancel),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.completion, Completion::LimitReached);
    assert_eq!(report.observed_text(), ["2", "4", "6"]);
    assert_eq!(report.sent, 3);
    let _ = conn.close().await;
}

#[tokio::test]
async fn duplex_echoes_in_arrival_order() {
    let (addr, _server, _handle) = boot_default().await;
    let mut ws = connect(addr, Route::Duplex).await;
    for n in ["-4", "0", "21"] {
        ws.send(WsMessage::Text(n.into())).await.unwrap();
    }
    assert_eq!(read_until_close(&mut ws).await, ["-8", "0", "42"]);
}

#[tokio::test]
async fn duplex_non_integer_closes_without_echo() {
    let (addr, server, _handle) = boot_default().await;
    let mut ws = connect(addr, Route::Duplex).await;
    ws.send(WsMessage::Text("abc".into())).await.unwrap();
    assert!(read_until_close(&mut ws).await.is_empty());
    wait_for_no_connections(&server).await;
}

#[tokio::test]
async fn duplex_peer_close_before_limit_is_clean() {
    let (addr, server, _handle) = boot_default().await;
    let mut ws = connect(addr, Route::Duplex).await;
    ws.send(WsMessage::Text("5".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "10");
    ws.close(None).await.unwrap();
    wait_for_no_connections(&server).await;
}

// ── /duplex-infinite ──

#[tokio::test]
async fn duplex_infinite_uppercases_and_stays_open() {
    let (addr, server, _handle) = boot_default().await;
    let mut ws = connect(addr, Route::DuplexInfinite).await;
    for word in ["hello", "world", ":)"] {
        ws.send(WsMessage::Text(word.into())).await.unwrap();
    }
    for expected in ["HELLO", "WORLD", ":)"] {
        assert_eq!(next_text(&mut ws).await, expected);
    }

    // Nothing more arrives and the connection is not closed.
    assert!(timeout(QUIET, ws.next()).await.is_err());
    assert_eq!(server.registry().connection_count(), 1);

    ws.close(None).await.unwrap();
    wait_for_no_connections(&server).await;
}

#[tokio::test]
async fn shutdown_cancels_infinite_stream() {
    let (addr, server, handle) = boot_default().await;
    let mut ws = connect(addr, Route::DuplexInfinite).await;
    ws.send(WsMessage::Text("a".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "A");

    let ((), frames) = tokio::join!(server.shutdown_gracefully(handle), read_until_close(&mut ws));
    assert!(frames.is_empty());
    assert_eq!(server.registry().connection_count(), 0);
}

// ── /header ──

#[tokio::test]
async fn header_text_plain() {
    let (addr, _server, _handle) = boot_default().await;
    let mut ws = connect_with_content_type(addr, Route::Header, "text/plain").await;
    assert_eq!(read_until_close(&mut ws).await, ["Hello World!"]);
}

#[tokio::test]
async fn header_application_json() {
    let (addr, _server, _handle) = boot_default().await;
    let mut ws = connect_with_content_type(addr, Route::Header, "application/json").await;
    assert_eq!(
        read_until_close(&mut ws).await,
        [r#"{"message":"Hello World!"}"#]
    );
}

#[tokio::test]
async fn header_absent_defaults_to_text() {
    let (addr, _server, _handle) = boot_default().await;
    let mut ws = connect(addr, Route::Header).await;
    assert_eq!(read_until_close(&mut ws).await, ["Hello World!"]);
}

// ── /client-to-server ──

#[tokio::test]
async fn client_to_server_relays_once_and_closes() {
    let (addr, server, _handle) = boot_default().await;
    let mut sub = server.relay().subscribe();

    let mut ws = connect(addr, Route::ClientToServer).await;
    ws.send(WsMessage::Binary(b"Awesome".to_vec().into()))
        .await
        .unwrap();
    assert!(read_until_close(&mut ws).await.is_empty());

    let relayed = timeout(TIMEOUT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(relayed, "Awesome");
    assert_eq!(sub.try_recv(), None);
}

#[tokio::test]
async fn relay_accumulates_across_connections() {
    let (addr, server, _handle) = boot_default().await;
    for text in ["one", "two"] {
        let mut ws = connect(addr, Route::ClientToServer).await;
        ws.send(WsMessage::Text(text.into())).await.unwrap();
        let _ = read_until_close(&mut ws).await;
    }

    // No subscriber was attached: both are waiting in the backlog.
    let mut sub = server.relay().subscribe();
    assert_eq!(sub.try_recv().as_deref(), Some("one"));
    assert_eq!(sub.try_recv().as_deref(), Some("two"));
    assert_eq!(server.relay().stats().emitted, 2);
}

// ── limits ──

#[tokio::test]
async fn connection_limit_refuses_upgrade() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let (addr, _server, _handle) = boot_server(config).await;
    let _held = connect(addr, Route::DuplexInfinite).await;

    let url = format!("ws://{addr}{}", Route::Duplex.path());
    let err = connect_async(url).await.unwrap_err();
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 503),
        other => panic!("expected HTTP 503, got {other:?}"),
    }
}

// ── /health ──

#[tokio::test]
async fn health_reports_live_connections() {
    let (addr, server, _handle) = boot_default().await;
    let ws = connect(addr, Route::DuplexInfinite).await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["live"][0]["route"], "duplex-infinite");
    assert!(body["relay"]["emitted"].is_number());

    drop(ws);
    wait_for_no_connections(&server).await;
}
