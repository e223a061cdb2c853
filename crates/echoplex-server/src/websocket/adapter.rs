//! axum `WebSocket` → [`Connection`].
//!
//! Text and binary frames become [`Message`]s. A close frame or a transport
//! error ends the inbound sequence; pings and pongs are answered by axum and
//! never surface. Closing the outbound half sends a close frame.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::http::HeaderMap;
use echoplex_core::connection::{Inbound, Outbound};
use echoplex_core::{Connection, ConnectionError, Headers, Message};
use futures::{SinkExt, StreamExt, future};
use tracing::debug;

/// Wrap an upgraded socket.
pub fn connection(socket: WebSocket, id: String, headers: Headers) -> Connection {
    let (sink, stream) = socket.split();

    let inbound: Inbound = stream
        .take_while(|frame| {
            let more = match frame {
                Ok(WsMessage::Close(reason)) => {
                    debug!(?reason, "peer sent close");
                    false
                }
                Err(e) => {
                    debug!(error = %e, "transport error, ending inbound");
                    false
                }
                Ok(_) => true,
            };
            future::ready(more)
        })
        .filter_map(|frame| future::ready(frame.ok().and_then(from_ws)))
        .map(Ok)
        .boxed();

    let outbound: Outbound = Box::pin(
        sink.sink_map_err(|e| ConnectionError::Transport(e.to_string()))
            .with(|message: Message| future::ready(Ok::<_, ConnectionError>(to_ws(message)))),
    );

    Connection::new(id, headers, inbound, outbound)
}

/// Handshake headers as a case-insensitive map. Non-UTF-8 values are skipped.
pub fn headers_from(map: &HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .collect()
}

fn from_ws(frame: WsMessage) -> Option<Message> {
    match frame {
        WsMessage::Text(text) => Some(Message::Text(text.as_str().to_owned())),
        WsMessage::Binary(bytes) => Some(Message::Binary(bytes)),
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) => None,
    }
}

fn to_ws(message: Message) -> WsMessage {
    match message {
        Message::Text(text) => WsMessage::Text(text.into()),
        Message::Binary(bytes) => WsMessage::Binary(bytes),
    }
}
