//! Room signaling WebSocket
//!
//! Each socket is split: reads feed a [`SignalStream`], writes go through a
//! bounded queue drained by a dedicated writer task, so a slow client never
//! blocks a room broadcast.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use huddle_sfu::{Connection, Outbound, RoomId};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::http::{AppError, AppResult, AppState};
use crate::impls::{SignalStream, SignalingHandler};

/// Frames queued per connection before writes start failing
const OUTBOUND_BUFFER: usize = 1000;

/// Query parameters for the room WebSocket
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub room: Option<String>,
}

pub(crate) fn room_from_query(query: WsQuery) -> AppResult<RoomId> {
    query
        .room
        .map(|room| room.trim().to_string())
        .filter(|room| !room.is_empty())
        .map(RoomId::new)
        .ok_or_else(|| AppError::bad_request("Missing room query parameter"))
}

/// Read half of a socket as a [`SignalStream`]
pub(crate) struct WebSocketStream {
    receiver: SplitStream<WebSocket>,
}

#[async_trait]
impl SignalStream for WebSocketStream {
    async fn recv(&mut self) -> Option<Result<String, String>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(e)) => return Some(Err(format!("WebSocket error: {e}"))),
                // Ping/pong are answered by axum
                Some(Ok(_)) => {}
            }
        }
    }
}

/// Write half of a socket behind a bounded queue
pub(crate) struct WebSocketOutbound {
    sender: mpsc::Sender<String>,
}

#[async_trait]
impl Outbound for WebSocketOutbound {
    async fn send_text(&self, frame: String) -> huddle_sfu::Result<()> {
        // try_send so one slow client cannot stall the room's send lock
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => huddle_sfu::Error::Transport(
                "Channel full: WebSocket client too slow to consume messages".to_string(),
            ),
            mpsc::error::TrySendError::Closed(_) => huddle_sfu::Error::Transport(
                "Channel closed: WebSocket client disconnected".to_string(),
            ),
        })
    }
}

/// Split the socket and spawn its writer task
pub(crate) fn split_socket(socket: WebSocket) -> (WebSocketStream, Arc<WebSocketOutbound>) {
    let (mut sink, receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                debug!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
        let _ = sink.close().await;
    });

    (
        WebSocketStream { receiver },
        Arc::new(WebSocketOutbound { sender: tx }),
    )
}

/// Room signaling endpoint
///
/// <ws://host/ws?room={room_id}>
pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let room_id = room_from_query(query)?;

    Ok(ws
        .max_message_size(state.config.server.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, room_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, room_id: RoomId) {
    let (mut stream, outbound) = split_socket(socket);
    let connection = Connection::new(outbound);

    info!(
        room_id = %room_id,
        connection = %connection.id(),
        "WebSocket connection established"
    );

    let mut handler = SignalingHandler::new(
        room_id.clone(),
        connection,
        Arc::clone(&state.factory),
        Arc::clone(&state.sessions),
        state.config.sfu.renegotiation,
    );
    handler.run(&mut stream).await;

    info!(
        room_id = %room_id,
        connection = %handler.connection_id(),
        "WebSocket connection closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_room_from_query() {
        let room = room_from_query(WsQuery {
            room: Some("r1".to_string()),
        })
        .unwrap();
        assert_eq!(room.as_str(), "r1");
    }

    #[test]
    fn test_missing_room_is_bad_request() {
        for room in [None, Some(String::new()), Some("  ".to_string())] {
            let err = room_from_query(WsQuery { room }).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
            assert_eq!(err.message, "Missing room query parameter");
        }
    }

    #[tokio::test]
    async fn test_outbound_reports_closed_queue() {
        let (tx, rx) = mpsc::channel(1);
        let outbound = WebSocketOutbound { sender: tx };
        outbound.send_text("a".to_string()).await.unwrap();
        assert!(outbound.send_text("b".to_string()).await.is_err());
        drop(rx);
        assert!(outbound.send_text("c".to_string()).await.is_err());
    }
}
