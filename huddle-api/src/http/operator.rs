//! Operator WebSocket: pushes the room list on connect and on every room
//! creation or deletion

use axum::{
    extract::{ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};

use crate::http::websocket::split_socket;
use crate::http::AppState;
use crate::impls::run_operator;

pub async fn operator_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(state.config.server.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut stream, outbound) = split_socket(socket);
    run_operator(&state.factory, &mut stream, outbound).await;
}
