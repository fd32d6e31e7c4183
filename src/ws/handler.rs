//! WebSocket upgrade handler

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::{AppState, GameHub};
use crate::session::PlayerId;
use crate::ws::protocol::{Frame, ServerMsg, WireFormat};

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Frame encoding for this connection, binary unless asked otherwise
    #[serde(default)]
    pub format: WireFormat,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<AppState>,
) -> Response {
    let addr = connect_info.map(|ConnectInfo(addr)| addr);
    debug!(addr = ?addr, format = ?query.format, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, addr, query.format, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    addr: Option<SocketAddr>,
    format: WireFormat,
    state: AppState,
) {
    let (ws_sink, ws_stream) = socket.split();

    let (player_id, outbound) = state.hub.connect(addr);
    info!(player_id = %player_id, addr = ?addr, "New WebSocket connection");

    run_session(player_id, format, &state.hub, ws_sink, ws_stream, outbound).await;

    state.hub.disconnect(&player_id);
    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Pump the player's queue to the socket and the socket into the hub.
///
/// Returns as soon as either direction ends.
async fn run_session(
    player_id: PlayerId,
    format: WireFormat,
    hub: &GameHub,
    ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    outbound: mpsc::Receiver<ServerMsg>,
) {
    let mut writer = tokio::spawn(write_loop(player_id, format, ws_sink, outbound));

    let reader = async {
        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Binary(payload)) => match WireFormat::decode_binary(&payload) {
                    Ok(msg) => hub.handle_message(&player_id, msg),
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to decode binary frame");
                        hub.invalid_message(&player_id);
                    }
                },
                Ok(Message::Text(text)) => match WireFormat::decode_text(&text) {
                    Ok(msg) => hub.handle_message(&player_id, msg),
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                        hub.invalid_message(&player_id);
                    }
                },
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(player_id = %player_id, "Client initiated close");
                    break;
                }
                Err(e) => {
                    error!(player_id = %player_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = reader => writer.abort(),
        _ = &mut writer => debug!(player_id = %player_id, "Writer finished first"),
    }
}

/// Drain the outbound queue onto the socket
async fn write_loop(
    player_id: PlayerId,
    format: WireFormat,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = outbound.recv().await {
        let frame = match format.encode(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                error!(player_id = %player_id, error = %e, "Failed to encode message");
                continue;
            }
        };

        let message = match frame {
            Frame::Binary(bytes) => Message::Binary(bytes),
            Frame::Text(text) => Message::Text(text),
        };
        if let Err(e) = ws_sink.send(message).await {
            debug!(player_id = %player_id, error = %e, "WebSocket send failed");
            break;
        }
    }

    let _ = ws_sink.close().await;
}
