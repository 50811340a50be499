//! Axum surface for the gateway: the websocket upgrade and a health probe.

use crate::gateway::RealtimeGateway;
use crate::messages::{ClientMessage, ServerMessage, ServerMessageKind};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

pub type GatewayState = Arc<RealtimeGateway>;

/// Build the gateway router.
pub fn router(gateway: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

async fn health() -> impl IntoResponse {
    axum::Json(json!({ "status": "ok" }))
}

async fn ws_upgrade(
    State(gateway): State<GatewayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers
        .get("origin")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if !gateway.origin_allowed(origin.as_deref()) {
        warn!(origin = origin.as_deref(), "Rejected websocket upgrade by origin");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(gateway, socket))
}

async fn handle_socket(gateway: GatewayState, socket: WebSocket) {
    let (connection_id, mut outbound) = gateway.registry().register().await;
    let (mut writer, mut reader) = socket.split();

    // Greet before anything else
    let connect = ServerMessage::new(
        ServerMessageKind::Connect,
        json!({ "connectionId": connection_id }),
    );
    if send_frame(&mut writer, &connect).await.is_err() {
        gateway.registry().unregister(connection_id).await;
        return;
    }

    // Writer task: drain the outbound queue onto the socket
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if send_frame(&mut writer, &message).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: parse frames and feed the gateway
    while let Some(frame) = reader.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "Socket read failed");
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                let replies = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        gateway
                            .handle_client_message(connection_id, message)
                            .await
                    }
                    Err(e) => vec![ServerMessage::alert(format!("malformed frame: {e}"))],
                };
                for reply in replies {
                    if !gateway.registry().send_to(connection_id, reply).await {
                        break;
                    }
                }
            }
            Message::Ping(_) | Message::Pong(_) => {
                gateway.registry().touch(connection_id).await;
            }
            Message::Close(_) => break,
            Message::Binary(_) => {
                let alert = ServerMessage::alert("binary frames are not supported");
                gateway.registry().send_to(connection_id, alert).await;
            }
        }
    }

    gateway.registry().unregister(connection_id).await;
    writer_task.abort();
    debug!(connection_id = %connection_id, "Connection closed");
}

async fn send_frame(
    writer: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message)
        .map_err(|e| axum::Error::new(std::io::Error::other(e)))?;
    writer.send(Message::Text(text.into())).await
}
