use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Extension, Path, Query,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::Deserialize;
use std::{borrow::Cow, sync::Arc, time::Duration};
use tokio::{sync::mpsc, time};

use crate::{
    config::Config,
    error::AppErr,
    protocol::{decode_client, ClientMessage},
    registry::{ConnId, Connection},
    session::{RoomSession, UpdateOutcome},
};

/// Close code sent when the requested room does not exist.
pub const CLOSE_ROOM_NOT_FOUND: u16 = 4004;
const CLOSE_INTERNAL: u16 = 1011;

#[derive(Deserialize)]
struct WsQuery {
    user: Option<String>,
}

pub fn router() -> Router {
    Router::new().route("/ws/:room_id", get(ws_handler))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(q): Query<WsQuery>,
    Extension(session): Extension<Arc<RoomSession>>,
    Extension(cfg): Extension<Config>,
) -> impl IntoResponse {
    ws.max_message_size(cfg.max_code_bytes + 64 * 1024)
        .on_upgrade(move |sock| user_ws(sock, room_id, q.user, session, cfg))
}

/* ---------------- per connection ---------------- */
async fn user_ws(sock: WebSocket, room: String, user: Option<String>, session: Arc<RoomSession>, cfg: Config) {
    let (sink, mut stream) = sock.split();
    let (tx, rx) = mpsc::channel::<String>(cfg.outbound_queue);
    let conn = Connection::new(tx);
    let mut writer = tokio::spawn(write_frames(sink, rx, cfg.send_timeout));

    let conn_id = match session.open(&room, conn).await {
        Ok(id) => id,
        Err(e) => {
            let (code, reason) = match &e {
                AppErr::NotFound(_) => {
                    tracing::warn!(room = %room, "connection rejected: room not found");
                    (CLOSE_ROOM_NOT_FOUND, "Room not found")
                }
                other => {
                    tracing::error!(room = %room, error = %other, "connection rejected");
                    (CLOSE_INTERNAL, "Internal error")
                }
            };
            // The rejected handle is dropped, so the writer drains and hands the sink back.
            if let Ok(mut sink) = writer.await {
                let frame = CloseFrame { code, reason: Cow::Borrowed(reason) };
                let _ = sink.send(Message::Close(Some(frame))).await;
            }
            return;
        }
    };

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(raw))) => {
                    handle_text(&session, &room, conn_id, user.as_deref(), &raw).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!(room = %room, conn = %conn_id, "binary frame ignored");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(room = %room, conn = %conn_id, error = %e, "socket error");
                    break;
                }
            },
            _ = &mut writer => {
                tracing::warn!(room = %room, conn = %conn_id, "peer stopped accepting frames");
                break;
            }
        }
    }

    session.close(&room, conn_id).await;
    writer.abort();
    tracing::info!(room = %room, conn = %conn_id, "connection closed");
}

async fn handle_text(session: &RoomSession, room: &str, conn_id: ConnId, user: Option<&str>, raw: &str) {
    let ClientMessage::CodeUpdate { code } = match decode_client(raw) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(room = %room, conn = %conn_id, error = %e, "frame dropped");
            return;
        }
    };

    match session.apply_update(room, conn_id, code, user).await {
        Ok(UpdateOutcome::Applied { delivered }) => {
            tracing::trace!(room = %room, conn = %conn_id, delivered, "update applied");
        }
        Ok(UpdateOutcome::RoomGone) => {
            tracing::warn!(room = %room, conn = %conn_id, "update for deleted room dropped");
        }
        Ok(UpdateOutcome::TooLarge { bytes }) => {
            tracing::debug!(room = %room, conn = %conn_id, bytes, "oversized update ignored");
        }
        Err(e) => tracing::error!(room = %room, conn = %conn_id, error = %e, "update failed"),
    }
}

/// Drains the connection's queue into the socket. Returns the sink once the
/// queue closes or a write fails or stalls past `deadline`.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
    deadline: Duration,
) -> SplitSink<WebSocket, Message> {
    while let Some(frame) = rx.recv().await {
        match time::timeout(deadline, sink.send(Message::Text(frame))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "socket write failed");
                break;
            }
            Err(_) => {
                tracing::warn!("socket write timed out");
                break;
            }
        }
    }
    sink
}
