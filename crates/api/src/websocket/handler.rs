//! WebSocket handler for Axum
//!
//! Authenticates the upgrade request, registers the connection, runs
//! transport keepalive and tears the connection down when the peer closes,
//! the transport fails or a newer connection supersedes it.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use murmur_shared::{ClientEvent, Identity, ServerEvent, CLOSE_KEEPALIVE_TIMEOUT, CLOSE_SUPERSEDED};
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::auth::extract_token;
use crate::error::ApiResult;
use crate::state::AppState;

use super::{
    connection::ConnectionHandle,
    registry::{AddOutcome, RemoveOutcome},
};

/// How long the writer gets to flush a close frame
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    /// Peer sent a close frame
    ClientClosed,
    /// A newer connection for the same user took over
    Superseded,
    /// No traffic within the keepalive timeout
    KeepaliveTimeout,
    /// Stream error or end of stream without a close frame
    TransportError,
}

impl Disconnect {
    fn close_frame(self) -> Option<CloseFrame<'static>> {
        let (code, reason) = match self {
            Disconnect::ClientClosed => (1000, "bye"),
            Disconnect::Superseded => (CLOSE_SUPERSEDED, "superseded"),
            Disconnect::KeepaliveTimeout => (CLOSE_KEEPALIVE_TIMEOUT, "keepalive timeout"),
            Disconnect::TransportError => return None,
        };
        Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })
    }

    /// Abnormal endings keep the registry entry for the grace window so a
    /// quick reconnect does not flicker offline.
    fn is_abnormal(self) -> bool {
        matches!(self, Disconnect::KeepaliveTimeout | Disconnect::TransportError)
    }
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
///
/// The bearer token comes from the `Authorization` header, or the `token`
/// query parameter as a fallback. Rejected attempts never upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let token = extract_token(&headers, params.token.as_deref());
    let user_id = state.authenticator.authenticate(token).await?;

    tracing::info!(user_id = %user_id, "WebSocket connection upgrade requested");

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user_id, state)))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Identity, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    // Events from the dispatcher, and raw control frames from this task
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (ctl_tx, mut ctl_rx) = mpsc::unbounded_channel::<Message>();

    let conn = Arc::new(ConnectionHandle::new(user_id.clone(), tx));
    let session_id = conn.session_id;
    let added = register(&state, &conn);

    if added.came_online {
        state.dispatcher.broadcast_presence(&user_id, true);
    }

    // Spawn task to send messages to client
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    match event.to_json() {
                        Ok(json) => {
                            if sink.send(Message::Text(json)).await.is_err() {
                                break; // Connection closed
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                        }
                    }
                }
                Some(frame) = ctl_rx.recv() => {
                    let closing = matches!(frame, Message::Close(_));
                    if sink.send(frame).await.is_err() || closing {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    let ping_interval = state.config.ping_interval();
    let keepalive_timeout = state.config.keepalive_timeout();
    let mut ping_ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    let mut last_seen = Instant::now();

    let reason = loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, error = %e, "WebSocket transport error");
                        break Disconnect::TransportError;
                    }
                    None => break Disconnect::TransportError,
                };

                last_seen = Instant::now();
                state.registry.touch(&conn);

                match msg {
                    Message::Text(text) => handle_client_text(&conn, &text),
                    Message::Close(_) => {
                        tracing::info!(session_id = %session_id, "WebSocket close frame received");
                        break Disconnect::ClientClosed;
                    }
                    Message::Ping(_) | Message::Pong(_) => {
                        // Axum answers pings automatically
                    }
                    Message::Binary(_) => {} // Ignore binary messages
                }
            }
            _ = ping_ticker.tick() => {
                if last_seen.elapsed() >= keepalive_timeout {
                    tracing::warn!(
                        session_id = %session_id,
                        user_id = %user_id,
                        "No pong within keepalive timeout"
                    );
                    break Disconnect::KeepaliveTimeout;
                }
                if ctl_tx.send(Message::Ping(Vec::new())).is_err() {
                    break Disconnect::TransportError;
                }
            }
            _ = conn.superseded() => break Disconnect::Superseded,
        }
    };

    // Cleanup on disconnect
    tracing::info!(
        session_id = %session_id,
        user_id = %user_id,
        reason = ?reason,
        "WebSocket connection closing"
    );

    match reason.close_frame() {
        Some(frame) => {
            let _ = ctl_tx.send(Message::Close(Some(frame)));
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task)
                .await
                .is_err()
            {
                send_task.abort();
            }
        }
        None => send_task.abort(),
    }

    if reason.is_abnormal() {
        schedule_removal(state, conn);
    } else {
        release(&state, &conn);
    }
}

/// Queue the handshake ack, then make the handle visible for delivery.
///
/// Once the handle is in the registry any dispatch or presence broadcast may
/// write to it, so the ack has to be in the channel first.
fn register(state: &AppState, conn: &Arc<ConnectionHandle>) -> AddOutcome {
    let _ = conn.send(ServerEvent::Connected {
        session_id: conn.session_id,
        connected_at: conn.connected_at,
    });
    state.registry.add(Arc::clone(conn))
}

/// Handle a text frame from the client
fn handle_client_text(conn: &ConnectionHandle, text: &str) {
    match ClientEvent::from_json(text) {
        Ok(ClientEvent::Ping) => {
            let _ = conn.send(ServerEvent::Pong {
                timestamp: OffsetDateTime::now_utc(),
            });
        }
        Err(e) => {
            tracing::warn!(
                session_id = %conn.session_id,
                error = %e,
                message = %text,
                "Failed to parse client event"
            );
            let _ = conn.send(ServerEvent::Error {
                message: "Invalid event format".to_string(),
            });
        }
    }
}

/// Remove the handle now and announce the user offline if it was authoritative
fn release(state: &AppState, conn: &ConnectionHandle) {
    if state.registry.remove(conn) == RemoveOutcome::WentOffline {
        state.dispatcher.broadcast_presence(&conn.user_id, false);
    }
}

/// Remove the handle after the grace window; a no-op if a newer
/// connection has taken over by then.
fn schedule_removal(state: AppState, conn: Arc<ConnectionHandle>) {
    let grace = state.config.disconnect_grace();
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        release(&state, &conn);
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_state() -> AppState {
        AppState::new(Config {
            bind_address: "127.0.0.1:0".to_string(),
            jwt_secret: "handler-test-secret-at-least-32-characters".to_string(),
            jwt_leeway_secs: 0,
            internal_api_key: None,
            known_identities: None,
            handshake_timeout_ms: 1000,
            ping_interval_secs: 1,
            keepalive_timeout_secs: 2,
            disconnect_grace_ms: 50,
            heartbeat_interval_secs: 300,
            heartbeat_stale_after_secs: 600,
        })
    }

    #[test]
    fn test_close_frames() {
        assert_eq!(
            Disconnect::Superseded.close_frame().map(|f| f.code),
            Some(CLOSE_SUPERSEDED)
        );
        assert_eq!(
            Disconnect::KeepaliveTimeout.close_frame().map(|f| f.code),
            Some(CLOSE_KEEPALIVE_TIMEOUT)
        );
        assert!(Disconnect::TransportError.close_frame().is_none());
    }

    #[test]
    fn test_only_abnormal_endings_use_grace() {
        assert!(Disconnect::KeepaliveTimeout.is_abnormal());
        assert!(Disconnect::TransportError.is_abnormal());
        assert!(!Disconnect::ClientClosed.is_abnormal());
        assert!(!Disconnect::Superseded.is_abnormal());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ack_precedes_concurrent_broadcasts() {
        let state = test_state();
        let stop = Arc::new(AtomicBool::new(false));

        // Another user keeps coming online while u1 registers
        let broadcaster = {
            let state = state.clone();
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                while !stop.load(Ordering::Relaxed) {
                    state
                        .dispatcher
                        .broadcast_presence(&Identity::from("u2"), true);
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..200 {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let conn = Arc::new(ConnectionHandle::new(Identity::from("u1"), tx));
            let added = register(&state, &conn);
            assert!(added.came_online);

            match rx.try_recv() {
                Ok(ServerEvent::Connected { session_id, .. }) => {
                    assert_eq!(session_id, conn.session_id)
                }
                other => panic!("Expected Connected first, got {:?}", other),
            }

            tokio::task::yield_now().await;
            state.registry.remove(&conn);
        }

        stop.store(true, Ordering::Relaxed);
        broadcaster.await.unwrap();
    }
}
