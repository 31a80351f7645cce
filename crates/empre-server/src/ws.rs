//! WebSocket lifecycle for one chat client, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::actor::HubHandle;
use crate::auth::AuthUser;
use crate::config::ServerConfig;
use crate::server::AppState;
use crate::session::ClientSession;

/// `GET /api/chat/ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Response {
    let config = Arc::clone(&state.config);
    ws.max_message_size(config.max_message_size)
        .max_frame_size(config.max_message_size)
        .on_upgrade(move |socket| {
            let (session, rx) = ClientSession::new(user_id, config.max_send_queue);
            run_connection(socket, session, rx, state.hub_handle, config, state.shutdown)
        })
}

/// Why the writer pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    /// The session channel closed: superseded, evicted or unregistered.
    SessionClosed,
    TimedOut,
    SocketError,
    Shutdown,
}

#[instrument(skip_all, fields(conn_id = %session.id, user_id = %session.user_id))]
pub async fn run_connection(
    socket: WebSocket,
    session: Arc<ClientSession>,
    rx: mpsc::Receiver<Arc<String>>,
    hub: HubHandle,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    if hub.register(Arc::clone(&session)).await.is_err() {
        warn!("hub is not running, refusing connection");
        return;
    }
    info!("client connected");

    let (ws_tx, mut ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_pump(
        ws_tx,
        rx,
        Arc::clone(&session),
        Duration::from_secs(config.heartbeat_interval_secs),
        Duration::from_secs(config.heartbeat_timeout_secs),
        shutdown.clone(),
    ));

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        session.mark_alive();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("client closed the socket");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "socket read failed");
                        break;
                    }
                };
                session.mark_alive();
                if hub.submit(&session, text).await.is_err() {
                    warn!("hub stopped, closing connection");
                    break;
                }
            }
            exit = &mut writer => {
                debug!(?exit, "writer stopped");
                break;
            }
        }
    }

    if !writer.is_finished() {
        writer.abort();
    }
    let _ = hub.unregister(Arc::clone(&session)).await;
    info!(
        dropped = session.drop_count(),
        duration_secs = session.age().as_secs(),
        "client disconnected"
    );
}

async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<String>>,
    session: Arc<ClientSession>,
    interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) -> WriterExit {
    let mut ping = tokio::time::interval(interval);
    // First tick fires immediately.
    let _ = ping.tick().await;

    let exit = loop {
        tokio::select! {
            payload = rx.recv() => match payload {
                Some(payload) => {
                    let text = payload.as_str().to_owned();
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break WriterExit::SocketError;
                    }
                }
                None => break WriterExit::SessionClosed,
            },
            _ = ping.tick() => {
                if !session.check_alive() && session.last_pong_elapsed() > timeout {
                    warn!(?timeout, "client unresponsive, disconnecting");
                    break WriterExit::TimedOut;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break WriterExit::SocketError;
                }
            }
            () = shutdown.cancelled() => break WriterExit::Shutdown,
        }
    };

    if exit != WriterExit::SocketError {
        let reason = match exit {
            WriterExit::TimedOut => "heartbeat timeout",
            WriterExit::Shutdown => "server shutting down",
            _ => "session closed",
        };
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: axum::extract::ws::close_code::AWAY,
                reason: reason.into(),
            })))
            .await;
    }
    exit
}
