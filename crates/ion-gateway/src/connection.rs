use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ion_auth::{TokenService, token_from_headers};
use ion_types::events::{ClientCommand, ServerEvent};

use crate::dispatcher::Dispatcher;
use crate::session::{Session, handle_command};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// State the `/gateway` route needs.
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub tokens: TokenService,
}

/// `GET /gateway`: verifies the `token` cookie of the handshake and only then
/// upgrades. Any credential failure refuses the upgrade with 401, so a
/// rejected client never gets a socket on which events could be processed.
pub async fn gateway_upgrade(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = token_from_headers(&headers);
    let claims = match state.tokens.verify(token.as_deref()) {
        Ok(claims) => claims,
        Err(e) => {
            warn!("Gateway handshake refused: {}", e);
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let user_id = claims.sub;
    if let Err(e) = state.dispatcher.lookup_user(user_id).await {
        warn!("Gateway handshake refused for {}: {}", user_id, e);
        return (StatusCode::UNAUTHORIZED, "unknown user").into_response();
    }

    let dispatcher = state.dispatcher;
    ws.on_upgrade(move |socket| handle_connection(socket, dispatcher, user_id))
}

/// Drives one authenticated WebSocket until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, user_id: Uuid) {
    let (session, outbound) = match dispatcher.connect(user_id).await {
        Ok(opened) => opened,
        Err(e) => {
            warn!("Could not open session for {}: {}", user_id, e);
            let mut socket = socket;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    info!("{} ({}) connected to gateway", user_id, session.conn_id());
    run_connection_loop(socket, dispatcher, session, outbound).await;
}

async fn run_connection_loop(
    socket: WebSocket,
    dispatcher: Dispatcher,
    mut session: Session,
    mut outbound: mpsc::UnboundedReceiver<ServerEvent>,
) {
    let (mut sender, mut receiver) = socket.split();
    let handle = session.handle().clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode gateway event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client, strictly in arrival order
    let dispatcher_recv = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => handle_command(&dispatcher_recv, &mut session, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            session.user_id(),
                            session.conn_id(),
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Binary(data) => {
                    debug!("{} ({}) sent {} binary bytes, ignored", session.user_id(), session.conn_id(), data.len());
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                Message::Ping(_) => {}
            }
        }
    });

    // Wait for either task to finish. Aborting the reader does not cancel a
    // send in flight: fan-out runs in its own task.
    let survivor = tokio::select! {
        _ = &mut send_task => recv_task,
        _ = &mut recv_task => send_task,
    };
    // The reader may be inside a join; it must be gone before the registry
    // is swept or the join would land after cleanup.
    abort_and_wait(survivor).await;

    dispatcher.disconnect(&handle).await;
    info!("{} ({}) disconnected from gateway", handle.user_id(), handle.conn_id());
}

/// Aborts a task and waits until it has actually stopped running.
pub(crate) async fn abort_and_wait<T>(task: JoinHandle<T>) {
    task.abort();
    let _ = task.await;
}
