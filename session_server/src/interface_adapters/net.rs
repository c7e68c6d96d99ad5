use crate::domain::{PeerId, ReplicationMessage, Snapshot};
use crate::interface_adapters::http::ErrorResponse;
use crate::interface_adapters::protocol::{ClientMessage, ServerMessage};
use crate::interface_adapters::state::AppState;
use crate::interface_adapters::utils::rng::next_peer_id;
use crate::use_cases::{Outbound, SessionEvent, SessionHandle};

use axum::{
    Error, Json,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::SinkExt;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, info_span, warn};

#[derive(Debug)]
enum NetError {
    // Categorizes connection lifecycle failures so callers can decide policy.
    #[allow(dead_code)]
    Ws(axum::Error),
    #[allow(dead_code)]
    Serialization(serde_json::Error),
    SessionClosed,
    UpdatesClosed,
}

impl From<axum::Error> for NetError {
    fn from(e: axum::Error) -> Self {
        NetError::Ws(e)
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if state.session.is_closed() {
        let body = ErrorResponse {
            error: "session closed".to_string(),
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }

    let session = state.session.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, session))
}

async fn handle_socket(mut socket: WebSocket, session: SessionHandle) {
    let peer = next_peer_id();
    let span = info_span!("conn", session = %session.session_id, peer = %peer);
    let _enter = span.enter();

    let mut ctx = match bootstrap_connection(&mut socket, &session, peer).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = ?e, "failed to bootstrap connection");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "bootstrap failed".into(),
                })))
                .await;
            let _ = socket.close().await;
            return;
        }
    };

    info!("client connected");

    // Main Client Loop
    if let Err(e) = run_client_loop(&mut socket, &mut ctx).await {
        warn!(error = ?e, "client loop exited with error");
    }
}

async fn send_message(socket: &mut WebSocket, msg: &ServerMessage) -> Result<usize, NetError> {
    // Serialize message safely; log JSON errors instead of panicking
    let txt = serde_json::to_string(msg).map_err(NetError::Serialization)?;
    let bytes = txt.len();
    socket
        .send(Message::Text(txt.into()))
        .await
        .map_err(NetError::Ws)?;
    Ok(bytes)
}

struct ConnCtx {
    pub peer: PeerId,
    pub session: SessionHandle,
    pub updates_rx: broadcast::Receiver<Outbound>,
    pub latest_rx: watch::Receiver<Snapshot>,
    // Count lag recovery snapshots sent to this client.
    pub lag_recovery_count: u64,

    pub msgs_in: u64,
    pub msgs_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,

    pub invalid_json: u32,

    pub last_events_full_log: Instant,
    pub last_updates_lag_log: Instant,
    pub last_invalid_message_log: Instant,

    pub close_frame: Option<CloseFrame>,
}

async fn bootstrap_connection(
    socket: &mut WebSocket,
    session: &SessionHandle,
    peer: PeerId,
) -> Result<ConnCtx, NetError> {
    // Subscribe to updates *before* doing anything else (awaits) so the join snapshot is not missed.
    let updates_rx = session.subscribe_updates();
    let latest_rx = session.watch_snapshot();

    // Tell the client "This is who you are".
    let identity_msg = ServerMessage::Identity { peer_id: peer.0 };
    let _ = send_message(socket, &identity_msg).await?;

    // The session answers Join with a snapshot addressed to this peer.
    session
        .send(SessionEvent::Join { peer })
        .await
        .map_err(|_| NetError::SessionClosed)?;

    let now = Instant::now() - LOG_THROTTLE;
    Ok(ConnCtx {
        peer,
        session: session.clone(),
        updates_rx,
        latest_rx,
        lag_recovery_count: 0,

        msgs_in: 0,
        msgs_out: 0,
        bytes_in: 0,
        bytes_out: 0,

        invalid_json: 0,

        last_events_full_log: now,
        last_updates_lag_log: now,
        last_invalid_message_log: now,

        close_frame: None,
    })
}

enum LoopControl {
    Continue,
    Disconnect,
}

const LOG_THROTTLE: Duration = Duration::from_secs(2);
const MAX_INVALID_JSON: u32 = 10;

fn should_log(last: &mut Instant) -> bool {
    if last.elapsed() >= LOG_THROTTLE {
        *last = Instant::now();
        true
    } else {
        false
    }
}

// Proposals are fire-and-forget; a full inbox drops them like any lost proposal.
fn forward_event(
    peer: PeerId,
    session: &SessionHandle,
    event: SessionEvent,
    last_events_full_log: &mut Instant,
) -> Result<LoopControl, NetError> {
    match session.try_send(event) {
        Ok(()) => Ok(LoopControl::Continue),
        Err(mpsc::error::TrySendError::Full(_evt)) => {
            if should_log(last_events_full_log) {
                warn!(%peer, "session inbox full; dropping event");
            }
            Ok(LoopControl::Continue)
        }
        Err(mpsc::error::TrySendError::Closed(_evt)) => Err(NetError::SessionClosed),
    }
}

async fn run_client_loop(socket: &mut WebSocket, ctx: &mut ConnCtx) -> Result<(), NetError> {
    let peer = ctx.peer;

    // Split borrows so `tokio::select!` can hold them concurrently.
    let ConnCtx {
        session,
        updates_rx,
        latest_rx,
        lag_recovery_count,
        msgs_in,
        msgs_out,
        bytes_in,
        bytes_out,
        invalid_json,
        last_events_full_log,
        last_updates_lag_log,
        last_invalid_message_log,
        close_frame,
        ..
    } = ctx;

    let mut fatal: Option<NetError> = None;

    loop {
        let disconnect: bool = tokio::select! {
            // Incoming Message from Client
            incoming = socket.recv() => {
                match handle_incoming_ws(
                    incoming,
                    peer,
                    session,
                    msgs_in,
                    bytes_in,
                    invalid_json,
                    last_events_full_log,
                    last_invalid_message_log,
                    close_frame,
                ) {
                    Ok(LoopControl::Continue) => false,
                    Ok(LoopControl::Disconnect) => true,
                    Err(e) => {
                        fatal = Some(e);
                        true
                    }
                }
            }

            // Outgoing Replication Update
            update = updates_rx.recv() => {
                match update {
                    Ok(outbound) if outbound.is_for(peer) => {
                        match forward_update(outbound.message, socket, msgs_out, bytes_out).await {
                            LoopControl::Continue => false,
                            LoopControl::Disconnect => true,
                        }
                    }
                    Ok(_) => false,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        if should_log(last_updates_lag_log) {
                            warn!(missed = n, "replication updates lagged; sending snapshot");
                        }

                        // Resync strategy: send the latest published snapshot. The client
                        // ignores anything in it that is not newer than what it holds.
                        let latest = latest_rx.borrow().clone();
                        *lag_recovery_count += 1;
                        let outcome = forward_update(
                            ReplicationMessage::Snapshot(latest),
                            socket,
                            msgs_out,
                            bytes_out,
                        )
                        .await;
                        debug!(%peer, count = *lag_recovery_count, "sent lag recovery snapshot");

                        match outcome {
                            LoopControl::Continue => false,
                            LoopControl::Disconnect => true,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        fatal = Some(NetError::UpdatesClosed);
                        true
                    }
                }
            }
        };

        if disconnect {
            if let Some(frame) = close_frame.take() {
                let _ = socket.send(Message::Close(Some(frame))).await;
            }
            if let Err(err) = socket.close().await.map_err(NetError::Ws) {
                debug!(error = ?err, "socket close error");
            }
            break;
        }
    }

    disconnect_cleanup(
        peer,
        session,
        *msgs_in,
        *msgs_out,
        *bytes_in,
        *bytes_out,
        *invalid_json,
        *lag_recovery_count,
    )
    .await;

    if let Some(err) = fatal {
        Err(err)
    } else {
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_incoming_ws(
    incoming: Option<Result<Message, Error>>,
    peer: PeerId,
    session: &SessionHandle,
    msgs_in: &mut u64,
    bytes_in: &mut u64,
    invalid_json: &mut u32,
    last_events_full_log: &mut Instant,
    last_invalid_message_log: &mut Instant,
    close_frame: &mut Option<CloseFrame>,
) -> Result<LoopControl, NetError> {
    match incoming {
        Some(Ok(msg)) => match msg {
            Message::Text(text) => {
                *msgs_in += 1;
                *bytes_in += text.len() as u64;

                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        forward_event(peer, session, message.into_event(peer), last_events_full_log)
                    }
                    Err(parse_err) => {
                        *invalid_json += 1;
                        if should_log(last_invalid_message_log) {
                            warn!(
                                %peer,
                                bytes = text.len(),
                                error = %parse_err,
                                "failed to parse client message"
                            );
                        }

                        if *invalid_json > MAX_INVALID_JSON {
                            *close_frame = Some(CloseFrame {
                                code: close_code::POLICY,
                                reason: "too many invalid messages".into(),
                            });
                            return Ok(LoopControl::Disconnect);
                        }

                        Ok(LoopControl::Continue)
                    }
                }
            }
            Message::Binary(_) => {
                *close_frame = Some(CloseFrame {
                    code: close_code::UNSUPPORTED,
                    reason: "binary messages not supported".into(),
                });
                Ok(LoopControl::Disconnect)
            }
            Message::Ping(_) | Message::Pong(_) => Ok(LoopControl::Continue),
            Message::Close(_) => Ok(LoopControl::Disconnect),
        },
        Some(Err(e)) => {
            warn!(%peer, error = %e, "websocket recv error");
            Ok(LoopControl::Disconnect)
        }
        None => {
            info!(%peer, "websocket closed");
            Ok(LoopControl::Disconnect)
        }
    }
}

async fn forward_update(
    message: ReplicationMessage,
    socket: &mut WebSocket,
    msgs_out: &mut u64,
    bytes_out: &mut u64,
) -> LoopControl {
    match send_message(socket, &ServerMessage::from(message)).await {
        Ok(bytes) => {
            *msgs_out += 1;
            *bytes_out += bytes as u64;
            LoopControl::Continue
        }
        Err(err) => {
            // Log unexpected send failures; disconnect will follow immediately.
            warn!(error = ?err, "failed to send replication update");
            LoopControl::Disconnect
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn disconnect_cleanup(
    peer: PeerId,
    session: &SessionHandle,
    msgs_in: u64,
    msgs_out: u64,
    bytes_in: u64,
    bytes_out: u64,
    invalid_json: u32,
    lag_recovery_count: u64,
) {
    // A closed session has nothing left to forget.
    if session.send(SessionEvent::Leave { peer }).await.is_err() {
        debug!(%peer, "session closed before leave");
    }

    debug!(
        %peer,
        msgs_in,
        msgs_out,
        bytes_in,
        bytes_out,
        invalid_json,
        lag_recovery_count,
        "connection stats"
    );
    info!(%peer, "client disconnected");
}
