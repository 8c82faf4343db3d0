use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::metrics::{SESSIONS_ACTIVE, SESSIONS_TOTAL};
use crate::models::events::ServerEvent;
use crate::services::session_worker::{SessionWorker, SubmitError};
use crate::services::AppState;

/// Unanswered heartbeats before the connection is treated as lost.
const MAX_MISSED_PONGS: u8 = 3;

/// Outbound events buffered between the session worker and the socket.
const OUTBOUND_BUFFER: usize = 64;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let connection_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("connection", connection_id = %connection_id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, connection_id).instrument(span))
}

/// One socket, one session. The session dies with the socket.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, connection_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let (events_tx, mut events_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);
    let worker = SessionWorker::spawn(
        state.new_session(connection_id),
        state.config.ws.intent_queue,
        events_tx,
    );

    SESSIONS_ACTIVE.inc();
    SESSIONS_TOTAL.with_label_values(&["connected"]).inc();
    info!("Client connected");

    let period = Duration::from_secs(state.config.ws.heartbeat_seconds);
    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match worker.try_submit(text.as_str().to_owned()) {
                            Ok(()) => {}
                            Err(SubmitError::Busy) => {
                                let frame = ServerEvent::error(SubmitError::Busy.to_string()).to_frame();
                                if sender.send(Message::Text(frame.into())).await.is_err() {
                                    debug!("Failed to send busy error, client disconnected");
                                    break;
                                }
                            }
                            Err(SubmitError::Closed) => {
                                debug!("Session worker stopped");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let frame = ServerEvent::error("Binary frames are not supported").to_frame();
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = events_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                debug!(event = event.event_name(), "Sending event");
                if sender.send(Message::Text(event.to_frame().into())).await.is_err() {
                    debug!("Failed to send event, client disconnected");
                    break;
                }
            }

            _ = heartbeat.tick() => {
                // Each ping gets a full period to be answered before it counts as missed
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
            }
        }
    }

    // Aborts any intent still waiting on feedback
    drop(worker);
    SESSIONS_ACTIVE.dec();
    info!("Client disconnected");
}
