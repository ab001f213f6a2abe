//! Axum WebSocket endpoint.

use crate::connection::{CloseReason, ConnectionHandle, Outbound};
use crate::errors::RelayError;
use crate::observability::metrics;
use crate::protocol::ServerFrame;
use crate::service::RelayService;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument, trace, warn};

/// Default outbound queue size per connection.
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 256;

/// Default keepalive ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of unanswered pings before the writer gives up.
pub const DEFAULT_MAX_MISSED_PONGS: u32 = 2;

/// Default cap on a single frame or message.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Per-connection transport settings.
#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    pub outbound_queue_size: usize,
    pub ping_interval: Duration,
    pub max_missed_pongs: u32,
    pub max_frame_bytes: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
            ping_interval: DEFAULT_PING_INTERVAL,
            max_missed_pongs: DEFAULT_MAX_MISSED_PONGS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Shared state for the WebSocket routes.
#[derive(Clone)]
pub struct TransportState {
    pub service: RelayService,
    pub settings: TransportSettings,
}

/// Build the relay router. `GET /relay` and `GET /` upgrade to WebSocket.
pub fn relay_router(state: TransportState) -> Router {
    Router::new()
        .route("/relay", get(ws_handler))
        .route("/", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<TransportState>,
) -> impl IntoResponse {
    let max_bytes = state.settings.max_frame_bytes;
    ws.max_frame_size(max_bytes)
        .max_message_size(max_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

#[instrument(skip_all, name = "relay.transport.ws")]
async fn handle_socket(socket: WebSocket, state: TransportState) {
    let TransportState { service, settings } = state;
    let (handle, outbound) = ConnectionHandle::channel(settings.outbound_queue_size);
    let connection_id = handle.id();

    metrics::connection_opened();
    debug!(target: "relay.transport.ws", connection_id = %connection_id, "Connection accepted");

    let (ws_tx, ws_rx) = socket.split();
    let missed_pongs = Arc::new(AtomicU32::new(0));

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        outbound,
        handle.clone(),
        settings,
        Arc::clone(&missed_pongs),
    ));
    let mut reader = tokio::spawn(read_loop(
        ws_rx,
        service.clone(),
        handle.clone(),
        missed_pongs,
    ));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    handle.mark_closed();
    service.connection_closed(connection_id).await;
    metrics::connection_closed();
    debug!(target: "relay.transport.ws", connection_id = %connection_id, "Connection finished");
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    handle: ConnectionHandle,
    settings: TransportSettings,
    missed_pongs: Arc<AtomicU32>,
) {
    let close_token = handle.close_token();
    let mut ping = interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            item = outbound.recv() => match item {
                Some(Outbound::Frame(frame)) => {
                    if !send_frame(&mut ws_tx, &frame).await {
                        break;
                    }
                }
                Some(Outbound::Close(reason)) => {
                    debug!(
                        target: "relay.transport.ws",
                        connection_id = %handle.id(),
                        code = reason.code(),
                        reason = reason.as_str(),
                        "Closing connection"
                    );
                    let _ = ws_tx.send(close_message(reason)).await;
                    break;
                }
                None => break,
            },
            () = close_token.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            _ = ping.tick() => {
                let missed = missed_pongs.fetch_add(1, Ordering::AcqRel);
                if missed >= settings.max_missed_pongs {
                    warn!(
                        target: "relay.transport.ws",
                        connection_id = %handle.id(),
                        missed,
                        "Keepalive timed out"
                    );
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                trace!(target: "relay.transport.ws", connection_id = %handle.id(), "Sent ping");
            }
        }
    }
}

async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    service: RelayService,
    handle: ConnectionHandle,
    missed_pongs: Arc<AtomicU32>,
) {
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => service.handle_text(&handle, &text).await,
            Message::Binary(_) => service.reject(
                &handle,
                &RelayError::MalformedFrame("binary frames are not supported".to_string()),
            ),
            Message::Pong(_) => missed_pongs.store(0, Ordering::Release),
            Message::Close(_) => break,
            // axum answers pings itself
            Message::Ping(_) => {}
        }
    }
}

async fn send_frame(ws_tx: &mut SplitSink<WebSocket, Message>, frame: &ServerFrame) -> bool {
    match frame.encode() {
        Ok(text) => ws_tx.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!(target: "relay.transport.ws", error = %e, "Dropping unencodable frame");
            true
        }
    }
}

fn close_message(reason: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code(),
        reason: reason.as_str().into(),
    }))
}
