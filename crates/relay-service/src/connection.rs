//! Outbound side of a relay connection.
//!
//! A `ConnectionHandle` is the opaque transport handle stored in the registry.
//! It pairs a minted [`ConnectionId`] with a bounded outbound queue drained by
//! the transport's writer task, plus a close token. Delivery never blocks: a
//! full or closed queue drops the frame for that recipient.

use crate::observability::metrics;
use crate::protocol::ServerFrame;

use common::types::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why the relay closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer host connection for the same session replaced this one.
    SupersededByReconnect,
    /// The liveness sweep found the transport no longer open.
    Stale,
    /// The relay is shutting down.
    ServerShutdown,
}

impl CloseReason {
    /// WebSocket close code sent with the close frame.
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            CloseReason::SupersededByReconnect => 4000,
            CloseReason::Stale => 4001,
            CloseReason::ServerShutdown => 1001,
        }
    }

    /// Close frame reason text.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseReason::SupersededByReconnect => "superseded by reconnect",
            CloseReason::Stale => "stale connection",
            CloseReason::ServerShutdown => "server shutting down",
        }
    }

    /// Label for the `relay_evictions_total` metric.
    #[must_use]
    pub const fn metric_label(&self) -> &'static str {
        match self {
            CloseReason::SupersededByReconnect => "superseded",
            CloseReason::Stale => "stale",
            CloseReason::ServerShutdown => "shutdown",
        }
    }
}

/// Item queued for the transport writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A frame to serialize and send.
    Frame(ServerFrame),
    /// Send a close frame and stop writing.
    Close(CloseReason),
}

/// Why a frame was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Outbound queue is full.
    Backpressure,
    /// Connection is closed or closing.
    Closed,
}

impl DeliveryFailure {
    /// Returns the failure as a metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeliveryFailure::Backpressure => "backpressure",
            DeliveryFailure::Closed => "closed",
        }
    }
}

/// Handle to one relay connection's outbound side.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle with a fresh id and an outbound queue of `buffer` items.
    ///
    /// The receiver belongs to the transport writer. Dropping it marks the
    /// handle as no longer open.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let handle = Self {
            id: ConnectionId::new(),
            sender,
            closed: CancellationToken::new(),
        };
        (handle, receiver)
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the transport can still accept frames.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.sender.is_closed()
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryFailure` when the queue is full or the connection is
    /// closed. Callers treat both as a silent per-recipient drop.
    pub fn deliver(&self, frame: ServerFrame) -> Result<(), DeliveryFailure> {
        if self.closed.is_cancelled() {
            return Err(DeliveryFailure::Closed);
        }
        self.sender
            .try_send(Outbound::Frame(frame))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryFailure::Backpressure,
                mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed,
            })
    }

    /// Queue a frame, counting a drop instead of returning it.
    ///
    /// Returns `true` if the frame was queued.
    pub fn deliver_or_drop(&self, frame: ServerFrame) -> bool {
        match self.deliver(frame) {
            Ok(()) => true,
            Err(failure) => {
                metrics::record_delivery_dropped(failure.as_str());
                debug!(
                    target: "relay.connection",
                    connection_id = %self.id,
                    reason = failure.as_str(),
                    "Dropped frame for unwritable connection"
                );
                false
            }
        }
    }

    /// Close the connection with `reason`. Idempotent.
    ///
    /// The close frame is queued behind pending frames. If the queue is full
    /// the writer still observes the close token and closes without a reason.
    pub fn close(&self, reason: CloseReason) {
        if self.closed.is_cancelled() {
            return;
        }
        let _ = self.sender.try_send(Outbound::Close(reason));
        self.closed.cancel();
    }

    /// Record that the transport itself has gone away.
    pub fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// Token cancelled once the connection is closed or closing.
    #[must_use]
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}
