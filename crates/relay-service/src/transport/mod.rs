//! WebSocket transport.
//!
//! One reader and one writer task per accepted socket. The reader decodes
//! text frames into [`RelayService`](crate::service::RelayService) calls; the
//! writer drains the connection's outbound queue and drives the keepalive.

pub mod ws;

pub use ws::{relay_router, TransportSettings, TransportState};
