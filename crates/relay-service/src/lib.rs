//! Relay Service Library
//!
//! A session-scoped message broker for end-to-end encrypted screen sharing.
//! Hosts and guests connect over WebSocket, join a session, and exchange
//! opaque encrypted payloads. The relay never inspects payloads; it only
//! decides who may talk to whom.
//!
//! # Architecture
//!
//! ```text
//! transport::ws (reader + writer task per socket)
//! └── service::RelayService (per-frame dispatch)
//!     ├── lifecycle::LifecycleController (join, leave, disconnect)
//!     │   └── collaborators (identity, access codes, sessions, audit)
//!     └── router::SessionRouter (fan-out)
//!         └── actors::RegistryActorHandle (sole owner of the registry)
//!             └── presence (join and departure frames, in mutation order)
//! sweeper (periodic stale eviction)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One host per session**: a host reconnect displaces the previous host
//! - **Actor-owned registry**: all membership mutation is serialized through
//!   one actor, so concurrent joins never leave two hosts
//! - **Best-effort delivery**: bounded outbound queues; a slow recipient
//!   loses frames instead of stalling the sender
//!
//! # Modules
//!
//! - [`actors`] - Registry actor and mailbox monitoring
//! - [`collaborators`] - Identity, access code, session and audit traits plus adapters
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with signaling error codes
//! - [`protocol`] - Wire frames

pub mod actors;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod errors;
pub mod lifecycle;
pub mod observability;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod repositories;
pub mod router;
pub mod service;
pub mod sweeper;
pub mod transport;
