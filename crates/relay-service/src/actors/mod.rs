//! Actor owning the shared connection registry.
//!
//! ```text
//! RegistryActor (singleton per relay instance)
//! └── owns Registry (participants, session membership, host count)
//!     ^ RegistryActorHandle (cloned into lifecycle, router, sweeper, health)
//! ```
//!
//! - **Single writer**: all reads and mutations are messages, applied in order
//! - **CancellationToken**: cancelling the actor closes every participant
//! - **Mailbox monitoring**: depth thresholds with metrics (100/500)
//!
//! # Modules
//!
//! - [`registry`] - `RegistryActor` and its handle
//! - [`messages`] - Message types for the registry mailbox
//! - [`metrics`] - Mailbox monitoring

pub mod messages;
pub mod metrics;
pub mod registry;

pub use messages::RegistryMessage;
pub use metrics::{MailboxLevel, MailboxMonitor};
pub use registry::RegistryActorHandle;
