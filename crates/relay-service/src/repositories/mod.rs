//! Repository layer for the relay's collaborator data.
//!
//! The schema is owned by the business API; the relay reads codes and
//! sessions and writes usage and connection audit rows. Queries are runtime
//! `sqlx::query` calls with bound parameters.

pub mod connections;
pub mod share_codes;
pub mod share_sessions;

pub use connections::ConnectionsRepository;
pub use share_codes::ShareCodesRepository;
pub use share_sessions::{SessionRow, ShareSessionsRepository};
