//! # Relay Test Utilities
//!
//! Shared test utilities for the relay service.
//!
//! ## Modules
//!
//! - `fixtures` - Sessions, access codes and tokens
//! - `mock_identity` - Identity verifier accepting `valid:<identity>` tokens
//! - `mock_store` - In-memory access codes, sessions and audit log
//! - `harness` - A relay wired over the mocks, with test connections
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let session = TestSession::random("host-1");
//!     let store = MockStore::new()
//!         .with_session(&session)
//!         .with_code(TestCode::new("ABC123", &session.key).control().build());
//!     let relay = RelayHarness::new(store);
//!
//!     let mut host = relay.host("host-1", &session.key).await;
//!     let mut guest = relay.guest("guest-1", "ABC123").await;
//!     // ...
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod mock_identity;
pub mod mock_store;

// Re-export commonly used items
pub use fixtures::*;
pub use harness::*;
pub use mock_identity::*;
pub use mock_store::*;
