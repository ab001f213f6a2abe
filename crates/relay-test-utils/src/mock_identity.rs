//! Mock identity verifier.
//!
//! Accepts tokens of the form `valid:<identity>` (see
//! [`token_for`](crate::fixtures::token_for)) and rejects everything else.

use crate::fixtures::VALID_TOKEN_PREFIX;

use relay_service::collaborators::IdentityVerifier;
use relay_service::errors::RelayError;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Mock identity verifier for relay tests.
#[derive(Debug)]
pub struct MockIdentityVerifier {
    reject_all: bool,
    call_count: AtomicUsize,
}

impl Default for MockIdentityVerifier {
    fn default() -> Self {
        Self::accepting()
    }
}

impl MockIdentityVerifier {
    /// Create a verifier that accepts `valid:<identity>` tokens.
    #[must_use]
    pub fn accepting() -> Self {
        Self {
            reject_all: false,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Create a verifier that rejects every token.
    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            reject_all: true,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IdentityVerifier for MockIdentityVerifier {
    async fn verify_credential(&self, token: &str) -> Result<String, RelayError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.reject_all {
            return Err(RelayError::InvalidCredential);
        }
        match token.strip_prefix(VALID_TOKEN_PREFIX) {
            Some(identity) if !identity.is_empty() => Ok(identity.to_string()),
            _ => Err(RelayError::InvalidCredential),
        }
    }
}
