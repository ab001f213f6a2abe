//! HS256 bearer-token verification.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted; the shared secret stays in a `SecretString`
//! - `exp` is validated with leeway equal to the clock skew, `iat` against the same skew
//! - Every failure maps to one generic `InvalidCredential`; details are debug-logged

use super::IdentityVerifier;
use crate::errors::RelayError;

use common::jwt::{check_token_size, validate_iat, UserClaims};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::time::Duration;
use tracing::instrument;

/// Verifies user access tokens signed with the shared HS256 secret.
pub struct JwtIdentityVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    clock_skew: Duration,
}

impl JwtIdentityVerifier {
    /// Create a verifier for `secret` tolerating `clock_skew`.
    #[must_use]
    pub fn new(secret: &SecretString, clock_skew: Duration) -> Self {
        let decoding_key = DecodingKey::from_secret(secret.expose_secret().as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = clock_skew.as_secs();
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            decoding_key,
            validation,
            clock_skew,
        }
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidCredential` for all validation failures.
    pub fn verify(&self, token: &str) -> Result<UserClaims, RelayError> {
        check_token_size(token).map_err(|_| RelayError::InvalidCredential)?;

        let token_data =
            decode::<UserClaims>(token, &self.decoding_key, &self.validation).map_err(|e| {
                tracing::debug!(target: "relay.auth.jwt", error = %e, "Token verification failed");
                RelayError::InvalidCredential
            })?;
        let claims = token_data.claims;

        if let Err(e) = validate_iat(claims.iat, self.clock_skew) {
            tracing::debug!(target: "relay.auth.jwt", error = ?e, "Token iat validation failed");
            return Err(RelayError::InvalidCredential);
        }
        claims
            .subject()
            .map_err(|_| RelayError::InvalidCredential)?;

        Ok(claims)
    }
}

#[async_trait::async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    #[instrument(skip_all, name = "relay.auth.jwt")]
    async fn verify_credential(&self, token: &str) -> Result<String, RelayError> {
        let claims = self.verify(token)?;
        tracing::debug!(target: "relay.auth.jwt", "Token validated successfully");
        Ok(claims.sub)
    }
}
