//! JWT helpers shared by the relay's credential verification.
//!
//! Covers the parts of bearer-token handling that do not depend on a specific
//! signing algorithm:
//! - Size limit checked before any decoding
//! - Clock skew bounds and `iat` validation
//! - The user-token claim set, with `sub` redacted in Debug output
//!
//! Signature verification itself lives with the verifier implementation.
//!
//! ```rust,ignore
//! use common::jwt::{check_token_size, validate_iat, UserClaims, DEFAULT_CLOCK_SKEW};
//!
//! check_token_size(token)?;
//! let claims: UserClaims = /* decode and verify signature */;
//! validate_iat(claims.iat, DEFAULT_CLOCK_SKEW)?;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum accepted token size in bytes (8KB).
///
/// Tokens above this size are rejected before base64 decoding or any
/// signature work. A normal user token is a few hundred bytes.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Upper bound for configurable clock skew (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Errors from the algorithm-independent token checks.
///
/// Every variant renders the same message so callers cannot distinguish
/// failure modes. Details are logged at debug level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token `iat` is further in the future than the allowed skew.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,

    /// Token has an empty subject.
    #[error("The access token is invalid or expired")]
    MissingSubject,
}

/// Claims carried by a user access token.
///
/// `sub` is the stable user identifier the relay binds connections to. It is
/// redacted in Debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// Subject (user id).
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Display name, when the issuer includes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("username", &self.username)
            .finish()
    }
}

impl UserClaims {
    /// Creates claims for `sub` valid from `iat` until `exp`.
    #[must_use]
    pub fn new(sub: impl Into<String>, iat: i64, exp: i64) -> Self {
        Self {
            sub: sub.into(),
            exp,
            iat,
            username: None,
        }
    }

    /// Returns the subject, rejecting empty or whitespace-only values.
    ///
    /// # Errors
    ///
    /// Returns `JwtValidationError::MissingSubject` when `sub` is blank.
    pub fn subject(&self) -> Result<&str, JwtValidationError> {
        if self.sub.trim().is_empty() {
            tracing::debug!(target: "common.jwt", "Token rejected: empty subject");
            return Err(JwtValidationError::MissingSubject);
        }
        Ok(&self.sub)
    }
}

/// Reject tokens larger than [`MAX_JWT_SIZE_BYTES`].
///
/// # Errors
///
/// Returns `JwtValidationError::TokenTooLarge` when the limit is exceeded.
pub fn check_token_size(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }
    Ok(())
}

/// Validate the `iat` claim against the current time plus `clock_skew`.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if `iat` lies more than
/// `clock_skew` ahead of now.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now`.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Callers bound clock_skew by MAX_CLOCK_SKEW
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_possible_wrap)]
mod tests {
    use super::*;

    #[test]
    fn test_limits() {
        assert_eq!(MAX_JWT_SIZE_BYTES, 8192);
        assert_eq!(DEFAULT_CLOCK_SKEW.as_secs(), 300);
        assert!(DEFAULT_CLOCK_SKEW < MAX_CLOCK_SKEW);
    }

    #[test]
    fn test_check_token_size_at_limit_is_accepted() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES);
        assert!(check_token_size(&token).is_ok());
    }

    #[test]
    fn test_check_token_size_over_limit_is_rejected() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            check_token_size(&token),
            Err(JwtValidationError::TokenTooLarge)
        );
    }

    #[test]
    fn test_validate_iat_now_and_past() {
        let now = chrono::Utc::now().timestamp();
        assert!(validate_iat(now, DEFAULT_CLOCK_SKEW).is_ok());
        assert!(validate_iat(now - 3600, DEFAULT_CLOCK_SKEW).is_ok());
    }

    #[test]
    fn test_validate_iat_far_future_is_rejected() {
        let future = chrono::Utc::now().timestamp() + 86_400;
        assert_eq!(
            validate_iat(future, DEFAULT_CLOCK_SKEW),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_validate_iat_at_boundary() {
        let now = 1_700_000_000_i64;

        assert!(validate_iat_at(now + 300, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert_eq!(
            validate_iat_at(now + 301, DEFAULT_CLOCK_SKEW, now),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_user_claims_debug_redacts_sub() {
        let claims = UserClaims::new("user-8f2c", 1_700_000_000, 1_700_003_600);
        let debug_str = format!("{claims:?}");

        assert!(!debug_str.contains("user-8f2c"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("1700003600"));
    }

    #[test]
    fn test_user_claims_subject_rejects_blank() {
        let claims = UserClaims::new("   ", 0, 1);
        assert_eq!(claims.subject(), Err(JwtValidationError::MissingSubject));

        let claims = UserClaims::new("user-1", 0, 1);
        assert_eq!(claims.subject().unwrap(), "user-1");
    }

    #[test]
    fn test_user_claims_username_is_optional() {
        let claims: UserClaims =
            serde_json::from_str(r#"{"sub":"u1","exp":10,"iat":5}"#).unwrap();
        assert_eq!(claims.username, None);

        let json = serde_json::to_string(&claims).unwrap();
        assert!(!json.contains("username"));
    }

    #[test]
    fn test_error_messages_are_generic() {
        let messages = [
            JwtValidationError::TokenTooLarge.to_string(),
            JwtValidationError::IatTooFarInFuture.to_string(),
            JwtValidationError::MissingSubject.to_string(),
        ];
        assert!(messages
            .iter()
            .all(|m| m == "The access token is invalid or expired"));
    }
}
