//! Common utilities and types shared across relay crates.

#![warn(clippy::pedantic)]

/// Module for common identifier types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limit, iat validation, claims)
pub mod jwt;
