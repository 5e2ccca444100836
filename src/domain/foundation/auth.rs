//! Authentication types for the domain layer.
//!
//! These types represent the identity carried by a validated handshake
//! credential. They have no dependency on the token format; any
//! `SessionValidator` implementation can populate them.

use super::UserId;
use thiserror::Error;

/// Identity extracted from a validated bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// The user the credential was issued to.
    pub id: UserId,

    /// Login session the credential belongs to, when the issuer embeds one.
    pub session: Option<String>,
}

impl AuthenticatedUser {
    pub fn new(id: UserId, session: Option<String>) -> Self {
        Self { id, session }
    }
}

/// Authentication errors that can occur during credential validation.
///
/// These errors are domain-centric: they describe what went wrong from the
/// gateway's perspective, not the token library's.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No credential was presented at all.
    #[error("Credential required")]
    MissingCredential,

    /// The token is malformed or has an invalid signature.
    #[error("Invalid token")]
    InvalidToken,

    /// The token has expired (separate from InvalidToken for specific handling).
    #[error("Token expired")]
    TokenExpired,

    /// The validator could not be reached or is misconfigured.
    #[error("Auth service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AuthError {
    /// Creates a service unavailable error with a message.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Returns true if this is a transient error that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::ServiceUnavailable(_))
    }
}
