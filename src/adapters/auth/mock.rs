//! Mock session validator for testing.
//!
//! Implements the `SessionValidator` port from an in-memory token map, so
//! gateway tests can connect without minting real JWTs.
//!
//! # Example
//!
//! ```ignore
//! use classroom_events::adapters::auth::MockSessionValidator;
//!
//! let validator = MockSessionValidator::new().with_test_user("valid-token", "user-123");
//!
//! let result = validator.validate("valid-token").await;
//! assert!(result.is_ok());
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::foundation::{AuthError, AuthenticatedUser, UserId};
use crate::ports::SessionValidator;

/// Mock session validator for testing.
///
/// Stores a map of tokens to users. Tokens not in the map return `InvalidToken`.
#[derive(Debug, Default)]
pub struct MockSessionValidator {
    /// Map of valid tokens to their associated users
    tokens: RwLock<HashMap<String, AuthenticatedUser>>,
    /// Optional error to return for all validations (for error testing)
    force_error: RwLock<Option<AuthError>>,
}

impl MockSessionValidator {
    /// Creates a new empty mock validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a valid token that maps to a user.
    pub fn with_user(self, token: impl Into<String>, user: AuthenticatedUser) -> Self {
        self.tokens.write().insert(token.into(), user);
        self
    }

    /// Adds a valid token for a user with the given ID and no session.
    ///
    /// An empty user ID registers nothing.
    pub fn with_test_user(self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        match UserId::new(user_id) {
            Ok(id) => self.with_user(token, AuthenticatedUser::new(id, None)),
            Err(_) => self,
        }
    }

    /// Forces all validations to return the specified error.
    pub fn with_error(self, error: AuthError) -> Self {
        *self.force_error.write() = Some(error);
        self
    }

    /// Clears the forced error and returns to normal operation.
    pub fn clear_error(&self) {
        *self.force_error.write() = None;
    }

    /// Removes a token, making it invalid.
    pub fn remove_token(&self, token: &str) {
        self.tokens.write().remove(token);
    }

    /// Returns the number of registered valid tokens.
    pub fn token_count(&self) -> usize {
        self.tokens.read().len()
    }
}

#[async_trait]
impl SessionValidator for MockSessionValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        if let Some(error) = self.force_error.read().clone() {
            return Err(error);
        }

        self.tokens
            .read()
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_validator_returns_user_for_registered_token() {
        let validator = MockSessionValidator::new().with_test_user("good", "user-123");

        let user = validator.validate("good").await.unwrap();
        assert_eq!(user.id.as_str(), "user-123");
    }

    #[tokio::test]
    async fn mock_validator_returns_invalid_token_for_unknown() {
        let validator = MockSessionValidator::new();
        assert_eq!(
            validator.validate("unknown").await.unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[tokio::test]
    async fn mock_validator_with_error_forces_error() {
        let validator = MockSessionValidator::new()
            .with_test_user("good", "user-123")
            .with_error(AuthError::service_unavailable("down"));

        assert!(validator.validate("good").await.unwrap_err().is_transient());

        validator.clear_error();
        assert!(validator.validate("good").await.is_ok());
    }

    #[tokio::test]
    async fn mock_validator_remove_token_invalidates() {
        let validator = MockSessionValidator::new().with_test_user("good", "user-123");
        validator.remove_token("good");

        assert!(validator.validate("good").await.is_err());
        assert_eq!(validator.token_count(), 0);
    }

    #[test]
    fn mock_validator_skips_empty_user_id() {
        let validator = MockSessionValidator::new().with_test_user("t", "");
        assert_eq!(validator.token_count(), 0);
    }
}
