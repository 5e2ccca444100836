//! JWT adapter for handshake credential validation.
//!
//! Verifies bearer tokens issued by the classroom backend's login flow:
//!
//! 1. Signature against a locally configured key (RS256 public key, or an
//!    HS256 shared secret in development)
//! 2. Expiry (`exp`), with a small leeway for clock skew
//! 3. Identity from the `user_id` claim (falling back to `sub`) and the
//!    optional `session` claim
//!
//! Whether the session is still active in the user store is the caller's
//! concern; this adapter only proves the token is authentic and current.
//!
//! # Example
//!
//! ```ignore
//! let validator = JwtSessionValidator::from_config(&config.auth)?;
//! let user = validator.validate("eyJ...").await?;
//! ```

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::domain::foundation::{AuthError, AuthenticatedUser, UserId};
use crate::ports::SessionValidator;

/// Claims carried by classroom access tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    /// The user the token was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Standard subject, used when `user_id` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Login session identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,

    /// Expiry timestamp (Unix epoch seconds)
    pub exp: i64,
}

/// Local-key JWT session validator.
pub struct JwtSessionValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtSessionValidator {
    /// RS256 validator from a PEM-encoded public key.
    pub fn rs256(public_key_pem: &str) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes()).map_err(|e| {
            AuthError::service_unavailable(format!("invalid RS256 public key: {}", e))
        })?;
        Ok(Self::with_key(key, Algorithm::RS256))
    }

    /// HS256 validator from a shared secret.
    pub fn hs256(secret: &str) -> Self {
        Self::with_key(DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
    }

    /// Builds the validator the configuration describes. The public key wins
    /// when both are present.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let validator = match (config.public_key_pem(), config.secret()) {
            (Some(pem), _) => Self::rs256(&pem)?,
            (None, Some(secret)) => Self::hs256(secret),
            (None, None) => {
                return Err(AuthError::service_unavailable(
                    "no JWT verification key configured",
                ))
            }
        };
        Ok(validator.with_leeway(config.leeway_secs))
    }

    /// Clock skew tolerated on `exp`.
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.validation.leeway = seconds;
        self
    }

    fn with_key(key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);
        Self { key, validation }
    }
}

#[async_trait]
impl SessionValidator for JwtSessionValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let data = decode::<AccessClaims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => {
                    tracing::debug!("Token expired");
                    AuthError::TokenExpired
                }
                _ => {
                    tracing::debug!(error = %e, "Token validation failed");
                    AuthError::InvalidToken
                }
            }
        })?;
        let claims = data.claims;

        let raw_id = claims.user_id.or(claims.sub).ok_or_else(|| {
            tracing::warn!("Token carries no user id");
            AuthError::InvalidToken
        })?;
        let user_id = UserId::new(raw_id).map_err(|_| {
            tracing::warn!("Token carries an empty user id");
            AuthError::InvalidToken
        })?;

        Ok(AuthenticatedUser::new(user_id, claims.session))
    }
}

impl std::fmt::Debug for JwtSessionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSessionValidator")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "dev-secret";
    const PRIVATE_PEM: &str = include_str!("../../../tests/fixtures/jwt_private.pem");
    const PUBLIC_PEM: &str = include_str!("../../../tests/fixtures/jwt_public.pem");

    fn claims(user_id: Option<&str>, exp_offset: i64) -> AccessClaims {
        AccessClaims {
            user_id: user_id.map(str::to_string),
            sub: None,
            session: Some("sess-1".to_string()),
            exp: chrono::Utc::now().timestamp() + exp_offset,
        }
    }

    fn hs256_token(claims: &AccessClaims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn accepts_valid_hs256_token() {
        let validator = JwtSessionValidator::hs256(SECRET);
        let token = hs256_token(&claims(Some("user-42"), 3600), SECRET);

        let user = validator.validate(&token).await.unwrap();
        assert_eq!(user.id.as_str(), "user-42");
        assert_eq!(user.session.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn falls_back_to_subject() {
        let validator = JwtSessionValidator::hs256(SECRET);
        let mut claims = claims(None, 3600);
        claims.sub = Some("user-7".to_string());
        let token = hs256_token(&claims, SECRET);

        assert_eq!(validator.validate(&token).await.unwrap().id.as_str(), "user-7");
    }

    #[tokio::test]
    async fn rejects_wrong_secret() {
        let validator = JwtSessionValidator::hs256(SECRET);
        let token = hs256_token(&claims(Some("user-42"), 3600), "other-secret");

        assert_eq!(
            validator.validate(&token).await.unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let validator = JwtSessionValidator::hs256(SECRET).with_leeway(0);
        let token = hs256_token(&claims(Some("user-42"), -3600), SECRET);

        assert_eq!(
            validator.validate(&token).await.unwrap_err(),
            AuthError::TokenExpired
        );
    }

    #[tokio::test]
    async fn rejects_token_without_identity() {
        let validator = JwtSessionValidator::hs256(SECRET);
        let token = hs256_token(&claims(None, 3600), SECRET);

        assert_eq!(
            validator.validate(&token).await.unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[tokio::test]
    async fn rejects_garbage() {
        let validator = JwtSessionValidator::hs256(SECRET);
        assert_eq!(
            validator.validate("not-a-jwt").await.unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[tokio::test]
    async fn accepts_valid_rs256_token() {
        let validator = JwtSessionValidator::rs256(PUBLIC_PEM).unwrap();
        let token = encode(
            &Header::new(Algorithm::RS256),
            &claims(Some("user-42"), 3600),
            &EncodingKey::from_rsa_pem(PRIVATE_PEM.as_bytes()).unwrap(),
        )
        .unwrap();

        assert_eq!(validator.validate(&token).await.unwrap().id.as_str(), "user-42");
    }

    #[tokio::test]
    async fn rs256_validator_rejects_hs256_token() {
        let validator = JwtSessionValidator::rs256(PUBLIC_PEM).unwrap();
        let token = hs256_token(&claims(Some("user-42"), 3600), SECRET);

        assert_eq!(
            validator.validate(&token).await.unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[test]
    fn from_config_prefers_public_key() {
        let config = AuthConfig {
            jwt_public_key: Some(PUBLIC_PEM.replace('\n', "\\n")),
            jwt_secret: Some(SECRET.to_string()),
            leeway_secs: 5,
        };
        let validator = JwtSessionValidator::from_config(&config).unwrap();
        assert_eq!(validator.validation.algorithms, vec![Algorithm::RS256]);
        assert_eq!(validator.validation.leeway, 5);
    }

    #[test]
    fn from_config_rejects_bad_pem() {
        let config = AuthConfig {
            jwt_public_key: Some("not a key".to_string()),
            ..Default::default()
        };
        assert!(JwtSessionValidator::from_config(&config).is_err());
    }

    #[test]
    fn from_config_requires_a_key() {
        assert!(JwtSessionValidator::from_config(&AuthConfig::default()).is_err());
    }
}
