//! Authentication configuration

use serde::Deserialize;

use super::error::ValidationError;
use super::server::Environment;

/// Handshake credential verification settings.
///
/// Exactly one key source is used: the RS256 public key when present,
/// otherwise the HS256 shared secret.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// PEM-encoded RS256 public key. Literal `\n` sequences are accepted so
    /// the key fits in a single environment variable.
    pub jwt_public_key: Option<String>,

    /// HS256 shared secret (development only)
    pub jwt_secret: Option<String>,

    /// Clock skew tolerated when checking `exp`, in seconds
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
}

impl AuthConfig {
    /// Public key PEM with escaped newlines restored.
    pub fn public_key_pem(&self) -> Option<String> {
        self.jwt_public_key
            .as_ref()
            .filter(|k| !k.trim().is_empty())
            .map(|k| k.replace("\\n", "\n"))
    }

    /// Shared secret, if configured and non-empty.
    pub fn secret(&self) -> Option<&str> {
        self.jwt_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Validate authentication configuration
    ///
    /// Production requires the RS256 public key; a shared secret alone is
    /// only accepted outside production.
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        match (self.public_key_pem(), self.secret()) {
            (None, None) => Err(ValidationError::MissingRequired("AUTH__JWT_PUBLIC_KEY")),
            (None, Some(_)) if *environment == Environment::Production => {
                Err(ValidationError::SharedSecretInProduction)
            }
            _ => Ok(()),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_public_key: None,
            jwt_secret: None,
            leeway_secs: default_leeway(),
        }
    }
}

fn default_leeway() -> u64 {
    30
}
