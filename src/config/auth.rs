//! Authentication configuration

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

use super::error::ValidationError;
use super::server::Environment;

/// Minimum HS256 secret length accepted in production.
pub const MIN_PRODUCTION_SECRET_BYTES: usize = 32;

/// Authentication configuration (HS256 shared secret)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Signing key for client bearer tokens
    pub jwt_secret: Secret<String>,

    /// Lifetime of tokens issued by this process
    #[serde(default = "default_token_ttl")]
    pub token_ttl_hours: i64,
}

impl AuthConfig {
    /// Validate authentication configuration
    ///
    /// The secret is always required. In production it must also be long
    /// enough for HS256.
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        let secret = self.jwt_secret.expose_secret();
        if secret.is_empty() {
            return Err(ValidationError::MissingRequired("AUTH__JWT_SECRET"));
        }
        if *environment == Environment::Production && secret.len() < MIN_PRODUCTION_SECRET_BYTES {
            return Err(ValidationError::SecretTooShort(MIN_PRODUCTION_SECRET_BYTES));
        }
        if self.token_ttl_hours <= 0 {
            return Err(ValidationError::InvalidTokenTtl);
        }
        Ok(())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: Secret::new(String::new()),
            token_ttl_hours: default_token_ttl(),
        }
    }
}

fn default_token_ttl() -> i64 {
    24
}
