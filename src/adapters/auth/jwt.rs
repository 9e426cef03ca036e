//! HMAC-signed JWT adapter.
//!
//! Implements the `SessionValidator` port with HS256 tokens signed by a
//! shared secret injected from configuration. Tokens carry:
//!
//! | Claim | Meaning |
//! |---|---|
//! | `user_id` | gateway user identifier |
//! | `username` | display name echoed in the welcome envelope |
//! | `sub` | mirrors `user_id` |
//! | `iat` / `exp` | issue and expiry time (Unix seconds) |
//!
//! Token issuance (login) lives outside the gateway; [`HmacJwtValidator::issue_token`]
//! exists for operators and tests.

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{AuthError, AuthenticatedUser, Timestamp, UserId};
use crate::ports::SessionValidator;

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
struct GatewayClaims {
    user_id: String,
    username: String,
    sub: String,
    iat: i64,
    exp: i64,
}

/// Validates (and issues) HS256 tokens with a shared secret.
pub struct HmacJwtValidator {
    secret: Secret<String>,
    token_ttl_hours: i64,
}

impl HmacJwtValidator {
    pub fn new(secret: Secret<String>) -> Self {
        Self {
            secret,
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
        }
    }

    /// Overrides the lifetime of issued tokens.
    pub fn with_token_ttl_hours(mut self, hours: i64) -> Self {
        self.token_ttl_hours = hours;
        self
    }

    /// Signs a token for `user_id` expiring after the configured TTL.
    pub fn issue_token(&self, user_id: &UserId, username: &str) -> Result<String, AuthError> {
        self.issue_token_at(user_id, username, Timestamp::now())
    }

    /// Signs a token as if issued at `issued_at`.
    pub fn issue_token_at(
        &self,
        user_id: &UserId,
        username: &str,
        issued_at: Timestamp,
    ) -> Result<String, AuthError> {
        let claims = GatewayClaims {
            user_id: user_id.as_str().to_string(),
            username: username.to_string(),
            sub: user_id.as_str().to_string(),
            iat: issued_at.as_unix_secs(),
            exp: issued_at.plus_hours(self.token_ttl_hours).as_unix_secs(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.expose_secret().as_bytes()),
        )
        .map_err(|e| {
            tracing::error!("Failed to sign token: {}", e);
            AuthError::InvalidToken
        })
    }

    fn decode_claims(&self, token: &str) -> Result<GatewayClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let key = DecodingKey::from_secret(self.secret.expose_secret().as_bytes());

        decode::<GatewayClaims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                use jsonwebtoken::errors::ErrorKind;
                match e.kind() {
                    ErrorKind::ExpiredSignature => {
                        tracing::debug!("Token expired");
                        AuthError::TokenExpired
                    }
                    ErrorKind::InvalidAlgorithm => {
                        tracing::warn!("Token signed with unexpected algorithm");
                        AuthError::InvalidToken
                    }
                    _ => {
                        tracing::debug!("Token validation failed: {}", e);
                        AuthError::InvalidToken
                    }
                }
            })
    }
}

#[async_trait]
impl SessionValidator for HmacJwtValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let claims = self.decode_claims(token)?;

        let user_id = UserId::new(&claims.user_id).map_err(|_| {
            tracing::warn!("Token carries empty user_id");
            AuthError::InvalidToken
        })?;

        Ok(AuthenticatedUser::new(user_id, claims.username))
    }
}

impl std::fmt::Debug for HmacJwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacJwtValidator")
            .field("token_ttl_hours", &self.token_ttl_hours)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "a-test-secret-that-is-at-least-32-bytes";

    fn validator() -> HmacJwtValidator {
        HmacJwtValidator::new(Secret::new(SECRET.to_string()))
    }

    fn user() -> UserId {
        UserId::new("user123").unwrap()
    }

    #[tokio::test]
    async fn issued_token_validates_to_same_user() {
        let v = validator();
        let token = v.issue_token(&user(), "admin").unwrap();

        let authenticated = v.validate(&token).await.unwrap();

        assert_eq!(authenticated.id, user());
        assert_eq!(authenticated.username, "admin");
    }

    #[tokio::test]
    async fn token_signed_with_other_secret_is_invalid() {
        let other = HmacJwtValidator::new(Secret::new("another-secret-of-sufficient-length!!".into()));
        let token = other.issue_token(&user(), "admin").unwrap();

        assert_eq!(validator().validate(&token).await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let v = validator();
        let issued_long_ago = Timestamp::now().plus_hours(-48);
        let token = v.issue_token_at(&user(), "admin", issued_long_ago).unwrap();

        assert_eq!(v.validate(&token).await, Err(AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn garbage_token_is_invalid() {
        assert_eq!(
            validator().validate("not.a.jwt").await,
            Err(AuthError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn empty_token_is_missing() {
        assert_eq!(validator().validate("").await, Err(AuthError::MissingToken));
    }

    #[test]
    fn debug_output_hides_secret() {
        let rendered = format!("{:?}", validator());
        assert!(!rendered.contains(SECRET));
    }
}
