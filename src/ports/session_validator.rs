//! Session validation port for bearer token validation.
//!
//! The WebSocket upgrade handler calls this port before accepting the
//! socket. It is provider-agnostic: the HMAC JWT adapter is used in
//! production and a mock in tests.

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser};

/// Validates bearer tokens and extracts user identity.
///
/// # Contract
///
/// Implementations must:
/// - Validate the token signature
/// - Validate the expiry claim
/// - Return `AuthError::InvalidToken` for malformed/bad signature tokens
/// - Return `AuthError::TokenExpired` for expired tokens
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Validate a raw token (without "Bearer " prefix) and return the user.
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::UserId;

    struct FixedTokenValidator;

    #[async_trait]
    impl SessionValidator for FixedTokenValidator {
        async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
            match token {
                "good" => Ok(AuthenticatedUser::new(UserId::new("user123").unwrap(), "admin")),
                "old" => Err(AuthError::TokenExpired),
                _ => Err(AuthError::InvalidToken),
            }
        }
    }

    #[tokio::test]
    async fn validator_is_usable_as_trait_object() {
        let validator: std::sync::Arc<dyn SessionValidator> = std::sync::Arc::new(FixedTokenValidator);

        assert_eq!(validator.validate("good").await.unwrap().username, "admin");
        assert_eq!(validator.validate("old").await, Err(AuthError::TokenExpired));
        assert_eq!(validator.validate("bad").await, Err(AuthError::InvalidToken));
    }
}
