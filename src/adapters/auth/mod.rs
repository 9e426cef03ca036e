//! Authentication adapters.
//!
//! Implementations of the `SessionValidator` port:
//!
//! - `jwt` - HS256 tokens signed with the configured shared secret
//! - `mock` - Fixed token table for tests

mod jwt;
mod mock;

pub use jwt::{HmacJwtValidator, DEFAULT_TOKEN_TTL_HOURS};
pub use mock::MockSessionValidator;
